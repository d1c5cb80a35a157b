//! The catalog: durable store of nodes, containers, and managed
//! services.
//!
//! The catalog is the single source of truth bridging the stateful
//! cluster and the stateless HTTP handlers. It owns a SQLite pool;
//! every operation acquires and releases a pooled connection, and
//! multi-row mutations (service removal cascades) run inside one
//! transaction. Callers must not hold a connection across an outbound
//! RPC — the API here is shaped so they never have to.

pub mod models;

use std::str::FromStr;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

pub use models::{
    ContainerRecord, ContainerStatus, NodeRecord, ServiceRecord, ServiceStatus, SqlServiceRecord,
    UsageRecord,
};

use crate::services::ServiceKind;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    node_id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    is_healthy BOOLEAN NOT NULL DEFAULT TRUE,
    last_health_check TIMESTAMP NOT NULL,
    last_seen TIMESTAMP NOT NULL,
    registered_at TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS containers (
    container_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    node_id TEXT NOT NULL REFERENCES nodes(node_id),
    image TEXT NOT NULL,
    name TEXT,
    status TEXT NOT NULL DEFAULT 'running',
    created_at TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS bucket_services (
    service_id TEXT PRIMARY KEY,
    container_id TEXT NOT NULL REFERENCES containers(container_id),
    node_id TEXT NOT NULL REFERENCES nodes(node_id),
    ip_address TEXT NOT NULL,
    port INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'starting',
    is_healthy BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMP NOT NULL,
    last_health_check TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS db_services (
    service_id TEXT PRIMARY KEY,
    container_id TEXT NOT NULL REFERENCES containers(container_id),
    node_id TEXT NOT NULL REFERENCES nodes(node_id),
    ip_address TEXT NOT NULL,
    port INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'starting',
    is_healthy BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMP NOT NULL,
    last_health_check TIMESTAMP NOT NULL,
    max_cpu_percent INTEGER NOT NULL DEFAULT 90,
    max_ram_mb INTEGER NOT NULL DEFAULT 2048,
    max_disk_gb INTEGER NOT NULL DEFAULT 10,
    database_name TEXT NOT NULL DEFAULT 'main',
    instance_name TEXT
);

CREATE TABLE IF NOT EXISTS nosql_services (
    service_id TEXT PRIMARY KEY,
    container_id TEXT NOT NULL REFERENCES containers(container_id),
    node_id TEXT NOT NULL REFERENCES nodes(node_id),
    ip_address TEXT NOT NULL,
    port INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'starting',
    is_healthy BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMP NOT NULL,
    last_health_check TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS queue_services (
    service_id TEXT PRIMARY KEY,
    container_id TEXT NOT NULL REFERENCES containers(container_id),
    node_id TEXT NOT NULL REFERENCES nodes(node_id),
    ip_address TEXT NOT NULL,
    port INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'starting',
    is_healthy BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMP NOT NULL,
    last_health_check TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS secrets_services (
    service_id TEXT PRIMARY KEY,
    container_id TEXT NOT NULL REFERENCES containers(container_id),
    node_id TEXT NOT NULL REFERENCES nodes(node_id),
    ip_address TEXT NOT NULL,
    port INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'starting',
    is_healthy BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMP NOT NULL,
    last_health_check TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS billing_usage (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    service_id TEXT NOT NULL,
    service_type TEXT NOT NULL,
    usage_amount REAL NOT NULL,
    unit TEXT NOT NULL,
    cost REAL NOT NULL,
    timestamp TIMESTAMP NOT NULL,
    extra_data TEXT
);
CREATE INDEX IF NOT EXISTS idx_billing_usage_timestamp ON billing_usage(timestamp);

CREATE TABLE IF NOT EXISTS billing_invoices (
    invoice_id TEXT PRIMARY KEY,
    period TEXT NOT NULL,
    start_date TIMESTAMP NOT NULL,
    end_date TIMESTAMP NOT NULL,
    total_amount REAL NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    due_date TIMESTAMP NOT NULL,
    usage_data TEXT,
    created_at TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS alert_rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    service_id TEXT NOT NULL,
    metric_type TEXT NOT NULL,
    operator TEXT NOT NULL,
    threshold_value REAL NOT NULL,
    aggregation_function TEXT NOT NULL DEFAULT 'AVG',
    severity TEXT NOT NULL DEFAULT 'warning',
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS alerts (
    alert_id TEXT PRIMARY KEY,
    rule_id INTEGER NOT NULL REFERENCES alert_rules(id),
    service_id TEXT NOT NULL,
    severity TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    message TEXT NOT NULL,
    current_value REAL NOT NULL,
    triggered_at TIMESTAMP NOT NULL,
    resolved_at TIMESTAMP,
    acknowledged_at TIMESTAMP
);
"#;

const SERVICE_COLUMNS: &str = "service_id, container_id, node_id, ip_address, port, status, \
                               is_healthy, created_at, last_health_check";

const SQL_SERVICE_COLUMNS: &str = "service_id, container_id, node_id, ip_address, port, status, \
                                   is_healthy, created_at, last_health_check, max_cpu_percent, \
                                   max_ram_mb, max_disk_gb, database_name, instance_name";

/// Partial update of a SQL service's declared configuration.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct SqlServiceConfigUpdate {
    pub max_cpu_percent: Option<i64>,
    pub max_ram_mb: Option<i64>,
    pub max_disk_gb: Option<i64>,
    pub instance_name: Option<String>,
}

impl SqlServiceConfigUpdate {
    pub fn touches_limits(&self) -> bool {
        self.max_cpu_percent.is_some() || self.max_ram_mb.is_some() || self.max_disk_gb.is_some()
    }
}

#[derive(Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Open (creating if necessary) the catalog at `url` and bootstrap
    /// the schema.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // An in-memory store exists per connection; it must be pinned
        // to a single never-expiring connection or the pool would hand
        // out empty databases.
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(options).await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    /// Create or update a node registration.
    ///
    /// Re-registration overwrites the URL, refreshes `last_seen`, and
    /// forces the node healthy; the next liveness sweep confirms or
    /// corrects. Row count is idempotent.
    pub async fn register_node(&self, node_id: &str, url: &str) -> Result<NodeRecord, sqlx::Error> {
        let now = Utc::now();
        let existing = self.get_node(node_id).await?;
        if existing.is_some() {
            sqlx::query(
                "UPDATE nodes SET url = ?, last_seen = ?, is_healthy = TRUE WHERE node_id = ?",
            )
            .bind(url)
            .bind(now)
            .bind(node_id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "INSERT INTO nodes (node_id, url, is_healthy, last_health_check, last_seen, registered_at) \
                 VALUES (?, ?, TRUE, ?, ?, ?)",
            )
            .bind(node_id)
            .bind(url)
            .bind(now)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
        }
        self.get_node(node_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn get_node(&self, node_id: &str) -> Result<Option<NodeRecord>, sqlx::Error> {
        sqlx::query_as::<_, NodeRecord>("SELECT * FROM nodes WHERE node_id = ?")
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn list_nodes(&self) -> Result<Vec<NodeRecord>, sqlx::Error> {
        sqlx::query_as::<_, NodeRecord>("SELECT * FROM nodes ORDER BY registered_at")
            .fetch_all(&self.pool)
            .await
    }

    /// Healthy nodes in registration order. The deterministic order is
    /// what makes the default first-healthy selector reproducible.
    pub async fn healthy_nodes(&self) -> Result<Vec<NodeRecord>, sqlx::Error> {
        sqlx::query_as::<_, NodeRecord>(
            "SELECT * FROM nodes WHERE is_healthy = TRUE ORDER BY registered_at",
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Write back the outcome of a liveness probe.
    pub async fn set_node_health(&self, node_id: &str, healthy: bool) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE nodes SET is_healthy = ?, last_health_check = ? WHERE node_id = ?")
            .bind(healthy)
            .bind(Utc::now())
            .bind(node_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_nodes(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM nodes")
            .fetch_one(&self.pool)
            .await
    }

    pub async fn count_healthy_nodes(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM nodes WHERE is_healthy = TRUE")
            .fetch_one(&self.pool)
            .await
    }

    // =========================================================================
    // Containers
    // =========================================================================

    pub async fn insert_container(&self, container: &ContainerRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO containers (container_id, user_id, node_id, image, name, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&container.container_id)
        .bind(&container.user_id)
        .bind(&container.node_id)
        .bind(&container.image)
        .bind(&container.name)
        .bind(container.status)
        .bind(container.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_container(
        &self,
        container_id: &str,
    ) -> Result<Option<ContainerRecord>, sqlx::Error> {
        sqlx::query_as::<_, ContainerRecord>("SELECT * FROM containers WHERE container_id = ?")
            .bind(container_id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn list_containers(&self) -> Result<Vec<ContainerRecord>, sqlx::Error> {
        sqlx::query_as::<_, ContainerRecord>("SELECT * FROM containers ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn containers_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ContainerRecord>, sqlx::Error> {
        sqlx::query_as::<_, ContainerRecord>(
            "SELECT * FROM containers WHERE user_id = ? ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn running_containers(&self) -> Result<Vec<ContainerRecord>, sqlx::Error> {
        sqlx::query_as::<_, ContainerRecord>(
            "SELECT * FROM containers WHERE status = 'running' ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn set_container_status(
        &self,
        container_id: &str,
        status: ContainerStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE containers SET status = ? WHERE container_id = ?")
            .bind(status)
            .bind(container_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_container(&self, container_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM containers WHERE container_id = ?")
            .bind(container_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_containers(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM containers")
            .fetch_one(&self.pool)
            .await
    }

    pub async fn count_running_containers(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM containers WHERE status = 'running'")
            .fetch_one(&self.pool)
            .await
    }

    // =========================================================================
    // Managed services
    // =========================================================================

    pub async fn insert_service(
        &self,
        kind: ServiceKind,
        service: &ServiceRecord,
    ) -> Result<(), sqlx::Error> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            kind.table(),
            SERVICE_COLUMNS
        );
        sqlx::query(&sql)
            .bind(&service.service_id)
            .bind(&service.container_id)
            .bind(&service.node_id)
            .bind(&service.ip_address)
            .bind(service.port)
            .bind(service.status)
            .bind(service.is_healthy)
            .bind(service.created_at)
            .bind(service.last_health_check)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_sql_service(&self, service: &SqlServiceRecord) -> Result<(), sqlx::Error> {
        let sql = format!(
            "INSERT INTO db_services ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            SQL_SERVICE_COLUMNS
        );
        sqlx::query(&sql)
            .bind(&service.service_id)
            .bind(&service.container_id)
            .bind(&service.node_id)
            .bind(&service.ip_address)
            .bind(service.port)
            .bind(service.status)
            .bind(service.is_healthy)
            .bind(service.created_at)
            .bind(service.last_health_check)
            .bind(service.max_cpu_percent)
            .bind(service.max_ram_mb)
            .bind(service.max_disk_gb)
            .bind(&service.database_name)
            .bind(&service.instance_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_service(
        &self,
        kind: ServiceKind,
        service_id: &str,
    ) -> Result<Option<ServiceRecord>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM {} WHERE service_id = ?",
            SERVICE_COLUMNS,
            kind.table()
        );
        sqlx::query_as::<_, ServiceRecord>(&sql)
            .bind(service_id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn list_services(&self, kind: ServiceKind) -> Result<Vec<ServiceRecord>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY created_at",
            SERVICE_COLUMNS,
            kind.table()
        );
        sqlx::query_as::<_, ServiceRecord>(&sql)
            .fetch_all(&self.pool)
            .await
    }

    pub async fn get_sql_service(
        &self,
        service_id: &str,
    ) -> Result<Option<SqlServiceRecord>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM db_services WHERE service_id = ?",
            SQL_SERVICE_COLUMNS
        );
        sqlx::query_as::<_, SqlServiceRecord>(&sql)
            .bind(service_id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn list_sql_services(&self) -> Result<Vec<SqlServiceRecord>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM db_services ORDER BY created_at",
            SQL_SERVICE_COLUMNS
        );
        sqlx::query_as::<_, SqlServiceRecord>(&sql)
            .fetch_all(&self.pool)
            .await
    }

    /// Write back the outcome of a service health probe.
    pub async fn set_service_health(
        &self,
        kind: ServiceKind,
        service_id: &str,
        healthy: bool,
        status: ServiceStatus,
    ) -> Result<(), sqlx::Error> {
        let sql = format!(
            "UPDATE {} SET is_healthy = ?, status = ?, last_health_check = ? WHERE service_id = ?",
            kind.table()
        );
        sqlx::query(&sql)
            .bind(healthy)
            .bind(status)
            .bind(Utc::now())
            .bind(service_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove a service row and its container row in one transaction.
    ///
    /// Catalog cleanup is unconditional: a dead node must not strand
    /// rows, so callers do their best-effort node teardown first and
    /// then call this regardless of the outcome.
    pub async fn remove_service(
        &self,
        kind: ServiceKind,
        service_id: &str,
        container_id: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let sql = format!("DELETE FROM {} WHERE service_id = ?", kind.table());
        sqlx::query(&sql)
            .bind(service_id)
            .execute(&mut *tx)
            .await?;
        if let Some(container_id) = container_id {
            sqlx::query("DELETE FROM containers WHERE container_id = ?")
                .bind(container_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn update_sql_service_config(
        &self,
        service_id: &str,
        update: &SqlServiceConfigUpdate,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE db_services SET \
                 max_cpu_percent = COALESCE(?, max_cpu_percent), \
                 max_ram_mb = COALESCE(?, max_ram_mb), \
                 max_disk_gb = COALESCE(?, max_disk_gb), \
                 instance_name = COALESCE(?, instance_name) \
             WHERE service_id = ?",
        )
        .bind(update.max_cpu_percent)
        .bind(update.max_ram_mb)
        .bind(update.max_disk_gb)
        .bind(&update.instance_name)
        .bind(service_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_healthy_services(&self, kind: ServiceKind) -> Result<i64, sqlx::Error> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE is_healthy = TRUE",
            kind.table()
        );
        sqlx::query_scalar(&sql).fetch_one(&self.pool).await
    }

    // =========================================================================
    // Usage accounting
    // =========================================================================

    pub async fn record_usage(
        &self,
        service_id: &str,
        service_type: &str,
        usage_amount: f64,
        unit: &str,
        cost: f64,
        extra_data: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO billing_usage (service_id, service_type, usage_amount, unit, cost, timestamp, extra_data) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(service_id)
        .bind(service_type)
        .bind(usage_amount)
        .bind(unit)
        .bind(cost)
        .bind(Utc::now())
        .bind(extra_data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Spend since `since`, grouped by service type.
    pub async fn usage_totals_since(
        &self,
        since: chrono::DateTime<Utc>,
    ) -> Result<Vec<(String, f64, f64)>, sqlx::Error> {
        sqlx::query_as::<_, (String, f64, f64)>(
            "SELECT service_type, SUM(usage_amount), SUM(cost) FROM billing_usage \
             WHERE timestamp >= ? GROUP BY service_type ORDER BY service_type",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
    }
}
