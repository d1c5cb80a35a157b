//! Managed services: launch, health, and per-kind request routing.
//!
//! A managed service is a container plus a control-plane record that
//! binds it to a kind and a routable `(ip, port)` endpoint. The kinds
//! are closed: bucket (object store), sql, nosql, queue, secrets.

pub mod bucket;
pub mod health;
pub mod launcher;
pub mod nosql;
pub mod queue;
pub mod secrets;
pub mod sql;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::catalog::{Catalog, ServiceRecord, ServiceStatus, SqlServiceRecord};
use crate::error::ApiError;
use crate::server::AppState;

pub use health::{spawn_service_health_loop, ServiceHealthConfig};
pub use launcher::{launch_service, SqlLaunchConfig};

/// The closed set of managed-service kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Bucket,
    Sql,
    Nosql,
    Queue,
    Secrets,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 5] = [
        ServiceKind::Bucket,
        ServiceKind::Sql,
        ServiceKind::Nosql,
        ServiceKind::Queue,
        ServiceKind::Secrets,
    ];

    /// Catalog table holding this kind's rows.
    pub fn table(&self) -> &'static str {
        match self {
            ServiceKind::Bucket => "bucket_services",
            ServiceKind::Sql => "db_services",
            ServiceKind::Nosql => "nosql_services",
            ServiceKind::Queue => "queue_services",
            ServiceKind::Secrets => "secrets_services",
        }
    }

    /// Prefix for generated service ids (`bucket-1a2b3c4d`).
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ServiceKind::Bucket => "bucket",
            ServiceKind::Sql => "db",
            ServiceKind::Nosql => "nosql",
            ServiceKind::Queue => "queue",
            ServiceKind::Secrets => "secrets",
        }
    }

    /// Well-known internal port the service binds inside its
    /// container, as a Docker-style port key.
    pub fn internal_port(&self) -> &'static str {
        match self {
            ServiceKind::Bucket => "8000/tcp",
            ServiceKind::Sql => "8010/tcp",
            ServiceKind::Nosql => "8020/tcp",
            ServiceKind::Queue => "8030/tcp",
            ServiceKind::Secrets => "8040/tcp",
        }
    }

    /// Kind-specific launch endpoint on the worker node.
    pub fn launch_path(&self) -> &'static str {
        match self {
            ServiceKind::Bucket => "/launchBucket",
            ServiceKind::Sql => "/launchDB",
            ServiceKind::Nosql => "/launchNoSQL",
            ServiceKind::Queue => "/launchQueue",
            ServiceKind::Secrets => "/launchSecrets",
        }
    }

    /// Image/name recorded for the backing container.
    pub fn image(&self) -> &'static str {
        match self {
            ServiceKind::Bucket => "bucket-service",
            ServiceKind::Sql => "database-service",
            ServiceKind::Nosql => "nosql-service",
            ServiceKind::Queue => "queue-service",
            ServiceKind::Secrets => "secrets-service",
        }
    }

    /// Gauge publishing this kind's healthy-service count.
    pub fn gauge(&self) -> &'static str {
        match self {
            ServiceKind::Bucket => "active_bucket_services",
            ServiceKind::Sql => "active_db_services",
            ServiceKind::Nosql => "active_nosql_services",
            ServiceKind::Queue => "active_queue_services",
            ServiceKind::Secrets => "active_secrets_services",
        }
    }

    /// Human label used in error details ("Bucket service not found").
    pub fn label(&self) -> &'static str {
        match self {
            ServiceKind::Bucket => "Bucket service",
            ServiceKind::Sql => "DB service",
            ServiceKind::Nosql => "NoSQL service",
            ServiceKind::Queue => "Queue service",
            ServiceKind::Secrets => "Secrets service",
        }
    }
}

/// Load a service row or fail with the kind's 404.
pub async fn load_service(
    catalog: &Catalog,
    kind: ServiceKind,
    service_id: &str,
) -> Result<ServiceRecord, ApiError> {
    catalog
        .get_service(kind, service_id)
        .await?
        .ok_or(ApiError::NotFound(kind.label()))
}

/// Load a service row and refuse to forward to it unless its health
/// bit is set. The node is never contacted for an unhealthy target.
pub async fn load_healthy_service(
    catalog: &Catalog,
    kind: ServiceKind,
    service_id: &str,
) -> Result<ServiceRecord, ApiError> {
    let service = load_service(catalog, kind, service_id).await?;
    if !service.is_healthy {
        return Err(ApiError::Unavailable(format!(
            "{} is not healthy",
            kind.label()
        )));
    }
    Ok(service)
}

// ============================================================================
// Response shapes & forwarding helpers
// ============================================================================

/// The public view of a managed-service row.
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub service_id: String,
    pub container_id: String,
    pub node_id: String,
    pub ip_address: String,
    pub port: i64,
    pub status: ServiceStatus,
    pub is_healthy: bool,
    pub created_at: DateTime<Utc>,
    pub service_url: String,
}

impl From<&ServiceRecord> for ServiceInfo {
    fn from(record: &ServiceRecord) -> Self {
        Self {
            service_id: record.service_id.clone(),
            container_id: record.container_id.clone(),
            node_id: record.node_id.clone(),
            ip_address: record.ip_address.clone(),
            port: record.port,
            status: record.status,
            is_healthy: record.is_healthy,
            created_at: record.created_at,
            service_url: record.service_url(),
        }
    }
}

/// The public view of a SQL-service row, including its declared
/// configuration.
#[derive(Debug, Serialize)]
pub struct SqlServiceInfo {
    #[serde(flatten)]
    pub common: ServiceInfo,
    pub max_cpu_percent: i64,
    pub max_ram_mb: i64,
    pub max_disk_gb: i64,
    pub database_name: String,
    pub instance_name: Option<String>,
}

impl From<&SqlServiceRecord> for SqlServiceInfo {
    fn from(record: &SqlServiceRecord) -> Self {
        Self {
            common: ServiceInfo {
                service_id: record.service_id.clone(),
                container_id: record.container_id.clone(),
                node_id: record.node_id.clone(),
                ip_address: record.ip_address.clone(),
                port: record.port,
                status: record.status,
                is_healthy: record.is_healthy,
                created_at: record.created_at,
                service_url: record.service_url(),
            },
            max_cpu_percent: record.max_cpu_percent,
            max_ram_mb: record.max_ram_mb,
            max_disk_gb: record.max_disk_gb,
            database_name: record.database_name.clone(),
            instance_name: record.instance_name.clone(),
        }
    }
}

/// Translate a forwarded response: 2xx bodies pass through as JSON
/// (empty body becomes `{}`), anything else becomes the uniform
/// upstream error with the target's body under `detail`.
pub(crate) async fn relay(
    result: Result<reqwest::Response, reqwest::Error>,
) -> Result<Value, ApiError> {
    let resp = result?;
    let status = resp.status();
    let bytes = resp.bytes().await?;
    if !status.is_success() {
        return Err(ApiError::Upstream {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }
    if bytes.is_empty() {
        return Ok(json!({}));
    }
    Ok(serde_json::from_slice::<Value>(&bytes).unwrap_or_else(|_| json!({})))
}

/// On-demand service health probe: hit the service's `/health`,
/// mirror the outcome into the catalog, and report it.
pub(crate) async fn check_service_health_now(
    state: &AppState,
    kind: ServiceKind,
    service_id: &str,
) -> Result<Value, ApiError> {
    let service = load_service(&state.catalog, kind, service_id).await?;
    let healthy = match state
        .http
        .get(format!("{}/health", service.service_url()))
        .timeout(Duration::from_secs(10))
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    };
    let status = if healthy {
        ServiceStatus::Running
    } else {
        ServiceStatus::Unhealthy
    };
    state
        .catalog
        .set_service_health(kind, service_id, healthy, status)
        .await?;

    Ok(json!({
        "service_id": service_id,
        "is_healthy": healthy,
        "last_check": Utc::now(),
        "service_url": service.service_url(),
    }))
}

/// Tear a service down: best-effort stop + container removal on the
/// node, then unconditional catalog cleanup so a dead node cannot
/// strand rows.
pub(crate) async fn remove_service_of_kind(
    state: &AppState,
    kind: ServiceKind,
    service_id: &str,
) -> Result<Value, ApiError> {
    let service = load_service(&state.catalog, kind, service_id).await?;
    let container = state.catalog.get_container(&service.container_id).await?;

    if let Some(container) = &container {
        let node = state.catalog.get_node(&container.node_id).await?;
        match node {
            Some(node) if node.is_healthy => {
                if let Err(e) = state
                    .node_client
                    .stop_container(&node.url, &container.container_id)
                    .await
                {
                    warn!(service_id, error = %e, "container stop failed during removal");
                }
                if let Err(e) = state
                    .node_client
                    .remove_container(&node.url, &container.container_id)
                    .await
                {
                    warn!(service_id, error = %e, "container removal failed during removal");
                }
            }
            _ => {
                warn!(service_id, "node unavailable, cleaning up catalog only");
            }
        }
    } else {
        warn!(service_id, "no container row for service being removed");
    }

    state
        .catalog
        .remove_service(
            kind,
            service_id,
            container.as_ref().map(|c| c.container_id.as_str()),
        )
        .await?;

    Ok(json!({
        "message": format!("{} {} removed successfully", kind.label(), service_id)
    }))
}

/// `{"<kind>_services": [...]}` listing, shared by the non-SQL kinds.
pub(crate) async fn list_services_response(
    catalog: &Catalog,
    kind: ServiceKind,
) -> Result<Value, ApiError> {
    let services = catalog.list_services(kind).await?;
    let infos: Vec<ServiceInfo> = services.iter().map(ServiceInfo::from).collect();
    let mut body = serde_json::Map::new();
    body.insert(
        kind.table().to_string(),
        serde_json::to_value(infos).map_err(|e| ApiError::Internal(e.to_string()))?,
    );
    Ok(Value::Object(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tables_are_distinct() {
        let mut tables: Vec<_> = ServiceKind::ALL.iter().map(|k| k.table()).collect();
        tables.sort();
        tables.dedup();
        assert_eq!(tables.len(), 5);
    }

    #[test]
    fn test_internal_ports() {
        assert_eq!(ServiceKind::Bucket.internal_port(), "8000/tcp");
        assert_eq!(ServiceKind::Sql.internal_port(), "8010/tcp");
        assert_eq!(ServiceKind::Nosql.internal_port(), "8020/tcp");
        assert_eq!(ServiceKind::Queue.internal_port(), "8030/tcp");
        assert_eq!(ServiceKind::Secrets.internal_port(), "8040/tcp");
    }

    #[test]
    fn test_kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ServiceKind::Nosql).unwrap(),
            "\"nosql\""
        );
    }

    #[tokio::test]
    async fn test_load_service_missing_is_not_found() {
        let catalog = Catalog::connect("sqlite::memory:").await.unwrap();
        let err = load_service(&catalog, ServiceKind::Bucket, "bucket-missing")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound("Bucket service")));
    }
}
