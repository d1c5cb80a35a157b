//! Row types for the catalog.
//!
//! These are the durable shapes shared by the HTTP handlers and the
//! background loops. Anything read from the catalog may be stale by
//! the time it is used; callers treat a missing row as 404 and let
//! the loops reconcile the rest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A registered worker node.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NodeRecord {
    pub node_id: String,
    /// Reachable base URL (scheme + host + port).
    pub url: String,
    pub is_healthy: bool,
    pub last_health_check: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl NodeRecord {
    /// Host portion of the registered URL, used as the address for
    /// service endpoints discovered on this node.
    pub fn host(&self) -> &str {
        let without_scheme = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url);
        without_scheme
            .split(['/', ':'])
            .next()
            .unwrap_or(without_scheme)
    }
}

/// Lifecycle state of a container as the catalog sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Stopped,
    Failed,
}

/// A container placed on a node.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContainerRecord {
    pub container_id: String,
    pub user_id: String,
    pub node_id: String,
    pub image: String,
    pub name: Option<String>,
    pub status: ContainerStatus,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle state of a managed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ServiceStatus {
    Starting,
    Running,
    Unhealthy,
    Failed,
    Stopped,
}

/// Common shape of every managed-service row.
///
/// The `(ip_address, port)` pair is bound once at launch and never
/// re-bound; recreation replaces the row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ServiceRecord {
    pub service_id: String,
    pub container_id: String,
    pub node_id: String,
    pub ip_address: String,
    pub port: i64,
    pub status: ServiceStatus,
    pub is_healthy: bool,
    pub created_at: DateTime<Utc>,
    pub last_health_check: DateTime<Utc>,
}

impl ServiceRecord {
    pub fn service_url(&self) -> String {
        format!("http://{}:{}", self.ip_address, self.port)
    }
}

/// SQL-service row: the common shape plus declared resource limits
/// and naming.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SqlServiceRecord {
    pub service_id: String,
    pub container_id: String,
    pub node_id: String,
    pub ip_address: String,
    pub port: i64,
    pub status: ServiceStatus,
    pub is_healthy: bool,
    pub created_at: DateTime<Utc>,
    pub last_health_check: DateTime<Utc>,
    pub max_cpu_percent: i64,
    pub max_ram_mb: i64,
    pub max_disk_gb: i64,
    pub database_name: String,
    pub instance_name: Option<String>,
}

impl SqlServiceRecord {
    pub fn service_url(&self) -> String {
        format!("http://{}:{}", self.ip_address, self.port)
    }
}

/// One metered usage sample written by the accountant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsageRecord {
    pub id: i64,
    pub service_id: String,
    pub service_type: String,
    pub usage_amount: f64,
    pub unit: String,
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
    pub extra_data: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(url: &str) -> NodeRecord {
        NodeRecord {
            node_id: "n1".to_string(),
            url: url.to_string(),
            is_healthy: true,
            last_health_check: Utc::now(),
            last_seen: Utc::now(),
            registered_at: Utc::now(),
        }
    }

    #[test]
    fn test_node_host_with_port() {
        assert_eq!(node("http://10.0.0.5:9000").host(), "10.0.0.5");
    }

    #[test]
    fn test_node_host_without_port() {
        assert_eq!(node("https://worker.internal").host(), "worker.internal");
    }

    #[test]
    fn test_node_host_without_scheme() {
        assert_eq!(node("10.0.0.5:9000").host(), "10.0.0.5");
    }

    #[test]
    fn test_service_url() {
        let record = ServiceRecord {
            service_id: "bucket-1".to_string(),
            container_id: "c1".to_string(),
            node_id: "n1".to_string(),
            ip_address: "10.0.0.5".to_string(),
            port: 32801,
            status: ServiceStatus::Running,
            is_healthy: true,
            created_at: Utc::now(),
            last_health_check: Utc::now(),
        };
        assert_eq!(record.service_url(), "http://10.0.0.5:32801");
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ServiceStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
        assert_eq!(
            serde_json::to_string(&ContainerStatus::Running).unwrap(),
            "\"running\""
        );
    }
}
