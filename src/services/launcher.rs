//! Launch dispatch and the per-service launch state machine.
//!
//! A managed service becomes addressable only once its container has
//! bound the kind's internal port to a host port on the node. The
//! sequence per launch: invoke the kind endpoint on the chosen node,
//! persist the container row, poll the node's ports endpoint until a
//! host port appears (bounded), then publish the service row with the
//! discovered `(ip, port)`. If polling exhausts its budget the launch
//! fails `not-ready`; the container row stays so the caller can
//! re-issue.

use std::collections::HashMap;

use chrono::Utc;
use metrics::gauge;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::time::{sleep, Duration};
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{
    Catalog, ContainerRecord, ContainerStatus, NodeRecord, ServiceRecord, ServiceStatus,
    SqlServiceRecord,
};
use crate::client::NodeClient;
use crate::cluster::{place, PlacementRequest};
use crate::error::ApiError;
use crate::metrics::ACTIVE_CONTAINERS;
use crate::server::AppState;
use crate::services::ServiceKind;

/// Readiness polling budget: attempts × spacing.
pub const MAX_READINESS_ATTEMPTS: u32 = 60;
const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Request shapes
// ============================================================================

/// Raw container configuration forwarded to the node's `/launch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub cpu: f64,
    pub memory: String,
    #[serde(default)]
    pub ports: HashMap<String, i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerLaunchRequest {
    pub user_id: String,
    pub config: ContainerConfig,
}

/// Declared configuration for a SQL service launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlLaunchConfig {
    #[serde(default)]
    pub instance_name: Option<String>,
    #[serde(default = "default_max_cpu_percent")]
    pub max_cpu_percent: i64,
    #[serde(default = "default_max_ram_mb")]
    pub max_ram_mb: i64,
    #[serde(default = "default_max_disk_gb")]
    pub max_disk_gb: i64,
    #[serde(default = "default_database_name")]
    pub database_name: String,
}

fn default_max_cpu_percent() -> i64 {
    90
}
fn default_max_ram_mb() -> i64 {
    2048
}
fn default_max_disk_gb() -> i64 {
    10
}
fn default_database_name() -> String {
    "main".to_string()
}

impl Default for SqlLaunchConfig {
    fn default() -> Self {
        Self {
            instance_name: None,
            max_cpu_percent: default_max_cpu_percent(),
            max_ram_mb: default_max_ram_mb(),
            max_disk_gb: default_max_disk_gb(),
            database_name: default_database_name(),
        }
    }
}

impl SqlLaunchConfig {
    /// Body forwarded to the node's `/launchDB`.
    fn node_request_body(&self) -> Value {
        json!({
            "resource_limits": {
                "max_cpu_percent": self.max_cpu_percent,
                "max_ram_mb": self.max_ram_mb,
                "max_disk_gb": self.max_disk_gb,
            },
            "instance_name": self.instance_name,
            "database_name": self.database_name,
        })
    }
}

// ============================================================================
// Host-port discovery
// ============================================================================

/// Pull a host port out of one Docker-style binding value: either a
/// list of `{"HostPort": "32770"}` objects or a bare integer.
pub fn extract_host_port(bindings: &Value) -> Option<u16> {
    match bindings {
        Value::Array(list) => list
            .first()
            .and_then(|binding| binding.get("HostPort"))
            .and_then(|host_port| match host_port {
                Value::String(s) => s.parse().ok(),
                Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
                _ => None,
            }),
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        _ => None,
    }
}

/// Locate the port map in a node's ports response. The map normally
/// sits under a `ports` key but some nodes return it at the top level.
pub fn port_map(response: &Value) -> Option<&Map<String, Value>> {
    let object = response.as_object()?;
    if let Some(ports) = object.get("ports").and_then(Value::as_object) {
        if !ports.is_empty() {
            return Some(ports);
        }
    }
    if object
        .keys()
        .any(|key| key.ends_with("/tcp") || key.ends_with("/udp"))
    {
        return Some(object);
    }
    None
}

fn strip_protocol(port_key: &str) -> &str {
    port_key
        .trim_end_matches("/tcp")
        .trim_end_matches("/udp")
}

/// Layered host-port selection:
/// 1. exact match on the declared internal port key (`"8010/tcp"`),
/// 2. numeric match ignoring the protocol suffix,
/// 3. first extractable host port in the map, as a last resort.
pub fn select_host_port(ports: &Map<String, Value>, internal_port: &str) -> Option<u16> {
    if let Some(port) = ports.get(internal_port).and_then(extract_host_port) {
        return Some(port);
    }

    let wanted = strip_protocol(internal_port);
    for (key, bindings) in ports {
        if strip_protocol(key) == wanted {
            if let Some(port) = extract_host_port(bindings) {
                return Some(port);
            }
        }
    }

    ports.values().find_map(extract_host_port)
}

/// Poll the node until the container exposes a usable host port, up to
/// [`MAX_READINESS_ATTEMPTS`] attempts spaced one second apart.
/// Returns `(service_ip, host_port)`; the IP is the host portion of
/// the node's registered URL.
pub async fn await_service_endpoint(
    client: &NodeClient,
    node: &NodeRecord,
    container_id: &str,
    internal_port: &str,
) -> Option<(String, u16)> {
    for attempt in 1..=MAX_READINESS_ATTEMPTS {
        match client.container_ports(&node.url, container_id).await {
            Ok(response) => {
                if let Some(port) = port_map(&response)
                    .and_then(|ports| select_host_port(ports, internal_port))
                {
                    info!(container_id, port, attempt, "service endpoint ready");
                    return Some((node.host().to_string(), port));
                }
            }
            Err(e) => {
                warn!(container_id, attempt, error = %e, "ports poll failed");
            }
        }
        sleep(READINESS_POLL_INTERVAL).await;
    }
    None
}

// ============================================================================
// Dispatch
// ============================================================================

fn generated_container_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("container-{}", &id[..8])
}

fn generated_service_id(kind: ServiceKind) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}-{}", kind.id_prefix(), &id[..8])
}

/// The container id is authoritative from the node (`container_id` or
/// `id` in its response); a synthetic id is issued when the node
/// returns neither.
fn container_id_from(result: &Value, node_id: &str) -> String {
    let supplied = result
        .get("container_id")
        .or_else(|| result.get("id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty());
    match supplied {
        Some(id) => id.to_string(),
        None => {
            let generated = generated_container_id();
            warn!(
                node_id,
                generated_id = %generated,
                "container id not provided by node, generated one"
            );
            generated
        }
    }
}

async fn publish_container_gauge(catalog: &Catalog) {
    if let Ok(count) = catalog.count_running_containers().await {
        gauge!(ACTIVE_CONTAINERS).set(count as f64);
    }
}

/// Launch a plain container for a user on the best available node.
pub async fn launch_container(
    state: &AppState,
    request: ContainerLaunchRequest,
) -> Result<Value, ApiError> {
    let node = place(
        &state.catalog,
        &state.selector,
        &PlacementRequest::for_user(request.user_id.clone()),
    )
    .await?;

    let config = serde_json::to_value(&request.config)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let mut result = state.node_client.launch(&node.url, &config).await?;

    let container_id = container_id_from(&result, &node.node_id);
    let container = ContainerRecord {
        container_id: container_id.clone(),
        user_id: request.user_id,
        node_id: node.node_id.clone(),
        image: request.config.image,
        name: request.config.name,
        status: ContainerStatus::Running,
        created_at: Utc::now(),
    };
    state.catalog.insert_container(&container).await?;
    publish_container_gauge(&state.catalog).await;

    info!(container_id = %container_id, node_id = %node.node_id, "container launched");
    if let Some(object) = result.as_object_mut() {
        object.insert("container_id".to_string(), json!(container_id));
    }
    Ok(result)
}

/// Launch a managed service of `kind` and wait for it to become
/// addressable.
pub async fn launch_service(
    state: &AppState,
    kind: ServiceKind,
    sql_config: Option<SqlLaunchConfig>,
) -> Result<Value, ApiError> {
    let node = place(
        &state.catalog,
        &state.selector,
        &PlacementRequest::for_kind(kind),
    )
    .await?;

    let body = sql_config.as_ref().map(SqlLaunchConfig::node_request_body);
    let mut result = state
        .node_client
        .launch_service(&node.url, kind.launch_path(), body.as_ref())
        .await?;

    let container_id = container_id_from(&result, &node.node_id);
    let container = ContainerRecord {
        container_id: container_id.clone(),
        // Managed services are system-owned.
        user_id: "system".to_string(),
        node_id: node.node_id.clone(),
        image: kind.image().to_string(),
        name: Some(kind.image().to_string()),
        status: ContainerStatus::Running,
        created_at: Utc::now(),
    };
    state.catalog.insert_container(&container).await?;

    let Some((ip_address, port)) = await_service_endpoint(
        &state.node_client,
        &node,
        &container_id,
        kind.internal_port(),
    )
    .await
    else {
        warn!(container_id = %container_id, kind = ?kind, "service container never became ready");
        return Err(ApiError::NotReady(format!(
            "{} container did not become ready in time",
            kind.label()
        )));
    };

    let service_id = generated_service_id(kind);
    let now = Utc::now();
    let record = ServiceRecord {
        service_id: service_id.clone(),
        container_id: container_id.clone(),
        node_id: node.node_id.clone(),
        ip_address: ip_address.clone(),
        port: i64::from(port),
        status: ServiceStatus::Running,
        is_healthy: true,
        created_at: now,
        last_health_check: now,
    };

    if kind == ServiceKind::Sql {
        let config = sql_config.unwrap_or_default();
        let sql_record = SqlServiceRecord {
            service_id: record.service_id.clone(),
            container_id: record.container_id.clone(),
            node_id: record.node_id.clone(),
            ip_address: record.ip_address.clone(),
            port: record.port,
            status: record.status,
            is_healthy: record.is_healthy,
            created_at: record.created_at,
            last_health_check: record.last_health_check,
            max_cpu_percent: config.max_cpu_percent,
            max_ram_mb: config.max_ram_mb,
            max_disk_gb: config.max_disk_gb,
            database_name: config.database_name,
            instance_name: config.instance_name,
        };
        state.catalog.insert_sql_service(&sql_record).await?;
    } else {
        state.catalog.insert_service(kind, &record).await?;
    }
    publish_container_gauge(&state.catalog).await;

    info!(
        service_id = %service_id,
        container_id = %container_id,
        node_id = %node.node_id,
        kind = ?kind,
        "service launched"
    );

    if let Some(object) = result.as_object_mut() {
        object.insert("container_id".to_string(), json!(container_id));
        object.insert("service_id".to_string(), json!(service_id));
        object.insert("ip_address".to_string(), json!(ip_address));
        object.insert("port".to_string(), json!(port));
        object.insert(
            "service_url".to_string(),
            json!(format!("http://{}:{}", ip_address, port)),
        );
    }
    Ok(result)
}
