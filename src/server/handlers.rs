//! Front-door handlers: node registration and listing, container
//! lifecycle, managed-service launches, health, and telemetry
//! endpoints.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::gauge;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::catalog::{ContainerRecord, ContainerStatus, NodeRecord};
use crate::cluster::{check_node, resolve_advertised_url};
use crate::error::ApiError;
use crate::metrics::{ACTIVE_CONTAINERS, ACTIVE_NODES};
use crate::server::AppState;
use crate::services::launcher::{launch_container, ContainerLaunchRequest};
use crate::services::{launch_service, ServiceKind, SqlLaunchConfig};

// ============================================================================
// Nodes
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterParams {
    url: String,
}

#[derive(Serialize)]
struct NodeInfo {
    node_id: String,
    url: String,
    is_healthy: bool,
    last_seen: DateTime<Utc>,
    last_health_check: DateTime<Utc>,
}

impl From<&NodeRecord> for NodeInfo {
    fn from(node: &NodeRecord) -> Self {
        Self {
            node_id: node.node_id.clone(),
            url: node.url.clone(),
            is_healthy: node.is_healthy,
            last_seen: node.last_seen,
            last_health_check: node.last_health_check,
        }
    }
}

pub async fn register_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Query(params): Query<RegisterParams>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let url = resolve_advertised_url(&params.url, &headers, peer);
    info!(node_id, url, "registering node");

    let node = state.catalog.register_node(&node_id, &url).await?;

    let healthy = state.catalog.count_healthy_nodes().await?;
    gauge!(ACTIVE_NODES).set(healthy as f64);

    Ok(Json(json!({
        "status": "success",
        "node_id": node.node_id,
        "url": node.url,
    })))
}

pub async fn list_nodes(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let nodes = state.catalog.list_nodes().await?;
    let infos: Vec<NodeInfo> = nodes.iter().map(NodeInfo::from).collect();
    Ok(Json(json!({ "nodes": infos })))
}

pub async fn manual_health_check(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let node = state
        .catalog
        .get_node(&node_id)
        .await?
        .ok_or(ApiError::NotFound("Node"))?;

    let healthy = check_node(&state.catalog, &state.node_client, &node).await?;
    Ok(Json(json!({ "node_id": node_id, "healthy": healthy })))
}

// ============================================================================
// Containers
// ============================================================================

#[derive(Serialize)]
pub struct ContainerInfo {
    container_id: String,
    image: String,
    name: Option<String>,
    status: ContainerStatus,
    node_id: String,
    created_at: DateTime<Utc>,
}

impl From<&ContainerRecord> for ContainerInfo {
    fn from(container: &ContainerRecord) -> Self {
        Self {
            container_id: container.container_id.clone(),
            image: container.image.clone(),
            name: container.name.clone(),
            status: container.status,
            node_id: container.node_id.clone(),
            created_at: container.created_at,
        }
    }
}

/// Resolve a container and its (healthy) node, or fail the way the
/// routing layer promises: 404 for the container, 503 when the node
/// cannot take the request.
async fn resolve_container_node(
    state: &AppState,
    container_id: &str,
) -> Result<(ContainerRecord, NodeRecord), ApiError> {
    let container = state
        .catalog
        .get_container(container_id)
        .await?
        .ok_or(ApiError::NotFound("Container"))?;
    let node = state.catalog.get_node(&container.node_id).await?;
    match node {
        Some(node) if node.is_healthy => Ok((container, node)),
        _ => Err(ApiError::Unavailable(
            "Container node is not available".to_string(),
        )),
    }
}

pub async fn launch(
    State(state): State<AppState>,
    Json(request): Json<ContainerLaunchRequest>,
) -> Result<Json<Value>, ApiError> {
    launch_container(&state, request).await.map(Json)
}

pub async fn list_containers(
    State(state): State<AppState>,
) -> Result<Json<Vec<ContainerInfo>>, ApiError> {
    let containers = state.catalog.list_containers().await?;
    Ok(Json(containers.iter().map(ContainerInfo::from).collect()))
}

pub async fn user_containers(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let containers = state.catalog.containers_for_user(&user_id).await?;
    let infos: Vec<ContainerInfo> = containers.iter().map(ContainerInfo::from).collect();
    Ok(Json(json!({ "containers": infos })))
}

pub async fn container_status(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (container, node) = resolve_container_node(&state, &container_id).await?;
    let status = state
        .node_client
        .container_status(&node.url, &container.container_id)
        .await?;
    Ok(Json(status))
}

pub async fn container_ports(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (container, node) = resolve_container_node(&state, &container_id).await?;
    let ports = state
        .node_client
        .container_ports(&node.url, &container.container_id)
        .await?;
    Ok(Json(ports))
}

pub async fn start_container(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (container, node) = resolve_container_node(&state, &container_id).await?;
    let result = state
        .node_client
        .start_container(&node.url, &container.container_id)
        .await?;
    state
        .catalog
        .set_container_status(&container_id, ContainerStatus::Running)
        .await?;
    info!(container_id, "container started");
    Ok(Json(result))
}

pub async fn stop_container(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (container, node) = resolve_container_node(&state, &container_id).await?;
    let result = state
        .node_client
        .stop_container(&node.url, &container.container_id)
        .await?;
    state
        .catalog
        .set_container_status(&container_id, ContainerStatus::Stopped)
        .await?;
    info!(container_id, "container stopped");
    Ok(Json(result))
}

pub async fn restart_container(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (container, node) = resolve_container_node(&state, &container_id).await?;
    let result = state
        .node_client
        .restart_container(&node.url, &container.container_id)
        .await?;
    state
        .catalog
        .set_container_status(&container_id, ContainerStatus::Running)
        .await?;
    info!(container_id, "container restarted");
    Ok(Json(result))
}

pub async fn delete_container(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let container = state
        .catalog
        .get_container(&container_id)
        .await?
        .ok_or(ApiError::NotFound("Container"))?;

    // Best-effort node teardown; catalog cleanup happens regardless so
    // a dead node cannot strand the row.
    match state.catalog.get_node(&container.node_id).await? {
        Some(node) if node.is_healthy => {
            if let Err(e) = state
                .node_client
                .stop_container(&node.url, &container.container_id)
                .await
            {
                warn!(container_id, error = %e, "container stop failed during delete");
            }
            if let Err(e) = state
                .node_client
                .remove_container(&node.url, &container.container_id)
                .await
            {
                warn!(container_id, error = %e, "container removal failed during delete");
            }
        }
        _ => {
            warn!(container_id, "node unavailable, cleaning up catalog only");
        }
    }

    state.catalog.delete_container(&container_id).await?;
    let running = state.catalog.count_running_containers().await?;
    gauge!(ACTIVE_CONTAINERS).set(running as f64);

    info!(container_id, "container deleted");
    Ok(Json(json!({
        "message": format!("Container {} deleted successfully", container_id)
    })))
}

/// Templates available for plain container launches. Served from the
/// first healthy node when possible, with a built-in default set when
/// no node is reachable or the node lacks the endpoint.
pub async fn templates(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let nodes = state.catalog.healthy_nodes().await?;
    if let Some(node) = nodes.first() {
        match state.node_client.templates(&node.url).await {
            Ok(Some(templates)) => return Ok(Json(templates)),
            Ok(None) => {
                info!(node_id = %node.node_id, "node lacks templates endpoint, using defaults");
            }
            Err(e) => {
                warn!(node_id = %node.node_id, error = %e, "templates fetch failed, using defaults");
            }
        }
    }
    Ok(Json(default_templates()))
}

fn default_templates() -> Value {
    json!({
        "templates": [
            {
                "name": "python-web",
                "description": "Python web application with Flask",
                "image": "python:3.9-slim",
                "ports": {"5000/tcp": 5000},
                "env": {"FLASK_APP": "app.py"},
                "cpu": 0.2,
                "memory": "512m",
            },
            {
                "name": "node-web",
                "description": "Node.js web application",
                "image": "node:16-alpine",
                "ports": {"3000/tcp": 3000},
                "env": {"NODE_ENV": "production"},
                "cpu": 0.2,
                "memory": "512m",
            },
            {
                "name": "nginx",
                "description": "Nginx web server",
                "image": "nginx:alpine",
                "ports": {"80/tcp": 8080},
                "env": {},
                "cpu": 0.1,
                "memory": "256m",
            },
        ]
    })
}

// ============================================================================
// Managed-service launches
// ============================================================================

pub async fn launch_bucket(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    launch_service(&state, ServiceKind::Bucket, None).await.map(Json)
}

pub async fn launch_db(
    State(state): State<AppState>,
    body: axum::body::Bytes,
) -> Result<Json<Value>, ApiError> {
    // The configuration body is optional; an absent one launches with
    // the declared defaults.
    let config = if body.is_empty() {
        SqlLaunchConfig::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid launch configuration: {}", e)))?
    };
    launch_service(&state, ServiceKind::Sql, Some(config))
        .await
        .map(Json)
}

pub async fn launch_nosql(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    launch_service(&state, ServiceKind::Nosql, None).await.map(Json)
}

pub async fn launch_queue(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    launch_service(&state, ServiceKind::Queue, None).await.map(Json)
}

pub async fn launch_secrets(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    launch_service(&state, ServiceKind::Secrets, None).await.map(Json)
}

// ============================================================================
// Health, metrics, billing reads
// ============================================================================

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let summary = async {
        let total_nodes = state.catalog.count_nodes().await?;
        let healthy_nodes = state.catalog.count_healthy_nodes().await?;
        let total_containers = state.catalog.count_containers().await?;
        let running_containers = state.catalog.count_running_containers().await?;
        Ok::<_, sqlx::Error>(json!({
            "status": "healthy",
            "timestamp": Utc::now(),
            "nodes": {"total": total_nodes, "healthy": healthy_nodes},
            "containers": {"total": total_containers, "running": running_containers},
        }))
    }
    .await;

    match summary {
        Ok(body) => Json(body),
        Err(e) => Json(json!({
            "status": "unhealthy",
            "timestamp": Utc::now(),
            "error": e.to_string(),
        })),
    }
}

pub async fn root() -> Json<Value> {
    Json(json!({
        "name": "Stratus Control Plane",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "health": "/health",
        "metrics": "/metrics",
    }))
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics.render(),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct UsageParams {
    #[serde(default = "default_usage_hours")]
    hours: i64,
}

fn default_usage_hours() -> i64 {
    24
}

pub async fn billing_usage(
    State(state): State<AppState>,
    Query(params): Query<UsageParams>,
) -> Result<Json<Value>, ApiError> {
    let since = Utc::now() - ChronoDuration::hours(params.hours.max(1));
    let totals = state.catalog.usage_totals_since(since).await?;
    let total_cost: f64 = totals.iter().map(|(_, _, cost)| cost).sum();
    let rows: Vec<Value> = totals
        .iter()
        .map(|(service_type, amount, cost)| {
            json!({"service_type": service_type, "usage_amount": amount, "cost": cost})
        })
        .collect();

    Ok(Json(json!({
        "period_hours": params.hours,
        "usage": rows,
        "total_cost": total_cost,
        "timestamp": Utc::now(),
    })))
}

pub async fn billing_cost_breakdown(
    State(state): State<AppState>,
    Query(params): Query<UsageParams>,
) -> Result<Json<Value>, ApiError> {
    let since = Utc::now() - ChronoDuration::hours(params.hours.max(1));
    let totals = state.catalog.usage_totals_since(since).await?;
    let total_cost: f64 = totals.iter().map(|(_, _, cost)| cost).sum();
    let breakdown: Vec<Value> = totals
        .iter()
        .map(|(service_type, _, cost)| {
            let percent = if total_cost > 0.0 {
                cost / total_cost * 100.0
            } else {
                0.0
            };
            json!({"service_type": service_type, "cost": cost, "percent": percent})
        })
        .collect();

    Ok(Json(json!({
        "period_hours": params.hours,
        "breakdown": breakdown,
        "total_cost": total_cost,
        "timestamp": Utc::now(),
    })))
}
