//! Queue service routes: enqueue, bounded read, delete-by-id.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::server::AppState;
use crate::services::{
    check_service_health_now, list_services_response, load_healthy_service, load_service, relay,
    remove_service_of_kind, ServiceInfo, ServiceKind,
};

const KIND: ServiceKind = ServiceKind::Queue;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/queue-services", get(list_services))
        .route(
            "/queue-services/{service_id}",
            get(get_service).delete(remove_service),
        )
        .route("/queue-services/{service_id}/health", get(check_health))
        .route(
            "/queue-services/{service_id}/messages",
            get(read_messages).post(add_message),
        )
        .route(
            "/queue-services/{service_id}/messages/{message_id}",
            axum::routing::delete(delete_message),
        )
}

async fn list_services(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    list_services_response(&state.catalog, KIND).await.map(Json)
}

async fn get_service(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> Result<Json<ServiceInfo>, ApiError> {
    let service = load_service(&state.catalog, KIND, &service_id).await?;
    Ok(Json(ServiceInfo::from(&service)))
}

async fn remove_service(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    remove_service_of_kind(&state, KIND, &service_id)
        .await
        .map(Json)
}

async fn check_health(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    check_service_health_now(&state, KIND, &service_id)
        .await
        .map(Json)
}

async fn add_message(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    Json(message): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let service = load_healthy_service(&state.catalog, KIND, &service_id).await?;
    let result = state
        .http
        .post(format!("{}/queue/add", service.service_url()))
        .json(&message)
        .timeout(Duration::from_secs(10))
        .send()
        .await;
    let added = relay(result).await?;
    Ok(Json(json!({
        "service_id": service_id,
        "message_id": added.get("id").cloned().unwrap_or(Value::Null),
        "message": added.get("message").cloned().unwrap_or(Value::Null),
        "timestamp": Utc::now(),
    })))
}

#[derive(Debug, Deserialize)]
struct ReadParams {
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    10
}

async fn read_messages(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    Query(params): Query<ReadParams>,
) -> Result<Json<Value>, ApiError> {
    let service = load_healthy_service(&state.catalog, KIND, &service_id).await?;
    let result = state
        .http
        .get(format!("{}/queue/read", service.service_url()))
        .query(&[("limit", params.limit)])
        .timeout(Duration::from_secs(10))
        .send()
        .await;
    let messages = relay(result).await?;
    Ok(Json(json!({
        "service_id": service_id,
        "messages": messages,
        "timestamp": Utc::now(),
    })))
}

async fn delete_message(
    State(state): State<AppState>,
    Path((service_id, message_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let service = load_healthy_service(&state.catalog, KIND, &service_id).await?;
    let result = state
        .http
        .delete(format!("{}/queue/{}", service.service_url(), message_id))
        .timeout(Duration::from_secs(10))
        .send()
        .await;
    let deleted = relay(result).await?;
    Ok(Json(json!({
        "service_id": service_id,
        "message_id": message_id,
        "deleted": deleted.get("deleted").and_then(Value::as_bool).unwrap_or(false),
        "timestamp": Utc::now(),
    })))
}
