//! Secrets service routes.
//!
//! A missing secret is not an error: the service's 404 is folded into
//! a `{"secret": null}` body so callers can probe without handling
//! failures.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::server::AppState;
use crate::services::{
    check_service_health_now, list_services_response, load_healthy_service, load_service, relay,
    remove_service_of_kind, ServiceInfo, ServiceKind,
};

const KIND: ServiceKind = ServiceKind::Secrets;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/secrets-services", get(list_services))
        .route(
            "/secrets-services/{service_id}",
            get(get_service).delete(remove_service),
        )
        .route("/secrets-services/{service_id}/health", get(check_health))
        .route(
            "/secrets-services/{service_id}/secrets",
            get(list_secrets).post(create_secret),
        )
        .route(
            "/secrets-services/{service_id}/secrets/{secret_name}",
            get(get_secret).delete(delete_secret),
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

async fn create_secret(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    Json(secret): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let service = load_healthy_service(&state.catalog, KIND, &service_id).await?;
    let result = state
        .http
        .post(format!("{}/secrets/store", service.service_url()))
        .json(&secret)
        .timeout(Duration::from_secs(10))
        .send()
        .await;
    relay(result).await?;
    Ok(Json(json!({
        "service_id": service_id,
        "secret_name": secret.get("name").cloned().unwrap_or(Value::Null),
        "created": true,
        "timestamp": Utc::now(),
    })))
}

async fn get_secret(
    State(state): State<AppState>,
    Path((service_id, secret_name)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let service = load_healthy_service(&state.catalog, KIND, &service_id).await?;
    let result = state
        .http
        .get(format!(
            "{}/secrets/{}",
            service.service_url(),
            secret_name
        ))
        .timeout(Duration::from_secs(10))
        .send()
        .await;

    let secret = match relay(result).await {
        Ok(secret) => secret,
        // A missing secret is a null result, not an error.
        Err(ApiError::Upstream { status: 404, .. }) => Value::Null,
        Err(e) => return Err(e),
    };

    Ok(Json(json!({
        "service_id": service_id,
        "secret": secret,
        "timestamp": Utc::now(),
    })))
}

async fn list_secrets(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let service = load_healthy_service(&state.catalog, KIND, &service_id).await?;
    let result = state
        .http
        .get(format!("{}/secrets", service.service_url()))
        .timeout(Duration::from_secs(10))
        .send()
        .await;
    let listing = relay(result).await?;
    Ok(Json(json!({
        "service_id": service_id,
        "secrets": listing.get("secrets").cloned().unwrap_or_else(|| json!([])),
        "timestamp": Utc::now(),
    })))
}

async fn delete_secret(
    State(state): State<AppState>,
    Path((service_id, secret_name)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let service = load_healthy_service(&state.catalog, KIND, &service_id).await?;
    let result = state
        .http
        .delete(format!(
            "{}/secrets/{}",
            service.service_url(),
            secret_name
        ))
        .timeout(Duration::from_secs(10))
        .send()
        .await;
    let deleted = relay(result).await?;
    Ok(Json(json!({
        "service_id": service_id,
        "secret_name": secret_name,
        "deleted": deleted.get("deleted").and_then(Value::as_bool).unwrap_or(false),
        "timestamp": Utc::now(),
    })))
}
