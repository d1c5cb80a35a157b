//! NoSQL service routes: collection management and entity CRUD,
//! forwarded to the service's `/nosql/*` API.

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

const KIND: ServiceKind = ServiceKind::Nosql;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/nosql-services", get(list_services))
        .route(
            "/nosql-services/{service_id}",
            get(get_service).delete(remove_service),
        )
        .route("/nosql-services/{service_id}/health", get(check_health))
        .route(
            "/nosql-services/{service_id}/collections",
            get(list_collections),
        )
        .route(
            "/nosql-services/{service_id}/collections/{collection}",
            axum::routing::post(create_collection),
        )
        .route(
            "/nosql-services/{service_id}/collections/{collection}/save",
            axum::routing::post(save_entity),
        )
        .route(
            "/nosql-services/{service_id}/collections/{collection}/query",
            get(query_collection),
        )
        .route(
            "/nosql-services/{service_id}/collections/{collection}/scan",
            get(scan_collection),
        )
        .route(
            "/nosql-services/{service_id}/collections/{collection}/entity/{entity_id}",
            get(get_entity).put(update_entity).delete(delete_entity),
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

async fn list_collections(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let service = load_healthy_service(&state.catalog, KIND, &service_id).await?;
    let result = state
        .http
        .get(format!("{}/nosql/collections", service.service_url()))
        .timeout(Duration::from_secs(10))
        .send()
        .await;
    let collections = relay(result).await?;
    Ok(Json(json!({
        "service_id": service_id,
        "collections": collections,
        "timestamp": Utc::now(),
    })))
}

async fn create_collection(
    State(state): State<AppState>,
    Path((service_id, collection)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let service = load_healthy_service(&state.catalog, KIND, &service_id).await?;
    let result = state
        .http
        .post(format!(
            "{}/nosql/create_collection/{}",
            service.service_url(),
            collection
        ))
        .timeout(Duration::from_secs(10))
        .send()
        .await;
    let created = relay(result).await?;
    Ok(Json(json!({
        "service_id": service_id,
        "collection_name": collection,
        "result": created,
        "timestamp": Utc::now(),
    })))
}

async fn save_entity(
    State(state): State<AppState>,
    Path((service_id, collection)): Path<(String, String)>,
    Json(entity): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let service = load_healthy_service(&state.catalog, KIND, &service_id).await?;
    let result = state
        .http
        .post(format!(
            "{}/nosql/{}/save_json",
            service.service_url(),
            collection
        ))
        .json(&entity)
        .timeout(Duration::from_secs(10))
        .send()
        .await;
    let saved = relay(result).await?;
    Ok(Json(json!({
        "service_id": service_id,
        "collection_name": collection,
        "result": saved,
        "timestamp": Utc::now(),
    })))
}

#[derive(Debug, Deserialize)]
struct FieldQuery {
    field: String,
    value: String,
}

async fn query_collection(
    State(state): State<AppState>,
    Path((service_id, collection)): Path<(String, String)>,
    Query(params): Query<FieldQuery>,
) -> Result<Json<Value>, ApiError> {
    let service = load_healthy_service(&state.catalog, KIND, &service_id).await?;
    let result = state
        .http
        .get(format!(
            "{}/nosql/{}/query",
            service.service_url(),
            collection
        ))
        .query(&[("field", params.field.as_str()), ("value", params.value.as_str())])
        .timeout(Duration::from_secs(10))
        .send()
        .await;
    let matches = relay(result).await?;
    Ok(Json(json!({
        "service_id": service_id,
        "collection_name": collection,
        "query_result": matches,
        "timestamp": Utc::now(),
    })))
}

async fn scan_collection(
    State(state): State<AppState>,
    Path((service_id, collection)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let service = load_healthy_service(&state.catalog, KIND, &service_id).await?;
    let result = state
        .http
        .get(format!(
            "{}/nosql/{}/scan",
            service.service_url(),
            collection
        ))
        .timeout(Duration::from_secs(10))
        .send()
        .await;
    let documents = relay(result).await?;
    Ok(Json(json!({
        "service_id": service_id,
        "collection_name": collection,
        "documents": documents,
        "timestamp": Utc::now(),
    })))
}

async fn get_entity(
    State(state): State<AppState>,
    Path((service_id, collection, entity_id)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    let service = load_healthy_service(&state.catalog, KIND, &service_id).await?;
    let result = state
        .http
        .get(format!(
            "{}/nosql/{}/get/{}",
            service.service_url(),
            collection,
            entity_id
        ))
        .timeout(Duration::from_secs(10))
        .send()
        .await;
    let entity = relay(result).await?;
    Ok(Json(json!({
        "service_id": service_id,
        "collection_name": collection,
        "entity": entity,
        "timestamp": Utc::now(),
    })))
}

async fn update_entity(
    State(state): State<AppState>,
    Path((service_id, collection, entity_id)): Path<(String, String, String)>,
    Json(update): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let service = load_healthy_service(&state.catalog, KIND, &service_id).await?;
    let result = state
        .http
        .put(format!(
            "{}/nosql/{}/update/{}",
            service.service_url(),
            collection,
            entity_id
        ))
        .json(&update)
        .timeout(Duration::from_secs(10))
        .send()
        .await;
    let updated = relay(result).await?;
    Ok(Json(json!({
        "service_id": service_id,
        "collection_name": collection,
        "entity_id": entity_id,
        "result": updated,
        "timestamp": Utc::now(),
    })))
}

async fn delete_entity(
    State(state): State<AppState>,
    Path((service_id, collection, entity_id)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    let service = load_healthy_service(&state.catalog, KIND, &service_id).await?;
    let result = state
        .http
        .delete(format!(
            "{}/nosql/{}/delete/{}",
            service.service_url(),
            collection,
            entity_id
        ))
        .timeout(Duration::from_secs(10))
        .send()
        .await;
    let deleted = relay(result).await?;
    Ok(Json(json!({
        "service_id": service_id,
        "collection_name": collection,
        "entity_id": entity_id,
        "result": deleted,
        "timestamp": Utc::now(),
    })))
}
