//! SQL service routes.
//!
//! Every request to a SQL service carries the `x-signature` header the
//! node-side database expects; the value comes from configuration.
//! Resource-limit updates are mirrored into the catalog first and then
//! forwarded, so the declared configuration survives a dead service.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};

use crate::catalog::SqlServiceConfigUpdate;
use crate::error::ApiError;
use crate::server::AppState;
use crate::services::{
    check_service_health_now, load_healthy_service, remove_service_of_kind, relay, ServiceKind,
    SqlServiceInfo,
};

const KIND: ServiceKind = ServiceKind::Sql;

const SIGNATURE_HEADER: &str = "x-signature";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/db-services", get(list_services))
        .route(
            "/db-services/{service_id}",
            get(get_service).delete(remove_service),
        )
        .route("/db-services/{service_id}/health", get(check_health))
        .route("/db-services/{service_id}/sql/query", post(execute_query))
        .route("/db-services/{service_id}/sql/tables", get(list_tables))
        .route(
            "/db-services/{service_id}/sql/schema/{table_name}",
            get(table_schema),
        )
        .route("/db-services/{service_id}/config", put(update_config))
        .route("/db-services/{service_id}/stats", get(service_stats))
}

async fn list_services(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let services = state.catalog.list_sql_services().await?;
    let infos: Vec<SqlServiceInfo> = services.iter().map(SqlServiceInfo::from).collect();
    Ok(Json(json!({ "db_services": infos })))
}

async fn get_service(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> Result<Json<SqlServiceInfo>, ApiError> {
    let service = state
        .catalog
        .get_sql_service(&service_id)
        .await?
        .ok_or(ApiError::NotFound(KIND.label()))?;
    Ok(Json(SqlServiceInfo::from(&service)))
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

async fn execute_query(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    Json(query): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let service = load_healthy_service(&state.catalog, KIND, &service_id).await?;
    let result = state
        .http
        .post(format!("{}/sql/query", service.service_url()))
        .header(SIGNATURE_HEADER, &state.settings.sql_signing_key)
        .json(&query)
        .timeout(Duration::from_secs(30))
        .send()
        .await;
    let query_result = relay(result).await?;
    Ok(Json(json!({
        "service_id": service_id,
        "query_result": query_result,
        "timestamp": Utc::now(),
    })))
}

async fn list_tables(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let service = load_healthy_service(&state.catalog, KIND, &service_id).await?;
    let result = state
        .http
        .get(format!("{}/sql/tables", service.service_url()))
        .header(SIGNATURE_HEADER, &state.settings.sql_signing_key)
        .timeout(Duration::from_secs(10))
        .send()
        .await;
    let tables = relay(result).await?;
    Ok(Json(json!({
        "service_id": service_id,
        "tables": tables,
        "timestamp": Utc::now(),
    })))
}

async fn table_schema(
    State(state): State<AppState>,
    Path((service_id, table_name)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let service = load_healthy_service(&state.catalog, KIND, &service_id).await?;
    let result = state
        .http
        .get(format!(
            "{}/sql/schema/{}",
            service.service_url(),
            table_name
        ))
        .header(SIGNATURE_HEADER, &state.settings.sql_signing_key)
        .timeout(Duration::from_secs(10))
        .send()
        .await;
    let schema = relay(result).await?;
    Ok(Json(json!({
        "service_id": service_id,
        "schema": schema,
        "timestamp": Utc::now(),
    })))
}

async fn update_config(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    Json(update): Json<SqlServiceConfigUpdate>,
) -> Result<Json<Value>, ApiError> {
    let service = state
        .catalog
        .get_sql_service(&service_id)
        .await?
        .ok_or(ApiError::NotFound(KIND.label()))?;

    // Catalog first: the declared configuration must survive even if
    // the forward below fails.
    state
        .catalog
        .update_sql_service_config(&service_id, &update)
        .await?;
    let updated = state
        .catalog
        .get_sql_service(&service_id)
        .await?
        .ok_or(ApiError::NotFound(KIND.label()))?;

    if update.touches_limits() {
        let limits = json!({
            "max_cpu_percent": updated.max_cpu_percent,
            "max_ram_mb": updated.max_ram_mb,
            "max_disk_gb": updated.max_disk_gb,
        });
        let result = state
            .http
            .post(format!(
                "{}/config/resource-limits",
                service.service_url()
            ))
            .header(SIGNATURE_HEADER, &state.settings.sql_signing_key)
            .json(&limits)
            .timeout(Duration::from_secs(10))
            .send()
            .await;
        if let Err(e) = result {
            tracing::warn!(service_id, error = %e, "resource-limit forward failed");
        }
    }

    Ok(Json(json!({
        "service_id": service_id,
        "message": "Configuration updated successfully",
        "updated_config": {
            "max_cpu_percent": updated.max_cpu_percent,
            "max_ram_mb": updated.max_ram_mb,
            "max_disk_gb": updated.max_disk_gb,
            "instance_name": updated.instance_name,
        },
        "timestamp": Utc::now(),
    })))
}

async fn service_stats(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let service = state
        .catalog
        .get_sql_service(&service_id)
        .await?
        .ok_or(ApiError::NotFound(KIND.label()))?;
    if !service.is_healthy {
        return Err(ApiError::Unavailable(format!(
            "{} is not healthy",
            KIND.label()
        )));
    }

    let result = state
        .http
        .get(format!("{}/stats", service.service_url()))
        .header(SIGNATURE_HEADER, &state.settings.sql_signing_key)
        .timeout(Duration::from_secs(10))
        .send()
        .await;
    let statistics = relay(result).await?;

    Ok(Json(json!({
        "service_id": service_id,
        "statistics": statistics,
        "service_config": {
            "max_cpu_percent": service.max_cpu_percent,
            "max_ram_mb": service.max_ram_mb,
            "max_disk_gb": service.max_disk_gb,
            "instance_name": service.instance_name,
            "database_name": service.database_name,
        },
        "timestamp": Utc::now(),
    })))
}
