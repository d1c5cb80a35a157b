//! Bucket (object store) service routes.
//!
//! File operations are forwarded to the service's own `/data/*` API;
//! uploads pass the multipart body through, downloads stream the
//! bytes back with a `Content-Disposition` header.

use std::time::Duration;

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::Value;

use crate::error::ApiError;
use crate::server::AppState;
use crate::services::{
    check_service_health_now, list_services_response, load_healthy_service, load_service, relay,
    remove_service_of_kind, ServiceInfo, ServiceKind,
};

const KIND: ServiceKind = ServiceKind::Bucket;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/bucket-services", get(list_services))
        .route(
            "/bucket-services/{service_id}",
            get(get_service).delete(remove_service),
        )
        .route("/bucket-services/{service_id}/files", get(list_files))
        .route("/bucket-services/{service_id}/upload", post(upload_file))
        .route(
            "/bucket-services/{service_id}/download/{filename}",
            get(download_file),
        )
        .route(
            "/bucket-services/{service_id}/delete/{filename}",
            delete(delete_file),
        )
        .route("/bucket-services/{service_id}/health", get(check_health))
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

async fn list_files(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let service = load_healthy_service(&state.catalog, KIND, &service_id).await?;
    let result = state
        .http
        .get(format!("{}/data/files", service.service_url()))
        .timeout(Duration::from_secs(30))
        .send()
        .await;
    relay(result).await.map(Json)
}

async fn upload_file(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let service = load_healthy_service(&state.catalog, KIND, &service_id).await?;

    // Re-pack the first file field into an outbound multipart body.
    let mut form: Option<reqwest::multipart::Form> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .unwrap_or("upload")
            .to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {}", e)))?;

        let mut part = reqwest::multipart::Part::bytes(bytes.to_vec()).file_name(filename);
        if let Some(content_type) = content_type {
            part = part
                .mime_str(&content_type)
                .map_err(|e| ApiError::Internal(e.to_string()))?;
        }
        form = Some(reqwest::multipart::Form::new().part("file", part));
        break;
    }

    let Some(form) = form else {
        return Err(ApiError::BadRequest("missing 'file' field".to_string()));
    };

    let result = state
        .http
        .post(format!("{}/data/upload", service.service_url()))
        .multipart(form)
        .timeout(Duration::from_secs(60))
        .send()
        .await;
    relay(result).await.map(Json)
}

async fn download_file(
    State(state): State<AppState>,
    Path((service_id, filename)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let service = load_healthy_service(&state.catalog, KIND, &service_id).await?;

    let resp = state
        .http
        .get(format!(
            "{}/data/download/{}",
            service.service_url(),
            filename
        ))
        .timeout(Duration::from_secs(60))
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ApiError::Upstream {
            status: status.as_u16(),
            body,
        });
    }

    let content_type = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let stream = resp
        .bytes_stream()
        .map(|result| result.map_err(std::io::Error::other));

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename={}", filename),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(response.into_response())
}

async fn delete_file(
    State(state): State<AppState>,
    Path((service_id, filename)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let service = load_healthy_service(&state.catalog, KIND, &service_id).await?;
    let result = state
        .http
        .delete(format!("{}/data/delete/{}", service.service_url(), filename))
        .timeout(Duration::from_secs(30))
        .send()
        .await;
    relay(result).await.map(Json)
}
