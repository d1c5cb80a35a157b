//! Request-path error type and its HTTP mapping.
//!
//! Handlers return `Result<_, ApiError>`; the front door turns every
//! variant into a JSON body of the shape `{"detail": "..."}` with a
//! stable status code. Background loops never surface these — they
//! log and move on.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::client::NodeError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// No healthy node available for placement.
    #[error("No healthy nodes available")]
    NoCapacity,

    /// Unknown node / container / service.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// A launch timed out waiting for a host port.
    #[error("{0}")]
    NotReady(String),

    /// The target is known but marked unhealthy; the request was not
    /// forwarded.
    #[error("{0}")]
    Unavailable(String),

    /// A node (or managed service) answered with a non-2xx status.
    #[error("upstream returned {status}")]
    Upstream { status: u16, body: String },

    /// Transport-level failure talking to a node or service.
    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    /// Malformed request body or parameters.
    #[error("{0}")]
    BadRequest(String),

    /// Front-door rate limit tripped.
    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("catalog error: {0}")]
    Catalog(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

impl From<NodeError> for ApiError {
    fn from(err: NodeError) -> Self {
        match err {
            NodeError::Status { status, body } => ApiError::Upstream { status, body },
            NodeError::Unreachable(e) => ApiError::Unreachable(e.to_string()),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Unreachable(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl ApiError {
    /// The status code this error maps to on the wire.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NoCapacity | ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NotReady(_) => StatusCode::INTERNAL_SERVER_ERROR,
            // 4xx from a node passes through; 5xx collapses to 500.
            ApiError::Upstream { status, .. } => {
                if (400..500).contains(status) {
                    StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }
            ApiError::Unreachable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Catalog(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::Upstream { status, body } => {
                if (400..500).contains(status) && !body.is_empty() {
                    body.clone()
                } else {
                    format!("upstream error ({})", status)
                }
            }
            // Catalog internals stay out of responses.
            ApiError::Catalog(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        }
        let body = ErrorBody {
            detail: self.detail(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_capacity_maps_to_503() {
        let err = ApiError::NoCapacity;
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.detail(), "No healthy nodes available");
    }

    #[test]
    fn test_not_found_maps_to_404() {
        assert_eq!(
            ApiError::NotFound("Bucket service").status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_node_4xx_passes_through() {
        let err = ApiError::Upstream {
            status: 422,
            body: "bad image".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.detail(), "bad image");
    }

    #[test]
    fn test_node_5xx_collapses_to_500() {
        let err = ApiError::Upstream {
            status: 502,
            body: "gateway".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_rate_limited_maps_to_429() {
        assert_eq!(
            ApiError::RateLimited.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_catalog_detail_is_redacted() {
        let err = ApiError::Catalog(sqlx::Error::RowNotFound);
        assert_eq!(err.detail(), "internal error");
    }
}
