//! Typed RPC wrapper over the worker-node HTTP API.
//!
//! One shared `reqwest::Client`, per-call timeouts, and the bearer
//! token injected into every request. Non-2xx answers surface as
//! [`NodeError::Status`] with the node's body attached; transport
//! failures as [`NodeError::Unreachable`]. There are no retries at
//! this layer — retry policy belongs to the callers.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

/// Timeout for `GET /health`.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for read-only container queries.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for launches and lifecycle operations.
pub const LAUNCH_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout for a single readiness poll of the ports endpoint.
pub const PORTS_POLL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NodeError {
    /// The node answered with a non-2xx status.
    #[error("node returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The node could not be reached (connect, timeout, protocol).
    #[error("node unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),
}

impl NodeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, NodeError::Status { status: 404, .. })
    }
}

#[derive(Clone)]
pub struct NodeClient {
    http: Client,
    token: String,
}

impl NodeClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            token: token.into(),
        }
    }

    fn request(&self, method: Method, url: String, timeout: Duration) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .timeout(timeout)
    }

    /// `GET {base}/health`. True on any 2xx.
    pub async fn health(&self, base_url: &str) -> Result<bool, NodeError> {
        let url = format!("{}/health", normalize(base_url));
        let resp = self
            .request(Method::GET, url, HEALTH_TIMEOUT)
            .send()
            .await?;
        Ok(resp.status().is_success())
    }

    /// `POST {base}/launch` with a raw container config.
    pub async fn launch(&self, base_url: &str, config: &Value) -> Result<Value, NodeError> {
        let url = format!("{}/launch", normalize(base_url));
        let resp = self
            .request(Method::POST, url, LAUNCH_TIMEOUT)
            .json(config)
            .send()
            .await?;
        into_json(resp).await
    }

    /// `POST {base}{path}` for the kind-specific service launch
    /// endpoints (`/launchBucket`, `/launchDB`, ...).
    pub async fn launch_service(
        &self,
        base_url: &str,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, NodeError> {
        let url = format!("{}{}", normalize(base_url), path);
        let mut req = self.request(Method::POST, url, LAUNCH_TIMEOUT);
        if let Some(body) = body {
            req = req.json(body);
        }
        into_json(req.send().await?).await
    }

    /// `GET {base}/containers/{id}/status`.
    pub async fn container_status(
        &self,
        base_url: &str,
        container_id: &str,
    ) -> Result<Value, NodeError> {
        let url = format!("{}/containers/{}/status", normalize(base_url), container_id);
        into_json(self.request(Method::GET, url, READ_TIMEOUT).send().await?).await
    }

    /// `GET {base}/containers/{id}/ports`. Used by readiness polling,
    /// so it carries the short poll timeout rather than the read one.
    pub async fn container_ports(
        &self,
        base_url: &str,
        container_id: &str,
    ) -> Result<Value, NodeError> {
        let url = format!("{}/containers/{}/ports", normalize(base_url), container_id);
        into_json(
            self.request(Method::GET, url, PORTS_POLL_TIMEOUT)
                .send()
                .await?,
        )
        .await
    }

    /// `POST {base}/containers/{id}/start`.
    pub async fn start_container(
        &self,
        base_url: &str,
        container_id: &str,
    ) -> Result<Value, NodeError> {
        self.lifecycle(base_url, container_id, "start").await
    }

    /// `POST {base}/containers/{id}/stop`.
    pub async fn stop_container(
        &self,
        base_url: &str,
        container_id: &str,
    ) -> Result<Value, NodeError> {
        self.lifecycle(base_url, container_id, "stop").await
    }

    /// `POST {base}/containers/{id}/restart`, falling back to
    /// stop-then-start for nodes that predate the restart endpoint.
    /// A failed stop is tolerated — the container may already be down.
    pub async fn restart_container(
        &self,
        base_url: &str,
        container_id: &str,
    ) -> Result<Value, NodeError> {
        match self.lifecycle(base_url, container_id, "restart").await {
            Err(ref e) if e.is_not_found() => {
                info!(container_id, "node lacks restart endpoint, stop/start instead");
                if let Err(e) = self.stop_container(base_url, container_id).await {
                    debug!(container_id, error = %e, "stop before start failed");
                }
                self.start_container(base_url, container_id).await
            }
            other => other,
        }
    }

    /// `DELETE {base}/containers/{id}`.
    pub async fn remove_container(
        &self,
        base_url: &str,
        container_id: &str,
    ) -> Result<Value, NodeError> {
        let url = format!("{}/containers/{}", normalize(base_url), container_id);
        into_json(
            self.request(Method::DELETE, url, LAUNCH_TIMEOUT)
                .send()
                .await?,
        )
        .await
    }

    /// `GET {base}/templates`, tolerating nodes without the endpoint.
    /// Returns `None` on 404 so the caller can substitute defaults.
    pub async fn templates(&self, base_url: &str) -> Result<Option<Value>, NodeError> {
        let url = format!("{}/templates", normalize(base_url));
        let resp = self.request(Method::GET, url, READ_TIMEOUT).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        into_json(resp).await.map(Some)
    }

    async fn lifecycle(
        &self,
        base_url: &str,
        container_id: &str,
        action: &str,
    ) -> Result<Value, NodeError> {
        let url = format!(
            "{}/containers/{}/{}",
            normalize(base_url),
            container_id,
            action
        );
        into_json(
            self.request(Method::POST, url, LAUNCH_TIMEOUT)
                .send()
                .await?,
        )
        .await
    }
}

fn normalize(base_url: &str) -> &str {
    base_url.trim_end_matches('/')
}

async fn into_json(resp: reqwest::Response) -> Result<Value, NodeError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(NodeError::Status {
            status: status.as_u16(),
            body,
        });
    }
    // Some node endpoints answer 200 with an empty body.
    let bytes = resp.bytes().await?;
    if bytes.is_empty() {
        return Ok(json!({}));
    }
    Ok(serde_json::from_slice::<Value>(&bytes).unwrap_or_else(|_| json!({})))
}
