//! HTTP front door: shared state and the route table.

pub mod handlers;
pub mod middleware;
pub mod rate_limit;

use std::sync::Arc;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::catalog::Catalog;
use crate::client::NodeClient;
use crate::cluster::{FirstHealthy, NodeSelector};
use crate::config::Settings;
use crate::metrics::Metrics;
use crate::proxy;
use crate::services;

use middleware::{enforce_rate_limit, track_requests};
use rate_limit::RateLimiter;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Catalog,
    /// Authenticated client for worker-node RPCs.
    pub node_client: NodeClient,
    /// Plain client for forwarding to managed-service endpoints.
    pub http: reqwest::Client,
    pub limiter: Arc<RateLimiter>,
    pub selector: Arc<dyn NodeSelector>,
    pub settings: Arc<Settings>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(catalog: Catalog, settings: Settings, metrics: Metrics) -> Self {
        let node_client = NodeClient::new(settings.node_auth_token.clone());
        Self {
            catalog,
            node_client,
            http: reqwest::Client::new(),
            limiter: Arc::new(RateLimiter::new()),
            selector: Arc::new(FirstHealthy),
            settings: Arc::new(settings),
            metrics,
        }
    }

    /// Swap the placement policy.
    pub fn with_selector(mut self, selector: Arc<dyn NodeSelector>) -> Self {
        self.selector = selector;
        self
    }
}

/// Assemble the full route table. Route classes carry their own
/// token-bucket quotas: launches and registration at 10/min, container
/// lifecycle at 20/min, reads and service operations at 30/min.
pub fn create_router(state: AppState) -> Router {
    let launch_routes = Router::new()
        .route("/register_node/{node_id}", post(handlers::register_node))
        .route(
            "/health_check/{node_id}",
            get(handlers::manual_health_check),
        )
        .route("/launch", post(handlers::launch))
        .route("/launchBucket", post(handlers::launch_bucket))
        .route("/launchDB", post(handlers::launch_db))
        .route("/launchNoSQL", post(handlers::launch_nosql))
        .route("/launchQueue", post(handlers::launch_queue))
        .route("/launchSecrets", post(handlers::launch_secrets))
        .layer(from_fn_with_state(
            (state.clone(), rate_limit::LAUNCH),
            enforce_rate_limit,
        ));

    let lifecycle_routes = Router::new()
        .route(
            "/containers/{container_id}/start",
            post(handlers::start_container),
        )
        .route(
            "/containers/{container_id}/stop",
            post(handlers::stop_container),
        )
        .route(
            "/containers/{container_id}/restart",
            post(handlers::restart_container),
        )
        .route(
            "/containers/{container_id}",
            delete(handlers::delete_container),
        )
        .layer(from_fn_with_state(
            (state.clone(), rate_limit::LIFECYCLE),
            enforce_rate_limit,
        ));

    let read_routes = Router::new()
        .route("/nodes", get(handlers::list_nodes))
        .route("/containers", get(handlers::list_containers))
        .route(
            "/containers/{container_id}/status",
            get(handlers::container_status),
        )
        .route(
            "/containers/{container_id}/ports",
            get(handlers::container_ports),
        )
        .route("/user/{user_id}/containers", get(handlers::user_containers))
        .route("/templates", get(handlers::templates))
        .route("/billing/usage", get(handlers::billing_usage))
        .route(
            "/billing/cost-breakdown",
            get(handlers::billing_cost_breakdown),
        )
        .merge(services::bucket::router())
        .merge(services::sql::router())
        .merge(services::nosql::router())
        .merge(services::queue::router())
        .merge(services::secrets::router())
        .layer(from_fn_with_state(
            (state.clone(), rate_limit::READ),
            enforce_rate_limit,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route(
            "/ws/terminal/{node_id}/{container_id}",
            get(proxy::terminal_proxy),
        )
        .merge(launch_routes)
        .merge(lifecycle_routes)
        .merge(read_routes)
        .layer(from_fn(track_requests))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
