//! Prometheus metrics for the control plane.
//!
//! A single global recorder is installed at startup; after that the
//! `metrics` macros (`counter!`, `gauge!`, `histogram!`) work from any
//! component, including the background loops. The handle is kept only
//! to render the `/metrics` endpoint.

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Histogram bucket boundaries for request latency (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

pub const REQUEST_COUNT: &str = "orchestrator_requests_total";
pub const REQUEST_LATENCY: &str = "orchestrator_request_duration_seconds";
pub const ACTIVE_NODES: &str = "active_nodes";
pub const ACTIVE_CONTAINERS: &str = "active_containers";
pub const WEBSOCKET_CONNECTIONS: &str = "websocket_connections";

#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global recorder and register metric descriptions.
    ///
    /// Must be called once at startup, before any macro call.
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(REQUEST_LATENCY.to_string()),
                LATENCY_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        describe_counter!(REQUEST_COUNT, Unit::Count, "Total orchestrator requests");
        describe_histogram!(
            REQUEST_LATENCY,
            Unit::Seconds,
            "Orchestrator request latency"
        );
        describe_gauge!(ACTIVE_NODES, Unit::Count, "Number of healthy nodes");
        describe_gauge!(
            ACTIVE_CONTAINERS,
            Unit::Count,
            "Number of running containers"
        );
        describe_gauge!(
            WEBSOCKET_CONNECTIONS,
            Unit::Count,
            "Number of active terminal WebSocket connections"
        );
        describe_gauge!(
            "active_bucket_services",
            Unit::Count,
            "Number of healthy bucket services"
        );
        describe_gauge!(
            "active_db_services",
            Unit::Count,
            "Number of healthy database services"
        );
        describe_gauge!(
            "active_nosql_services",
            Unit::Count,
            "Number of healthy NoSQL services"
        );
        describe_gauge!(
            "active_queue_services",
            Unit::Count,
            "Number of healthy queue services"
        );
        describe_gauge!(
            "active_secrets_services",
            Unit::Count,
            "Number of healthy secrets services"
        );

        Self { handle }
    }

    /// A handle that is not installed as the global recorder.
    ///
    /// Tests build many routers in one process; only one global
    /// recorder can exist, so they use a detached handle instead.
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: recorder.handle(),
        }
    }

    /// Render the current exposition for `GET /metrics`.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
