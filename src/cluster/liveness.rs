//! Node liveness loop.
//!
//! Every tick the loop walks all registered nodes, issues
//! `GET /health` against each, and writes the outcome back to the
//! catalog. Nodes are processed sequentially; each probe carries its
//! own timeout, so one dead node can only delay a sweep by that
//! budget, never stall it. After every sweep the `active_nodes` gauge
//! is set to the healthy count.

use std::time::Duration;

use metrics::gauge;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::catalog::{Catalog, NodeRecord};
use crate::client::NodeClient;
use crate::metrics::ACTIVE_NODES;

#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// Time between sweeps.
    pub interval: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(super::HEALTH_CHECK_INTERVAL_SECS),
        }
    }
}

/// Probe one node and write the result back. Returns the fresh
/// health bit. Shared by the loop and the manual probe endpoint.
pub async fn check_node(
    catalog: &Catalog,
    client: &NodeClient,
    node: &NodeRecord,
) -> Result<bool, sqlx::Error> {
    let healthy = match client.health(&node.url).await {
        Ok(healthy) => healthy,
        Err(e) => {
            warn!(node_id = %node.node_id, error = %e, "node health check failed");
            false
        }
    };
    catalog.set_node_health(&node.node_id, healthy).await?;
    Ok(healthy)
}

/// Run one full sweep over all registered nodes.
pub async fn sweep(catalog: &Catalog, client: &NodeClient) {
    let nodes = match catalog.list_nodes().await {
        Ok(nodes) => nodes,
        Err(e) => {
            error!(error = %e, "liveness sweep could not list nodes");
            return;
        }
    };

    let total = nodes.len();
    let mut healthy_count = 0usize;
    for node in &nodes {
        match check_node(catalog, client, node).await {
            Ok(true) => healthy_count += 1,
            Ok(false) => {}
            Err(e) => {
                // A write-back failure must not abort the sweep.
                error!(node_id = %node.node_id, error = %e, "failed to record node health");
            }
        }
    }

    gauge!(ACTIVE_NODES).set(healthy_count as f64);
    info!(total, healthy = healthy_count, "node liveness sweep complete");
}

/// Spawn the liveness loop. Dropping or signalling the returned
/// sender stops it.
pub fn spawn_liveness_loop(
    catalog: Catalog,
    client: NodeClient,
    config: LivenessConfig,
) -> watch::Sender<()> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(());

    tokio::spawn(async move {
        let mut ticker = interval(config.interval);
        info!(
            interval_secs = config.interval.as_secs(),
            "node liveness loop started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep(&catalog, &client).await;
                }
                _ = shutdown_rx.changed() => {
                    info!("node liveness loop shutting down");
                    break;
                }
            }
        }
    });

    shutdown_tx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_interval() {
        let config = LivenessConfig::default();
        assert_eq!(config.interval, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_check_node_marks_unreachable_node_unhealthy() {
        let catalog = Catalog::connect("sqlite::memory:").await.unwrap();
        // A port nothing listens on; the probe fails fast with a
        // connection error rather than waiting out the timeout.
        let node = catalog
            .register_node("n1", "http://127.0.0.1:1")
            .await
            .unwrap();
        assert!(node.is_healthy);

        let client = NodeClient::new("test-token");
        let healthy = check_node(&catalog, &client, &node).await.unwrap();
        assert!(!healthy);

        let stored = catalog.get_node("n1").await.unwrap().unwrap();
        assert!(!stored.is_healthy);
        assert!(stored.last_health_check >= node.last_health_check);
    }

    #[tokio::test]
    async fn test_sweep_survives_unreachable_nodes() {
        let catalog = Catalog::connect("sqlite::memory:").await.unwrap();
        catalog
            .register_node("n1", "http://127.0.0.1:1")
            .await
            .unwrap();
        catalog
            .register_node("n2", "http://127.0.0.1:1")
            .await
            .unwrap();

        let client = NodeClient::new("test-token");
        sweep(&catalog, &client).await;

        assert_eq!(catalog.count_healthy_nodes().await.unwrap(), 0);
    }
}
