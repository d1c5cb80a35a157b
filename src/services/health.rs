//! Managed-service health and restart loop.
//!
//! One sweep at a time walks every service of every kind, probes its
//! own `/health` endpoint, and writes the health bit back. An
//! unhealthy service gets exactly one restart attempt: start the
//! backing container on its node, and either recover the service to
//! running or mark it failed. Recreation is a manual concern, not this
//! loop's. Per-service failures are logged and never abort the sweep.

use std::time::Duration;

use metrics::gauge;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::catalog::{Catalog, ContainerStatus, ServiceRecord, ServiceStatus};
use crate::client::NodeClient;
use crate::services::ServiceKind;

#[derive(Debug, Clone)]
pub struct ServiceHealthConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Budget for one service health probe.
    pub probe_timeout: Duration,
}

impl Default for ServiceHealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(crate::cluster::SERVICE_HEALTH_CHECK_INTERVAL_SECS),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

/// `GET {service_url}/health` with the probe timeout. Any transport
/// error or non-2xx counts as unhealthy.
async fn probe(http: &reqwest::Client, service_url: &str, timeout: Duration) -> bool {
    match http
        .get(format!("{}/health", service_url))
        .timeout(timeout)
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            debug!(url = service_url, error = %e, "service health probe failed");
            false
        }
    }
}

/// One restart attempt for an unhealthy service: resolve the backing
/// container and its node, start the container, and recover or fail
/// the service accordingly. Returns whether the service is healthy
/// again.
async fn restart_service(
    catalog: &Catalog,
    node_client: &NodeClient,
    kind: ServiceKind,
    service: &ServiceRecord,
) -> Result<bool, sqlx::Error> {
    info!(service_id = %service.service_id, kind = ?kind, "attempting service restart");

    let container = catalog.get_container(&service.container_id).await?;
    let node = match &container {
        Some(container) => catalog.get_node(&container.node_id).await?,
        None => None,
    };

    match (&container, &node) {
        (Some(container), Some(node)) if node.is_healthy => {
            match node_client
                .start_container(&node.url, &container.container_id)
                .await
            {
                Ok(_) => {
                    info!(
                        service_id = %service.service_id,
                        container_id = %container.container_id,
                        "service container restarted"
                    );
                    catalog
                        .set_service_health(kind, &service.service_id, true, ServiceStatus::Running)
                        .await?;
                    catalog
                        .set_container_status(&container.container_id, ContainerStatus::Running)
                        .await?;
                    return Ok(true);
                }
                Err(e) => {
                    warn!(
                        service_id = %service.service_id,
                        error = %e,
                        "container start failed"
                    );
                }
            }
        }
        (None, _) => {
            error!(service_id = %service.service_id, "backing container missing from catalog");
        }
        _ => {
            error!(service_id = %service.service_id, "node unavailable for restart");
        }
    }

    // One attempt only; anything short of a clean start fails the
    // service and leaves recovery to a manual re-launch.
    catalog
        .set_service_health(kind, &service.service_id, false, ServiceStatus::Failed)
        .await?;
    Ok(false)
}

/// One full sweep over every service of every kind.
pub async fn sweep(
    catalog: &Catalog,
    node_client: &NodeClient,
    http: &reqwest::Client,
    config: &ServiceHealthConfig,
) {
    for kind in ServiceKind::ALL {
        let services = match catalog.list_services(kind).await {
            Ok(services) => services,
            Err(e) => {
                error!(kind = ?kind, error = %e, "health sweep could not list services");
                continue;
            }
        };

        let mut healthy_count = 0usize;
        for service in &services {
            let healthy = probe(http, &service.service_url(), config.probe_timeout).await;

            if healthy != service.is_healthy {
                info!(
                    service_id = %service.service_id,
                    was_healthy = service.is_healthy,
                    now_healthy = healthy,
                    "service health changed"
                );
            }

            if healthy {
                healthy_count += 1;
                if let Err(e) = catalog
                    .set_service_health(kind, &service.service_id, true, ServiceStatus::Running)
                    .await
                {
                    error!(service_id = %service.service_id, error = %e, "failed to record health");
                }
                continue;
            }

            if let Err(e) = catalog
                .set_service_health(kind, &service.service_id, false, ServiceStatus::Unhealthy)
                .await
            {
                error!(service_id = %service.service_id, error = %e, "failed to record health");
                continue;
            }

            warn!(service_id = %service.service_id, kind = ?kind, "service unhealthy, attempting restart");
            match restart_service(catalog, node_client, kind, service).await {
                Ok(true) => healthy_count += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(service_id = %service.service_id, error = %e, "restart bookkeeping failed");
                }
            }
        }

        gauge!(kind.gauge()).set(healthy_count as f64);
    }
}

/// Spawn the service health loop. The loop is self-serialising: one
/// task, one sweep at a time.
pub fn spawn_service_health_loop(
    catalog: Catalog,
    node_client: NodeClient,
    config: ServiceHealthConfig,
) -> watch::Sender<()> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(());

    tokio::spawn(async move {
        let http = reqwest::Client::new();
        let mut ticker = interval(config.interval);
        info!(
            interval_secs = config.interval.as_secs(),
            "service health loop started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep(&catalog, &node_client, &http, &config).await;
                }
                _ = shutdown_rx.changed() => {
                    info!("service health loop shutting down");
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
    use crate::catalog::ContainerRecord;
    use chrono::Utc;

    async fn seeded_catalog() -> Catalog {
        let catalog = Catalog::connect("sqlite::memory:").await.unwrap();
        catalog
            .register_node("n1", "http://127.0.0.1:1")
            .await
            .unwrap();
        catalog
            .insert_container(&ContainerRecord {
                container_id: "c1".to_string(),
                user_id: "system".to_string(),
                node_id: "n1".to_string(),
                image: "bucket-service".to_string(),
                name: Some("bucket-service".to_string()),
                status: ContainerStatus::Running,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        catalog
            .insert_service(
                ServiceKind::Bucket,
                &ServiceRecord {
                    service_id: "bucket-1".to_string(),
                    container_id: "c1".to_string(),
                    node_id: "n1".to_string(),
                    // Unreachable endpoint: probes fail fast.
                    ip_address: "127.0.0.1".to_string(),
                    port: 1,
                    status: ServiceStatus::Running,
                    is_healthy: true,
                    created_at: Utc::now(),
                    last_health_check: Utc::now(),
                },
            )
            .await
            .unwrap();
        catalog
    }

    #[test]
    fn test_default_config() {
        let config = ServiceHealthConfig::default();
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.probe_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_restart_fails_service_when_node_unreachable() {
        let catalog = seeded_catalog().await;
        let service = catalog
            .get_service(ServiceKind::Bucket, "bucket-1")
            .await
            .unwrap()
            .unwrap();

        let client = NodeClient::new("test-token");
        let recovered = restart_service(&catalog, &client, ServiceKind::Bucket, &service)
            .await
            .unwrap();
        assert!(!recovered);

        let after = catalog
            .get_service(ServiceKind::Bucket, "bucket-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.status, ServiceStatus::Failed);
        assert!(!after.is_healthy);
    }

    #[tokio::test]
    async fn test_restart_fails_service_when_node_unhealthy() {
        let catalog = seeded_catalog().await;
        catalog.set_node_health("n1", false).await.unwrap();
        let service = catalog
            .get_service(ServiceKind::Bucket, "bucket-1")
            .await
            .unwrap()
            .unwrap();

        let client = NodeClient::new("test-token");
        let recovered = restart_service(&catalog, &client, ServiceKind::Bucket, &service)
            .await
            .unwrap();
        assert!(!recovered);

        let after = catalog
            .get_service(ServiceKind::Bucket, "bucket-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.status, ServiceStatus::Failed);
    }

    #[tokio::test]
    async fn test_sweep_marks_unreachable_service_and_continues() {
        let catalog = seeded_catalog().await;
        let client = NodeClient::new("test-token");
        let http = reqwest::Client::new();
        let config = ServiceHealthConfig {
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(2),
        };

        sweep(&catalog, &client, &http, &config).await;

        // Probe fails, restart fails (node start unreachable), so the
        // service ends the sweep marked failed.
        let after = catalog
            .get_service(ServiceKind::Bucket, "bucket-1")
            .await
            .unwrap()
            .unwrap();
        assert!(!after.is_healthy);
        assert_eq!(after.status, ServiceStatus::Failed);
    }
}
