//! Usage accountant.
//!
//! A simple periodic accountant over the catalog: every sweep it
//! writes one usage row per running container (compute hours since
//! creation at the compute rate) and one per healthy managed service
//! at its kind rate. The read endpoints aggregate those rows; invoice
//! generation, alerting, and forecasting are external concerns.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::catalog::Catalog;
use crate::services::ServiceKind;

/// Dollars per compute hour for a plain container.
const COMPUTE_HOURLY_RATE: f64 = 0.10;

fn hourly_rate(kind: ServiceKind) -> f64 {
    match kind {
        ServiceKind::Bucket => 0.05,
        ServiceKind::Sql => 0.15,
        ServiceKind::Nosql => 0.12,
        ServiceKind::Queue => 0.05,
        ServiceKind::Secrets => 0.08,
    }
}

fn service_type(kind: ServiceKind) -> &'static str {
    match kind {
        ServiceKind::Bucket => "storage",
        ServiceKind::Sql => "database",
        ServiceKind::Nosql => "nosql",
        ServiceKind::Queue => "queue",
        ServiceKind::Secrets => "secrets",
    }
}

#[derive(Debug, Clone)]
pub struct AccountantConfig {
    /// Time between sweeps.
    pub interval: Duration,
}

impl Default for AccountantConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
        }
    }
}

/// One accounting sweep over running containers and healthy services.
pub async fn sweep(catalog: &Catalog) {
    let containers = match catalog.running_containers().await {
        Ok(containers) => containers,
        Err(e) => {
            error!(error = %e, "usage sweep could not list containers");
            return;
        }
    };

    for container in &containers {
        let hours = (Utc::now() - container.created_at).num_seconds().max(0) as f64 / 3600.0;
        let extra = json!({
            "container_id": container.container_id,
            "image": container.image,
            "node_id": container.node_id,
        })
        .to_string();
        if let Err(e) = catalog
            .record_usage(
                &container.container_id,
                "compute",
                hours,
                "hours",
                hours * COMPUTE_HOURLY_RATE,
                Some(&extra),
            )
            .await
        {
            error!(container_id = %container.container_id, error = %e, "failed to record usage");
        }
    }

    for kind in ServiceKind::ALL {
        let services = match catalog.list_services(kind).await {
            Ok(services) => services,
            Err(e) => {
                error!(kind = ?kind, error = %e, "usage sweep could not list services");
                continue;
            }
        };
        for service in services.iter().filter(|s| s.is_healthy) {
            let hours = (Utc::now() - service.created_at).num_seconds().max(0) as f64 / 3600.0;
            if let Err(e) = catalog
                .record_usage(
                    &service.service_id,
                    service_type(kind),
                    hours,
                    "hours",
                    hours * hourly_rate(kind),
                    None,
                )
                .await
            {
                error!(service_id = %service.service_id, error = %e, "failed to record usage");
            }
        }
    }

    debug!(containers = containers.len(), "usage sweep complete");
}

/// Spawn the accountant loop.
pub fn spawn_usage_accountant(catalog: Catalog, config: AccountantConfig) -> watch::Sender<()> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(());

    tokio::spawn(async move {
        let mut ticker = interval(config.interval);
        info!(
            interval_secs = config.interval.as_secs(),
            "usage accountant started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep(&catalog).await;
                }
                _ = shutdown_rx.changed() => {
                    info!("usage accountant shutting down");
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
    use crate::catalog::{ContainerRecord, ContainerStatus};
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_rates() {
        assert!((hourly_rate(ServiceKind::Sql) - 0.15).abs() < 1e-9);
        assert!((hourly_rate(ServiceKind::Secrets) - 0.08).abs() < 1e-9);
        assert_eq!(service_type(ServiceKind::Bucket), "storage");
    }

    #[tokio::test]
    async fn test_sweep_records_compute_usage() {
        let catalog = Catalog::connect("sqlite::memory:").await.unwrap();
        catalog.register_node("n1", "http://h:1").await.unwrap();
        catalog
            .insert_container(&ContainerRecord {
                container_id: "c1".to_string(),
                user_id: "alice".to_string(),
                node_id: "n1".to_string(),
                image: "nginx:alpine".to_string(),
                name: None,
                status: ContainerStatus::Running,
                created_at: Utc::now() - ChronoDuration::hours(2),
            })
            .await
            .unwrap();

        sweep(&catalog).await;

        let totals = catalog
            .usage_totals_since(Utc::now() - ChronoDuration::minutes(5))
            .await
            .unwrap();
        let compute = totals.iter().find(|(t, _, _)| t == "compute").unwrap();
        // Two hours at $0.10/h, give or take clock skew.
        assert!(compute.1 > 1.9 && compute.1 < 2.1);
        assert!(compute.2 > 0.19 && compute.2 < 0.21);
    }

    #[tokio::test]
    async fn test_sweep_skips_stopped_containers() {
        let catalog = Catalog::connect("sqlite::memory:").await.unwrap();
        catalog.register_node("n1", "http://h:1").await.unwrap();
        catalog
            .insert_container(&ContainerRecord {
                container_id: "c1".to_string(),
                user_id: "alice".to_string(),
                node_id: "n1".to_string(),
                image: "nginx:alpine".to_string(),
                name: None,
                status: ContainerStatus::Stopped,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        sweep(&catalog).await;

        let totals = catalog
            .usage_totals_since(Utc::now() - ChronoDuration::minutes(5))
            .await
            .unwrap();
        assert!(totals.is_empty());
    }
}
