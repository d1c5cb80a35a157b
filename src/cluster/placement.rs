//! Placement: choosing a node for a new container or service.
//!
//! The selector is the single pluggable seam. Round-robin, load-aware,
//! or affinity policies slot in behind [`NodeSelector`] without
//! touching the launch path; the shipped default takes the first node
//! in registration order.

use std::sync::Arc;

use crate::catalog::{Catalog, NodeRecord};
use crate::error::ApiError;
use crate::services::ServiceKind;

/// Context a selector may consult when choosing a node.
#[derive(Debug, Clone, Default)]
pub struct PlacementRequest {
    /// Managed-service kind, if this launch is for one.
    pub kind: Option<ServiceKind>,
    /// Requesting user for plain container launches.
    pub user_id: Option<String>,
}

impl PlacementRequest {
    pub fn for_kind(kind: ServiceKind) -> Self {
        Self {
            kind: Some(kind),
            user_id: None,
        }
    }

    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            kind: None,
            user_id: Some(user_id.into()),
        }
    }
}

/// Chooses a node from the healthy set. `nodes` is already filtered
/// to healthy nodes in deterministic registration order.
pub trait NodeSelector: Send + Sync {
    fn select<'a>(
        &self,
        nodes: &'a [NodeRecord],
        request: &PlacementRequest,
    ) -> Option<&'a NodeRecord>;
}

/// Default policy: the first healthy node.
pub struct FirstHealthy;

impl NodeSelector for FirstHealthy {
    fn select<'a>(
        &self,
        nodes: &'a [NodeRecord],
        _request: &PlacementRequest,
    ) -> Option<&'a NodeRecord> {
        nodes.first()
    }
}

/// Pick a node for `request`, or fail with `no-capacity` when the
/// healthy set is empty (or the selector declines every node).
pub async fn place(
    catalog: &Catalog,
    selector: &Arc<dyn NodeSelector>,
    request: &PlacementRequest,
) -> Result<NodeRecord, ApiError> {
    let nodes = catalog.healthy_nodes().await?;
    selector
        .select(&nodes, request)
        .cloned()
        .ok_or(ApiError::NoCapacity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn node(id: &str) -> NodeRecord {
        NodeRecord {
            node_id: id.to_string(),
            url: format!("http://{}:9000", id),
            is_healthy: true,
            last_health_check: Utc::now(),
            last_seen: Utc::now(),
            registered_at: Utc::now(),
        }
    }

    #[test]
    fn test_first_healthy_takes_first() {
        let nodes = vec![node("n1"), node("n2"), node("n3")];
        let selected = FirstHealthy
            .select(&nodes, &PlacementRequest::default())
            .unwrap();
        assert_eq!(selected.node_id, "n1");
    }

    #[test]
    fn test_first_healthy_empty_set() {
        assert!(FirstHealthy
            .select(&[], &PlacementRequest::default())
            .is_none());
    }

    #[tokio::test]
    async fn test_place_with_no_healthy_nodes_is_no_capacity() {
        let catalog = Catalog::connect("sqlite::memory:").await.unwrap();
        let selector: Arc<dyn NodeSelector> = Arc::new(FirstHealthy);

        let result = place(&catalog, &selector, &PlacementRequest::default()).await;
        assert!(matches!(result, Err(ApiError::NoCapacity)));
    }

    #[tokio::test]
    async fn test_place_skips_unhealthy_nodes() {
        let catalog = Catalog::connect("sqlite::memory:").await.unwrap();
        catalog
            .register_node("n1", "http://10.0.0.1:9000")
            .await
            .unwrap();
        catalog
            .register_node("n2", "http://10.0.0.2:9000")
            .await
            .unwrap();
        catalog.set_node_health("n1", false).await.unwrap();

        let selector: Arc<dyn NodeSelector> = Arc::new(FirstHealthy);
        let chosen = place(&catalog, &selector, &PlacementRequest::default())
            .await
            .unwrap();
        assert_eq!(chosen.node_id, "n2");
    }
}
