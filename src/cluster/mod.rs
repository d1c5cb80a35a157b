//! Node registry, liveness, and placement.
//!
//! Nodes self-register over HTTP and are never deleted by the control
//! plane — only marked unhealthy. The liveness loop probes every node
//! on a fixed interval; placement picks a target from the healthy set
//! through a pluggable selector.

pub mod liveness;
pub mod placement;
pub mod registry;

pub use liveness::{check_node, spawn_liveness_loop, LivenessConfig};
pub use placement::{place, FirstHealthy, NodeSelector, PlacementRequest};
pub use registry::{client_ip, resolve_advertised_url};

/// Default seconds between node liveness sweeps.
pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 10;

/// Default seconds between managed-service health sweeps.
pub const SERVICE_HEALTH_CHECK_INTERVAL_SECS: u64 = 30;
