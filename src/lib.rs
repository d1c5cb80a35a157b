//! Stratus control plane library.
//!
//! The control plane registers worker nodes, keeps track of their
//! liveness, places containers and managed services onto them, routes
//! client operations to the owning node, and proxies interactive
//! terminal sessions. See the module docs for the individual pieces:
//!
//! - [`catalog`]: the durable store bridging loops and handlers
//! - [`client`]: typed RPC wrapper over the worker-node HTTP API
//! - [`cluster`]: node registry, liveness loop, placement
//! - [`services`]: managed-service launch, health/restart, routing
//! - [`proxy`]: WebSocket terminal bridge
//! - [`server`]: HTTP surface, rate limiting, request telemetry
//! - [`billing`]: the periodic usage accountant

pub mod billing;
pub mod catalog;
pub mod client;
pub mod cluster;
pub mod config;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod server;
pub mod services;
