//! Routing-state cache
//!
//! Everything the transport layer needs to reach the storage network:
//! - the node pool, refreshed by external discovery
//! - two persisted three-hop onion paths built from the pool
//! - per-destination swarms
//! - failure counters that invalidate paths and drop nodes
//!
//! The actual onion encryption and HTTP exchange stay behind the
//! [`OnionTransport`] capability.

mod failures;
mod node;
mod paths;
mod pool;
mod swarm;
mod transport;

pub use failures::FailureTracker;
pub use node::{KeySet, Snode};
pub use paths::{OnionPath, PathCache, RebuildGuard, SlotState, PATH_COUNT, PATH_LENGTH};
pub use pool::NodePool;
pub use swarm::SwarmCache;
pub use transport::{OnionTransport, RoutingState, TransportFailure};

/// Failure thresholds of the routing layer
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Failures of one path before it is invalidated
    pub path_failure_threshold: u32,
    /// Failures of one node before it leaves its swarm and the pool
    pub node_failure_threshold: u32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            path_failure_threshold: 3,
            node_failure_threshold: 3,
        }
    }
}
