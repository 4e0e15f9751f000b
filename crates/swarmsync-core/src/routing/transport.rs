//! Sending requests through cached paths

use std::sync::Arc;

use rand::seq::IndexedRandom;
use tracing::{info, warn};

use crate::error::{SyncError, SyncResult};
use crate::storage::KeyValueStore;

use super::failures::FailureTracker;
use super::node::Snode;
use super::paths::{OnionPath, PathCache};
use super::pool::NodePool;
use super::swarm::SwarmCache;
use super::RoutingConfig;

/// Which leg of an onion request failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    /// A relay on the path did not respond or rejected the request
    Path(String),
    /// The path worked but the destination node failed
    Node(String),
}

/// Blocking capability: send an encrypted request through `path` to `node`
pub trait OnionTransport: Send + Sync {
    fn send_encrypted(
        &self,
        path: &OnionPath,
        node: &Snode,
        payload: &[u8],
    ) -> Result<Vec<u8>, TransportFailure>;
}

/// Node pool, paths, swarms and failure counters of one session
pub struct RoutingState {
    pool: NodePool,
    paths: PathCache,
    swarms: SwarmCache,
    failures: FailureTracker,
    transport: Arc<dyn OnionTransport>,
}

impl RoutingState {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn OnionTransport>,
        config: RoutingConfig,
    ) -> Self {
        Self {
            pool: NodePool::new(store.clone()),
            paths: PathCache::new(store.clone()),
            swarms: SwarmCache::new(store),
            failures: FailureTracker::new(&config),
            transport,
        }
    }

    pub fn pool(&self) -> &NodePool {
        &self.pool
    }

    pub fn paths(&self) -> &PathCache {
        &self.paths
    }

    pub fn swarms(&self) -> &SwarmCache {
        &self.swarms
    }

    pub fn failures(&self) -> &FailureTracker {
        &self.failures
    }

    /// Send `payload` to `node` over a random populated path
    ///
    /// `swarm_key` names the swarm `node` was picked from, so a node that
    /// keeps failing can be dropped from it.
    ///
    /// # Errors
    ///
    /// `Transport` on any failure; the failure is counted first and may
    /// invalidate the path or drop the node.
    pub fn send(&self, swarm_key: Option<&str>, node: &Snode, payload: &[u8]) -> SyncResult<Vec<u8>> {
        let paths = self.paths.paths_or_rebuild(&self.pool)?;
        let path = paths
            .choose(&mut rand::rng())
            .ok_or_else(|| SyncError::Transport("no usable path".to_string()))?;

        match self.transport.send_encrypted(path, node, payload) {
            Ok(response) => {
                self.failures.record_success(path, node);
                Ok(response)
            }
            Err(TransportFailure::Path(reason)) => {
                warn!(path = path.index, %reason, "Onion request failed on path");
                if self.failures.report_path_failure(path) {
                    self.paths.invalidate(path.index)?;
                }
                Err(SyncError::Transport(reason))
            }
            Err(TransportFailure::Node(reason)) => {
                warn!(node = %node, %reason, "Destination node failed");
                if self.failures.report_node_failure(node) {
                    info!(node = %node, "Dropping failing node");
                    if let Some(key) = swarm_key {
                        self.swarms.drop_node(key, node)?;
                    }
                    self.pool.remove(node)?;
                }
                Err(SyncError::Transport(reason))
            }
        }
    }

    /// Send to a random member of the cached swarm of `swarm_key`
    ///
    /// # Errors
    ///
    /// `Transport` on a swarm miss; the caller refreshes the swarm from the
    /// network and retries.
    pub fn send_to_swarm(&self, swarm_key: &str, payload: &[u8]) -> SyncResult<Vec<u8>> {
        let swarm = self
            .swarms
            .get(swarm_key)?
            .ok_or_else(|| SyncError::Transport(format!("no swarm cached for {}", swarm_key)))?;
        let members: Vec<&Snode> = swarm.iter().collect();
        let node = members
            .choose(&mut rand::rng())
            .ok_or_else(|| SyncError::Transport(format!("empty swarm for {}", swarm_key)))?;
        self.send(Some(swarm_key), node, payload)
    }
}
