//! Failure counting for paths and nodes

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use super::node::Snode;
use super::paths::OnionPath;
use super::RoutingConfig;

/// Counts consecutive failures per path and per node
///
/// A report returns true exactly when the count reaches its threshold; the
/// counter then restarts from zero.
pub struct FailureTracker {
    path_threshold: u32,
    node_threshold: u32,
    paths: Mutex<HashMap<String, u32>>,
    nodes: Mutex<HashMap<Snode, u32>>,
}

fn bump<K: std::hash::Hash + Eq>(counts: &Mutex<HashMap<K, u32>>, key: K, threshold: u32) -> (u32, bool) {
    let mut counts = counts.lock();
    let count = counts.entry(key).or_insert(0);
    *count += 1;
    let current = *count;
    if current >= threshold {
        *count = 0;
        return (current, true);
    }
    (current, false)
}

impl FailureTracker {
    pub fn new(config: &RoutingConfig) -> Self {
        Self {
            path_threshold: config.path_failure_threshold.max(1),
            node_threshold: config.node_failure_threshold.max(1),
            paths: Mutex::new(HashMap::new()),
            nodes: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure of `path`; true when it should be dropped
    pub fn report_path_failure(&self, path: &OnionPath) -> bool {
        let (count, reached) = bump(&self.paths, path.fingerprint(), self.path_threshold);
        debug!(path = path.index, count, "Path failure");
        reached
    }

    /// Record a failure of `node`; true when it should be dropped
    pub fn report_node_failure(&self, node: &Snode) -> bool {
        let (count, reached) = bump(&self.nodes, node.clone(), self.node_threshold);
        debug!(node = %node, count, "Node failure");
        reached
    }

    /// A successful request resets both counters
    pub fn record_success(&self, path: &OnionPath, node: &Snode) {
        self.paths.lock().remove(&path.fingerprint());
        self.nodes.lock().remove(node);
    }

    pub fn path_failures(&self, path: &OnionPath) -> u32 {
        self.paths.lock().get(&path.fingerprint()).copied().unwrap_or(0)
    }

    pub fn node_failures(&self, node: &Snode) -> u32 {
        self.nodes.lock().get(node).copied().unwrap_or(0)
    }
}
