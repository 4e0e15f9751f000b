//! Cached set of known network nodes

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::SyncResult;
use crate::storage::{load_record, save_record, KeyValueStore, Table};

use super::node::Snode;

const POOL_KEY: &str = "pool";

/// Decode a list of text-form nodes, dropping unparseable entries
pub(crate) fn decode_nodes(encoded: Vec<String>) -> BTreeSet<Snode> {
    encoded
        .into_iter()
        .filter_map(|s| match s.parse::<Snode>() {
            Ok(node) => Some(node),
            Err(e) => {
                warn!(node = %s, ?e, "Dropping unparseable node record");
                None
            }
        })
        .collect()
}

pub(crate) fn encode_nodes(nodes: &BTreeSet<Snode>) -> Vec<String> {
    nodes.iter().map(|n| n.to_string()).collect()
}

/// The last known full set of relay/storage nodes
///
/// Refreshed by an external discovery process through [`NodePool::set`].
#[derive(Clone)]
pub struct NodePool {
    store: Arc<dyn KeyValueStore>,
}

impl NodePool {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Every known node; empty if the pool was never set
    pub fn get(&self) -> SyncResult<BTreeSet<Snode>> {
        let stored: Option<Vec<String>> = load_record(self.store.as_ref(), Table::SnodePool, POOL_KEY)?;
        Ok(stored.map(decode_nodes).unwrap_or_default())
    }

    /// Replace the whole pool
    pub fn set(&self, nodes: &BTreeSet<Snode>) -> SyncResult<()> {
        debug!(count = nodes.len(), "Replacing node pool");
        save_record(self.store.as_ref(), Table::SnodePool, POOL_KEY, &encode_nodes(nodes))
    }

    /// Drop one node; returns whether it was present
    pub fn remove(&self, node: &Snode) -> SyncResult<bool> {
        let mut nodes = self.get()?;
        if !nodes.remove(node) {
            return Ok(false);
        }
        self.set(&nodes)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::node::test_node;
    use crate::storage::MemoryStore;

    #[test]
    fn test_pool_set_get_remove() {
        let pool = NodePool::new(Arc::new(MemoryStore::new()));
        assert!(pool.get().unwrap().is_empty());

        let nodes: BTreeSet<Snode> = (1..=4).map(test_node).collect();
        pool.set(&nodes).unwrap();
        assert_eq!(pool.get().unwrap(), nodes);

        assert!(pool.remove(&test_node(2)).unwrap());
        assert!(!pool.remove(&test_node(2)).unwrap());
        assert_eq!(pool.get().unwrap().len(), 3);
    }

    #[test]
    fn test_corrupt_entries_are_skipped() {
        let decoded = decode_nodes(vec!["garbage".into(), test_node(1).to_string()]);
        assert_eq!(decoded.len(), 1);
    }
}
