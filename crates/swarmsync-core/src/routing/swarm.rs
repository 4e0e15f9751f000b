//! Per-destination swarm cache

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::SyncResult;
use crate::storage::{load_record, save_record, KeyValueStore, Table};

use super::node::Snode;
use super::pool::{decode_nodes, encode_nodes};

/// Storage nodes responsible for each destination
///
/// Membership always comes from the network: [`set`](Self::set) replaces,
/// it never merges. Entries do not expire; callers invalidate a swarm once
/// requests against its members keep failing.
#[derive(Clone)]
pub struct SwarmCache {
    store: Arc<dyn KeyValueStore>,
}

impl SwarmCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Cached swarm of `destination`, `None` on a miss
    pub fn get(&self, destination: &str) -> SyncResult<Option<BTreeSet<Snode>>> {
        let stored: Option<Vec<String>> = load_record(self.store.as_ref(), Table::Swarms, destination)?;
        Ok(stored.map(decode_nodes).filter(|nodes| !nodes.is_empty()))
    }

    /// Replace the swarm of `destination`
    pub fn set(&self, destination: &str, nodes: &BTreeSet<Snode>) -> SyncResult<()> {
        debug!(destination, count = nodes.len(), "Caching swarm");
        save_record(self.store.as_ref(), Table::Swarms, destination, &encode_nodes(nodes))
    }

    /// Forget the swarm of `destination`; the next lookup misses
    pub fn invalidate(&self, destination: &str) -> SyncResult<()> {
        info!(destination, "Invalidating swarm");
        self.store.delete(Table::Swarms, destination)
    }

    /// Remove one failing node from a destination's swarm
    ///
    /// Removing the last node invalidates the entry. Returns whether the node
    /// was a member.
    pub fn drop_node(&self, destination: &str, node: &Snode) -> SyncResult<bool> {
        let Some(mut nodes) = self.get(destination)? else {
            return Ok(false);
        };
        if !nodes.remove(node) {
            return Ok(false);
        }
        if nodes.is_empty() {
            self.invalidate(destination)?;
        } else {
            debug!(destination, node = %node, "Dropping node from swarm");
            self.set(destination, &nodes)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::node::test_node;
    use crate::storage::MemoryStore;

    #[test]
    fn test_set_replaces() {
        let swarms = SwarmCache::new(Arc::new(MemoryStore::new()));
        assert!(swarms.get("05aa").unwrap().is_none());

        swarms.set("05aa", &[test_node(1), test_node(2)].into()).unwrap();
        swarms.set("05aa", &[test_node(3)].into()).unwrap();
        assert_eq!(
            swarms.get("05aa").unwrap().unwrap(),
            BTreeSet::from([test_node(3)])
        );
    }

    #[test]
    fn test_invalidate_is_per_destination() {
        let swarms = SwarmCache::new(Arc::new(MemoryStore::new()));
        swarms.set("05aa", &[test_node(1)].into()).unwrap();
        swarms.set("05bb", &[test_node(2)].into()).unwrap();
        swarms.invalidate("05aa").unwrap();
        assert!(swarms.get("05aa").unwrap().is_none());
        assert!(swarms.get("05bb").unwrap().is_some());
    }

    #[test]
    fn test_drop_last_node_invalidates() {
        let swarms = SwarmCache::new(Arc::new(MemoryStore::new()));
        swarms.set("05aa", &[test_node(1), test_node(2)].into()).unwrap();
        assert!(swarms.drop_node("05aa", &test_node(1)).unwrap());
        assert!(!swarms.drop_node("05aa", &test_node(1)).unwrap());
        assert!(swarms.drop_node("05aa", &test_node(2)).unwrap());
        assert!(swarms.get("05aa").unwrap().is_none());
    }
}
