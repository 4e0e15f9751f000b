//! Delivery dedup ledger
//!
//! Two kinds of bookkeeping:
//! - the last message hash seen per `(node, destination)`, so polling resumes
//!   from the last acknowledged position
//! - the set of received message hashes per destination, so a re-delivered
//!   message is dropped
//!
//! Received hashes carry the time they were first seen. Entries older than
//! [`LedgerConfig::received_retention`] are pruned on write, and at most
//! [`LedgerConfig::max_received_per_destination`] of the newest are kept.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::SyncResult;
use crate::routing::Snode;
use crate::storage::{load_record, save_record, KeyValueStore, Table};
use crate::types::now_ms;

/// Retention of received hashes
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Matches the longest time a message lives on the storage network
    pub received_retention: Duration,
    pub max_received_per_destination: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            received_retention: Duration::from_secs(14 * 24 * 60 * 60),
            max_received_per_destination: 4096,
        }
    }
}

/// hash -> first seen (ms)
type ReceivedHashes = BTreeMap<String, i64>;

fn cursor_key(node: &Snode, destination: &str) -> String {
    format!("{}|{}", node, destination)
}

/// Persisted delivery bookkeeping
pub struct DedupLedger {
    store: Arc<dyn KeyValueStore>,
    config: LedgerConfig,
    // Serializes read-modify-write of received sets
    write_lock: Mutex<()>,
}

impl DedupLedger {
    pub fn new(store: Arc<dyn KeyValueStore>, config: LedgerConfig) -> Self {
        Self {
            store,
            config,
            write_lock: Mutex::new(()),
        }
    }

    /// Hash of the last message polled from `node` for `destination`
    pub fn last_sent_hash(&self, node: &Snode, destination: &str) -> SyncResult<Option<String>> {
        load_record(
            self.store.as_ref(),
            Table::LastMessageHashes,
            &cursor_key(node, destination),
        )
    }

    pub fn set_last_sent_hash(&self, node: &Snode, destination: &str, hash: &str) -> SyncResult<()> {
        trace!(node = %node, destination, hash, "Advancing poll cursor");
        save_record(
            self.store.as_ref(),
            Table::LastMessageHashes,
            &cursor_key(node, destination),
            &hash.to_string(),
        )
    }

    fn load_received(&self, destination: &str) -> SyncResult<Option<ReceivedHashes>> {
        load_record(self.store.as_ref(), Table::ReceivedHashes, destination)
    }

    fn prune(&self, hashes: &mut ReceivedHashes, now_ms: i64) {
        let retention_ms = i64::try_from(self.config.received_retention.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_ms.saturating_sub(retention_ms);
        let before = hashes.len();
        hashes.retain(|_, seen| *seen >= cutoff);

        let max = self.config.max_received_per_destination;
        if hashes.len() > max {
            let mut by_age: Vec<(i64, String)> = hashes.iter().map(|(h, t)| (*t, h.clone())).collect();
            by_age.sort_unstable_by(|a, b| b.cmp(a));
            for (_, hash) in by_age.into_iter().skip(max) {
                hashes.remove(&hash);
            }
        }
        if hashes.len() != before {
            debug!(pruned = before - hashes.len(), "Pruned received hashes");
        }
    }

    /// Received hashes of `destination`, `None` if nothing was recorded
    pub fn received_hashes(&self, destination: &str) -> SyncResult<Option<HashSet<String>>> {
        Ok(self
            .load_received(destination)?
            .map(|hashes| hashes.into_keys().collect()))
    }

    /// Replace the received set of `destination`
    ///
    /// Hashes already recorded keep their first-seen time; new ones are
    /// stamped now.
    pub fn set_received_hashes(&self, destination: &str, hashes: &HashSet<String>) -> SyncResult<()> {
        let _guard = self.write_lock.lock();
        let now = now_ms();
        let existing = self.load_received(destination)?.unwrap_or_default();
        let mut updated: ReceivedHashes = hashes
            .iter()
            .map(|h| (h.clone(), existing.get(h).copied().unwrap_or(now)))
            .collect();
        self.prune(&mut updated, now);
        save_record(self.store.as_ref(), Table::ReceivedHashes, destination, &updated)
    }

    /// Accept a newly received message unless its hash was already seen
    ///
    /// Returns true the first time a hash is offered for a destination, and
    /// records it; every later offer returns false. A hash that would not
    /// survive pruning (older than the newest retained entries) is never
    /// accepted.
    pub fn accept(&self, destination: &str, hash: &str, now_ms: i64) -> SyncResult<bool> {
        let _guard = self.write_lock.lock();
        let mut hashes = self.load_received(destination)?.unwrap_or_default();
        if hashes.contains_key(hash) {
            trace!(destination, hash, "Dropping duplicate delivery");
            return Ok(false);
        }
        hashes.insert(hash.to_string(), now_ms);
        self.prune(&mut hashes, now_ms);
        save_record(self.store.as_ref(), Table::ReceivedHashes, destination, &hashes)?;

        // Older than every hash the ledger keeps: a later re-delivery could
        // not be recognized, so it is dropped now
        if !hashes.contains_key(hash) {
            debug!(destination, hash, "Dropping delivery older than the received window");
            return Ok(false);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::KeySet;
    use crate::storage::MemoryStore;

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    fn ledger(config: LedgerConfig) -> DedupLedger {
        DedupLedger::new(Arc::new(MemoryStore::new()), config)
    }

    fn node(n: u8) -> Snode {
        Snode::new(
            format!("10.1.1.{}", n),
            443,
            KeySet {
                ed25519: hex::encode([n; 32]),
                x25519: hex::encode([n; 32]),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_last_sent_hash_per_node_and_destination() {
        let ledger = ledger(LedgerConfig::default());
        assert!(ledger.last_sent_hash(&node(1), "05aa").unwrap().is_none());

        ledger.set_last_sent_hash(&node(1), "05aa", "h1").unwrap();
        ledger.set_last_sent_hash(&node(2), "05aa", "h2").unwrap();
        assert_eq!(ledger.last_sent_hash(&node(1), "05aa").unwrap().as_deref(), Some("h1"));
        assert_eq!(ledger.last_sent_hash(&node(2), "05aa").unwrap().as_deref(), Some("h2"));
        assert!(ledger.last_sent_hash(&node(1), "05bb").unwrap().is_none());
    }

    #[test]
    fn test_accept_once() {
        let ledger = ledger(LedgerConfig::default());
        assert!(ledger.accept("05aa", "m1", 1_000).unwrap());
        assert!(!ledger.accept("05aa", "m1", 2_000).unwrap());
        assert!(ledger.accept("05bb", "m1", 2_000).unwrap());
        assert_eq!(
            ledger.received_hashes("05aa").unwrap().unwrap(),
            HashSet::from(["m1".to_string()])
        );
    }

    #[test]
    fn test_old_hashes_expire() {
        let ledger = ledger(LedgerConfig::default());
        ledger.accept("05aa", "old", 0).unwrap();
        ledger.accept("05aa", "new", 15 * DAY_MS).unwrap();
        let hashes = ledger.received_hashes("05aa").unwrap().unwrap();
        assert!(!hashes.contains("old"));
        assert!(hashes.contains("new"));
    }

    #[test]
    fn test_cap_keeps_newest() {
        let ledger = ledger(LedgerConfig {
            max_received_per_destination: 3,
            ..LedgerConfig::default()
        });
        for (i, hash) in ["a", "b", "c", "d"].iter().enumerate() {
            assert!(ledger.accept("05aa", hash, i as i64).unwrap());
        }
        let hashes = ledger.received_hashes("05aa").unwrap().unwrap();
        assert_eq!(hashes.len(), 3);
        assert!(!hashes.contains("a"));
    }

    #[test]
    fn test_delivery_older_than_window_is_not_accepted() {
        let ledger = ledger(LedgerConfig {
            max_received_per_destination: 3,
            ..LedgerConfig::default()
        });
        for (i, hash) in ["a", "b", "c"].iter().enumerate() {
            assert!(ledger.accept("05aa", hash, 10 + i as i64).unwrap());
        }

        // Would be pruned on insert, so it must not count as accepted
        assert!(!ledger.accept("05aa", "late", 5).unwrap());
        assert!(!ledger.accept("05aa", "late", 6).unwrap());
        let hashes = ledger.received_hashes("05aa").unwrap().unwrap();
        assert_eq!(hashes.len(), 3);
        assert!(!hashes.contains("late"));
    }

    #[test]
    fn test_set_received_hashes_replaces() {
        let ledger = ledger(LedgerConfig::default());
        assert!(ledger.received_hashes("05aa").unwrap().is_none());
        let set: HashSet<String> = ["x".to_string(), "y".to_string()].into();
        ledger.set_received_hashes("05aa", &set).unwrap();
        assert_eq!(ledger.received_hashes("05aa").unwrap().unwrap(), set);
        assert!(!ledger.accept("05aa", "x", now_ms()).unwrap());
    }
}
