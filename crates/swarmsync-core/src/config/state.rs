//! Mergeable state held by a configuration object
//!
//! State is a set of named collections, each mapping a key to an [`Entry`].
//! An entry is a last-writer-wins register: the winner between two entries
//! for the same key is the greater `(ts_ms, origin, value)` triple, so every
//! replica picks the same winner no matter the order updates arrive in.
//! Removals are tombstones (`value: None`) that take part in the same
//! ordering, which gives membership-style collections set-union semantics
//! with removal markers.
//!
//! Joining two states takes the per-key maximum. The join is commutative,
//! associative and idempotent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// One register in a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Wall-clock time of the write, in milliseconds
    pub ts_ms: i64,
    /// Random id of the writing replica, breaks timestamp ties
    pub origin: u64,
    /// JSON-encoded value, `None` for a removal
    pub value: Option<String>,
}

impl Entry {
    /// Whether this entry beats `other` for the same key
    pub fn wins_over(&self, other: &Entry) -> bool {
        (self.ts_ms, self.origin, &self.value) > (other.ts_ms, other.origin, &other.value)
    }

    /// Whether the entry is a removal marker
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// Collections of keyed last-writer-wins registers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigState {
    collections: BTreeMap<String, BTreeMap<String, Entry>>,
}

impl ConfigState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Visible value for `key`, ignoring tombstones
    pub fn get(&self, collection: &str, key: &str) -> Option<&str> {
        self.entry(collection, key)
            .and_then(|e| e.value.as_deref())
    }

    /// Raw entry for `key`, tombstones included
    pub fn entry(&self, collection: &str, key: &str) -> Option<&Entry> {
        self.collections.get(collection).and_then(|c| c.get(key))
    }

    /// Live `(key, value)` pairs of a collection in key order
    pub fn live(&self, collection: &str) -> impl Iterator<Item = (&str, &str)> {
        self.collections
            .get(collection)
            .into_iter()
            .flat_map(|c| c.iter())
            .filter_map(|(k, e)| e.value.as_deref().map(|v| (k.as_str(), v)))
    }

    /// Names of every collection present in the state
    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(|k| k.as_str())
    }

    /// Every entry of every collection
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, &Entry)> {
        self.collections.iter().flat_map(|(c, entries)| {
            entries
                .iter()
                .map(move |(k, e)| (c.as_str(), k.as_str(), e))
        })
    }

    /// Highest timestamp stored under `key`, tombstones included
    pub fn last_write_ms(&self, collection: &str, key: &str) -> Option<i64> {
        self.entry(collection, key).map(|e| e.ts_ms)
    }

    /// Join a single entry. Returns true if the visible value changed.
    pub fn put(&mut self, collection: &str, key: &str, entry: Entry) -> bool {
        let slot = self
            .collections
            .entry(collection.to_string())
            .or_default();
        match slot.get_mut(key) {
            Some(existing) if !entry.wins_over(existing) => false,
            Some(existing) => {
                let changed = existing.value != entry.value;
                *existing = entry;
                changed
            }
            None => {
                let changed = entry.value.is_some();
                slot.insert(key.to_string(), entry);
                changed
            }
        }
    }

    /// Join `other` into `self`. Returns true if any visible value changed.
    pub fn join(&mut self, other: &ConfigState) -> bool {
        let mut changed = false;
        for (collection, key, entry) in other.entries() {
            changed |= self.put(collection, key, entry.clone());
        }
        changed
    }

    /// Canonical encoding of the state
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        postcard::to_allocvec(self).map_err(|e| SyncError::Serialization(e.to_string()))
    }

    /// Deterministic fingerprint of the full state, metadata included
    pub fn digest(&self) -> Result<blake3::Hash, SyncError> {
        Ok(blake3::hash(&self.to_bytes()?))
    }

    /// Number of live entries across all collections
    pub fn live_len(&self) -> usize {
        self.collections
            .values()
            .flat_map(|c| c.values())
            .filter(|e| !e.is_tombstone())
            .count()
    }
}
