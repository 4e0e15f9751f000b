//! In-process key/value store
//!
//! Same contract as the redb-backed [`Storage`](super::Storage), held in a
//! map. Used by tests and by sessions that must not touch disk.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{KeyValueStore, Table};
use crate::error::SyncError;

/// Key/value store kept entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<(Table, String), Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows in `table`
    pub fn len(&self, table: Table) -> usize {
        self.rows.read().keys().filter(|(t, _)| *t == table).count()
    }

    /// Whether `table` has no rows
    pub fn is_empty(&self, table: Table) -> bool {
        self.len(table) == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
        Ok(self.rows.read().get(&(table, key.to_string())).cloned())
    }

    fn insert_or_update(&self, table: Table, key: &str, value: &[u8]) -> Result<(), SyncError> {
        self.rows
            .write()
            .insert((table, key.to_string()), value.to_vec());
        Ok(())
    }

    fn delete(&self, table: Table, key: &str) -> Result<(), SyncError> {
        self.rows.write().remove(&(table, key.to_string()));
        Ok(())
    }
}
