//! Persistent key/value storage.
//!
//! The core only needs exact-match access: get, insert-or-update and delete
//! of opaque byte blobs keyed by string. [`KeyValueStore`] is that seam;
//! [`Storage`] backs it with redb, [`MemoryStore`] keeps everything in
//! process.
//!
//! Tables:
//! - Config dumps (one per `(variant, scope)`)
//! - Change watermarks for the monotonic-timestamp policy
//! - Node pool, onion paths (six fixed coordinates), swarms
//! - Last-sent message hashes and received message hashes
//! - Account metadata

use crate::error::SyncError;
use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

mod memory;

pub use memory::MemoryStore;

// Table definitions
const CONFIGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("configs");
const CHANGE_WATERMARKS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("change_watermarks");
const SNODE_POOL_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("snode_pool");
const ONION_PATHS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("onion_paths");
const SWARMS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("swarms");
const LAST_MESSAGE_HASHES_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("last_message_hashes");
const RECEIVED_HASHES_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("received_message_hashes");
const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Every table the core reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Configs,
    ChangeWatermarks,
    SnodePool,
    OnionPaths,
    Swarms,
    LastMessageHashes,
    ReceivedHashes,
    Meta,
}

impl Table {
    /// All tables, in creation order
    pub const ALL: [Table; 8] = [
        Table::Configs,
        Table::ChangeWatermarks,
        Table::SnodePool,
        Table::OnionPaths,
        Table::Swarms,
        Table::LastMessageHashes,
        Table::ReceivedHashes,
        Table::Meta,
    ];

    fn definition(&self) -> TableDefinition<'static, &'static str, &'static [u8]> {
        match self {
            Table::Configs => CONFIGS_TABLE,
            Table::ChangeWatermarks => CHANGE_WATERMARKS_TABLE,
            Table::SnodePool => SNODE_POOL_TABLE,
            Table::OnionPaths => ONION_PATHS_TABLE,
            Table::Swarms => SWARMS_TABLE,
            Table::LastMessageHashes => LAST_MESSAGE_HASHES_TABLE,
            Table::ReceivedHashes => RECEIVED_HASHES_TABLE,
            Table::Meta => META_TABLE,
        }
    }
}

/// Exact-match persistent key/value store
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value stored under `key`
    fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, SyncError>;

    /// Store `value` under `key`, replacing any previous value
    fn insert_or_update(&self, table: Table, key: &str, value: &[u8]) -> Result<(), SyncError>;

    /// Remove `key`; removing a missing key is not an error
    fn delete(&self, table: Table, key: &str) -> Result<(), SyncError>;
}

/// Load and decode a postcard record
pub(crate) fn load_record<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    table: Table,
    key: &str,
) -> Result<Option<T>, SyncError> {
    match store.get(table, key)? {
        Some(bytes) => {
            let value = postcard::from_bytes(&bytes)
                .map_err(|e| SyncError::Serialization(e.to_string()))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Encode a record with postcard and store it
pub(crate) fn save_record<T: Serialize>(
    store: &dyn KeyValueStore,
    table: Table,
    key: &str,
    value: &T,
) -> Result<(), SyncError> {
    let bytes = postcard::to_allocvec(value).map_err(|e| SyncError::Serialization(e.to_string()))?;
    store.insert_or_update(table, key, &bytes)
}

/// Storage layer using redb for ACID-compliant persistence
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// This will:
    /// - Create the database directory if it doesn't exist
    /// - Initialize the database file
    /// - Create all required tables
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            for table in Table::ALL {
                let _ = write_txn.open_table(table.definition())?;
            }
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    /// Get a reference to the shared database handle
    pub fn db_handle(&self) -> Arc<RwLock<Database>> {
        self.db.clone()
    }
}

impl KeyValueStore for Storage {
    fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let t = read_txn.open_table(table.definition())?;
        Ok(t.get(key)?.map(|v| v.value().to_vec()))
    }

    fn insert_or_update(&self, table: Table, key: &str, value: &[u8]) -> Result<(), SyncError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut t = write_txn.open_table(table.definition())?;
            t.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn delete(&self, table: Table, key: &str) -> Result<(), SyncError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut t = write_txn.open_table(table.definition())?;
            t.remove(key)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
