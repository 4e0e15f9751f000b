//! Error types for Swarmsync

use thiserror::Error;

/// Main error type for Swarmsync operations
///
/// Nothing in the core is fatal to the process: every variant degrades to
/// "retry later" or "drop this update".
#[derive(Error, Debug)]
pub enum SyncError {
    /// An incoming config payload could not be parsed or violates the
    /// variant's schema. The caller skips the update and continues.
    #[error("Corrupt update {update_id}: {reason}")]
    CorruptUpdate { update_id: String, reason: String },

    /// A change carries a timestamp at or below the accepted watermark
    #[error("Stale change for {variant}/{key}: {timestamp_ms} <= {watermark_ms}")]
    StaleChange {
        variant: String,
        key: String,
        timestamp_ms: i64,
        watermark_ms: i64,
    },

    /// Network, path or node unreachable
    #[error("Transport error: {0}")]
    Transport(String),

    /// The group scope was removed while the operation was in flight
    #[error("Scope destroyed: {0}")]
    ScopeDestroyed(String),

    /// The account session has been closed or wiped
    #[error("Session closed")]
    SessionClosed,

    /// Not enough nodes in the pool to build the requested paths
    #[error("Insufficient nodes: need {needed}, have {available}")]
    InsufficientNodes { needed: usize, available: usize },

    /// Error during storage operations (non-redb stores)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Error during serialization/deserialization of local data
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Cryptographic operation failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed identifier (session id, node string, variant name)
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    /// Invalid operation for current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl SyncError {
    /// Build a `CorruptUpdate` for the given update id
    pub fn corrupt(update_id: impl Into<String>, reason: impl ToString) -> Self {
        SyncError::CorruptUpdate {
            update_id: update_id.into(),
            reason: reason.to_string(),
        }
    }

    /// True for failures of the persistent store.
    ///
    /// In-memory state stays valid; the write is retried on the next flush.
    pub fn is_persistence_failure(&self) -> bool {
        matches!(
            self,
            SyncError::Storage(_)
                | SyncError::Database(_)
                | SyncError::Transaction(_)
                | SyncError::Table(_)
                | SyncError::StorageOp(_)
                | SyncError::Commit(_)
                | SyncError::Io(_)
        )
    }

    /// True when the same operation may succeed if attempted again later
    pub fn is_retryable(&self) -> bool {
        self.is_persistence_failure() || matches!(self, SyncError::Transport(_))
    }
}

/// Result type alias using SyncError
pub type SyncResult<T> = Result<T, SyncError>;
