//! A single mergeable configuration object
//!
//! `ConfigObject` wraps a [`ConfigState`] with the bookkeeping needed to sync
//! it through the storage network:
//!
//! - a revision counter (`seqno`) bumped by every local mutation that
//!   actually changes the state
//! - a dirty flag, set by local mutations and cleared when the push carrying
//!   the current revision is acknowledged
//! - the ids of recently merged updates, so the same update is not decoded
//!   and joined twice
//! - the message hashes of the last acknowledged push
//!
//! Push payloads and dumps are postcard frames compressed with zstd.

use std::collections::VecDeque;
use std::io::Read;

use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::SyncError;
use crate::types::{now_ms, ConfigScope, ConfigVariant};

use super::edit::{check_record_variant, read_field, read_records, ConfigEdit, Record};
use super::state::ConfigState;

/// Version byte of push payloads
pub const PUSH_FORMAT_VERSION: u8 = 1;
const DUMP_FORMAT_VERSION: u8 = 1;
const ZSTD_LEVEL: i32 = 3;

/// Default number of merged update ids remembered per object
pub const DEFAULT_MERGED_UPDATE_MEMORY: usize = 256;

/// Largest decompressed push payload or dump accepted
pub const MAX_CONFIG_SIZE: usize = 8 * 1024 * 1024;

#[derive(Serialize, Deserialize)]
struct PushFrame {
    version: u8,
    variant: ConfigVariant,
    seqno: u64,
    state: ConfigState,
}

#[derive(Serialize, Deserialize)]
struct DumpFrame {
    version: u8,
    variant: ConfigVariant,
    origin: u64,
    seqno: u64,
    dirty: bool,
    current_hashes: Vec<String>,
    merged_updates: Vec<String>,
    state: ConfigState,
}

fn compress(bytes: &[u8]) -> Result<Vec<u8>, SyncError> {
    Ok(zstd::stream::encode_all(bytes, ZSTD_LEVEL)?)
}

/// Decompress a frame, refusing output beyond [`MAX_CONFIG_SIZE`]
fn decompress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    zstd::stream::read::Decoder::new(bytes)?
        .take(MAX_CONFIG_SIZE as u64 + 1)
        .read_to_end(&mut out)?;
    if out.len() > MAX_CONFIG_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("decompressed size exceeds {} bytes", MAX_CONFIG_SIZE),
        ));
    }
    Ok(out)
}

/// Payload ready to be stored on the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPush {
    /// Revision the payload carries; pass it back to
    /// [`ConfigObject::confirm_pushed`]
    pub seqno: u64,
    /// Self-describing serialized state
    pub data: Vec<u8>,
}

/// A mergeable state container for one category of account state
#[derive(Debug, Clone)]
pub struct ConfigObject {
    variant: ConfigVariant,
    scope: ConfigScope,
    state: ConfigState,
    origin: u64,
    seqno: u64,
    dirty: bool,
    needs_dump: bool,
    current_hashes: Vec<String>,
    merged_updates: VecDeque<String>,
    merged_update_memory: usize,
    destroyed: bool,
}

impl ConfigObject {
    /// Create an empty object with a fresh random origin
    pub fn new(variant: ConfigVariant, scope: ConfigScope) -> Self {
        Self::with_origin(variant, scope, rand::rng().next_u64())
    }

    /// Create an empty object with a fixed origin
    pub fn with_origin(variant: ConfigVariant, scope: ConfigScope, origin: u64) -> Self {
        Self {
            variant,
            scope,
            state: ConfigState::new(),
            origin,
            seqno: 0,
            dirty: false,
            needs_dump: false,
            current_hashes: Vec::new(),
            merged_updates: VecDeque::new(),
            merged_update_memory: DEFAULT_MERGED_UPDATE_MEMORY,
            destroyed: false,
        }
    }

    /// Restore an object from a [`dump`](Self::dump)
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Serialization` if the dump is unreadable or was
    /// written for another variant.
    pub fn load(variant: ConfigVariant, scope: ConfigScope, dump: &[u8]) -> Result<Self, SyncError> {
        let raw = decompress(dump)
            .map_err(|e| SyncError::Serialization(format!("dump decompression: {}", e)))?;
        let frame: DumpFrame =
            postcard::from_bytes(&raw).map_err(|e| SyncError::Serialization(e.to_string()))?;

        if frame.version != DUMP_FORMAT_VERSION {
            return Err(SyncError::Serialization(format!(
                "unsupported dump version {}",
                frame.version
            )));
        }
        if frame.variant != variant {
            return Err(SyncError::Serialization(format!(
                "dump holds {}, expected {}",
                frame.variant, variant
            )));
        }

        Ok(Self {
            variant,
            scope,
            state: frame.state,
            origin: frame.origin,
            seqno: frame.seqno,
            dirty: frame.dirty,
            needs_dump: false,
            current_hashes: frame.current_hashes,
            merged_updates: frame.merged_updates.into(),
            merged_update_memory: DEFAULT_MERGED_UPDATE_MEMORY,
            destroyed: false,
        })
    }

    /// Serialize the full object, bookkeeping included, for local persistence
    pub fn dump(&self) -> Result<Vec<u8>, SyncError> {
        let frame = DumpFrame {
            version: DUMP_FORMAT_VERSION,
            variant: self.variant,
            origin: self.origin,
            seqno: self.seqno,
            dirty: self.dirty,
            current_hashes: self.current_hashes.clone(),
            merged_updates: self.merged_updates.iter().cloned().collect(),
            state: self.state.clone(),
        };
        let raw = postcard::to_allocvec(&frame).map_err(|e| SyncError::Serialization(e.to_string()))?;
        compress(&raw)
    }

    /// Limit how many merged update ids are remembered
    pub fn set_merged_update_memory(&mut self, memory: usize) {
        self.merged_update_memory = memory.max(1);
        while self.merged_updates.len() > self.merged_update_memory {
            self.merged_updates.pop_front();
        }
    }

    pub fn variant(&self) -> ConfigVariant {
        self.variant
    }

    pub fn scope(&self) -> ConfigScope {
        self.scope
    }

    pub fn origin(&self) -> u64 {
        self.origin
    }

    /// Local revision counter
    pub fn seqno(&self) -> u64 {
        self.seqno
    }

    /// Merged state
    pub fn state(&self) -> &ConfigState {
        &self.state
    }

    /// True iff local mutations have not been acknowledged by a push
    pub fn needs_push(&self) -> bool {
        self.dirty
    }

    /// True if the object changed since it was last persisted
    pub fn needs_dump(&self) -> bool {
        self.needs_dump
    }

    pub(crate) fn mark_dumped(&mut self) {
        self.needs_dump = false;
    }

    /// Message hashes of the last acknowledged push
    pub fn current_hashes(&self) -> &[String] {
        &self.current_hashes
    }

    pub(crate) fn mark_destroyed(&mut self) {
        self.destroyed = true;
    }

    /// Whether the owning scope was removed
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Deterministic fingerprint of the current state (hex blake3)
    pub fn hash(&self) -> Result<String, SyncError> {
        Ok(self.state.digest()?.to_hex().to_string())
    }

    /// Apply a local edit stamped with the current time
    pub fn mutate<R>(&mut self, f: impl FnOnce(&mut ConfigEdit<'_>) -> R) -> Result<R, SyncError> {
        self.mutate_at(now_ms(), f)
    }

    /// Apply a local edit stamped with `ts_ms`
    ///
    /// The revision is bumped and the object marked dirty only if the edit
    /// changed the state; a pure no-op schedules nothing.
    pub fn mutate_at<R>(
        &mut self,
        ts_ms: i64,
        f: impl FnOnce(&mut ConfigEdit<'_>) -> R,
    ) -> Result<R, SyncError> {
        if self.destroyed {
            return Err(SyncError::ScopeDestroyed(self.scope.to_string()));
        }
        let before = self.state.digest()?;
        let out = {
            let mut edit = ConfigEdit::new(&mut self.state, self.variant, self.origin, ts_ms);
            f(&mut edit)
        };
        if self.state.digest()? != before {
            self.seqno += 1;
            self.dirty = true;
            self.needs_dump = true;
            trace!(variant = %self.variant, seqno = self.seqno, "Config mutated");
        }
        Ok(out)
    }

    /// Serialize the current state for another replica's [`merge`](Self::merge)
    pub fn serialize_for_push(&self) -> Result<Vec<u8>, SyncError> {
        let frame = PushFrame {
            version: PUSH_FORMAT_VERSION,
            variant: self.variant,
            seqno: self.seqno,
            state: self.state.clone(),
        };
        let raw = postcard::to_allocvec(&frame).map_err(|e| SyncError::Serialization(e.to_string()))?;
        compress(&raw)
    }

    /// Payload plus the revision it carries
    pub fn push(&self) -> Result<ConfigPush, SyncError> {
        Ok(ConfigPush {
            seqno: self.seqno,
            data: self.serialize_for_push()?,
        })
    }

    /// Record that the push for `seqno` was stored under `message_hash`
    ///
    /// Clears the dirty flag if no mutation happened since the push was
    /// built. Returns whether the object is now clean.
    pub fn confirm_pushed(&mut self, seqno: u64, message_hash: &str) -> bool {
        if seqno > self.seqno {
            debug!(variant = %self.variant, seqno, current = self.seqno, "Ignoring ack for unknown revision");
            return !self.dirty;
        }
        self.current_hashes = vec![message_hash.to_string()];
        self.needs_dump = true;
        if seqno == self.seqno {
            self.dirty = false;
        }
        !self.dirty
    }

    /// Whether `update_id` was merged recently
    pub fn has_merged(&self, update_id: &str) -> bool {
        self.merged_updates.iter().any(|id| id == update_id)
    }

    fn remember(&mut self, update_id: &str) {
        self.merged_updates.push_back(update_id.to_string());
        while self.merged_updates.len() > self.merged_update_memory {
            self.merged_updates.pop_front();
        }
    }

    /// Merge a remote update
    ///
    /// Returns whether the merge changed observable state. Merging the same
    /// `update_id` twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::CorruptUpdate` if the payload cannot be parsed or
    /// violates the variant's schema, and `SyncError::ScopeDestroyed` if the
    /// owning group was removed.
    pub fn merge(&mut self, update_id: &str, data: &[u8]) -> Result<bool, SyncError> {
        if self.destroyed {
            return Err(SyncError::ScopeDestroyed(self.scope.to_string()));
        }
        if self.has_merged(update_id) {
            trace!(variant = %self.variant, update_id, "Update already merged");
            return Ok(false);
        }

        let raw = decompress(data).map_err(|e| SyncError::corrupt(update_id, e))?;
        let frame: PushFrame =
            postcard::from_bytes(&raw).map_err(|e| SyncError::corrupt(update_id, e))?;
        if frame.version != PUSH_FORMAT_VERSION {
            return Err(SyncError::corrupt(
                update_id,
                format!("unsupported version {}", frame.version),
            ));
        }
        if frame.variant != self.variant {
            return Err(SyncError::corrupt(
                update_id,
                format!("payload is {}, expected {}", frame.variant, self.variant),
            ));
        }
        self.variant
            .validate(&frame.state)
            .map_err(|reason| SyncError::corrupt(update_id, reason))?;

        let changed = self.state.join(&frame.state);
        self.remember(update_id);
        self.needs_dump = true;

        debug!(
            variant = %self.variant,
            scope = %self.scope,
            update_id,
            remote_seqno = frame.seqno,
            changed,
            "Merged config update"
        );
        Ok(changed)
    }

    /// Decode a scalar field
    pub fn field<T: DeserializeOwned>(
        &self,
        collection: &str,
        name: &str,
    ) -> Result<Option<T>, SyncError> {
        read_field(&self.state, collection, name)
    }

    /// Look up a typed record by key
    pub fn record<T: Record>(&self, key: &str) -> Result<Option<T>, SyncError> {
        check_record_variant::<T>(self.variant)?;
        read_field(&self.state, T::COLLECTION, key)
    }

    /// All live records of a type, in key order
    pub fn records<T: Record>(&self) -> Result<Vec<T>, SyncError> {
        check_record_variant::<T>(self.variant)?;
        read_records(&self.state)
    }
}
