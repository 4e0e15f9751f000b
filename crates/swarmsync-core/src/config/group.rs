//! Group-scoped variants: info, members and keys

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::SyncResult;
use crate::types::{ConfigVariant, SessionId};

use super::edit::{ConfigEdit, Record};
use super::object::ConfigObject;
use super::variant::{INFO, KEYS, MEMBERS};

const NAME: &str = "name";
const DESCRIPTION: &str = "description";
const CREATED_MS: &str = "created_ms";
const EXPIRY_TIMER_S: &str = "expiry_timer_s";
const DESTROYED: &str = "destroyed";

/// Snapshot of the `GroupInfo` variant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupInfo {
    pub name: Option<String>,
    pub description: Option<String>,
    pub created_ms: Option<i64>,
    /// Disappearing-message timer in seconds
    pub expiry_timer_s: Option<u64>,
    /// Set once an admin deletes the group for everyone
    pub destroyed: bool,
}

impl GroupInfo {
    pub fn read(obj: &ConfigObject) -> SyncResult<Self> {
        super::expect_variant(obj, ConfigVariant::GroupInfo)?;
        Ok(Self {
            name: obj.field(INFO, NAME)?,
            description: obj.field(INFO, DESCRIPTION)?,
            created_ms: obj.field(INFO, CREATED_MS)?,
            expiry_timer_s: obj.field(INFO, EXPIRY_TIMER_S)?,
            destroyed: obj.field(INFO, DESTROYED)?.unwrap_or(false),
        })
    }
}

/// Group info edits on a [`ConfigEdit`]
pub trait GroupInfoEdit {
    fn set_group_name(&mut self, name: &str) -> SyncResult<bool>;
    fn set_description(&mut self, description: Option<&str>) -> SyncResult<bool>;
    fn set_created(&mut self, created_ms: i64) -> SyncResult<bool>;
    fn set_expiry_timer(&mut self, seconds: Option<u64>) -> SyncResult<bool>;
    fn mark_destroyed(&mut self) -> SyncResult<bool>;
}

impl GroupInfoEdit for ConfigEdit<'_> {
    fn set_group_name(&mut self, name: &str) -> SyncResult<bool> {
        self.set_field(INFO, NAME, &name)
    }

    fn set_description(&mut self, description: Option<&str>) -> SyncResult<bool> {
        match description {
            Some(text) => self.set_field(INFO, DESCRIPTION, &text),
            None => self.remove(INFO, DESCRIPTION),
        }
    }

    fn set_created(&mut self, created_ms: i64) -> SyncResult<bool> {
        self.set_field(INFO, CREATED_MS, &created_ms)
    }

    fn set_expiry_timer(&mut self, seconds: Option<u64>) -> SyncResult<bool> {
        match seconds {
            Some(s) => self.set_field(INFO, EXPIRY_TIMER_S, &s),
            None => self.remove(INFO, EXPIRY_TIMER_S),
        }
    }

    fn mark_destroyed(&mut self) -> SyncResult<bool> {
        self.set_field(INFO, DESTROYED, &true)
    }
}

/// Membership state of a group member
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberStatus {
    #[default]
    InviteNotSent,
    InviteSent,
    InviteFailed,
    Joined,
    PromotionSent,
    PromotionFailed,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub session_id: SessionId,
    pub name: Option<String>,
    pub admin: bool,
    pub status: MemberStatus,
}

impl GroupMember {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            name: None,
            admin: false,
            status: MemberStatus::InviteNotSent,
        }
    }
}

impl Record for GroupMember {
    const VARIANT: ConfigVariant = ConfigVariant::GroupMembers;
    const COLLECTION: &'static str = MEMBERS;

    fn record_key(&self) -> String {
        self.session_id.to_hex()
    }
}

/// One generation of the group encryption key
///
/// Generations are add-only, so a key is never lost to a concurrent edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupKey {
    pub generation: u64,
    /// Hex-encoded 32-byte key
    pub key: String,
}

impl GroupKey {
    /// Zero-padded so key order equals generation order
    pub fn key_for(generation: u64) -> String {
        format!("{:020}", generation)
    }

    /// Highest generation in a `GroupKeys` object
    pub fn current(obj: &ConfigObject) -> SyncResult<Option<GroupKey>> {
        Ok(obj.records::<GroupKey>()?.pop())
    }
}

impl Record for GroupKey {
    const VARIANT: ConfigVariant = ConfigVariant::GroupKeys;
    const COLLECTION: &'static str = KEYS;

    fn record_key(&self) -> String {
        Self::key_for(self.generation)
    }
}

/// Key rotation on a [`ConfigEdit`]
pub trait GroupKeysEdit {
    /// Add a fresh random key one generation above the current one
    fn rekey(&mut self) -> SyncResult<GroupKey>;
}

impl GroupKeysEdit for ConfigEdit<'_> {
    fn rekey(&mut self) -> SyncResult<GroupKey> {
        let next = self
            .records::<GroupKey>()?
            .last()
            .map(|k| k.generation + 1)
            .unwrap_or(0);
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let key = GroupKey {
            generation: next,
            key: hex::encode(bytes),
        };
        self.set_record(&key)?;
        Ok(key)
    }
}
