//! Core types for Swarmsync

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Prefix byte of a user account id
pub const USER_PREFIX: u8 = 0x05;
/// Prefix byte of a group id
pub const GROUP_PREFIX: u8 = 0x03;

/// Account identity on the storage network
///
/// A one-byte type prefix followed by a 32-byte public key, rendered as
/// 66 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId {
    prefix: u8,
    key: [u8; 32],
}

impl SessionId {
    /// Build an id from its prefix and public key
    pub fn new(prefix: u8, key: [u8; 32]) -> Self {
        Self { prefix, key }
    }

    /// Create a new random user id
    pub fn random_user() -> Self {
        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);
        Self::new(USER_PREFIX, key)
    }

    /// Prefix byte
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Raw public key bytes (without the prefix)
    pub fn pubkey(&self) -> &[u8; 32] {
        &self.key
    }

    /// Whether the id names a group
    pub fn is_group(&self) -> bool {
        self.prefix == GROUP_PREFIX
    }

    /// Hex form, prefix included
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(66);
        out.push_str(&hex::encode([self.prefix]));
        out.push_str(&hex::encode(self.key));
        out
    }

    /// Parse the 66-character hex form
    pub fn from_hex(s: &str) -> Result<Self, SyncError> {
        let bytes = hex::decode(s.trim()).map_err(|e| SyncError::InvalidId(e.to_string()))?;
        if bytes.len() != 33 {
            return Err(SyncError::InvalidId(format!(
                "session id must be 33 bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes[1..]);
        Ok(Self::new(bytes[0], key))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for SessionId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Identity of a closed group (a [`SessionId`] with the group prefix)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(SessionId);

impl GroupId {
    /// Wrap a session id, rejecting non-group prefixes
    pub fn new(id: SessionId) -> Result<Self, SyncError> {
        if !id.is_group() {
            return Err(SyncError::InvalidId(format!("{} is not a group id", id)));
        }
        Ok(Self(id))
    }

    /// Create a new random group id
    pub fn random() -> Self {
        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);
        Self(SessionId::new(GROUP_PREFIX, key))
    }

    /// The underlying session id
    pub fn session_id(&self) -> &SessionId {
        &self.0
    }

    /// Hex form, prefix included
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for GroupId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(SessionId::from_hex(s)?)
    }
}

/// Kind of configuration object
///
/// The set is closed: per-variant behavior (schema, namespace, scope) is a
/// `match` on this tag rather than a runtime type check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfigVariant {
    UserProfile,
    Contacts,
    ConvoInfoVolatile,
    UserGroups,
    GroupInfo,
    GroupKeys,
    GroupMembers,
}

/// Personal-account variants, in the order bulk push/pull cycles use
pub const USER_VARIANTS: [ConfigVariant; 4] = [
    ConfigVariant::UserProfile,
    ConfigVariant::Contacts,
    ConfigVariant::ConvoInfoVolatile,
    ConfigVariant::UserGroups,
];

/// Group-scoped variants, in the order they are loaded (keys depend on
/// info and members)
pub const GROUP_VARIANTS: [ConfigVariant; 3] = [
    ConfigVariant::GroupInfo,
    ConfigVariant::GroupMembers,
    ConfigVariant::GroupKeys,
];

impl ConfigVariant {
    /// Stable name used in storage keys and watermarks
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigVariant::UserProfile => "user_profile",
            ConfigVariant::Contacts => "contacts",
            ConfigVariant::ConvoInfoVolatile => "convo_info_volatile",
            ConfigVariant::UserGroups => "user_groups",
            ConfigVariant::GroupInfo => "group_info",
            ConfigVariant::GroupKeys => "group_keys",
            ConfigVariant::GroupMembers => "group_members",
        }
    }

    /// Whether instances of this variant belong to a group scope
    pub fn is_group_scoped(&self) -> bool {
        matches!(
            self,
            ConfigVariant::GroupInfo | ConfigVariant::GroupKeys | ConfigVariant::GroupMembers
        )
    }

    /// Swarm namespace the variant is stored under
    pub fn namespace(&self) -> i16 {
        match self {
            ConfigVariant::UserProfile => 2,
            ConfigVariant::Contacts => 3,
            ConfigVariant::ConvoInfoVolatile => 4,
            ConfigVariant::UserGroups => 5,
            ConfigVariant::GroupKeys => 12,
            ConfigVariant::GroupInfo => 13,
            ConfigVariant::GroupMembers => 14,
        }
    }

    /// Look a variant up by its namespace
    pub fn from_namespace(namespace: i16) -> Option<Self> {
        USER_VARIANTS
            .iter()
            .chain(GROUP_VARIANTS.iter())
            .copied()
            .find(|v| v.namespace() == namespace)
    }
}

impl fmt::Display for ConfigVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigVariant {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        USER_VARIANTS
            .iter()
            .chain(GROUP_VARIANTS.iter())
            .copied()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| SyncError::InvalidId(format!("unknown config variant: {}", s)))
    }
}

/// Owner of a configuration object: the account itself or one group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfigScope {
    User,
    Group(GroupId),
}

impl ConfigScope {
    /// Key of the persisted slot for `variant` in this scope
    pub fn storage_key(&self, variant: ConfigVariant) -> String {
        match self {
            ConfigScope::User => variant.as_str().to_string(),
            ConfigScope::Group(group) => format!("{}:{}", variant.as_str(), group.to_hex()),
        }
    }

    /// The group, for group scopes
    pub fn group(&self) -> Option<&GroupId> {
        match self {
            ConfigScope::User => None,
            ConfigScope::Group(group) => Some(group),
        }
    }

    /// Check that `variant` may live in this scope
    pub fn check(&self, variant: ConfigVariant) -> Result<(), SyncError> {
        match (self, variant.is_group_scoped()) {
            (ConfigScope::User, false) | (ConfigScope::Group(_), true) => Ok(()),
            _ => Err(SyncError::InvalidOperation(format!(
                "{} cannot live in {} scope",
                variant, self
            ))),
        }
    }
}

impl fmt::Display for ConfigScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigScope::User => f.write_str("user"),
            ConfigScope::Group(group) => write!(f, "group_{}", &group.to_hex()[..10]),
        }
    }
}

/// Where config pushes go: the account's own swarm or a group's swarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    Contact(SessionId),
    ClosedGroup(GroupId),
}

impl Destination {
    /// Swarm identity the destination resolves to
    pub fn swarm_key(&self) -> String {
        match self {
            Destination::Contact(id) => id.to_hex(),
            Destination::ClosedGroup(group) => group.to_hex(),
        }
    }

    /// Config scope whose objects are pushed to this destination
    pub fn scope(&self) -> ConfigScope {
        match self {
            Destination::Contact(_) => ConfigScope::User,
            Destination::ClosedGroup(group) => ConfigScope::Group(*group),
        }
    }
}

/// Current wall-clock time in milliseconds since the epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
