//! Groups and communities the account belongs to

use serde::{Deserialize, Serialize};

use crate::types::{ConfigVariant, GroupId};

use super::edit::Record;
use super::variant::{COMMUNITIES, GROUPS};

/// Membership record of one closed group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub group_id: GroupId,
    pub name: String,
    pub priority: i64,
    pub joined_at_ms: i64,
    /// Invitation received but not yet accepted
    pub invited: bool,
    /// Removed from the group by an admin
    pub kicked: bool,
    /// Hex admin secret key, present for admins only
    pub admin_key: Option<String>,
    /// Hex member authentication data
    pub auth_data: Option<String>,
}

impl GroupEntry {
    pub fn new(group_id: GroupId, name: impl Into<String>) -> Self {
        Self {
            group_id,
            name: name.into(),
            priority: 0,
            joined_at_ms: 0,
            invited: false,
            kicked: false,
            admin_key: None,
            auth_data: None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.admin_key.is_some()
    }
}

impl Record for GroupEntry {
    const VARIANT: ConfigVariant = ConfigVariant::UserGroups;
    const COLLECTION: &'static str = GROUPS;

    fn record_key(&self) -> String {
        self.group_id.to_hex()
    }
}

/// Joined open community room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityEntry {
    pub base_url: String,
    pub room: String,
    /// Hex server public key
    pub pubkey: String,
    pub priority: i64,
}

impl CommunityEntry {
    /// `base_url/room`, with the base url lowercased and trailing slashes
    /// stripped
    pub fn community_id(base_url: &str, room: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/').to_lowercase(), room)
    }
}

impl Record for CommunityEntry {
    const VARIANT: ConfigVariant = ConfigVariant::UserGroups;
    const COLLECTION: &'static str = COMMUNITIES;

    fn record_key(&self) -> String {
        Self::community_id(&self.base_url, &self.room)
    }
}
