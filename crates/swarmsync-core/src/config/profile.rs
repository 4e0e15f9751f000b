//! The account's own profile

use serde::{Deserialize, Serialize};

use crate::error::SyncResult;
use crate::types::ConfigVariant;

use super::edit::ConfigEdit;
use super::object::ConfigObject;
use super::variant::PROFILE;

const NAME: &str = "name";
const PICTURE: &str = "picture";
const NTS_PRIORITY: &str = "nts_priority";
const BLINDED_MSGREQS: &str = "blinded_msgreqs";

/// Location and decryption key of a profile picture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePic {
    pub url: String,
    /// Hex-encoded 32-byte key
    pub key: String,
}

/// Snapshot of the `UserProfile` variant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub name: Option<String>,
    pub picture: Option<ProfilePic>,
    /// Priority of the note-to-self conversation; negative hides it
    pub nts_priority: i64,
    /// Whether blinded message requests are accepted; `None` = client default
    pub blinded_msgreqs: Option<bool>,
}

impl UserProfile {
    /// Read the profile out of a `UserProfile` object
    pub fn read(obj: &ConfigObject) -> SyncResult<Self> {
        super::expect_variant(obj, ConfigVariant::UserProfile)?;
        Ok(Self {
            name: obj.field(PROFILE, NAME)?,
            picture: obj.field(PROFILE, PICTURE)?,
            nts_priority: obj.field(PROFILE, NTS_PRIORITY)?.unwrap_or(0),
            blinded_msgreqs: obj.field(PROFILE, BLINDED_MSGREQS)?,
        })
    }
}

/// Profile edits on a [`ConfigEdit`]
pub trait UserProfileEdit {
    fn set_name(&mut self, name: &str) -> SyncResult<bool>;
    fn set_picture(&mut self, picture: Option<&ProfilePic>) -> SyncResult<bool>;
    fn set_nts_priority(&mut self, priority: i64) -> SyncResult<bool>;
    fn set_blinded_msgreqs(&mut self, enabled: Option<bool>) -> SyncResult<bool>;
}

impl UserProfileEdit for ConfigEdit<'_> {
    fn set_name(&mut self, name: &str) -> SyncResult<bool> {
        self.set_field(PROFILE, NAME, &name)
    }

    fn set_picture(&mut self, picture: Option<&ProfilePic>) -> SyncResult<bool> {
        match picture {
            Some(pic) => self.set_field(PROFILE, PICTURE, pic),
            None => self.remove(PROFILE, PICTURE),
        }
    }

    fn set_nts_priority(&mut self, priority: i64) -> SyncResult<bool> {
        self.set_field(PROFILE, NTS_PRIORITY, &priority)
    }

    fn set_blinded_msgreqs(&mut self, enabled: Option<bool>) -> SyncResult<bool> {
        match enabled {
            Some(flag) => self.set_field(PROFILE, BLINDED_MSGREQS, &flag),
            None => self.remove(PROFILE, BLINDED_MSGREQS),
        }
    }
}
