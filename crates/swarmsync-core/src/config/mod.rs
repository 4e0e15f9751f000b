//! Mergeable configuration objects
//!
//! A [`ConfigObject`] holds one category of account state (profile,
//! contacts, a group's member list...) as a [`ConfigState`], a set of
//! last-writer-wins collections that every replica merges to the same
//! result regardless of delivery order or duplication.
//!
//! The per-variant modules provide typed records and edit helpers on top of
//! the raw JSON values.

mod contacts;
mod convo_volatile;
mod edit;
mod group;
mod object;
mod profile;
mod state;
mod user_groups;
mod variant;

pub use contacts::{Contact, ExpiryMode};
pub use convo_volatile::{Conversation, ConversationKind, ConvoVolatileEdit};
pub use edit::{ConfigEdit, Record};
pub use group::{
    GroupInfo, GroupInfoEdit, GroupKey, GroupKeysEdit, GroupMember, MemberStatus,
};
pub use object::{
    ConfigObject, ConfigPush, DEFAULT_MERGED_UPDATE_MEMORY, MAX_CONFIG_SIZE, PUSH_FORMAT_VERSION,
};
pub use profile::{ProfilePic, UserProfile, UserProfileEdit};
pub use state::{ConfigState, Entry};
pub use user_groups::{CommunityEntry, GroupEntry};
pub use variant::{CollectionSchema, MergeRule};

use crate::error::{SyncError, SyncResult};
use crate::types::ConfigVariant;

fn expect_variant(obj: &ConfigObject, variant: ConfigVariant) -> SyncResult<()> {
    if obj.variant() != variant {
        return Err(SyncError::InvalidOperation(format!(
            "expected {} object, got {}",
            variant,
            obj.variant()
        )));
    }
    Ok(())
}
