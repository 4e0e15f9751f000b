//! Per-variant schema
//!
//! Each [`ConfigVariant`] declares the collections its state may contain and
//! how each collection merges. Merge validation and local edits both go
//! through this table, so an update can never introduce a collection the
//! receiving variant does not know about.

use crate::types::ConfigVariant;

use super::state::ConfigState;

/// How a collection resolves concurrent writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
    /// Per-key last writer wins; removals are tombstones
    LastWriterWins,
    /// Keys are only ever added; tombstones are invalid
    AddOnly,
}

/// One collection of a variant's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionSchema {
    pub name: &'static str,
    pub rule: MergeRule,
}

const fn lww(name: &'static str) -> CollectionSchema {
    CollectionSchema {
        name,
        rule: MergeRule::LastWriterWins,
    }
}

pub(crate) const PROFILE: &str = "profile";
pub(crate) const CONTACTS: &str = "contacts";
pub(crate) const CONVERSATIONS: &str = "conversations";
pub(crate) const GROUPS: &str = "groups";
pub(crate) const COMMUNITIES: &str = "communities";
pub(crate) const INFO: &str = "info";
pub(crate) const KEYS: &str = "keys";
pub(crate) const MEMBERS: &str = "members";

const USER_PROFILE_SCHEMA: &[CollectionSchema] = &[lww(PROFILE)];
const CONTACTS_SCHEMA: &[CollectionSchema] = &[lww(CONTACTS)];
const CONVO_SCHEMA: &[CollectionSchema] = &[lww(CONVERSATIONS)];
const USER_GROUPS_SCHEMA: &[CollectionSchema] = &[lww(GROUPS), lww(COMMUNITIES)];
const GROUP_INFO_SCHEMA: &[CollectionSchema] = &[lww(INFO)];
const GROUP_KEYS_SCHEMA: &[CollectionSchema] = &[CollectionSchema {
    name: KEYS,
    rule: MergeRule::AddOnly,
}];
const GROUP_MEMBERS_SCHEMA: &[CollectionSchema] = &[lww(MEMBERS)];

impl ConfigVariant {
    /// Collections this variant's state may contain
    pub fn schema(&self) -> &'static [CollectionSchema] {
        match self {
            ConfigVariant::UserProfile => USER_PROFILE_SCHEMA,
            ConfigVariant::Contacts => CONTACTS_SCHEMA,
            ConfigVariant::ConvoInfoVolatile => CONVO_SCHEMA,
            ConfigVariant::UserGroups => USER_GROUPS_SCHEMA,
            ConfigVariant::GroupInfo => GROUP_INFO_SCHEMA,
            ConfigVariant::GroupKeys => GROUP_KEYS_SCHEMA,
            ConfigVariant::GroupMembers => GROUP_MEMBERS_SCHEMA,
        }
    }

    /// Schema entry for `collection`, if declared
    pub fn collection(&self, collection: &str) -> Option<&'static CollectionSchema> {
        self.schema().iter().find(|c| c.name == collection)
    }

    /// Check an incoming state against the schema
    ///
    /// Returns a human-readable reason on the first violation.
    pub fn validate(&self, state: &ConfigState) -> Result<(), String> {
        for (collection, key, entry) in state.entries() {
            let schema = self
                .collection(collection)
                .ok_or_else(|| format!("{} has no collection '{}'", self, collection))?;

            if key.is_empty() {
                return Err(format!("empty key in '{}'", collection));
            }

            match (&entry.value, schema.rule) {
                (None, MergeRule::AddOnly) => {
                    return Err(format!("removal in add-only collection '{}'", collection));
                }
                (Some(json), _) => {
                    serde_json::from_str::<serde_json::Value>(json)
                        .map_err(|e| format!("invalid value for {}/{}: {}", collection, key, e))?;
                }
                (None, MergeRule::LastWriterWins) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::state::Entry;

    fn put(state: &mut ConfigState, collection: &str, key: &str, value: Option<&str>) {
        state.put(
            collection,
            key,
            Entry {
                ts_ms: 1,
                origin: 1,
                value: value.map(str::to_string),
            },
        );
    }

    #[test]
    fn test_every_variant_declares_a_collection() {
        for v in crate::types::USER_VARIANTS
            .iter()
            .chain(crate::types::GROUP_VARIANTS.iter())
        {
            assert!(!v.schema().is_empty(), "{} has no schema", v);
        }
    }

    #[test]
    fn test_validate_accepts_declared_collection() {
        let mut state = ConfigState::new();
        put(&mut state, CONTACTS, "05aa", Some("{\"name\":\"a\"}"));
        put(&mut state, CONTACTS, "05bb", None);
        assert!(ConfigVariant::Contacts.validate(&state).is_ok());
    }

    #[test]
    fn test_validate_rejects_foreign_collection() {
        let mut state = ConfigState::new();
        put(&mut state, MEMBERS, "05aa", Some("{}"));
        assert!(ConfigVariant::Contacts.validate(&state).is_err());
    }

    #[test]
    fn test_validate_rejects_tombstone_in_add_only() {
        let mut state = ConfigState::new();
        put(&mut state, KEYS, "00000000000000000001", None);
        assert!(ConfigVariant::GroupKeys.validate(&state).is_err());
    }

    #[test]
    fn test_validate_rejects_non_json_value() {
        let mut state = ConfigState::new();
        put(&mut state, PROFILE, "name", Some("not json"));
        assert!(ConfigVariant::UserProfile.validate(&state).is_err());
    }
}
