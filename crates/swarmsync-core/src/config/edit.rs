//! Local edits to a configuration object
//!
//! A [`ConfigEdit`] is handed to the closure passed to
//! [`ConfigObject::mutate`](super::ConfigObject::mutate). Every write it makes
//! is stamped with the edit's timestamp and the object's origin.
//!
//! Values are stored as JSON strings, so typed records go through
//! [`Record`] and scalar fields through [`ConfigEdit::set_field`].

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::SyncError;
use crate::types::ConfigVariant;

use super::state::{ConfigState, Entry};
use super::variant::MergeRule;

/// A typed record stored in one collection of one variant
pub trait Record: Serialize + DeserializeOwned {
    /// Variant whose state holds this record
    const VARIANT: ConfigVariant;
    /// Collection inside that variant
    const COLLECTION: &'static str;

    /// Key the record is stored under
    fn record_key(&self) -> String;
}

pub(crate) fn decode_value<T: DeserializeOwned>(json: &str) -> Result<T, SyncError> {
    serde_json::from_str(json).map_err(|e| SyncError::Serialization(e.to_string()))
}

pub(crate) fn encode_value<T: Serialize>(value: &T) -> Result<String, SyncError> {
    serde_json::to_string(value).map_err(|e| SyncError::Serialization(e.to_string()))
}

pub(crate) fn check_record_variant<T: Record>(variant: ConfigVariant) -> Result<(), SyncError> {
    if T::VARIANT != variant {
        return Err(SyncError::InvalidOperation(format!(
            "{} records live in {}, not {}",
            T::COLLECTION,
            T::VARIANT,
            variant
        )));
    }
    Ok(())
}

pub(crate) fn read_field<T: DeserializeOwned>(
    state: &ConfigState,
    collection: &str,
    name: &str,
) -> Result<Option<T>, SyncError> {
    state.get(collection, name).map(decode_value).transpose()
}

pub(crate) fn read_records<T: Record>(state: &ConfigState) -> Result<Vec<T>, SyncError> {
    state
        .live(T::COLLECTION)
        .map(|(_, json)| decode_value(json))
        .collect()
}

/// Write access to a configuration object's state for one mutation batch
pub struct ConfigEdit<'a> {
    state: &'a mut ConfigState,
    variant: ConfigVariant,
    origin: u64,
    ts_ms: i64,
}

impl<'a> ConfigEdit<'a> {
    pub(crate) fn new(
        state: &'a mut ConfigState,
        variant: ConfigVariant,
        origin: u64,
        ts_ms: i64,
    ) -> Self {
        Self {
            state,
            variant,
            origin,
            ts_ms,
        }
    }

    /// Variant being edited
    pub fn variant(&self) -> ConfigVariant {
        self.variant
    }

    /// Timestamp applied to writes in this batch
    pub fn timestamp_ms(&self) -> i64 {
        self.ts_ms
    }

    /// Current visible JSON value
    pub fn get(&self, collection: &str, key: &str) -> Option<&str> {
        self.state.get(collection, key)
    }

    fn rule(&self, collection: &str) -> Result<MergeRule, SyncError> {
        self.variant
            .collection(collection)
            .map(|c| c.rule)
            .ok_or_else(|| {
                SyncError::InvalidOperation(format!(
                    "{} has no collection '{}'",
                    self.variant, collection
                ))
            })
    }

    // A local write must supersede whatever it overwrites, even when the
    // local clock is behind the replica that wrote the current value.
    fn stamp(&self, collection: &str, key: &str) -> i64 {
        match self.state.last_write_ms(collection, key) {
            Some(last) if last >= self.ts_ms => last + 1,
            _ => self.ts_ms,
        }
    }

    /// Set a raw JSON value. Returns false when the value is unchanged.
    pub fn set(&mut self, collection: &str, key: &str, json: String) -> Result<bool, SyncError> {
        self.rule(collection)?;
        if key.is_empty() {
            return Err(SyncError::InvalidOperation("empty key".into()));
        }
        if self.state.get(collection, key) == Some(json.as_str()) {
            return Ok(false);
        }
        let entry = Entry {
            ts_ms: self.stamp(collection, key),
            origin: self.origin,
            value: Some(json),
        };
        Ok(self.state.put(collection, key, entry))
    }

    /// Remove a key. Returns false when it was already absent.
    pub fn remove(&mut self, collection: &str, key: &str) -> Result<bool, SyncError> {
        if self.rule(collection)? == MergeRule::AddOnly {
            return Err(SyncError::InvalidOperation(format!(
                "'{}' is add-only",
                collection
            )));
        }
        if self.state.get(collection, key).is_none() {
            return Ok(false);
        }
        let entry = Entry {
            ts_ms: self.stamp(collection, key),
            origin: self.origin,
            value: None,
        };
        Ok(self.state.put(collection, key, entry))
    }

    /// Decode a scalar field
    pub fn field<T: DeserializeOwned>(
        &self,
        collection: &str,
        name: &str,
    ) -> Result<Option<T>, SyncError> {
        read_field(&*self.state, collection, name)
    }

    /// Encode and set a scalar field
    pub fn set_field<T: Serialize>(
        &mut self,
        collection: &str,
        name: &str,
        value: &T,
    ) -> Result<bool, SyncError> {
        let json = encode_value(value)?;
        self.set(collection, name, json)
    }

    /// Look up a typed record by key
    pub fn record<T: Record>(&self, key: &str) -> Result<Option<T>, SyncError> {
        check_record_variant::<T>(self.variant)?;
        read_field(&*self.state, T::COLLECTION, key)
    }

    /// Insert or replace a typed record
    pub fn set_record<T: Record>(&mut self, record: &T) -> Result<bool, SyncError> {
        check_record_variant::<T>(self.variant)?;
        let json = encode_value(record)?;
        self.set(T::COLLECTION, &record.record_key(), json)
    }

    /// Erase a typed record by key
    pub fn erase_record<T: Record>(&mut self, key: &str) -> Result<bool, SyncError> {
        check_record_variant::<T>(self.variant)?;
        self.remove(T::COLLECTION, key)
    }

    /// All live records of a type
    pub fn records<T: Record>(&self) -> Result<Vec<T>, SyncError> {
        check_record_variant::<T>(self.variant)?;
        read_records(&*self.state)
    }
}
