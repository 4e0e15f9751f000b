//! Configuration factory
//!
//! `ConfigFactory` is the only entry point the rest of the client uses to
//! reach configuration objects. It owns:
//! - one object per user variant, loaded lazily from the store
//! - an info/members/keys triple per group the account belongs to
//! - the change watermarks behind [`ConfigFactory::can_perform_change`]
//! - the set of destinations waiting for the next push flush
//!
//! Each object sits behind its own mutex. Mutate, merge and persist for one
//! `(variant, scope)` run under that lock, so different objects proceed in
//! parallel while a single object has at most one writer.
//!
//! The factory is constructed per account session and shared by cloning.
//! [`ConfigFactory::close`] and [`ConfigFactory::wipe`] end the session:
//! later merges fail with `SessionClosed` and the push scheduler stops.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{CommunityEntry, ConfigObject, Contact, GroupEntry, UserProfile};
use crate::crypto::ConfigCrypto;
use crate::error::{SyncError, SyncResult};
use crate::storage::{load_record, save_record, KeyValueStore, Table};
use crate::types::{
    now_ms, ConfigScope, ConfigVariant, Destination, GroupId, SessionId, GROUP_VARIANTS,
    USER_VARIANTS,
};

/// Shared handle to a live configuration object
pub type SharedConfig = Arc<Mutex<ConfigObject>>;

/// Tunables of a [`ConfigFactory`]
#[derive(Debug, Clone)]
pub struct FactoryConfig {
    /// Window within which `schedule_update` calls coalesce into one flush
    pub debounce: Duration,
    /// Merged update ids remembered per object
    pub merged_update_memory: usize,
    /// How long a removed group keeps discarding late merges
    pub removal_retention: Duration,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1000),
            merged_update_memory: crate::config::DEFAULT_MERGED_UPDATE_MEMORY,
            // Longest a message lives on the storage network
            removal_retention: Duration::from_secs(14 * 24 * 60 * 60),
        }
    }
}

/// Callback invoked after every merge that changed an object
pub trait ConfigUpdateListener: Send + Sync {
    fn notify_updates(&self, variant: ConfigVariant, scope: ConfigScope, message_timestamp_ms: i64);
}

/// Raw update pulled from a swarm
#[derive(Debug, Clone)]
pub struct IncomingUpdate {
    /// Message hash on the storage network, doubles as the update id
    pub hash: String,
    /// Encrypted payload
    pub data: Vec<u8>,
}

/// Outcome of [`ConfigFactory::merge_updates`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Updates that were parsed and joined (including no-op joins)
    pub merged: usize,
    /// Hashes of updates skipped as corrupt
    pub skipped: Vec<String>,
    /// Whether observable state changed
    pub changed: bool,
}

/// An encrypted push waiting to be stored
#[derive(Debug, Clone)]
pub struct PendingPush {
    pub variant: ConfigVariant,
    pub scope: ConfigScope,
    pub namespace: i16,
    pub seqno: u64,
    pub ciphertext: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct StoredConfig {
    timestamp_ms: i64,
    dump: Vec<u8>,
}

type Watermarks = BTreeMap<String, i64>;

/// group -> removed at (ms)
type RemovedGroups = BTreeMap<GroupId, i64>;

const REMOVED_GROUPS_KEY: &str = "removed_groups";

struct FactoryInner {
    user_id: SessionId,
    store: Arc<dyn KeyValueStore>,
    crypto: Arc<dyn ConfigCrypto>,
    config: FactoryConfig,
    user_configs: Mutex<HashMap<ConfigVariant, SharedConfig>>,
    groups: Mutex<HashMap<GroupId, HashMap<ConfigVariant, SharedConfig>>>,
    // Loaded from the Meta table on first use
    removed_groups: Mutex<Option<RemovedGroups>>,
    watermarks: Mutex<HashMap<ConfigVariant, Watermarks>>,
    listener: RwLock<Option<Arc<dyn ConfigUpdateListener>>>,
    scheduled: Mutex<HashSet<Destination>>,
    schedule_notify: Notify,
    shutdown: CancellationToken,
}

/// Owner of every configuration object of one account session
#[derive(Clone)]
pub struct ConfigFactory {
    inner: Arc<FactoryInner>,
}

impl ConfigFactory {
    /// Create a factory for `user_id` over the given store and crypto
    pub fn new(
        user_id: SessionId,
        store: Arc<dyn KeyValueStore>,
        crypto: Arc<dyn ConfigCrypto>,
        config: FactoryConfig,
    ) -> Self {
        info!(%user_id, "Opening config factory");
        Self {
            inner: Arc::new(FactoryInner {
                user_id,
                store,
                crypto,
                config,
                user_configs: Mutex::new(HashMap::new()),
                groups: Mutex::new(HashMap::new()),
                removed_groups: Mutex::new(None),
                watermarks: Mutex::new(HashMap::new()),
                listener: RwLock::new(None),
                scheduled: Mutex::new(HashSet::new()),
                schedule_notify: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn user_session_id(&self) -> &SessionId {
        &self.inner.user_id
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.inner.config
    }

    /// Whether `close` or `wipe` was called
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Token cancelled when the session ends
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    fn ensure_open(&self) -> SyncResult<()> {
        if self.is_closed() {
            return Err(SyncError::SessionClosed);
        }
        Ok(())
    }

    /// Register the merge notification callback, replacing any previous one
    pub fn set_listener(&self, listener: Arc<dyn ConfigUpdateListener>) {
        *self.inner.listener.write() = Some(listener);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Object access
    // ═══════════════════════════════════════════════════════════════════════

    /// The live object for `(variant, scope)`
    ///
    /// Loads the persisted dump on first access, or starts empty.
    pub fn get(&self, variant: ConfigVariant, scope: ConfigScope) -> SyncResult<SharedConfig> {
        self.ensure_open()?;
        scope.check(variant)?;

        match scope {
            ConfigScope::User => {
                let mut objects = self.inner.user_configs.lock();
                if let Some(obj) = objects.get(&variant) {
                    return Ok(obj.clone());
                }
                let obj = Arc::new(Mutex::new(self.load_object(variant, scope)?));
                objects.insert(variant, obj.clone());
                Ok(obj)
            }
            ConfigScope::Group(group) => {
                let mut groups = self.inner.groups.lock();
                let slot = groups.entry(group).or_default();
                if let Some(obj) = slot.get(&variant) {
                    return Ok(obj.clone());
                }
                let obj = Arc::new(Mutex::new(self.load_object(variant, scope)?));
                slot.insert(variant, obj.clone());
                Ok(obj)
            }
        }
    }

    fn load_object(&self, variant: ConfigVariant, scope: ConfigScope) -> SyncResult<ConfigObject> {
        let key = scope.storage_key(variant);
        let stored: Option<StoredConfig> =
            load_record(self.inner.store.as_ref(), Table::Configs, &key)?;
        let mut obj = match stored {
            Some(stored) => {
                debug!(%variant, %scope, persisted_at = stored.timestamp_ms, "Loaded config dump");
                ConfigObject::load(variant, scope, &stored.dump)?
            }
            None => ConfigObject::new(variant, scope),
        };
        obj.set_merged_update_memory(self.inner.config.merged_update_memory);
        Ok(obj)
    }

    /// All personal-account objects, in [`USER_VARIANTS`] order
    pub fn user_configs(&self) -> SyncResult<Vec<SharedConfig>> {
        USER_VARIANTS
            .iter()
            .map(|v| self.get(*v, ConfigScope::User))
            .collect()
    }

    /// Apply a local edit, persist it and schedule a push
    ///
    /// Nothing is persisted or scheduled when the edit was a no-op.
    pub fn edit<R>(
        &self,
        variant: ConfigVariant,
        scope: ConfigScope,
        f: impl FnOnce(&mut crate::config::ConfigEdit<'_>) -> R,
    ) -> SyncResult<R> {
        self.ensure_not_removed(scope)?;
        let obj = self.get(variant, scope)?;
        let (out, changed, persisted) = {
            let mut guard = obj.lock();
            let seqno = guard.seqno();
            let out = guard.mutate(f)?;
            let changed = guard.seqno() != seqno;
            let persisted = if changed {
                self.persist_locked(&mut guard, now_ms())
            } else {
                Ok(())
            };
            (out, changed, persisted)
        };
        // A failed persist is retried by the flush this schedules
        if changed && !matches!(persisted, Err(SyncError::ScopeDestroyed(_))) {
            self.schedule_update(self.destination_for(scope));
        }
        persisted?;
        Ok(out)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Persistence
    // ═══════════════════════════════════════════════════════════════════════

    /// Write the object's current state to the store
    ///
    /// # Errors
    ///
    /// A persistence failure leaves the in-memory object untouched and still
    /// flagged for the next flush.
    pub fn persist(&self, variant: ConfigVariant, scope: ConfigScope, timestamp_ms: i64) -> SyncResult<()> {
        self.ensure_not_removed(scope)?;
        let obj = self.get(variant, scope)?;
        let mut guard = obj.lock();
        self.persist_locked(&mut guard, timestamp_ms)
    }

    fn persist_locked(&self, obj: &mut ConfigObject, timestamp_ms: i64) -> SyncResult<()> {
        // A removed group's slot is never written again
        if obj.is_destroyed() || self.is_removed(obj.scope())? {
            return Err(SyncError::ScopeDestroyed(obj.scope().to_string()));
        }
        let stored = StoredConfig {
            timestamp_ms,
            dump: obj.dump()?,
        };
        let key = obj.scope().storage_key(obj.variant());
        save_record(self.inner.store.as_ref(), Table::Configs, &key, &stored)
            .inspect_err(|e| warn!(variant = %obj.variant(), scope = %obj.scope(), ?e, "Failed to persist config"))?;
        obj.mark_dumped();
        Ok(())
    }

    /// Persist the info/members/keys triple of a group in one call
    pub fn save_group_configs(&self, group: &GroupId, timestamp_ms: i64) -> SyncResult<()> {
        for variant in GROUP_VARIANTS {
            self.persist(variant, ConfigScope::Group(*group), timestamp_ms)?;
        }
        Ok(())
    }

    /// Retry every loaded object whose last persist failed or never happened
    pub fn persist_dirty(&self) -> SyncResult<usize> {
        self.ensure_open()?;
        let mut written = 0;
        let mut first_err = None;
        for obj in self.loaded_objects() {
            let mut guard = obj.lock();
            if !guard.needs_dump() || guard.is_destroyed() {
                continue;
            }
            match self.persist_locked(&mut guard, now_ms()) {
                Ok(()) => written += 1,
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    fn loaded_objects(&self) -> Vec<SharedConfig> {
        let mut all: Vec<SharedConfig> = self.inner.user_configs.lock().values().cloned().collect();
        for slot in self.inner.groups.lock().values() {
            all.extend(slot.values().cloned());
        }
        all
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Merging
    // ═══════════════════════════════════════════════════════════════════════

    /// Decrypt and merge a batch of updates into one object
    ///
    /// Corrupt updates are logged and skipped; the rest of the batch still
    /// merges. The object is persisted and listeners notified when anything
    /// changed.
    ///
    /// # Errors
    ///
    /// `SessionClosed` after `close`/`wipe`, `ScopeDestroyed` if the group
    /// was removed, or a persistence failure.
    pub fn merge_updates(
        &self,
        variant: ConfigVariant,
        scope: ConfigScope,
        updates: &[IncomingUpdate],
        message_timestamp_ms: i64,
    ) -> SyncResult<MergeReport> {
        if self.is_removed(scope)? {
            info!(%scope, %variant, "Discarding merge for removed group");
            return Err(SyncError::ScopeDestroyed(scope.to_string()));
        }
        let obj = self.get(variant, scope)?;
        let mut report = MergeReport::default();

        {
            let mut guard = obj.lock();
            if guard.is_destroyed() || self.is_removed(scope)? {
                info!(%variant, %scope, "Discarding merge for destroyed scope");
                return Err(SyncError::ScopeDestroyed(scope.to_string()));
            }

            for update in updates {
                self.ensure_open()?;
                let plaintext = match self.inner.crypto.decrypt(&update.data, variant.as_str(), scope.group()) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(%variant, %scope, hash = %update.hash, ?e, "Skipping undecryptable update");
                        report.skipped.push(update.hash.clone());
                        continue;
                    }
                };
                match guard.merge(&update.hash, &plaintext) {
                    Ok(changed) => {
                        report.merged += 1;
                        report.changed |= changed;
                    }
                    Err(e @ SyncError::CorruptUpdate { .. }) => {
                        warn!(%variant, %scope, error = %e, "Skipping corrupt update");
                        report.skipped.push(update.hash.clone());
                    }
                    Err(e) => return Err(e),
                }
            }

            // The session may have ended while this batch was decrypting
            self.ensure_open()?;
            if guard.needs_dump() {
                self.persist_locked(&mut guard, message_timestamp_ms)?;
            }
        }

        if report.changed {
            let listener = self.inner.listener.read().clone();
            if let Some(listener) = listener {
                listener.notify_updates(variant, scope, message_timestamp_ms);
            }
        }
        debug!(%variant, %scope, merged = report.merged, skipped = report.skipped.len(), changed = report.changed, "Merged update batch");
        Ok(report)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Groups
    // ═══════════════════════════════════════════════════════════════════════

    /// Evict and destroy a group's info/members/keys triple
    ///
    /// Persisted state is deleted while holding each object's lock, so a
    /// merge in flight either finishes first (and its write is deleted) or
    /// sees the destroyed flag and is discarded. Merges arriving later are
    /// discarded until [`rejoin_group`](Self::rejoin_group), including after
    /// a restart, for [`FactoryConfig::removal_retention`].
    pub fn remove_group(&self, group: &GroupId) -> SyncResult<()> {
        // Held throughout so no `get` can reload the slot before it is deleted
        let mut groups = self.inner.groups.lock();
        let removed_at = now_ms();
        self.update_removed(|removed| {
            removed.insert(*group, removed_at);
        })?;
        let slot = groups.remove(group).unwrap_or_default();
        let scope = ConfigScope::Group(*group);

        for variant in GROUP_VARIANTS {
            let key = scope.storage_key(variant);
            match slot.get(&variant) {
                Some(obj) => {
                    let mut guard = obj.lock();
                    guard.mark_destroyed();
                    self.inner.store.delete(Table::Configs, &key)?;
                }
                None => self.inner.store.delete(Table::Configs, &key)?,
            }
        }
        drop(groups);
        self.inner
            .scheduled
            .lock()
            .remove(&Destination::ClosedGroup(*group));

        info!(%group, "Removed group configs");
        Ok(())
    }

    fn retention_ms(&self) -> i64 {
        i64::try_from(self.inner.config.removal_retention.as_millis()).unwrap_or(i64::MAX)
    }

    fn is_removed(&self, scope: ConfigScope) -> SyncResult<bool> {
        let group = match scope {
            ConfigScope::User => return Ok(false),
            ConfigScope::Group(group) => group,
        };
        let cutoff = now_ms().saturating_sub(self.retention_ms());
        let mut slot = self.inner.removed_groups.lock();
        let removed = self.loaded_removed(&mut slot)?;
        Ok(removed.get(&group).is_some_and(|at| *at >= cutoff))
    }

    fn ensure_not_removed(&self, scope: ConfigScope) -> SyncResult<()> {
        if self.is_removed(scope)? {
            return Err(SyncError::ScopeDestroyed(scope.to_string()));
        }
        Ok(())
    }

    fn loaded_removed<'a>(&self, slot: &'a mut Option<RemovedGroups>) -> SyncResult<&'a mut RemovedGroups> {
        if slot.is_none() {
            let stored: Option<RemovedGroups> =
                load_record(self.inner.store.as_ref(), Table::Meta, REMOVED_GROUPS_KEY)?;
            *slot = Some(stored.unwrap_or_default());
        }
        Ok(slot.get_or_insert_with(RemovedGroups::new))
    }

    /// Apply `f` to the removal marks, drop expired ones and persist them
    fn update_removed(&self, f: impl FnOnce(&mut RemovedGroups)) -> SyncResult<()> {
        let mut slot = self.inner.removed_groups.lock();
        let removed = self.loaded_removed(&mut slot)?;
        f(&mut *removed);
        let cutoff = now_ms().saturating_sub(self.retention_ms());
        removed.retain(|_, at| *at >= cutoff);
        save_record(self.inner.store.as_ref(), Table::Meta, REMOVED_GROUPS_KEY, &*removed)
    }

    /// Accept merges for a previously removed group again
    pub fn rejoin_group(&self, group: &GroupId) -> SyncResult<()> {
        let mut rejoined = false;
        self.update_removed(|removed| rejoined = removed.remove(group).is_some())?;
        if rejoined {
            debug!(%group, "Group rejoined");
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Change watermarks
    // ═══════════════════════════════════════════════════════════════════════

    /// Accept a change only if it is newer than every change already
    /// accepted for the same `(variant, key)`
    ///
    /// # Errors
    ///
    /// `StaleChange` when `change_timestamp_ms` is at or below the watermark.
    pub fn check_change(
        &self,
        variant: ConfigVariant,
        public_key: &str,
        change_timestamp_ms: i64,
    ) -> SyncResult<()> {
        let mut all = self.inner.watermarks.lock();
        let marks = match all.entry(variant) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                let stored: Option<Watermarks> = load_record(
                    self.inner.store.as_ref(),
                    Table::ChangeWatermarks,
                    variant.as_str(),
                )?;
                e.insert(stored.unwrap_or_default())
            }
        };

        if let Some(&watermark) = marks.get(public_key) {
            if change_timestamp_ms <= watermark {
                return Err(SyncError::StaleChange {
                    variant: variant.to_string(),
                    key: public_key.to_string(),
                    timestamp_ms: change_timestamp_ms,
                    watermark_ms: watermark,
                });
            }
        }

        marks.insert(public_key.to_string(), change_timestamp_ms);
        if let Err(e) = save_record(
            self.inner.store.as_ref(),
            Table::ChangeWatermarks,
            variant.as_str(),
            &*marks,
        ) {
            warn!(%variant, ?e, "Failed to persist change watermark");
        }
        Ok(())
    }

    /// Boolean form of [`check_change`](Self::check_change)
    pub fn can_perform_change(
        &self,
        variant: ConfigVariant,
        public_key: &str,
        change_timestamp_ms: i64,
    ) -> bool {
        match self.check_change(variant, public_key, change_timestamp_ms) {
            Ok(()) => true,
            Err(e @ SyncError::StaleChange { .. }) => {
                debug!(error = %e, "Rejected stale change");
                false
            }
            Err(e) => {
                warn!(%variant, ?e, "Change watermark unavailable");
                false
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Push scheduling
    // ═══════════════════════════════════════════════════════════════════════

    fn destination_for(&self, scope: ConfigScope) -> Destination {
        match scope {
            ConfigScope::User => Destination::Contact(self.inner.user_id),
            ConfigScope::Group(group) => Destination::ClosedGroup(group),
        }
    }

    /// Queue `destination` for the next push flush
    pub fn schedule_update(&self, destination: Destination) {
        if self.is_closed() {
            return;
        }
        if self.inner.scheduled.lock().insert(destination) {
            debug!(destination = %destination.swarm_key(), "Scheduled config push");
        }
        self.inner.schedule_notify.notify_one();
    }

    pub(crate) fn take_scheduled(&self) -> HashSet<Destination> {
        std::mem::take(&mut *self.inner.scheduled.lock())
    }

    pub(crate) fn schedule_notify(&self) -> &Notify {
        &self.inner.schedule_notify
    }

    /// Encrypted pushes for every object of `destination` that needs one
    pub fn pending_pushes(&self, destination: &Destination) -> SyncResult<Vec<PendingPush>> {
        let scope = destination.scope();
        let variants: &[ConfigVariant] = match scope {
            ConfigScope::User => &USER_VARIANTS,
            ConfigScope::Group(_) => &GROUP_VARIANTS,
        };

        let mut pushes = Vec::new();
        for variant in variants {
            let obj = self.get(*variant, scope)?;
            let push = {
                let guard = obj.lock();
                if !guard.needs_push() || guard.is_destroyed() {
                    continue;
                }
                guard.push()?
            };
            let ciphertext = self.inner.crypto.encrypt(
                &push.data,
                variant.as_str(),
                &self.inner.user_id,
                scope.group(),
            )?;
            pushes.push(PendingPush {
                variant: *variant,
                scope,
                namespace: variant.namespace(),
                seqno: push.seqno,
                ciphertext,
            });
        }
        Ok(pushes)
    }

    /// Record a stored push and persist the object
    ///
    /// Returns whether the object is clean afterwards.
    pub fn confirm_pushed(
        &self,
        variant: ConfigVariant,
        scope: ConfigScope,
        seqno: u64,
        message_hash: &str,
    ) -> SyncResult<bool> {
        // The group may have been removed while the push was in flight
        self.ensure_not_removed(scope)?;
        let obj = self.get(variant, scope)?;
        let mut guard = obj.lock();
        if guard.is_destroyed() {
            return Err(SyncError::ScopeDestroyed(scope.to_string()));
        }
        let clean = guard.confirm_pushed(seqno, message_hash);
        self.persist_locked(&mut guard, now_ms())?;
        Ok(clean)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Crypto capability
    // ═══════════════════════════════════════════════════════════════════════

    pub fn encrypt_for_user(
        &self,
        message: &[u8],
        domain: &str,
        recipient: &SessionId,
        group: Option<&GroupId>,
    ) -> SyncResult<Vec<u8>> {
        self.inner.crypto.encrypt(message, domain, recipient, group)
    }

    /// Decrypt, or `None` if the payload does not authenticate
    pub fn maybe_decrypt_for_user(
        &self,
        encoded: &[u8],
        domain: &str,
        group: Option<&GroupId>,
    ) -> Option<Vec<u8>> {
        match self.inner.crypto.decrypt(encoded, domain, group) {
            Ok(plaintext) => Some(plaintext),
            Err(e) => {
                debug!(domain, ?e, "Payload did not decrypt");
                None
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════════

    /// Whether a conversation is tracked by the user configs
    ///
    /// Exactly one of `public_key`, `group_key` or `community_id` is
    /// consulted, in that order. With `visible_only`, hidden entries
    /// (negative priority) do not count.
    pub fn conversation_in_config(
        &self,
        public_key: Option<&str>,
        group_key: Option<&str>,
        community_id: Option<&str>,
        visible_only: bool,
    ) -> SyncResult<bool> {
        let visible = |priority: i64| !visible_only || priority >= 0;

        if let Some(key) = public_key {
            if key == self.inner.user_id.to_hex() {
                let profile = self.get(ConfigVariant::UserProfile, ConfigScope::User)?;
                let profile = UserProfile::read(&profile.lock())?;
                return Ok(visible(profile.nts_priority));
            }
            let contacts = self.get(ConfigVariant::Contacts, ConfigScope::User)?;
            let contact: Option<Contact> = contacts.lock().record(key)?;
            return Ok(contact.is_some_and(|c| visible(c.priority)));
        }

        let groups = self.get(ConfigVariant::UserGroups, ConfigScope::User)?;
        let groups = groups.lock();
        if let Some(key) = group_key {
            let entry: Option<GroupEntry> = groups.record(key)?;
            return Ok(entry.is_some_and(|g| visible(g.priority)));
        }
        if let Some(id) = community_id {
            let entry: Option<CommunityEntry> = groups.record(id)?;
            return Ok(entry.is_some_and(|c| visible(c.priority)));
        }
        Ok(false)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Session lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// End the session, keeping persisted state
    pub fn close(&self) {
        if !self.is_closed() {
            info!(user_id = %self.inner.user_id, "Closing config factory");
            self.inner.shutdown.cancel();
            self.inner.schedule_notify.notify_waiters();
        }
    }

    /// End the session and delete all persisted config state
    pub fn wipe(&self) -> SyncResult<()> {
        // Groups known from the account config, plus any loaded ones
        let mut groups: HashSet<GroupId> = HashSet::new();
        if !self.is_closed() {
            let user_groups = self.get(ConfigVariant::UserGroups, ConfigScope::User)?;
            let entries: Vec<GroupEntry> = user_groups.lock().records()?;
            groups.extend(entries.into_iter().map(|e| e.group_id));
        }
        self.close();

        let users: Vec<SharedConfig> = self.inner.user_configs.lock().drain().map(|(_, o)| o).collect();
        for obj in users {
            obj.lock().mark_destroyed();
        }
        let loaded: Vec<(GroupId, HashMap<ConfigVariant, SharedConfig>)> =
            self.inner.groups.lock().drain().collect();
        for (group, slot) in loaded {
            groups.insert(group);
            for obj in slot.values() {
                obj.lock().mark_destroyed();
            }
        }

        let store = self.inner.store.as_ref();
        for variant in USER_VARIANTS {
            store.delete(Table::Configs, &ConfigScope::User.storage_key(variant))?;
        }
        for group in &groups {
            for variant in GROUP_VARIANTS {
                store.delete(Table::Configs, &ConfigScope::Group(*group).storage_key(variant))?;
            }
        }
        for variant in USER_VARIANTS.iter().chain(GROUP_VARIANTS.iter()) {
            store.delete(Table::ChangeWatermarks, variant.as_str())?;
        }
        store.delete(Table::Meta, REMOVED_GROUPS_KEY)?;
        *self.inner.removed_groups.lock() = Some(RemovedGroups::new());
        self.inner.watermarks.lock().clear();
        self.inner.scheduled.lock().clear();

        info!(user_id = %self.inner.user_id, groups = groups.len(), "Wiped config state");
        Ok(())
    }
}
