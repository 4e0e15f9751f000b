//! End-to-end tests of the config factory
//!
//! Two devices of one account share a session secret; pushes built on one
//! are merged on the other the way they would arrive from the swarm.

use std::sync::{Arc, Barrier};
use std::time::Duration;

use parking_lot::Mutex;
use swarmsync_core::config::{
    Contact, ConversationKind, ConvoVolatileEdit, GroupEntry, GroupInfo, GroupInfoEdit,
    UserProfile, UserProfileEdit,
};
use swarmsync_core::{
    ConfigFactory, ConfigScope, ConfigUpdateListener, ConfigVariant, Destination, FactoryConfig,
    ConfigTransport, GroupId, IncomingUpdate, KeyValueStore, MemoryStore, SessionId,
    SharedSecretCrypto, Storage, SyncError, SyncResult, Table, UpdateScheduler,
};
use tempfile::TempDir;

// ============================================================================
// Helpers
// ============================================================================

struct Device {
    factory: ConfigFactory,
}

fn device(user: SessionId, secret: [u8; 32], store: Arc<dyn KeyValueStore>) -> Device {
    let _ = tracing_subscriber::fmt::try_init();
    let crypto = Arc::new(SharedSecretCrypto::new(user, secret));
    Device {
        factory: ConfigFactory::new(user, store, crypto, FactoryConfig::default()),
    }
}

fn account_pair() -> (Device, Device) {
    let user = SessionId::random_user();
    let secret = SharedSecretCrypto::generate_secret();
    (
        device(user, secret, Arc::new(MemoryStore::new())),
        device(user, secret, Arc::new(MemoryStore::new())),
    )
}

/// Build every pending push of `from` for `destination` as incoming updates
fn pushes(from: &Device, destination: Destination) -> Vec<(ConfigVariant, IncomingUpdate)> {
    from.factory
        .pending_pushes(&destination)
        .unwrap()
        .into_iter()
        .map(|p| {
            let hash = format!("{}-{}-{}", p.variant, p.seqno, blake3::hash(&p.ciphertext).to_hex());
            (p.variant, IncomingUpdate { hash, data: p.ciphertext })
        })
        .collect()
}

fn profile_name(device: &Device) -> Option<String> {
    let obj = device
        .factory
        .get(ConfigVariant::UserProfile, ConfigScope::User)
        .unwrap();
    let guard = obj.lock();
    UserProfile::read(&guard).unwrap().name
}

#[derive(Default)]
struct RecordingListener {
    calls: Mutex<Vec<(ConfigVariant, ConfigScope, i64)>>,
}

impl ConfigUpdateListener for RecordingListener {
    fn notify_updates(&self, variant: ConfigVariant, scope: ConfigScope, ts: i64) {
        self.calls.lock().push((variant, scope, ts));
    }
}

/// Store whose writes fail until switched back on
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    failing: Mutex<bool>,
}

impl KeyValueStore for FlakyStore {
    fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
        self.inner.get(table, key)
    }

    fn insert_or_update(&self, table: Table, key: &str, value: &[u8]) -> Result<(), SyncError> {
        if *self.failing.lock() {
            return Err(SyncError::Storage("disk full".into()));
        }
        self.inner.insert_or_update(table, key, value)
    }

    fn delete(&self, table: Table, key: &str) -> Result<(), SyncError> {
        self.inner.delete(table, key)
    }
}

/// Transport that stores everything
struct AcceptingTransport;

impl ConfigTransport for AcceptingTransport {
    fn store(&self, _destination: &Destination, namespace: i16, ciphertext: &[u8]) -> SyncResult<String> {
        Ok(format!("{}-{}", namespace, blake3::hash(ciphertext).to_hex()))
    }
}

// ============================================================================
// Local mutation
// ============================================================================

#[test]
fn test_local_rename_marks_dirty_and_changes_hash() {
    let (alice, _) = account_pair();
    alice
        .factory
        .edit(ConfigVariant::UserProfile, ConfigScope::User, |e| e.set_name("Alice"))
        .unwrap()
        .unwrap();

    let obj = alice
        .factory
        .get(ConfigVariant::UserProfile, ConfigScope::User)
        .unwrap();
    let before = obj.lock().hash().unwrap();

    alice
        .factory
        .edit(ConfigVariant::UserProfile, ConfigScope::User, |e| e.set_name("Bob"))
        .unwrap()
        .unwrap();

    let guard = obj.lock();
    assert!(guard.needs_push());
    assert_ne!(guard.hash().unwrap(), before);
    assert_eq!(UserProfile::read(&guard).unwrap().name.as_deref(), Some("Bob"));
}

// ============================================================================
// Multi-device merge
// ============================================================================

#[test]
fn test_second_device_sees_pushed_profile() {
    let (laptop, phone) = account_pair();
    let user = *laptop.factory.user_session_id();

    laptop
        .factory
        .edit(ConfigVariant::UserProfile, ConfigScope::User, |e| e.set_name("Alice"))
        .unwrap()
        .unwrap();

    for (variant, update) in pushes(&laptop, Destination::Contact(user)) {
        let report = phone
            .factory
            .merge_updates(variant, ConfigScope::User, &[update], 1_000)
            .unwrap();
        assert!(report.changed);
        assert!(report.skipped.is_empty());
    }

    assert_eq!(profile_name(&phone).as_deref(), Some("Alice"));
}

#[test]
fn test_duplicate_merge_is_noop() {
    let (laptop, phone) = account_pair();
    let user = *laptop.factory.user_session_id();
    let bob = SessionId::random_user();

    laptop
        .factory
        .edit(ConfigVariant::Contacts, ConfigScope::User, |e| {
            let mut contact = Contact::new(bob);
            contact.name = Some("Bob".into());
            contact.approved = true;
            e.set_record(&contact)
        })
        .unwrap()
        .unwrap();

    let (variant, update) = pushes(&laptop, Destination::Contact(user)).remove(0);
    assert_eq!(variant, ConfigVariant::Contacts);

    let obj = phone.factory.get(variant, ConfigScope::User).unwrap();
    phone
        .factory
        .merge_updates(variant, ConfigScope::User, &[update.clone()], 1_000)
        .unwrap();
    let (state, hash) = {
        let guard = obj.lock();
        (guard.state().clone(), guard.hash().unwrap())
    };

    let report = phone
        .factory
        .merge_updates(variant, ConfigScope::User, &[update], 1_000)
        .unwrap();
    assert!(!report.changed);

    let guard = obj.lock();
    assert_eq!(guard.state(), &state);
    assert_eq!(guard.hash().unwrap(), hash);
    let contact: Contact = guard.record(&bob.to_hex()).unwrap().unwrap();
    assert_eq!(contact.name.as_deref(), Some("Bob"));
}

#[test]
fn test_concurrent_edits_converge() {
    let (laptop, phone) = account_pair();
    let user = *laptop.factory.user_session_id();

    laptop
        .factory
        .edit(ConfigVariant::ConvoInfoVolatile, ConfigScope::User, |e| {
            e.mark_read(ConversationKind::OneToOne, "05aa", 100)
        })
        .unwrap()
        .unwrap();
    phone
        .factory
        .edit(ConfigVariant::ConvoInfoVolatile, ConfigScope::User, |e| {
            e.mark_read(ConversationKind::Community, "https://chat.example/lobby", 200)
        })
        .unwrap()
        .unwrap();

    let from_laptop = pushes(&laptop, Destination::Contact(user));
    let from_phone = pushes(&phone, Destination::Contact(user));
    for (variant, update) in from_phone {
        laptop.factory.merge_updates(variant, ConfigScope::User, &[update], 2).unwrap();
    }
    for (variant, update) in from_laptop {
        phone.factory.merge_updates(variant, ConfigScope::User, &[update], 2).unwrap();
    }

    let a = laptop.factory.get(ConfigVariant::ConvoInfoVolatile, ConfigScope::User).unwrap();
    let b = phone.factory.get(ConfigVariant::ConvoInfoVolatile, ConfigScope::User).unwrap();
    assert_eq!(a.lock().hash().unwrap(), b.lock().hash().unwrap());
    assert_eq!(a.lock().state().live_len(), 2);
}

#[test]
fn test_corrupt_update_is_skipped_rest_merges() {
    let (laptop, phone) = account_pair();
    let user = *laptop.factory.user_session_id();
    laptop
        .factory
        .edit(ConfigVariant::UserProfile, ConfigScope::User, |e| e.set_name("Alice"))
        .unwrap()
        .unwrap();
    let (_, good) = pushes(&laptop, Destination::Contact(user)).remove(0);

    let garbage = IncomingUpdate {
        hash: "garbage".into(),
        data: vec![0u8; 40],
    };
    let report = phone
        .factory
        .merge_updates(ConfigVariant::UserProfile, ConfigScope::User, &[garbage, good], 5)
        .unwrap();
    assert_eq!(report.merged, 1);
    assert_eq!(report.skipped, vec!["garbage".to_string()]);
    assert_eq!(profile_name(&phone).as_deref(), Some("Alice"));
}

#[test]
fn test_foreign_account_push_does_not_decrypt() {
    let (alice, _) = account_pair();
    let (mallory, _) = account_pair();
    let user = *mallory.factory.user_session_id();
    mallory
        .factory
        .edit(ConfigVariant::UserProfile, ConfigScope::User, |e| e.set_name("Mallory"))
        .unwrap()
        .unwrap();
    let (_, update) = pushes(&mallory, Destination::Contact(user)).remove(0);

    let report = alice
        .factory
        .merge_updates(ConfigVariant::UserProfile, ConfigScope::User, &[update], 5)
        .unwrap();
    assert_eq!(report.skipped.len(), 1);
    assert!(profile_name(&alice).is_none());
}

// ============================================================================
// Listener
// ============================================================================

#[test]
fn test_listener_notified_only_on_change() {
    let (laptop, phone) = account_pair();
    let user = *laptop.factory.user_session_id();
    let listener = Arc::new(RecordingListener::default());
    phone.factory.set_listener(listener.clone());

    laptop
        .factory
        .edit(ConfigVariant::UserProfile, ConfigScope::User, |e| e.set_name("Alice"))
        .unwrap()
        .unwrap();
    let (variant, update) = pushes(&laptop, Destination::Contact(user)).remove(0);

    phone
        .factory
        .merge_updates(variant, ConfigScope::User, &[update.clone()], 42)
        .unwrap();
    phone
        .factory
        .merge_updates(variant, ConfigScope::User, &[update], 43)
        .unwrap();

    let calls = listener.calls.lock();
    assert_eq!(calls.as_slice(), &[(ConfigVariant::UserProfile, ConfigScope::User, 42)]);
}

// ============================================================================
// Groups
// ============================================================================

#[test]
fn test_group_configs_travel_between_devices() {
    let (laptop, phone) = account_pair();
    let group = GroupId::random();
    let scope = ConfigScope::Group(group);

    laptop
        .factory
        .edit(ConfigVariant::GroupInfo, scope, |e| e.set_group_name("Hikers"))
        .unwrap()
        .unwrap();

    for (variant, update) in pushes(&laptop, Destination::ClosedGroup(group)) {
        phone.factory.merge_updates(variant, scope, &[update], 10).unwrap();
    }

    let info = phone.factory.get(ConfigVariant::GroupInfo, scope).unwrap();
    assert_eq!(
        GroupInfo::read(&info.lock()).unwrap().name.as_deref(),
        Some("Hikers")
    );
}

#[test]
fn test_merge_after_remove_group_is_discarded() {
    let user = SessionId::random_user();
    let group = GroupId::random();
    let scope = ConfigScope::Group(group);
    let phone_store = Arc::new(MemoryStore::new());
    let phone = device(user, [0u8; 32], phone_store.clone());

    phone
        .factory
        .edit(ConfigVariant::GroupInfo, scope, |e| e.set_group_name("Old"))
        .unwrap()
        .unwrap();
    assert_eq!(phone_store.len(Table::Configs), 1);

    // A push for the same group, built by another member
    let member = device(user, [0u8; 32], Arc::new(MemoryStore::new()));
    member
        .factory
        .edit(ConfigVariant::GroupInfo, scope, |e| e.set_group_name("New"))
        .unwrap()
        .unwrap();
    let (variant, update) = pushes(&member, Destination::ClosedGroup(group)).remove(0);

    phone.factory.remove_group(&group).unwrap();
    let err = phone
        .factory
        .merge_updates(variant, scope, &[update.clone()], 11)
        .unwrap_err();
    assert!(matches!(err, SyncError::ScopeDestroyed(_)));
    assert!(phone_store.is_empty(Table::Configs));

    // Rejoining starts from an empty object and accepts merges again
    phone.factory.rejoin_group(&group).unwrap();
    phone.factory.merge_updates(variant, scope, &[update], 12).unwrap();
    let info = phone.factory.get(ConfigVariant::GroupInfo, scope).unwrap();
    assert_eq!(GroupInfo::read(&info.lock()).unwrap().name.as_deref(), Some("New"));
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn test_state_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("swarmsync.redb");
    let user = SessionId::random_user();
    let secret = SharedSecretCrypto::generate_secret();
    let group = GroupId::random();

    {
        let storage = Arc::new(Storage::new(&db_path).unwrap());
        let dev = device(user, secret, storage);
        dev.factory
            .edit(ConfigVariant::UserProfile, ConfigScope::User, |e| e.set_name("Alice"))
            .unwrap()
            .unwrap();
        dev.factory
            .edit(ConfigVariant::UserGroups, ConfigScope::User, |e| {
                e.set_record(&GroupEntry::new(group, "Hikers"))
            })
            .unwrap()
            .unwrap();
        dev.factory.close();
    }

    let storage = Arc::new(Storage::new(&db_path).unwrap());
    let dev = device(user, secret, storage);
    assert_eq!(profile_name(&dev).as_deref(), Some("Alice"));
    assert!(dev
        .factory
        .conversation_in_config(None, Some(&group.to_hex()), None, true)
        .unwrap());

    // Unacknowledged edits are still waiting to be pushed
    let obj = dev.factory.get(ConfigVariant::UserProfile, ConfigScope::User).unwrap();
    assert!(obj.lock().needs_push());
}

#[test]
fn test_persistence_failure_is_retried() {
    let store = Arc::new(FlakyStore::default());
    let user = SessionId::random_user();
    let dev = device(user, [1u8; 32], store.clone());

    *store.failing.lock() = true;
    let err = dev
        .factory
        .edit(ConfigVariant::UserProfile, ConfigScope::User, |e| e.set_name("Alice"))
        .unwrap_err();
    assert!(err.is_persistence_failure());

    // The edit itself was applied in memory
    assert_eq!(profile_name(&dev).as_deref(), Some("Alice"));
    assert!(store.inner.is_empty(Table::Configs));

    *store.failing.lock() = false;
    assert_eq!(dev.factory.persist_dirty().unwrap(), 1);
    assert_eq!(store.inner.len(Table::Configs), 1);
}

// ============================================================================
// Session lifecycle
// ============================================================================

#[test]
fn test_wipe_deletes_everything_and_closes() {
    let store = Arc::new(MemoryStore::new());
    let user = SessionId::random_user();
    let dev = device(user, [2u8; 32], store.clone());
    let group = GroupId::random();

    dev.factory
        .edit(ConfigVariant::UserGroups, ConfigScope::User, |e| {
            e.set_record(&GroupEntry::new(group, "Hikers"))
        })
        .unwrap()
        .unwrap();
    dev.factory
        .edit(ConfigVariant::GroupInfo, ConfigScope::Group(group), |e| e.set_group_name("Hikers"))
        .unwrap()
        .unwrap();
    assert!(dev.factory.can_perform_change(ConfigVariant::Contacts, "05aa", 10));
    assert!(!store.is_empty(Table::Configs));

    dev.factory.wipe().unwrap();

    assert!(dev.factory.is_closed());
    assert!(store.is_empty(Table::Configs));
    assert!(store.is_empty(Table::ChangeWatermarks));
    let err = dev
        .factory
        .merge_updates(ConfigVariant::UserProfile, ConfigScope::User, &[], 1)
        .unwrap_err();
    assert!(matches!(err, SyncError::SessionClosed));
}

#[test]
fn test_stale_changes_rejected() {
    let (dev, _) = account_pair();
    assert!(dev.factory.can_perform_change(ConfigVariant::Contacts, "05aa", 100));
    assert!(!dev.factory.can_perform_change(ConfigVariant::Contacts, "05aa", 100));
    assert!(!dev.factory.can_perform_change(ConfigVariant::Contacts, "05aa", 99));
    assert!(dev.factory.can_perform_change(ConfigVariant::Contacts, "05aa", 101));
    assert!(dev.factory.can_perform_change(ConfigVariant::UserGroups, "05aa", 50));
}

#[tokio::test(start_paused = true)]
async fn test_failed_persist_is_retried_by_scheduled_flush() {
    let store = Arc::new(FlakyStore::default());
    let user = SessionId::random_user();
    let dev = device(user, [1u8; 32], store.clone());
    let handle = UpdateScheduler::new(dev.factory.clone(), Arc::new(AcceptingTransport)).spawn();

    *store.failing.lock() = true;
    let err = dev
        .factory
        .edit(ConfigVariant::UserProfile, ConfigScope::User, |e| e.set_name("Alice"))
        .unwrap_err();
    assert!(err.is_persistence_failure());
    assert!(store.inner.is_empty(Table::Configs));

    // No further edits: the flush queued by the failed one writes the state
    *store.failing.lock() = false;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(store.inner.len(Table::Configs), 1);

    dev.factory.close();
    handle.await.unwrap();
}

// ============================================================================
// Concurrency
// ============================================================================

/// A run of GroupInfo pushes from another member of the account
fn group_info_updates(user: SessionId, group: GroupId, count: usize) -> Vec<IncomingUpdate> {
    let member = device(user, [4u8; 32], Arc::new(MemoryStore::new()));
    let scope = ConfigScope::Group(group);
    (0..count)
        .map(|i| {
            member
                .factory
                .edit(ConfigVariant::GroupInfo, scope, |e| e.set_group_name(&format!("v{}", i)))
                .unwrap()
                .unwrap();
            pushes(&member, Destination::ClosedGroup(group)).remove(0).1
        })
        .collect()
}

#[test]
fn test_merges_racing_remove_group_never_resurrect_slot() {
    let user = SessionId::random_user();
    let group = GroupId::random();
    let scope = ConfigScope::Group(group);
    let updates = group_info_updates(user, group, 40);

    for _ in 0..8 {
        let store = Arc::new(MemoryStore::new());
        let phone = device(user, [4u8; 32], store.clone());
        let barrier = Barrier::new(2);

        let results = std::thread::scope(|s| {
            let merger = s.spawn(|| {
                barrier.wait();
                updates
                    .iter()
                    .enumerate()
                    .map(|(i, u)| {
                        phone
                            .factory
                            .merge_updates(ConfigVariant::GroupInfo, scope, std::slice::from_ref(u), i as i64)
                    })
                    .collect::<Vec<_>>()
            });
            barrier.wait();
            phone.factory.remove_group(&group).unwrap();
            merger.join().unwrap()
        });

        for result in results {
            assert!(matches!(result, Ok(_) | Err(SyncError::ScopeDestroyed(_))));
        }
        assert!(store.is_empty(Table::Configs));
        assert!(matches!(
            phone.factory.merge_updates(ConfigVariant::GroupInfo, scope, &updates[..1], 99),
            Err(SyncError::ScopeDestroyed(_))
        ));
    }
}

#[test]
fn test_merges_racing_wipe_leave_nothing_behind() {
    let user = SessionId::random_user();
    let secret = [5u8; 32];
    let laptop = device(user, secret, Arc::new(MemoryStore::new()));
    let updates: Vec<IncomingUpdate> = (0..40)
        .map(|i| {
            laptop
                .factory
                .edit(ConfigVariant::UserProfile, ConfigScope::User, |e| e.set_name(&format!("n{}", i)))
                .unwrap()
                .unwrap();
            pushes(&laptop, Destination::Contact(user)).remove(0).1
        })
        .collect();

    for _ in 0..8 {
        let store = Arc::new(MemoryStore::new());
        let phone = device(user, secret, store.clone());
        let barrier = Barrier::new(2);

        let results = std::thread::scope(|s| {
            let merger = s.spawn(|| {
                barrier.wait();
                updates
                    .iter()
                    .enumerate()
                    .map(|(i, u)| {
                        phone.factory.merge_updates(
                            ConfigVariant::UserProfile,
                            ConfigScope::User,
                            std::slice::from_ref(u),
                            i as i64,
                        )
                    })
                    .collect::<Vec<_>>()
            });
            barrier.wait();
            phone.factory.wipe().unwrap();
            merger.join().unwrap()
        });

        for result in results {
            assert!(matches!(
                result,
                Ok(_) | Err(SyncError::SessionClosed) | Err(SyncError::ScopeDestroyed(_))
            ));
        }
        assert!(store.is_empty(Table::Configs));
    }
}
