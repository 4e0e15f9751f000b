//! Swarmsync Core Library
//!
//! Account configuration sync and routing-state cache for a messaging client
//! on a decentralized storage network.
//!
//! ## Overview
//!
//! Account state (profile, contacts, conversation read state, group
//! membership and each group's info/members/keys) lives in mergeable
//! configuration objects. Every device edits its own copy, pushes encrypted
//! snapshots to the account's swarm, and merges what the other devices
//! pushed. Any delivery order converges to the same state.
//!
//! ## Core Pieces
//!
//! - **Config objects**: last-writer-wins collections with tombstones
//! - **Factory**: owns every object of a session, persists, merges, notifies
//! - **Scheduler**: debounced background push of dirty objects
//! - **Routing cache**: node pool, onion paths, swarms and failure counters
//! - **Ledger**: last-polled hashes and received-message dedup
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use swarmsync_core::config::UserProfileEdit;
//! use swarmsync_core::{
//!     ConfigFactory, ConfigScope, ConfigVariant, FactoryConfig, MemoryStore, SessionId,
//!     SharedSecretCrypto,
//! };
//!
//! let user = SessionId::random_user();
//! let secret = SharedSecretCrypto::generate_secret();
//! let factory = ConfigFactory::new(
//!     user,
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(SharedSecretCrypto::new(user, secret)),
//!     FactoryConfig::default(),
//! );
//!
//! factory.edit(ConfigVariant::UserProfile, ConfigScope::User, |e| e.set_name("Alice"))??;
//! for push in factory.pending_pushes(&swarmsync_core::Destination::Contact(user))? {
//!     println!("{} bytes for namespace {}", push.ciphertext.len(), push.namespace);
//! }
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod factory;
pub mod ledger;
pub mod routing;
pub mod scheduler;
pub mod storage;
pub mod types;

// Re-exports
pub use config::{ConfigObject, ConfigState};
pub use crypto::{ConfigCrypto, SharedSecretCrypto};
pub use error::{SyncError, SyncResult};
pub use factory::{
    ConfigFactory, ConfigUpdateListener, FactoryConfig, IncomingUpdate, MergeReport, PendingPush,
    SharedConfig,
};
pub use ledger::{DedupLedger, LedgerConfig};
pub use routing::{NodePool, OnionTransport, PathCache, RoutingConfig, RoutingState, Snode, SwarmCache};
pub use scheduler::{ConfigTransport, FlushReport, UpdateScheduler};
pub use storage::{KeyValueStore, MemoryStore, Storage, Table};
pub use types::*;
