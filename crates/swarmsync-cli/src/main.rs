//! Swarmsync CLI
//!
//! Thin wrapper around swarmsync-core for inspecting and editing a local
//! account store.
//!
//! ## Usage
//!
//! ```bash
//! # Show the account and data directory
//! swarmsync info
//!
//! # Profile
//! swarmsync profile show
//! swarmsync profile set-name "Alice"
//!
//! # Contacts
//! swarmsync contact add 05<64 hex chars> --name Bob
//! swarmsync contact list
//!
//! # Per-config revision, hash and push state
//! swarmsync config status
//!
//! # Routing state
//! swarmsync pool import nodes.txt
//! swarmsync paths show
//! swarmsync paths clear
//! swarmsync swarm show 05<64 hex chars>
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use swarmsync_core::config::{Contact, UserProfile, UserProfileEdit};
use swarmsync_core::{
    now_ms, ConfigFactory, ConfigScope, ConfigVariant, FactoryConfig, KeyValueStore, NodePool,
    PathCache, SessionId, SharedSecretCrypto, Snode, Storage, SwarmCache, SyncError, Table,
};

const ACCOUNT_ID_KEY: &str = "account_id";
const SESSION_SECRET_KEY: &str = "session_secret";

/// Swarmsync - account config sync and routing cache
#[derive(Parser)]
#[command(name = "swarmsync")]
#[command(version = "0.1.0")]
#[command(about = "Swarmsync - account config sync and routing cache")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.swarmsync/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show account information
    Info,

    /// Profile management
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Contact list management
    Contact {
        #[command(subcommand)]
        action: ContactAction,
    },

    /// Config object state
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Onion request paths
    Paths {
        #[command(subcommand)]
        action: PathsAction,
    },

    /// Node pool
    Pool {
        #[command(subcommand)]
        action: PoolAction,
    },

    /// Cached swarms
    Swarm {
        #[command(subcommand)]
        action: SwarmAction,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Show the profile
    Show,
    /// Set the display name
    SetName {
        /// New display name
        name: String,
    },
}

#[derive(Subcommand)]
enum ContactAction {
    /// List contacts
    List,
    /// Add or update a contact
    Add {
        /// Session id (66 hex characters)
        session_id: String,
        /// Display name
        #[arg(short, long)]
        name: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show revision, hash and push state of every user config
    Status,
}

#[derive(Subcommand)]
enum PathsAction {
    /// Show the cached paths
    Show,
    /// Drop both paths
    Clear,
}

#[derive(Subcommand)]
enum PoolAction {
    /// Replace the pool from a file (one `address-port-ed25519-x25519` per line) and rebuild paths
    Import {
        /// Path to the node list
        file: PathBuf,
    },
    /// List the pool
    Show,
}

#[derive(Subcommand)]
enum SwarmAction {
    /// Show the cached swarm of a destination
    Show {
        /// Destination swarm key (session id hex)
        destination: String,
    },
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// Get the default data directory (~/.swarmsync/data)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".swarmsync")
        .join("data")
}

/// Parse a session id from hex
fn parse_session_id(s: &str) -> Result<SessionId> {
    s.parse::<SessionId>()
        .map_err(|e| anyhow::anyhow!("Invalid session ID '{}': {}", s, e))
}

fn format_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Load the account id and session secret, creating them on first run
fn load_or_create_account(store: &dyn KeyValueStore) -> Result<(SessionId, [u8; 32])> {
    let id = store.get(Table::Meta, ACCOUNT_ID_KEY)?;
    let secret = store.get(Table::Meta, SESSION_SECRET_KEY)?;
    match (id, secret) {
        (Some(id), Some(secret)) => {
            let id = std::str::from_utf8(&id).context("Stored account id is not UTF-8")?;
            let secret: [u8; 32] = secret
                .as_slice()
                .try_into()
                .map_err(|_| anyhow::anyhow!("Stored session secret has the wrong length"))?;
            Ok((parse_session_id(id)?, secret))
        }
        _ => {
            let id = SessionId::random_user();
            let secret = SharedSecretCrypto::generate_secret();
            store.insert_or_update(Table::Meta, SESSION_SECRET_KEY, &secret)?;
            store.insert_or_update(Table::Meta, ACCOUNT_ID_KEY, id.to_hex().as_bytes())?;
            tracing::info!(account = %id, "Created new account");
            Ok((id, secret))
        }
    }
}

struct Session {
    storage: Arc<Storage>,
    factory: ConfigFactory,
}

impl Session {
    fn open(data_dir: &Path) -> Result<Self> {
        let storage = Arc::new(
            Storage::new(data_dir.join("swarmsync.redb"))
                .with_context(|| format!("Failed to open store in {}", data_dir.display()))?,
        );
        let (user, secret) = load_or_create_account(storage.as_ref())?;
        let factory = ConfigFactory::new(
            user,
            storage.clone(),
            Arc::new(SharedSecretCrypto::new(user, secret)),
            FactoryConfig::default(),
        );
        Ok(Self { storage, factory })
    }

    fn store(&self) -> Arc<dyn KeyValueStore> {
        self.storage.clone()
    }
}

fn read_node_file(file: &Path) -> Result<Vec<Snode>> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            line.parse::<Snode>()
                .map_err(|e| anyhow::anyhow!("Invalid node '{}': {}", line, e))
        })
        .collect()
}

fn print_paths(paths: &PathCache) -> Result<()> {
    let current = paths.paths()?;
    if current.is_empty() {
        println!("No paths cached.");
        return Ok(());
    }
    println!("Paths ({}):", current.len());
    for path in current {
        println!("  Path {}:", path.index);
        for hop in &path.hops {
            println!("    {}:{}", hop.address(), hop.port());
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let session = Session::open(&data_dir)?;
    let factory = &session.factory;

    match cli.command {
        Commands::Info => {
            println!("Swarmsync v0.1.0");
            println!();
            println!("Account:");
            println!("  ID: {}", factory.user_session_id());
            println!();
            println!("Data directory: {}", data_dir.display());
        }

        Commands::Profile { action } => match action {
            ProfileAction::Show => {
                let obj = factory.get(ConfigVariant::UserProfile, ConfigScope::User)?;
                let profile = UserProfile::read(&obj.lock())?;
                println!("Profile:");
                println!("  Name: {}", profile.name.as_deref().unwrap_or("(not set)"));
                if let Some(pic) = profile.picture {
                    println!("  Picture: {}", pic.url);
                }
                println!("  Note to self priority: {}", profile.nts_priority);
            }
            ProfileAction::SetName { name } => {
                let changed = factory
                    .edit(ConfigVariant::UserProfile, ConfigScope::User, |e| e.set_name(&name))??;
                if changed {
                    println!("Name set to: {}", name);
                } else {
                    println!("Name unchanged.");
                }
            }
        },

        Commands::Contact { action } => match action {
            ContactAction::List => {
                let obj = factory.get(ConfigVariant::Contacts, ConfigScope::User)?;
                let contacts: Vec<Contact> = obj.lock().records()?;
                if contacts.is_empty() {
                    println!("No contacts.");
                } else {
                    println!("Contacts ({}):", contacts.len());
                    for contact in contacts {
                        let hidden = if contact.is_visible() { "" } else { " (hidden)" };
                        println!(
                            "  {} {}{} [added {}]",
                            contact.session_id,
                            contact.display_name().unwrap_or("(no name)"),
                            hidden,
                            format_ms(contact.created_ms)
                        );
                    }
                }
            }
            ContactAction::Add { session_id, name } => {
                let id = parse_session_id(&session_id)?;
                if id.is_group() {
                    anyhow::bail!("{} is a group id, not a contact", session_id);
                }
                factory.edit(ConfigVariant::Contacts, ConfigScope::User, |e| {
                    let mut contact = e
                        .record::<Contact>(&id.to_hex())?
                        .unwrap_or_else(|| Contact {
                            created_ms: now_ms(),
                            ..Contact::new(id)
                        });
                    if name.is_some() {
                        contact.name = name.clone();
                    }
                    contact.approved = true;
                    e.set_record(&contact)
                })??;
                println!("Added contact: {}", id);
            }
        },

        Commands::Config { action } => match action {
            ConfigAction::Status => {
                println!("User configs:");
                for obj in factory.user_configs()? {
                    let obj = obj.lock();
                    let hash = obj.hash()?;
                    println!(
                        "  {:<20} seqno {:<4} entries {:<4} hash {} {}",
                        obj.variant().as_str(),
                        obj.seqno(),
                        obj.state().live_len(),
                        &hash[..16],
                        if obj.needs_push() { "needs push" } else { "pushed" }
                    );
                }
            }
        },

        Commands::Paths { action } => {
            let paths = PathCache::new(session.store());
            match action {
                PathsAction::Show => print_paths(&paths)?,
                PathsAction::Clear => {
                    paths.clear()?;
                    println!("Paths cleared.");
                }
            }
        }

        Commands::Pool { action } => {
            let pool = NodePool::new(session.store());
            match action {
                PoolAction::Import { file } => {
                    let nodes = read_node_file(&file)?;
                    pool.set(&nodes.into_iter().collect())?;
                    let imported = pool.get()?;
                    println!("Imported {} nodes.", imported.len());

                    let paths = PathCache::new(session.store());
                    match paths.rebuild(&imported) {
                        Ok(_) => print_paths(&paths)?,
                        Err(SyncError::InsufficientNodes { needed, available }) => {
                            println!(
                                "Not enough nodes to build paths (need {}, have {}).",
                                needed, available
                            );
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                PoolAction::Show => {
                    let nodes = pool.get()?;
                    if nodes.is_empty() {
                        println!("Node pool is empty.");
                    } else {
                        println!("Node pool ({}):", nodes.len());
                        for node in nodes {
                            println!("  {}:{}", node.address(), node.port());
                        }
                    }
                }
            }
        }

        Commands::Swarm { action } => match action {
            SwarmAction::Show { destination } => {
                let swarms = SwarmCache::new(session.store());
                match swarms.get(&destination)? {
                    Some(nodes) => {
                        println!("Swarm of {} ({}):", destination, nodes.len());
                        for node in nodes {
                            println!("  {}:{}", node.address(), node.port());
                        }
                    }
                    None => println!("No swarm cached for {}.", destination),
                }
            }
        },
    }

    factory.close();
    Ok(())
}
