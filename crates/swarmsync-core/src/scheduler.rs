//! Debounced push scheduler
//!
//! Runs as a single tokio task per session:
//! 1. Wait until [`ConfigFactory::schedule_update`] queues a destination.
//! 2. Sleep for the debounce window so rapid edits coalesce.
//! 3. Take every queued destination and flush them, one flush at a time.
//!
//! Requests queued while a flush runs land in the next batch. The transport
//! is blocking, so every store call goes through `spawn_blocking`.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::factory::{ConfigFactory, PendingPush};
use crate::types::Destination;

/// Blocking capability that stores a config message in a destination's swarm
pub trait ConfigTransport: Send + Sync + 'static {
    /// Store `ciphertext` under `namespace`; returns the message hash
    fn store(&self, destination: &Destination, namespace: i16, ciphertext: &[u8]) -> SyncResult<String>;
}

/// Result of one flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Pushes stored and acknowledged
    pub pushed: usize,
    /// Pushes that failed and stay dirty
    pub failed: usize,
}

/// Background task pushing dirty configs
pub struct UpdateScheduler {
    factory: ConfigFactory,
    transport: Arc<dyn ConfigTransport>,
}

impl UpdateScheduler {
    pub fn new(factory: ConfigFactory, transport: Arc<dyn ConfigTransport>) -> Self {
        Self { factory, transport }
    }

    /// Spawn the scheduler loop on the current runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until the factory's session ends
    pub async fn run(self) {
        let shutdown = self.factory.shutdown_token();
        let debounce = self.factory.config().debounce;
        info!(?debounce, "Config push scheduler started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.factory.schedule_notify().notified() => {}
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(debounce) => {}
            }

            let batch = self.factory.take_scheduled();
            if batch.is_empty() {
                continue;
            }
            let report = self.flush(batch).await;
            debug!(pushed = report.pushed, failed = report.failed, "Flush finished");
        }

        info!("Config push scheduler stopped");
    }

    /// Push everything pending for `destinations`
    ///
    /// Unpersisted objects are written first so a previous persistence
    /// failure is retried even when nothing needs pushing.
    pub async fn flush(&self, destinations: HashSet<Destination>) -> FlushReport {
        let mut report = FlushReport::default();

        if let Err(e) = self.factory.persist_dirty() {
            warn!(?e, "Persisting configs failed, will retry on next flush");
        }

        for destination in destinations {
            let pushes = match self.factory.pending_pushes(&destination) {
                Ok(p) => p,
                Err(SyncError::SessionClosed) => return report,
                Err(e) => {
                    warn!(destination = %destination.swarm_key(), ?e, "Could not build pushes");
                    continue;
                }
            };

            for push in pushes {
                match self.push_one(destination, push).await {
                    Ok(()) => report.pushed += 1,
                    Err(SyncError::SessionClosed) => return report,
                    Err(e) => {
                        warn!(destination = %destination.swarm_key(), ?e, "Config push failed");
                        report.failed += 1;
                    }
                }
            }
        }

        if report.pushed > 0 || report.failed > 0 {
            info!(pushed = report.pushed, failed = report.failed, "Flushed config pushes");
        }
        report
    }

    async fn push_one(&self, destination: Destination, push: PendingPush) -> SyncResult<()> {
        let transport = self.transport.clone();
        let namespace = push.namespace;
        let ciphertext = push.ciphertext;
        let hash = tokio::task::spawn_blocking(move || {
            transport.store(&destination, namespace, &ciphertext)
        })
        .await
        .map_err(|e| SyncError::Transport(format!("push task failed: {}", e)))??;

        // The account may have been wiped while the request was in flight
        if self.factory.is_closed() {
            return Err(SyncError::SessionClosed);
        }
        self.factory
            .confirm_pushed(push.variant, push.scope, push.seqno, &hash)?;
        debug!(variant = %push.variant, seqno = push.seqno, %hash, "Config push stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigObject, UserProfile, UserProfileEdit};
    use crate::crypto::SharedSecretCrypto;
    use crate::factory::FactoryConfig;
    use crate::storage::MemoryStore;
    use crate::types::{ConfigScope, ConfigVariant, SessionId};
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    struct RecordingTransport {
        calls: Mutex<Vec<(Destination, i16)>>,
        tx: mpsc::UnboundedSender<i16>,
        fail: bool,
    }

    impl ConfigTransport for RecordingTransport {
        fn store(&self, destination: &Destination, namespace: i16, _ciphertext: &[u8]) -> SyncResult<String> {
            self.calls.lock().push((*destination, namespace));
            let _ = self.tx.send(namespace);
            if self.fail {
                return Err(SyncError::Transport("unreachable".into()));
            }
            Ok(format!("hash-{}", namespace))
        }
    }

    fn setup(fail: bool) -> (ConfigFactory, Arc<RecordingTransport>, mpsc::UnboundedReceiver<i16>) {
        let user = SessionId::random_user();
        let factory = ConfigFactory::new(
            user,
            Arc::new(MemoryStore::new()),
            Arc::new(SharedSecretCrypto::new(user, [3u8; 32])),
            FactoryConfig::default(),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(RecordingTransport {
            calls: Mutex::new(Vec::new()),
            tx,
            fail,
        });
        (factory, transport, rx)
    }

    #[tokio::test]
    async fn test_flush_pushes_and_clears_dirty() {
        let (factory, transport, _rx) = setup(false);
        factory
            .edit(ConfigVariant::UserProfile, ConfigScope::User, |e| e.set_name("Alice"))
            .unwrap()
            .unwrap();

        let scheduler = UpdateScheduler::new(factory.clone(), transport.clone());
        let report = scheduler.flush(factory.take_scheduled()).await;
        assert_eq!(report, FlushReport { pushed: 1, failed: 0 });

        let obj = factory.get(ConfigVariant::UserProfile, ConfigScope::User).unwrap();
        assert!(!obj.lock().needs_push());
        assert_eq!(obj.lock().current_hashes(), ["hash-2".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_push_stays_dirty() {
        let (factory, transport, _rx) = setup(true);
        factory
            .edit(ConfigVariant::UserProfile, ConfigScope::User, |e| e.set_name("Alice"))
            .unwrap()
            .unwrap();

        let scheduler = UpdateScheduler::new(factory.clone(), transport);
        let report = scheduler.flush(factory.take_scheduled()).await;
        assert_eq!(report.failed, 1);

        let obj = factory.get(ConfigVariant::UserProfile, ConfigScope::User).unwrap();
        assert!(obj.lock().needs_push());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_edits_coalesce_into_one_flush() {
        let (factory, transport, mut rx) = setup(false);
        let handle = UpdateScheduler::new(factory.clone(), transport.clone()).spawn();

        for name in ["A", "B", "C"] {
            factory
                .edit(ConfigVariant::UserProfile, ConfigScope::User, |e| e.set_name(name))
                .unwrap()
                .unwrap();
        }

        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        assert!(transport.calls.lock().is_empty());

        assert_eq!(rx.recv().await, Some(2));
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        assert_eq!(transport.calls.lock().len(), 1);

        factory.close();
        handle.await.unwrap();
    }

    /// Transport that parks every store call until the test opens the gate
    struct GatedTransport {
        payloads: Mutex<Vec<Vec<u8>>>,
        started: mpsc::UnboundedSender<usize>,
        gate: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl ConfigTransport for GatedTransport {
        fn store(&self, _destination: &Destination, _namespace: i16, ciphertext: &[u8]) -> SyncResult<String> {
            let call = {
                let mut payloads = self.payloads.lock();
                payloads.push(ciphertext.to_vec());
                payloads.len()
            };
            let _ = self.started.send(call);
            self.gate
                .lock()
                .recv()
                .map_err(|_| SyncError::Transport("gate closed".into()))?;
            Ok(format!("hash-{}", call))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_during_flush_goes_to_next_batch() {
        let (factory, _transport, _rx) = setup(false);
        let (started_tx, mut started) = mpsc::unbounded_channel();
        let (gate_tx, gate_rx) = std::sync::mpsc::channel();
        let transport = Arc::new(GatedTransport {
            payloads: Mutex::new(Vec::new()),
            started: started_tx,
            gate: Mutex::new(gate_rx),
        });
        let handle = UpdateScheduler::new(factory.clone(), transport.clone()).spawn();

        factory
            .edit(ConfigVariant::UserProfile, ConfigScope::User, |e| e.set_name("A"))
            .unwrap()
            .unwrap();
        assert_eq!(started.recv().await, Some(1));

        // First push is parked in the transport
        factory
            .edit(ConfigVariant::UserProfile, ConfigScope::User, |e| e.set_name("B"))
            .unwrap()
            .unwrap();
        gate_tx.send(()).unwrap();
        gate_tx.send(()).unwrap();

        assert_eq!(started.recv().await, Some(2));
        let names: Vec<Option<String>> = transport
            .payloads
            .lock()
            .iter()
            .map(|ct| {
                let plain = factory
                    .maybe_decrypt_for_user(ct, ConfigVariant::UserProfile.as_str(), None)
                    .unwrap();
                let mut obj = ConfigObject::new(ConfigVariant::UserProfile, ConfigScope::User);
                obj.merge("pushed", &plain).unwrap();
                UserProfile::read(&obj).unwrap().name
            })
            .collect();
        assert_eq!(names, [Some("A".to_string()), Some("B".to_string())]);

        factory.close();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_scheduler_stops_on_close() {
        let (factory, transport, _rx) = setup(false);
        let handle = UpdateScheduler::new(factory.clone(), transport).spawn();
        factory.close();
        handle.await.unwrap();
    }
}
