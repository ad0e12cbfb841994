use super::backend::DurableBackend;
use super::bus::{ChangeBus, ChangeSource, next_id};
use super::lock;
use crate::config::Durability;
use crate::error::{AppError, Result};
use crate::models::{Collection, Record};
use crate::notify::{Notice, Notifications};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, instrument, warn};

struct StoreState {
    value: Vec<Record>,
    ready: bool,
}

struct Shared {
    key: Collection,
    state: Mutex<StoreState>,
    ready: watch::Sender<bool>,
    revision: watch::Sender<u64>,
    /// Serializes writes and re-reads of this binding
    io: tokio::sync::Mutex<()>,
    failure_reported: AtomicBool,
}

impl Shared {
    fn replace(&self, value: Vec<Record>) {
        lock(&self.state).value = value;
        self.revision.send_modify(|r| *r += 1);
    }

    async fn wait_ready(&self) {
        let mut ready = self.ready.subscribe();
        // The sender lives as long as `self`
        let _ = ready.wait_for(|r| *r).await;
    }

    async fn hydrate(&self, backend: &dyn DurableBackend) {
        let loaded = match backend.load(self.key).await {
            Ok(text) => text.and_then(|text| parse_records(self.key, &text)),
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to load collection, using default");
                None
            }
        };

        {
            let mut state = lock(&self.state);
            if let Some(value) = loaded {
                state.value = value;
            }
            state.ready = true;
        }
        self.revision.send_modify(|r| *r += 1);
        self.ready.send_replace(true);
        debug!(key = %self.key, "Collection hydrated");
    }

    async fn reload(&self, backend: &dyn DurableBackend) {
        self.wait_ready().await;
        let _io = self.io.lock().await;
        match backend.load(self.key).await {
            Ok(Some(text)) => {
                if let Some(value) = parse_records(self.key, &text) {
                    self.replace(value);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(key = %self.key, error = %e, "Failed to re-read collection"),
        }
    }
}

fn parse_records(key: Collection, text: &str) -> Option<Vec<Record>> {
    match serde_json::from_str::<Vec<Record>>(text) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(%key, error = %e, "Stored collection is not a record array, ignoring it");
            None
        }
    }
}

/// A durable, observable binding to one collection.
///
/// Construction returns immediately with the caller's default; hydration
/// from the backend runs in the background and flips `is_ready` exactly
/// once. Several bindings may share a key: every successful write is
/// announced on the [`ChangeBus`] and the other bindings re-read from their
/// own backend.
///
/// Dropping the binding stops its background tasks.
pub struct EntityStore {
    id: u64,
    shared: Arc<Shared>,
    backend: Arc<dyn DurableBackend>,
    bus: ChangeBus,
    notices: Notifications,
    durability: Durability,
    tasks: Vec<AbortHandle>,
}

impl EntityStore {
    /// Must be called from within a Tokio runtime.
    pub fn open(
        key: Collection,
        default: Vec<Record>,
        backend: Arc<dyn DurableBackend>,
        bus: ChangeBus,
        notices: Notifications,
        durability: Durability,
    ) -> Self {
        let shared = Arc::new(Shared {
            key,
            state: Mutex::new(StoreState {
                value: default,
                ready: false,
            }),
            ready: watch::channel(false).0,
            revision: watch::channel(0).0,
            io: tokio::sync::Mutex::new(()),
            failure_reported: AtomicBool::new(false),
        });
        let id = next_id();

        // Subscribe before hydrating so no write after our load is missed
        let mut changes = bus.subscribe();
        let hydrate = {
            let shared = shared.clone();
            let backend = backend.clone();
            tokio::spawn(async move { shared.hydrate(backend.as_ref()).await })
        };
        let listen = {
            let shared = shared.clone();
            let backend = backend.clone();
            tokio::spawn(async move {
                loop {
                    match changes.recv().await {
                        Ok(event)
                            if event.key == key
                                && event.origin != id
                                && event.source != ChangeSource::Unpersisted =>
                        {
                            shared.reload(backend.as_ref()).await;
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(%key, skipped, "Change bus lagged, re-reading");
                            shared.reload(backend.as_ref()).await;
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            })
        };

        Self {
            id,
            shared,
            backend,
            bus,
            notices,
            durability,
            tasks: vec![hydrate.abort_handle(), listen.abort_handle()],
        }
    }

    pub fn key(&self) -> Collection {
        self.shared.key
    }

    /// Current value and whether it is authoritative. Never waits.
    pub fn read(&self) -> (Vec<Record>, bool) {
        let state = lock(&self.shared.state);
        (state.value.clone(), state.ready)
    }

    pub fn value(&self) -> Vec<Record> {
        self.read().0
    }

    pub fn is_ready(&self) -> bool {
        lock(&self.shared.state).ready
    }

    /// Resolves once the persisted value (if any) has been loaded.
    pub async fn ready(&self) {
        self.shared.wait_ready().await
    }

    /// Bumps whenever the in-memory value changes, whatever the cause.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    pub async fn set(&self, value: Vec<Record>) -> Result<()> {
        self.update(move |_| value).await
    }

    /// Apply `f` to the current value and persist the result.
    ///
    /// Waits for hydration first so `f` never sees the placeholder default.
    #[instrument(name = "Writing collection", skip_all, fields(key = %self.key()))]
    pub async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&[Record]) -> Vec<Record>,
    {
        self.ready().await;
        let _io = self.shared.io.lock().await;

        // Cloned so `f` may read this binding without deadlocking
        let current = lock(&self.shared.state).value.clone();
        let next = f(&current);
        let text = serde_json::to_string(&next)?;

        match self.durability {
            Durability::Optimistic => {
                self.shared.replace(next);
                if let Err(e) = self.backend.store(self.key(), &text).await {
                    warn!(error = %e, "Durable write failed, keeping in-memory value");
                    if !self.shared.failure_reported.swap(true, Ordering::SeqCst) {
                        self.notices.send(Notice::StorageWriteFailed {
                            key: self.key(),
                            message: e.to_string(),
                        });
                    }
                    self.bus.publish_unpersisted(self.key(), self.id);
                    return Ok(());
                }
            }
            Durability::Transactional => {
                if let Err(e) = self.backend.store(self.key(), &text).await {
                    return Err(AppError::StorageWrite {
                        key: self.key(),
                        message: e.to_string(),
                    });
                }
                self.shared.replace(next);
            }
        }

        self.shared.failure_reported.store(false, Ordering::SeqCst);
        self.bus.publish(self.key(), self.id);
        Ok(())
    }
}

impl Drop for EntityStore {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
