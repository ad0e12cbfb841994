use super::lock;
use crate::models::Collection;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::trace;

const CHANNEL_CAPACITY: usize = 256;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// Written by a binding in this process.
    Local,
    /// Announced by another process sharing the same durable storage.
    CrossProcess,
    /// Changed in memory only; the durable write failed.
    Unpersisted,
}

/// "This key changed": receivers re-read their own durable binding, so the
/// value itself is never carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub key: Collection,
    /// Binding that wrote the value; `0` when it came from another process.
    pub origin: u64,
    pub source: ChangeSource,
}

impl ChangeEvent {
    fn external(key: Collection) -> Self {
        Self {
            key,
            origin: 0,
            source: ChangeSource::CrossProcess,
        }
    }
}

/// Transport that carries change announcements to other processes.
pub trait CrossProcessNotifier: Send + Sync {
    fn notify(&self, bus_id: u64, key: Collection);
}

/// Notifier for a process that shares its storage with nobody.
pub struct NoopNotifier;

impl CrossProcessNotifier for NoopNotifier {
    fn notify(&self, _bus_id: u64, _key: Collection) {}
}

/// Pub/sub of change events keyed by collection. Cloning yields another
/// handle to the same bus.
#[derive(Clone)]
pub struct ChangeBus {
    id: u64,
    local: broadcast::Sender<ChangeEvent>,
    notifier: Arc<dyn CrossProcessNotifier>,
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new(Arc::new(NoopNotifier))
    }
}

impl ChangeBus {
    pub fn new(notifier: Arc<dyn CrossProcessNotifier>) -> Self {
        let (local, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            id: next_id(),
            local,
            notifier,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Announce a write. In-process subscribers see it immediately; other
    /// processes eventually, through the notifier.
    pub fn publish(&self, key: Collection, origin: u64) {
        trace!(%key, origin, "Publishing change");
        let _ = self.local.send(ChangeEvent {
            key,
            origin,
            source: ChangeSource::Local,
        });
        self.notifier.notify(self.id, key);
    }

    /// Announce a value that only lives in memory. Other processes cannot
    /// read it, so the notifier is skipped.
    pub fn publish_unpersisted(&self, key: Collection, origin: u64) {
        trace!(%key, origin, "Publishing unpersisted change");
        let _ = self.local.send(ChangeEvent {
            key,
            origin,
            source: ChangeSource::Unpersisted,
        });
    }

    /// Entry point for the cross-process transport.
    pub fn deliver_external(&self, key: Collection) {
        let _ = self.local.send(ChangeEvent::external(key));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.local.subscribe()
    }
}

/// Connects several buses as though each lived in its own process. A
/// publish on one bus is re-delivered to every other connected bus as a
/// cross-process event.
#[derive(Default)]
pub struct InMemoryHub {
    peers: Mutex<Vec<(u64, broadcast::WeakSender<ChangeEvent>)>>,
}

impl InMemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connect(self: &Arc<Self>) -> ChangeBus {
        let bus = ChangeBus::new(self.clone());
        lock(&self.peers).push((bus.id, bus.local.downgrade()));
        bus
    }
}

impl CrossProcessNotifier for InMemoryHub {
    fn notify(&self, bus_id: u64, key: Collection) {
        let mut peers = lock(&self.peers);
        // Buses whose handles are all gone drop out of the hub
        peers.retain(|(_, peer)| peer.strong_count() > 0);
        for (_, peer) in peers.iter().filter(|(id, _)| *id != bus_id) {
            if let Some(sender) = peer.upgrade() {
                let _ = sender.send(ChangeEvent::external(key));
            }
        }
    }
}
