pub mod backend;
pub mod bus;
pub mod entity;
pub mod fs;
pub mod memory;

pub use backend::DurableBackend;
pub use bus::{ChangeBus, ChangeEvent, ChangeSource, CrossProcessNotifier, InMemoryHub};
pub use entity::EntityStore;
pub use fs::FsBackend;
pub use memory::MemBackend;

use crate::config::Durability;
use crate::models::Collection;
use crate::notify::Notifications;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One binding per collection, all sharing a backend and a bus.
pub struct CollectionStores {
    stores: BTreeMap<Collection, EntityStore>,
    bus: ChangeBus,
    notices: Notifications,
}

impl CollectionStores {
    /// Open every collection with an empty default. Must be called from
    /// within a Tokio runtime.
    pub fn open(
        backend: Arc<dyn DurableBackend>,
        bus: ChangeBus,
        notices: Notifications,
        durability: Durability,
    ) -> Self {
        let stores = Collection::ALL
            .into_iter()
            .map(|key| {
                let store = EntityStore::open(
                    key,
                    Vec::new(),
                    backend.clone(),
                    bus.clone(),
                    notices.clone(),
                    durability,
                );
                (key, store)
            })
            .collect();

        Self {
            stores,
            bus,
            notices,
        }
    }

    pub fn get(&self, key: Collection) -> &EntityStore {
        // Every collection is opened in `open`
        &self.stores[&key]
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityStore> {
        self.stores.values()
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    pub fn notices(&self) -> &Notifications {
        &self.notices
    }

    pub fn all_ready(&self) -> bool {
        self.stores.values().all(EntityStore::is_ready)
    }

    pub fn pending(&self) -> Vec<Collection> {
        self.stores
            .values()
            .filter(|s| !s.is_ready())
            .map(EntityStore::key)
            .collect()
    }

    /// Resolves once every collection has hydrated.
    pub async fn ready(&self) {
        for store in self.stores.values() {
            store.ready().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_all_ready_waits_for_slowest_collection() {
        let backend = Arc::new(MemBackend::new());
        let gate = backend.delay_load(Collection::TravelEvents);
        let stores = CollectionStores::open(
            backend,
            ChangeBus::default(),
            Notifications::new(),
            Durability::Optimistic,
        );

        for store in stores.iter().filter(|s| s.key() != Collection::TravelEvents) {
            store.ready().await;
        }
        assert!(!stores.all_ready());
        assert_eq!(stores.pending(), vec![Collection::TravelEvents]);

        gate.release();
        stores.ready().await;
        assert!(stores.all_ready());
        assert_eq!(stores.iter().count(), 17);
    }
}
