use super::backend::DurableBackend;
use super::lock;
use crate::error::{AppError, Result};
use crate::models::Collection;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// In-memory backend. Share one instance (behind an `Arc`) between several
/// buses to model processes that see the same data directory.
#[derive(Default)]
pub struct MemBackend {
    values: Mutex<HashMap<Collection, String>>,
    gates: Mutex<HashMap<Collection, watch::Receiver<bool>>>,
    simulate_write_error: AtomicBool,
}

/// Holds back every `load` of one key until released (or dropped).
pub struct LoadGate {
    open: watch::Sender<bool>,
}

impl LoadGate {
    pub fn release(self) {
        self.open.send_replace(true);
    }
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value without going through a store.
    pub fn with_value(self, key: Collection, text: &str) -> Self {
        lock(&self.values).insert(key, text.to_string());
        self
    }

    /// Enable write error simulation for testing error handling.
    pub fn set_simulate_write_error(&self, simulate: bool) {
        self.simulate_write_error.store(simulate, Ordering::SeqCst);
    }

    pub fn delay_load(&self, key: Collection) -> LoadGate {
        let (open, rx) = watch::channel(false);
        lock(&self.gates).insert(key, rx);
        LoadGate { open }
    }

    pub fn raw(&self, key: Collection) -> Option<String> {
        lock(&self.values).get(&key).cloned()
    }
}

#[async_trait]
impl DurableBackend for MemBackend {
    async fn load(&self, key: Collection) -> Result<Option<String>> {
        let gate = lock(&self.gates).get(&key).cloned();
        if let Some(mut gate) = gate {
            // A dropped gate counts as released
            let _ = gate.wait_for(|open| *open).await;
        }
        Ok(self.raw(key))
    }

    async fn store(&self, key: Collection, text: &str) -> Result<()> {
        if self.simulate_write_error.load(Ordering::SeqCst) {
            return Err(AppError::Io(std::io::Error::other(
                "Simulated write error",
            )));
        }
        lock(&self.values).insert(key, text.to_string());
        Ok(())
    }
}
