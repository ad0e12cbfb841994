use crate::error::Result;
use crate::models::Collection;
use async_trait::async_trait;

/// Raw durable I/O for collection values.
///
/// Values are opaque UTF-8 text (a JSON array of records); parsing and
/// caching belong to [`EntityStore`](super::EntityStore).
#[async_trait]
pub trait DurableBackend: Send + Sync {
    /// Returns `Ok(None)` when nothing has been stored under `key` yet.
    async fn load(&self, key: Collection) -> Result<Option<String>>;

    /// Replace the stored value. Must be atomic: a concurrent `load` sees
    /// either the old or the new text, never a partial write.
    async fn store(&self, key: Collection, text: &str) -> Result<()>;
}
