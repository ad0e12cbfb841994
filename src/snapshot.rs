use crate::error::{AppError, Result};
use crate::models::Snapshot;
use crate::store::CollectionStores;
use indicatif::ProgressStyle;
use std::path::Path;
use std::sync::Arc;
use tracing::{Span, debug, info, instrument};
use tracing_indicatif::span_ext::IndicatifSpanExt;

/// Composes every collection into one [`Snapshot`] and writes a snapshot
/// back into the collections.
#[derive(Clone)]
pub struct SnapshotAggregator {
    stores: Arc<CollectionStores>,
}

impl SnapshotAggregator {
    pub fn new(stores: Arc<CollectionStores>) -> Self {
        Self { stores }
    }

    pub fn stores(&self) -> &CollectionStores {
        &self.stores
    }

    /// Capture the in-memory value of every collection.
    ///
    /// Does not wait for hydration: a collection that is not ready yet
    /// contributes its placeholder default. Use [`capture_ready`] for
    /// anything that leaves the process.
    ///
    /// [`capture_ready`]: SnapshotAggregator::capture_ready
    pub fn capture(&self) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for store in self.stores.iter() {
            snapshot.insert(store.key(), store.value());
        }
        snapshot
    }

    pub async fn capture_ready(&self) -> Snapshot {
        self.stores.ready().await;
        self.capture()
    }

    /// Replace each collection present in `snapshot`; the others are left
    /// as they are. Collections are written one at a time, so a failure
    /// part-way leaves the earlier ones replaced.
    #[instrument(name = "Restoring snapshot", skip_all)]
    pub async fn restore(&self, snapshot: &Snapshot) -> Result<usize> {
        let span = Span::current();
        let style = ProgressStyle::with_template(
            "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>3}/{len:3} {msg}",
        )
        .map_err(|e| AppError::Other(e.into()))?;
        span.pb_set_style(&style);
        span.pb_set_length(snapshot.len() as u64);

        for (collection, records) in snapshot.iter() {
            span.pb_set_message(collection.key());
            self.stores.get(collection).set(records.to_vec()).await?;
            debug!(%collection, records = records.len(), "Collection restored");
            span.pb_inc(1);
        }

        Ok(snapshot.len())
    }

    /// Validate an external document and restore it. Nothing is written
    /// unless the whole document passes validation.
    pub async fn restore_json(&self, text: &str) -> Result<usize> {
        let snapshot = Snapshot::parse(text)?;
        self.restore(&snapshot).await
    }

    #[instrument(name = "Exporting backup", skip(self))]
    pub async fn export(&self, path: &Path) -> Result<Snapshot> {
        let snapshot = self.capture_ready().await;
        tokio::fs::write(path, snapshot.to_json()?).await?;
        info!(records = snapshot.record_count(), "Backup exported");
        Ok(snapshot)
    }

    #[instrument(name = "Importing backup", skip(self))]
    pub async fn import(&self, path: &Path) -> Result<usize> {
        let text = tokio::fs::read_to_string(path).await?;
        self.stores.ready().await;
        let restored = self.restore_json(&text).await?;
        info!(collections = restored, "Backup imported");
        Ok(restored)
    }
}
