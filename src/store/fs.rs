use super::backend::DurableBackend;
use super::bus::ChangeBus;
use super::lock;
use crate::error::{AppError, Result};
use crate::models::Collection;
use async_trait::async_trait;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// One `<key>.json` file per collection under a data directory.
pub struct FsBackend {
    root: PathBuf,
    tmp_counter: AtomicU64,
    /// Last text this backend wrote per collection, to tell our own writes
    /// apart from other processes' when the directory is watched.
    last_written: Mutex<BTreeMap<Collection, String>>,
}

/// Live watch of a data directory. Dropping it stops the watch.
pub struct FsWatcher {
    _watcher: RecommendedWatcher,
    task: AbortHandle,
}

impl Drop for FsWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl FsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tmp_counter: AtomicU64::new(0),
            last_written: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: Collection) -> PathBuf {
        self.root.join(format!("{}.json", key.key()))
    }

    /// Announce collection files rewritten by other processes on `bus`
    /// until the returned watcher is dropped.
    pub fn watch(self: &Arc<Self>, bus: ChangeBus) -> Result<FsWatcher> {
        std::fs::create_dir_all(&self.root)?;

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                if events_tx.send(result).is_err() {
                    debug!("Data directory watch is shutting down");
                }
            },
            Config::default(),
        )?;
        watcher.watch(&self.root, RecursiveMode::NonRecursive)?;

        let backend = self.clone();
        let task = tokio::spawn(async move {
            while let Some(result) = events_rx.recv().await {
                let event = match result {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "Data directory watch error");
                        continue;
                    }
                };
                for key in changed_collections(&event) {
                    if backend.written_elsewhere(key).await {
                        debug!(%key, "Collection file changed on disk");
                        bus.deliver_external(key);
                    }
                }
            }
        });

        Ok(FsWatcher {
            _watcher: watcher,
            task: task.abort_handle(),
        })
    }

    async fn written_elsewhere(&self, key: Collection) -> bool {
        let Ok(text) = fs::read_to_string(self.path_for(key)).await else {
            return false;
        };
        lock(&self.last_written).get(&key) != Some(&text)
    }

    fn tmp_path_for(&self, key: Collection) -> PathBuf {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(format!(".{}-{}-{}.tmp", key.key(), std::process::id(), n))
    }
}

/// Collections whose files an event created, rewrote or renamed into
/// place. Temporary files never match.
fn changed_collections(event: &Event) -> Vec<Collection> {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return Vec::new();
    }
    let mut keys: Vec<Collection> = event
        .paths
        .iter()
        .filter_map(|path| {
            let key = path.file_name()?.to_str()?.strip_suffix(".json")?;
            Collection::ALL.into_iter().find(|c| c.key() == key)
        })
        .collect();
    keys.dedup();
    keys
}

#[async_trait]
impl DurableBackend for FsBackend {
    async fn load(&self, key: Collection) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn store(&self, key: Collection, text: &str) -> Result<()> {
        fs::create_dir_all(&self.root).await?;

        let tmp = self.tmp_path_for(key);
        if let Err(e) = fs::write(&tmp, text).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(AppError::Io(e));
        }
        lock(&self.last_written).insert(key, text.to_string());
        fs::rename(&tmp, self.path_for(key)).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path());

        assert_eq!(backend.load(Collection::Vehicles).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_creates_directory_and_replaces_value() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path().join("nested"));

        backend.store(Collection::Suppliers, "[1]").await.unwrap();
        backend.store(Collection::Suppliers, "[1,2]").await.unwrap();

        assert_eq!(
            backend.load(Collection::Suppliers).await.unwrap().as_deref(),
            Some("[1,2]")
        );
        assert!(backend.path_for(Collection::Suppliers).ends_with("suppliers.json"));

        let leftovers: Vec<_> = std::fs::read_dir(backend.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temporary files should be renamed away");
    }

    #[tokio::test]
    async fn test_watch_announces_files_written_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FsBackend::new(dir.path()));
        let bus = ChangeBus::default();
        let mut events = bus.subscribe();
        let _watcher = backend.watch(bus.clone()).unwrap();

        let other = FsBackend::new(dir.path());
        other.store(Collection::Vehicles, "[]").await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("change should be announced")
            .unwrap();
        assert_eq!(event.key, Collection::Vehicles);
        assert_eq!(event.source, crate::store::ChangeSource::CrossProcess);
    }

    #[tokio::test]
    async fn test_watch_skips_own_writes() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FsBackend::new(dir.path()));
        let bus = ChangeBus::default();
        let mut events = bus.subscribe();
        let _watcher = backend.watch(bus.clone()).unwrap();

        backend.store(Collection::Suppliers, r#"[{"id":"s1"}]"#).await.unwrap();
        FsBackend::new(dir.path())
            .store(Collection::Materials, "[]")
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("change should be announced")
            .unwrap();
        assert_eq!(event.key, Collection::Materials);
    }

    #[test]
    fn test_only_collection_files_count_as_changes() {
        let event = Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(PathBuf::from("/data/.vehicles-1-0.tmp"))
            .add_path(PathBuf::from("/data/vehicles.json"))
            .add_path(PathBuf::from("/data/notes.json"));
        assert_eq!(changed_collections(&event), vec![Collection::Vehicles]);

        let removed = Event::new(EventKind::Remove(notify::event::RemoveKind::File))
            .add_path(PathBuf::from("/data/vehicles.json"));
        assert!(changed_collections(&removed).is_empty());
    }
}
