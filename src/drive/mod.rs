mod client;

pub use client::{DriveClient, DriveConnector};

use crate::auth::AuthSession;
use crate::error::Result;
use crate::models::Snapshot;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Name of the single backup file inside the app-private folder.
pub const BACKUP_FILE_NAME: &str = "finance-tracker-backup.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileHandle {
    pub file_id: String,
    pub canonical_name: String,
}

impl RemoteFileHandle {
    pub fn new(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            canonical_name: BACKUP_FILE_NAME.to_string(),
        }
    }
}

#[async_trait]
pub trait RemoteFileOperations: Send + Sync {
    /// `Ok(None)` means no backup has ever been written for this account.
    async fn find_backup_file(&self) -> Result<Option<String>>;

    /// Returns the new file's id.
    async fn create(&self, content: String) -> Result<String>;

    async fn update(&self, file_id: &str, content: String) -> Result<()>;

    async fn get(&self, file_id: &str) -> Result<Option<String>>;

    /// Unconditional upsert of the canonical backup file. Concurrent writers
    /// race and the last one wins.
    async fn save(&self, snapshot: &Snapshot) -> Result<RemoteFileHandle> {
        let content = snapshot.to_json()?;
        let file_id = match self.find_backup_file().await? {
            Some(file_id) => {
                self.update(&file_id, content).await?;
                file_id
            }
            None => {
                debug!("No backup file yet, creating one");
                self.create(content).await?
            }
        };
        Ok(RemoteFileHandle::new(file_id))
    }

    async fn load(&self) -> Result<Option<Snapshot>> {
        let Some(file_id) = self.find_backup_file().await? else {
            return Ok(None);
        };
        match self.get(&file_id).await? {
            Some(text) => Ok(Some(Snapshot::parse(&text)?)),
            None => Ok(None),
        }
    }
}

/// Builds a remote client bound to an authenticated session.
pub trait RemoteConnector: Send + Sync {
    fn connect(&self, session: &AuthSession) -> Result<Arc<dyn RemoteFileOperations>>;
}

#[cfg(test)]
pub(crate) mod mocks {
    use super::*;
    use crate::classify::ProviderError;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::watch;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum RemoteCall {
        Find,
        Create,
        Update(String),
        Get(String),
    }

    #[derive(Default)]
    struct RemoteState {
        file: Option<(String, String)>,
        calls: Vec<RemoteCall>,
        fail_writes: Option<ProviderError>,
        next_id: usize,
    }

    /// Shared in-memory stand-in for the app-private folder.
    #[derive(Clone)]
    pub(crate) struct MockRemote {
        state: Arc<Mutex<RemoteState>>,
        saves: Arc<watch::Sender<usize>>,
    }

    impl Default for MockRemote {
        fn default() -> Self {
            Self {
                state: Arc::default(),
                saves: Arc::new(watch::channel(0).0),
            }
        }
    }

    impl MockRemote {
        pub(crate) fn with_backup(snapshot: &Snapshot) -> Self {
            let remote = Self::default();
            remote.state.lock().unwrap().file =
                Some(("existing".to_string(), snapshot.to_json().unwrap()));
            remote
        }

        pub(crate) fn calls(&self) -> Vec<RemoteCall> {
            self.state.lock().unwrap().calls.clone()
        }

        pub(crate) fn save_count(&self) -> usize {
            *self.saves.borrow()
        }

        pub(crate) fn saves(&self) -> watch::Receiver<usize> {
            self.saves.subscribe()
        }

        pub(crate) fn stored(&self) -> Option<Snapshot> {
            let state = self.state.lock().unwrap();
            state
                .file
                .as_ref()
                .map(|(_, text)| Snapshot::parse(text).unwrap())
        }

        pub(crate) fn fail_writes(&self, error: Option<ProviderError>) {
            self.state.lock().unwrap().fail_writes = error;
        }

        fn write(&self, file_id: Option<&str>, content: String) -> Result<String> {
            let mut state = self.state.lock().unwrap();
            match file_id {
                Some(id) => state.calls.push(RemoteCall::Update(id.to_string())),
                None => state.calls.push(RemoteCall::Create),
            }
            if let Some(error) = state.fail_writes.clone() {
                return Err(error.into());
            }
            let id = match file_id {
                Some(id) => id.to_string(),
                None => {
                    state.next_id += 1;
                    format!("file-{}", state.next_id)
                }
            };
            state.file = Some((id.clone(), content));
            drop(state);
            self.saves.send_modify(|n| *n += 1);
            Ok(id)
        }
    }

    #[async_trait]
    impl RemoteFileOperations for MockRemote {
        async fn find_backup_file(&self) -> Result<Option<String>> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(RemoteCall::Find);
            Ok(state.file.as_ref().map(|(id, _)| id.clone()))
        }

        async fn create(&self, content: String) -> Result<String> {
            self.write(None, content)
        }

        async fn update(&self, file_id: &str, content: String) -> Result<()> {
            self.write(Some(file_id), content).map(|_| ())
        }

        async fn get(&self, file_id: &str) -> Result<Option<String>> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(RemoteCall::Get(file_id.to_string()));
            Ok(state
                .file
                .as_ref()
                .filter(|(id, _)| id == file_id)
                .map(|(_, text)| text.clone()))
        }
    }

    impl RemoteConnector for MockRemote {
        fn connect(&self, _session: &AuthSession) -> Result<Arc<dyn RemoteFileOperations>> {
            Ok(Arc::new(self.clone()))
        }
    }

    /// Wraps a [`MockRemote`] so that every save stays in flight for
    /// `delay`.
    #[derive(Clone)]
    pub(crate) struct SlowRemote {
        inner: MockRemote,
        delay: Duration,
    }

    impl SlowRemote {
        pub(crate) fn new(inner: MockRemote, delay: Duration) -> Self {
            Self { inner, delay }
        }
    }

    #[async_trait]
    impl RemoteFileOperations for SlowRemote {
        async fn find_backup_file(&self) -> Result<Option<String>> {
            tokio::time::sleep(self.delay).await;
            self.inner.find_backup_file().await
        }

        async fn create(&self, content: String) -> Result<String> {
            self.inner.create(content).await
        }

        async fn update(&self, file_id: &str, content: String) -> Result<()> {
            self.inner.update(file_id, content).await
        }

        async fn get(&self, file_id: &str) -> Result<Option<String>> {
            self.inner.get(file_id).await
        }
    }
}
