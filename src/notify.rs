use crate::classify::CloudError;
use crate::models::Collection;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

/// Out-of-band messages for the user. Nothing here blocks the operation that
/// produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// The in-memory value changed but could not be written to disk.
    StorageWriteFailed { key: Collection, message: String },
    /// A debounced background save failed.
    BackgroundSyncFailed(CloudError),
}

#[derive(Debug, Clone)]
pub struct Notifications {
    sender: broadcast::Sender<Notice>,
}

impl Default for Notifications {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&self, notice: Notice) {
        // No subscribers just means nobody is listening yet
        let _ = self.sender.send(notice);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.sender.subscribe()
    }
}
