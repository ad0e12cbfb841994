use super::scheduler::{SchedulerHandle, SyncPhase, SyncScheduler};
use crate::auth::{AuthState, CloudAuthClient, IdentityProvider, LoginOutcome, Profile};
use crate::classify::{CloudError, ErrorKind};
use crate::drive::{RemoteFileHandle, RemoteFileOperations};
use crate::error::{AppError, Result};
use crate::models::Snapshot;
use crate::notify::{Notice, Notifications};
use crate::snapshot::SnapshotAggregator;
use crate::store::CollectionStores;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

/// Single owner of the local stores, the sign-in state and the background
/// scheduler. Every operation that crosses between them goes through here.
pub struct SyncCoordinator<P> {
    stores: Arc<CollectionStores>,
    aggregator: SnapshotAggregator,
    auth: CloudAuthClient<P>,
    scheduler: SchedulerHandle,
    notices: Notifications,
}

impl<P: IdentityProvider> SyncCoordinator<P> {
    /// Must be called from within a Tokio runtime.
    pub fn new(
        stores: Arc<CollectionStores>,
        auth: CloudAuthClient<P>,
        debounce: Duration,
    ) -> Self {
        let aggregator = SnapshotAggregator::new(stores.clone());
        let notices = stores.notices().clone();
        let scheduler = SyncScheduler::spawn(aggregator.clone(), debounce, notices.clone());

        Self {
            stores,
            aggregator,
            auth,
            scheduler,
            notices,
        }
    }

    pub fn stores(&self) -> &CollectionStores {
        &self.stores
    }

    pub fn aggregator(&self) -> &SnapshotAggregator {
        &self.aggregator
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth.state()
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.auth.session().and_then(|s| s.profile())
    }

    pub fn phase(&self) -> SyncPhase {
        self.scheduler.phase()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub async fn initialize(&mut self) -> Result<AuthState> {
        self.auth.initialize().await
    }

    /// Sign in and bring local data in line with the cloud backup.
    ///
    /// An existing backup replaces the local collections it contains. With
    /// no backup yet, the local data is uploaded to create one.
    #[instrument(name = "Login", skip(self))]
    pub async fn login(&mut self, force_consent: bool) -> Result<Profile> {
        self.scheduler.detach();
        let outcome = self.auth.login(force_consent).await?;
        self.resume(outcome, true).await
    }

    /// Sign in and overwrite the cloud backup with local data.
    #[instrument(name = "Login and upload", skip(self))]
    pub async fn login_and_upload(&mut self, force_consent: bool) -> Result<Profile> {
        self.scheduler.detach();
        let outcome = self.auth.login(force_consent).await?;
        self.resume(outcome, false).await
    }

    /// Final save, then revoke and stop background sync.
    #[instrument(name = "Logout", skip(self))]
    pub async fn logout(&mut self) -> Result<()> {
        self.scheduler.detach();
        let last = match self.auth.state() {
            AuthState::Authenticated => Some(self.aggregator.capture_ready().await),
            _ => None,
        };
        self.auth.logout(last.as_ref()).await
    }

    /// Explicit save. Failures are returned, not just notified.
    pub async fn save_now(&mut self) -> Result<RemoteFileHandle> {
        match self.scheduler.save_now().await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                if self.auth.handle_error(&e) == ErrorKind::NetworkUnavailable {
                    self.scheduler.detach();
                }
                Err(e)
            }
        }
    }

    /// Replace local collections with the cloud backup. Returns the number
    /// of collections restored, or `None` when no backup exists.
    #[instrument(name = "Pull", skip(self))]
    pub async fn pull(&mut self) -> Result<Option<usize>> {
        let remote = self.auth.remote().ok_or(AppError::NotAuthenticated)?;
        let snapshot = match remote.load().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.auth.handle_error(&e);
                return Err(e);
            }
        };

        let restored = self.restore_synced(&snapshot).await?;
        info!(collections = restored, "Restored from cloud");
        Ok(Some(restored))
    }

    pub async fn export(&self, path: &Path) -> Result<Snapshot> {
        self.aggregator.export(path).await
    }

    /// Restore a backup file. When signed in, the change syncs like any
    /// other local edit.
    pub async fn import(&self, path: &Path) -> Result<usize> {
        self.aggregator.import(path).await
    }

    /// React to a failure reported by background sync.
    ///
    /// A rejected expired token is replaced by signing in again without
    /// forcing consent. Any other permission failure revokes the grant and
    /// signs in again with the consent screen forced. Either way local data
    /// then overwrites the cloud copy, since the failed save never reached
    /// it. A network failure leaves sync disabled until the next explicit
    /// login.
    #[instrument(name = "Handling sync failure", skip(self), fields(kind = %error.kind))]
    pub async fn handle_background_failure(&mut self, error: &CloudError) -> Result<ErrorKind> {
        let expired = self.auth.session_expired();
        let kind = self.auth.handle_error(&AppError::Cloud(error.clone()));
        match kind {
            ErrorKind::PermissionDenied if expired => {
                info!("Access token expired, signing in again");
                self.scheduler.detach();
                let outcome = self.auth.login(false).await?;
                self.resume(outcome, false).await?;
            }
            ErrorKind::PermissionDenied => {
                self.scheduler.detach();
                let outcome = self.auth.recover_permission().await?;
                self.resume(outcome, false).await?;
            }
            ErrorKind::NetworkUnavailable => self.scheduler.detach(),
            _ => warn!(remediation = %error.remediation, "Background sync failed"),
        }
        Ok(kind)
    }

    /// Stop background sync, letting an in-flight save finish.
    pub async fn shutdown(self) {
        self.scheduler.shutdown().await;
    }

    async fn resume(&mut self, outcome: LoginOutcome, restore: bool) -> Result<Profile> {
        let LoginOutcome {
            profile,
            remote,
            snapshot,
        } = outcome;

        match snapshot.filter(|_| restore) {
            Some(snapshot) => {
                self.restore_synced(&snapshot).await?;
                self.scheduler.attach(remote).await;
            }
            None => {
                self.scheduler.attach(remote).await;
                info!("Uploading local data to the cloud");
                self.save_now().await?;
            }
        }

        Ok(profile)
    }

    async fn restore_synced(&self, snapshot: &Snapshot) -> Result<usize> {
        self.stores.ready().await;
        let restored = self.aggregator.restore(snapshot).await?;
        self.scheduler.mark_synced(self.aggregator.capture());
        Ok(restored)
    }
}
