use crate::classify::ErrorKind;
use crate::drive::{RemoteFileHandle, RemoteFileOperations};
use crate::error::{AppError, Result};
use crate::models::Snapshot;
use crate::notify::{Notice, Notifications};
use crate::snapshot::SnapshotAggregator;
use crate::store::ChangeEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    /// A save is scheduled; further changes push the deadline back.
    PendingSave { deadline: Instant },
    Saving,
}

/// Trailing-edge debounce: every arm replaces the deadline.
#[derive(Debug)]
struct Debounce {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    fn arm(&mut self, now: Instant) -> Instant {
        let deadline = now + self.delay;
        self.deadline = Some(deadline);
        deadline
    }

    fn cancel(&mut self) {
        self.deadline = None;
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn take_due(&mut self, now: Instant) -> bool {
        if self.deadline.is_some_and(|d| d <= now) {
            self.deadline = None;
            return true;
        }
        false
    }
}

enum Command {
    Attach(Arc<dyn RemoteFileOperations>, oneshot::Sender<()>),
    Detach,
    SaveNow(oneshot::Sender<Result<RemoteFileHandle>>),
    MarkSynced(Snapshot),
    Shutdown,
}

/// Control surface of a running scheduler.
pub struct SchedulerHandle {
    commands: mpsc::UnboundedSender<Command>,
    phase: watch::Receiver<SyncPhase>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Start saving to `remote`. Resolves once the scheduler has taken it.
    pub async fn attach(&self, remote: Arc<dyn RemoteFileOperations>) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Attach(remote, ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Stop saving. A pending save is dropped.
    pub fn detach(&self) {
        let _ = self.commands.send(Command::Detach);
    }

    /// Save immediately, bypassing the debounce, and report the outcome.
    pub async fn save_now(&self) -> Result<RemoteFileHandle> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::SaveNow(reply))
            .map_err(|_| stopped())?;
        response.await.map_err(|_| stopped())?
    }

    /// Record `snapshot` as what the remote already holds.
    pub fn mark_synced(&self, snapshot: Snapshot) {
        let _ = self.commands.send(Command::MarkSynced(snapshot));
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    pub fn phases(&self) -> watch::Receiver<SyncPhase> {
        self.phase.clone()
    }

    /// Stop the scheduler, letting an in-flight save finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Sync scheduler ended abnormally");
        }
    }
}

fn stopped() -> AppError {
    AppError::Other(anyhow::anyhow!("Sync scheduler is not running"))
}

/// Debounced background saves of the whole snapshot.
///
/// Saves only while a remote is attached and every collection has
/// hydrated. The first time both hold, the current snapshot is taken as
/// already synced, so hydration and login never trigger an upload on their
/// own. A snapshot equal to the last synced one is never uploaded.
pub struct SyncScheduler {
    aggregator: SnapshotAggregator,
    notices: Notifications,
    commands: mpsc::UnboundedReceiver<Command>,
    changes: broadcast::Receiver<ChangeEvent>,
    phase: watch::Sender<SyncPhase>,
    debounce: Debounce,
    remote: Option<Arc<dyn RemoteFileOperations>>,
    baseline: Option<Snapshot>,
    ready: bool,
}

impl SyncScheduler {
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        aggregator: SnapshotAggregator,
        debounce: Duration,
        notices: Notifications,
    ) -> SchedulerHandle {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (phase, phase_rx) = watch::channel(SyncPhase::Idle);
        let changes = aggregator.stores().bus().subscribe();

        let scheduler = Self {
            aggregator,
            notices,
            commands,
            changes,
            phase,
            debounce: Debounce::new(debounce),
            remote: None,
            baseline: None,
            ready: false,
        };
        let task = tokio::spawn(scheduler.run());

        SchedulerHandle {
            commands: commands_tx,
            phase: phase_rx,
            task,
        }
    }

    async fn run(mut self) {
        let mut bus_open = true;

        loop {
            let deadline = self.debounce.deadline();
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command).await,
                },
                _ = self.aggregator.stores().ready(), if !self.ready => {
                    self.ready = true;
                    self.prime();
                }
                event = self.changes.recv(), if bus_open => match event {
                    Ok(_) | Err(RecvError::Lagged(_)) => self.on_change(),
                    Err(RecvError::Closed) => bus_open = false,
                },
                _ = sleep_until(deadline) => {
                    if self.debounce.take_due(Instant::now()) {
                        self.save_in_background().await;
                    }
                }
            }
        }

        debug!("Sync scheduler stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Attach(remote, ack) => {
                self.remote = Some(remote);
                self.prime();
                let _ = ack.send(());
            }
            Command::Detach => {
                self.remote = None;
                self.baseline = None;
                self.debounce.cancel();
                self.phase.send_replace(SyncPhase::Idle);
            }
            Command::SaveNow(reply) => {
                let result = self.save_now().await;
                let _ = reply.send(result);
            }
            Command::MarkSynced(snapshot) => self.baseline = Some(snapshot),
            Command::Shutdown => {}
        }
    }

    fn gate_open(&self) -> bool {
        self.remote.is_some() && self.ready
    }

    fn prime(&mut self) {
        if self.gate_open() && self.baseline.is_none() {
            debug!("Sync armed, taking current data as synced");
            self.baseline = Some(self.aggregator.capture());
        }
    }

    fn on_change(&mut self) {
        if !self.gate_open() {
            return;
        }
        let deadline = self.debounce.arm(Instant::now());
        self.phase.send_replace(SyncPhase::PendingSave { deadline });
    }

    #[instrument(name = "Background sync", skip_all)]
    async fn save_in_background(&mut self) {
        let Some(remote) = self.remote.clone() else {
            self.phase.send_replace(SyncPhase::Idle);
            return;
        };

        let snapshot = self.aggregator.capture();
        if self.baseline.as_ref() == Some(&snapshot) {
            debug!("Nothing changed since the last sync");
            self.phase.send_replace(SyncPhase::Idle);
            return;
        }

        self.phase.send_replace(SyncPhase::Saving);
        match remote.save(&snapshot).await {
            Ok(handle) => {
                debug!(file_id = %handle.file_id, "Background sync complete");
                self.baseline = Some(snapshot);
            }
            Err(e) => {
                warn!(error = %e, "Background sync failed");
                let error = e.to_cloud();
                if error.kind == ErrorKind::NetworkUnavailable {
                    // Circuit break until the next explicit login
                    self.remote = None;
                    self.baseline = None;
                }
                self.notices.send(Notice::BackgroundSyncFailed(error));
            }
        }
        self.phase.send_replace(SyncPhase::Idle);
    }

    #[instrument(name = "Saving to cloud", skip_all)]
    async fn save_now(&mut self) -> Result<RemoteFileHandle> {
        let remote = self.remote.clone().ok_or(AppError::NotAuthenticated)?;
        self.debounce.cancel();
        self.phase.send_replace(SyncPhase::Saving);

        let snapshot = self.aggregator.capture_ready().await;
        let result = remote.save(&snapshot).await;
        if result.is_ok() {
            info!(records = snapshot.record_count(), "Saved to cloud");
            self.baseline = Some(snapshot);
        }

        self.phase.send_replace(SyncPhase::Idle);
        result
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
