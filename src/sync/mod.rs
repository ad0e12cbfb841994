mod coordinator;
mod scheduler;

pub use coordinator::SyncCoordinator;
pub use scheduler::{SchedulerHandle, SyncPhase, SyncScheduler};
