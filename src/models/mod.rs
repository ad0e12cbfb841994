pub mod collection;
pub mod snapshot;

pub use collection::{Collection, Record};
pub use snapshot::Snapshot;
