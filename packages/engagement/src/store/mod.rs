mod local;
mod snapshot;

pub use local::{LocalStore, UserEntry};
pub use snapshot::{EngagementRecords, RecordChange, UserEngagements};
