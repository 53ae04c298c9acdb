pub mod authority;
pub mod catalog;
pub mod clock;
pub mod consistency;
pub mod database;
pub mod entity;
pub mod error;
pub mod leaderboard;
pub mod machine;
pub mod scoring;
pub mod service;
pub mod store;
pub mod sync;

pub use authority::SeaOrmRemote;
pub use catalog::{ChallengeCatalog, MemoryCatalog};
pub use clock::{Clock, ManualClock, SystemClock};
pub use consistency::AuditEntry;
pub use error::{EngagementError, Result, StoreError, ValidationError};
pub use machine::ReviewRequest;
pub use service::{EngagementService, Receipt};
pub use sync::{MemoryRemote, PendingWrite, RemoteStore, SyncState};
