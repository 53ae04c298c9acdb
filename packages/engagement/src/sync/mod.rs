//! Reconciliation between the optimistic local store and the authority.

mod memory;
mod notify;
mod outbox;
mod reconciler;
mod remote;

pub use memory::MemoryRemote;
pub use notify::ChangeNotifier;
pub use outbox::{Outbox, QueuedWrite};
pub use reconciler::{Reconciler, ResyncReport, SyncState, spawn_resync_task};
pub use remote::{PendingWrite, RemoteStore, WriteOutcome, is_stale};
