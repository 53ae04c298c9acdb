use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Acceptance, ChangeKind, EngagementKey};
use serde::{Deserialize, Serialize};

use crate::consistency::AuditEntry;
use crate::error::StoreError;
use crate::machine::Transition;
use crate::store::{EngagementRecords, RecordChange, UserEngagements};

/// A locally committed transition waiting to reach the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWrite {
    /// Stable across retries so the authority can drop duplicates.
    pub op_id: String,
    pub key: EngagementKey,
    pub kind: ChangeKind,
    /// The key's `updated_at` this write was validated against.
    pub base_updated_at: Option<DateTime<Utc>>,
    pub changes: Vec<RecordChange>,
}

impl PendingWrite {
    pub fn operation_id(key: &EngagementKey, kind: ChangeKind) -> String {
        format!("{key}:{kind}")
    }
}

impl From<&Transition> for PendingWrite {
    fn from(transition: &Transition) -> Self {
        Self {
            op_id: Self::operation_id(&transition.key, transition.kind),
            key: transition.key.clone(),
            kind: transition.kind,
            base_updated_at: transition.base_updated_at,
            changes: transition.changes.clone(),
        }
    }
}

/// What the authority did with a write. Both carry its view of the key afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied(EngagementRecords),
    /// The key changed remotely since `base_updated_at`; nothing was written.
    Conflict(EngagementRecords),
}

/// A write is stale when the authority holds a newer version than its base.
pub fn is_stale(remote: Option<DateTime<Utc>>, base: Option<DateTime<Utc>>) -> bool {
    match (remote, base) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(remote), Some(base)) => remote > base,
    }
}

/// The authoritative store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    /// Apply `write` atomically. Replaying an already applied `op_id` is a no-op.
    async fn apply(&self, write: &PendingWrite) -> Result<WriteOutcome, StoreError>;

    async fn fetch_user(&self, username: &str) -> Result<UserEngagements, StoreError>;

    /// Every acceptance in an active status, across all users.
    async fn fetch_active(&self) -> Result<Vec<Acceptance>, StoreError>;

    /// Persist a repair decision. Recording the same id twice is a no-op.
    async fn record_audit(&self, entry: &AuditEntry) -> Result<(), StoreError>;

    /// Repair decisions recorded for `username`, oldest first.
    async fn fetch_audits(&self, username: &str) -> Result<Vec<AuditEntry>, StoreError>;
}
