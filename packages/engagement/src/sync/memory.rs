use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use common::Acceptance;
use uuid::Uuid;

use super::remote::{PendingWrite, RemoteStore, WriteOutcome, is_stale};
use crate::consistency::AuditEntry;
use crate::error::StoreError;
use crate::store::UserEngagements;

#[derive(Debug, Default)]
struct RemoteState {
    users: HashMap<String, UserEngagements>,
    applied: HashSet<String>,
    audits: Vec<AuditEntry>,
    audit_ids: HashSet<Uuid>,
    /// Extra delay applied only to writes for these users.
    user_latency_ms: HashMap<String, u64>,
}

/// In-process authority for tests and local development.
///
/// Applies the same idempotency and conflict rules as the database-backed
/// store, and can be told to fail calls on demand:
/// - `set_offline`: every call fails until switched back
/// - `fail_next`: the next `n` calls fail
/// - `lose_next_acks`: the next `n` writes are applied but report a failure
/// - `reject_next`: the next `n` writes are refused as a backend error
/// - `set_latency`: every call sleeps first
/// - `set_user_latency`: writes for one user sleep first
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
    offline: AtomicBool,
    fail_next: AtomicU32,
    lost_acks: AtomicU32,
    rejections: AtomicU32,
    latency_ms: AtomicU64,
    apply_calls: AtomicU32,
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fail_next(&self, calls: u32) {
        self.fail_next.store(calls, Ordering::SeqCst);
    }

    pub fn lose_next_acks(&self, writes: u32) {
        self.lost_acks.store(writes, Ordering::SeqCst);
    }

    pub fn reject_next(&self, writes: u32) {
        self.rejections.store(writes, Ordering::SeqCst);
    }

    pub fn set_user_latency(&self, username: &str, latency: Duration) {
        self.lock()
            .user_latency_ms
            .insert(username.to_string(), latency.as_millis() as u64);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of `apply` calls received, including failed ones.
    pub fn apply_calls(&self) -> u32 {
        self.apply_calls.load(Ordering::SeqCst)
    }

    /// Mutate a user's records directly, as another client would.
    pub fn seed(&self, username: &str, f: impl FnOnce(&mut UserEngagements)) {
        let mut state = self.lock();
        let snapshot = state
            .users
            .entry(username.to_string())
            .or_insert_with(|| UserEngagements::new(username));
        f(snapshot);
    }

    pub fn user(&self, username: &str) -> UserEngagements {
        self.lock()
            .users
            .get(username)
            .cloned()
            .unwrap_or_else(|| UserEngagements::new(username))
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self) -> Result<(), StoreError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("remote is offline".into()));
        }
        if take_one(&self.fail_next) {
            return Err(StoreError::Unavailable("simulated failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn ping(&self) -> Result<(), StoreError> {
        self.enter().await
    }

    async fn apply(&self, write: &PendingWrite) -> Result<WriteOutcome, StoreError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        let user_latency = self
            .lock()
            .user_latency_ms
            .get(&write.key.username)
            .copied()
            .unwrap_or(0);
        if user_latency > 0 {
            tokio::time::sleep(Duration::from_millis(user_latency)).await;
        }
        self.enter().await?;
        if take_one(&self.rejections) {
            return Err(StoreError::Backend("simulated constraint violation".into()));
        }

        let outcome = {
            let mut state = self.lock();
            let already_applied = state.applied.contains(&write.op_id);
            let snapshot = state
                .users
                .entry(write.key.username.clone())
                .or_insert_with(|| UserEngagements::new(write.key.username.clone()));
            let current = snapshot.records(&write.key);

            if already_applied {
                WriteOutcome::Applied(current)
            } else if is_stale(current.updated_at(), write.base_updated_at) {
                WriteOutcome::Conflict(current)
            } else {
                snapshot.apply(&write.changes);
                let after = snapshot.records(&write.key);
                state.applied.insert(write.op_id.clone());
                WriteOutcome::Applied(after)
            }
        };

        if take_one(&self.lost_acks) {
            return Err(StoreError::Unavailable(
                "connection closed before response".into(),
            ));
        }
        Ok(outcome)
    }

    async fn fetch_user(&self, username: &str) -> Result<UserEngagements, StoreError> {
        self.enter().await?;
        Ok(self.user(username))
    }

    async fn fetch_active(&self) -> Result<Vec<Acceptance>, StoreError> {
        self.enter().await?;
        let state = self.lock();
        let mut active: Vec<Acceptance> = state
            .users
            .values()
            .flat_map(|u| u.active().cloned().collect::<Vec<_>>())
            .collect();
        active.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(active)
    }

    async fn record_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.enter().await?;
        let mut state = self.lock();
        if state.audit_ids.insert(entry.id) {
            state.audits.push(entry.clone());
        }
        Ok(())
    }

    async fn fetch_audits(&self, username: &str) -> Result<Vec<AuditEntry>, StoreError> {
        self.enter().await?;
        Ok(self
            .lock()
            .audits
            .iter()
            .filter(|a| a.username == username)
            .cloned()
            .collect())
    }
}
