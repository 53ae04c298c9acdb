use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::config::SyncConfig;
use common::retry::{RetryCleanupGuard, RetryDecision, RetryTracker, calculate_backoff};
use common::{ChangeEvent, ChangeKind, EngagementKey};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::notify::ChangeNotifier;
use super::outbox::{Outbox, QueuedWrite};
use super::remote::{PendingWrite, RemoteStore, WriteOutcome};
use crate::consistency::{self, AuditEntry};
use crate::error::{StoreError, ValidationError};
use crate::machine::Transition;
use crate::store::{LocalStore, UserEngagements};

/// Whether a committed mutation has reached the authority yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Synced,
    /// Saved locally. The write stays queued and is retried later.
    Pending,
    /// The authority refused the write. It is no longer queued and the key
    /// stays unsynced until a reload brings back the authority's view.
    Rejected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncReport {
    /// Keys whose queued writes all reached the authority.
    pub synced: usize,
    /// Keys still waiting on a reachable authority.
    pub pending: usize,
    /// Keys whose front write the authority refused.
    pub rejected: usize,
}

enum Flush {
    Drained,
    Blocked(StoreError),
    Rejected(StoreError),
}

/// Pushes locally committed transitions to the authority and folds its
/// answers back into the local store.
///
/// Lock order is always user entry, then outbox. The outbox lock is never
/// held across an await.
pub struct Reconciler {
    local: Arc<LocalStore>,
    remote: Arc<dyn RemoteStore>,
    outbox: Mutex<Outbox>,
    /// One delivery lock per key with a flush in progress, so writes for a
    /// key go out in order while other keys proceed in parallel.
    deliveries: DashMap<EngagementKey, Arc<AsyncMutex<()>>>,
    retries: Arc<AsyncMutex<RetryTracker>>,
    notifier: ChangeNotifier,
    audit_log: Mutex<Vec<AuditEntry>>,
    config: SyncConfig,
}

impl Reconciler {
    pub fn new(
        local: Arc<LocalStore>,
        remote: Arc<dyn RemoteStore>,
        notifier: ChangeNotifier,
        config: SyncConfig,
    ) -> Self {
        Self {
            local,
            remote,
            outbox: Mutex::new(Outbox::new()),
            deliveries: DashMap::new(),
            retries: Arc::new(AsyncMutex::new(RetryTracker::new(config.max_retries))),
            notifier,
            audit_log: Mutex::new(Vec::new()),
            config,
        }
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    pub fn retry_tracker(&self) -> Arc<AsyncMutex<RetryTracker>> {
        self.retries.clone()
    }

    pub fn pending_writes(&self) -> Vec<QueuedWrite> {
        self.outbox().writes()
    }

    pub fn pending_count(&self) -> usize {
        self.outbox().len()
    }

    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record_audit(&self, entry: AuditEntry) {
        self.audit_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Validate and apply an intent locally, then queue it for the authority.
    ///
    /// Validation, the local write and the enqueue happen under the user's
    /// entry lock, so concurrent intents for one user are serialized.
    pub fn commit(
        &self,
        username: &str,
        intent: impl FnOnce(&UserEngagements) -> Result<Transition, ValidationError>,
    ) -> Result<Transition, ValidationError> {
        let transition = self.local.with_user_mut(username, |entry| {
            let transition = intent(&entry.engagements)?;
            entry.engagements.apply(&transition.changes);
            entry.unsynced.insert(transition.key.clone());
            entry.under_review.remove(&transition.key);
            self.outbox().push(PendingWrite::from(&transition));
            Ok::<_, ValidationError>(transition)
        })?;

        self.notifier.publish(ChangeEvent::new(
            username,
            transition.key.challenge_id.clone(),
            transition.kind,
        ));
        Ok(transition)
    }

    /// Re-queue writes saved from an earlier session and replay them locally.
    pub fn restore(&self, writes: impl IntoIterator<Item = PendingWrite>) -> usize {
        let mut restored = 0;
        for write in writes {
            let username = write.key.username.clone();
            self.local.with_user_mut(&username, |entry| {
                let changes = write.changes.clone();
                let key = write.key.clone();
                if self.outbox().push(write) {
                    entry.engagements.apply(&changes);
                    entry.unsynced.insert(key);
                    restored += 1;
                }
            });
        }
        if restored > 0 {
            info!(restored, "Restored pending writes");
        }
        restored
    }

    /// Deliver every queued write for `key`.
    pub async fn push(&self, key: &EngagementKey) -> SyncState {
        match self.flush_key(key).await {
            Flush::Drained => SyncState::Synced,
            Flush::Blocked(_) => SyncState::Pending,
            Flush::Rejected(_) => SyncState::Rejected,
        }
    }

    /// Retry everything in the outbox if the authority answers a ping.
    pub async fn resync(&self) -> Result<ResyncReport, StoreError> {
        let keys = self.outbox().keys();
        if keys.is_empty() {
            return Ok(ResyncReport::default());
        }
        self.call(self.remote.ping()).await?;

        let mut report = ResyncReport::default();
        for key in keys {
            match self.flush_key(&key).await {
                Flush::Drained => report.synced += 1,
                Flush::Blocked(e) => {
                    debug!(key = %key, error = %e, "Key still pending after resync");
                    report.pending += 1;
                }
                Flush::Rejected(_) => report.rejected += 1,
            }
        }
        info!(
            synced = report.synced,
            pending = report.pending,
            rejected = report.rejected,
            "Resync finished"
        );
        Ok(report)
    }

    /// Replace the user's local records with the authority's.
    ///
    /// Queued writes are flushed first. If any of them cannot be delivered,
    /// or the fetch fails, local data is left untouched. Writes the
    /// authority refuses are dropped and their keys take the fetched view.
    /// A consistency
    /// violation in the fetched records is repaired before it lands locally.
    pub async fn reload(
        &self,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuditEntry>, StoreError> {
        let keys = self.outbox().keys_for(username);
        for key in keys {
            match self.flush_key(&key).await {
                Flush::Blocked(e) => {
                    warn!(username, key = %key, error = %e, "Reload aborted, pending writes could not be delivered");
                    return Err(e);
                }
                Flush::Rejected(_) | Flush::Drained => {}
            }
        }

        let mut fresh = self.call(self.remote.fetch_user(username)).await?;

        let repair = consistency::repair(&fresh, now);
        let mut repairs: Vec<PendingWrite> = Vec::new();
        if let Some(plan) = &repair {
            for transition in &plan.transitions {
                fresh.apply(&transition.changes);
                repairs.push(PendingWrite::from(transition));
            }
        }

        self.local.with_user_mut(username, |entry| {
            let mut outbox = self.outbox();
            // Intents committed while the fetch was in flight keep their local view.
            let mut unsynced = std::collections::BTreeSet::new();
            for key in outbox.keys_for(username) {
                fresh.replace(entry.engagements.records(&key));
                unsynced.insert(key);
            }
            for write in &repairs {
                outbox.push(write.clone());
                unsynced.insert(write.key.clone());
            }
            entry
                .under_review
                .retain(|key| fresh.submissions.contains_key(key));
            entry.unsynced = unsynced;
            entry.engagements = fresh;
        });

        info!(username, repaired = repairs.len(), "Reloaded engagements from authority");
        self.notifier
            .publish(ChangeEvent::new(username, "", ChangeKind::Reloaded));

        let audit = repair.map(|plan| plan.audit);
        if let Some(entry) = &audit {
            self.record_audit(entry.clone());
            if let Err(e) = self.call(self.remote.record_audit(entry)).await {
                warn!(audit_id = %entry.id, error = %e, "Repair audit kept locally only");
            }
            for write in &repairs {
                self.notifier.publish(ChangeEvent::new(
                    username,
                    write.key.challenge_id.clone(),
                    ChangeKind::Repaired,
                ));
                match self.flush_key(&write.key).await {
                    Flush::Blocked(e) => {
                        debug!(key = %write.key, error = %e, "Repair queued for later delivery");
                    }
                    Flush::Rejected(e) => {
                        error!(key = %write.key, error = %e, "Authority refused repair write");
                    }
                    Flush::Drained => {}
                }
            }
        }
        Ok(audit)
    }

    pub async fn fetch_audits(&self, username: &str) -> Result<Vec<AuditEntry>, StoreError> {
        self.call(self.remote.fetch_audits(username)).await
    }

    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        let limit = self.config.remote_timeout();
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(limit)),
        }
    }

    async fn flush_key(&self, key: &EngagementKey) -> Flush {
        let lock = Arc::clone(&self.deliveries.entry(key.clone()).or_default());
        let flushed = {
            let _delivery = lock.lock().await;
            self.drain_key(key).await
        };
        drop(lock);
        // Only the map holds it now; nobody else is waiting on this key.
        self.deliveries
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        flushed
    }

    async fn drain_key(&self, key: &EngagementKey) -> Flush {
        loop {
            let front = self.outbox().front_for(key);
            let Some(write) = front else {
                return Flush::Drained;
            };
            match self.deliver(&write).await {
                Ok(outcome) => self.settle(&write, outcome),
                Err(e) if e.is_transient() => return Flush::Blocked(e),
                Err(e) => {
                    self.reject(&write, &e);
                    return Flush::Rejected(e);
                }
            }
        }
    }

    /// Drop a write the authority refused, along with later writes for the
    /// same key that were built on top of it. The key stays unsynced.
    fn reject(&self, write: &PendingWrite, err: &StoreError) {
        let discarded = self.local.with_user_mut(&write.key.username, |_entry| {
            let mut outbox = self.outbox();
            outbox.remove(&write.op_id);
            outbox.discard_key(&write.key)
        });
        error!(
            op_id = %write.op_id,
            key = %write.key,
            discarded,
            error = %err,
            "Authority rejected write, dropping it"
        );
    }

    /// One delivery round: the first attempt plus up to `max_retries` retries.
    async fn deliver(&self, write: &PendingWrite) -> Result<WriteOutcome, StoreError> {
        let mut guard = RetryCleanupGuard::new(&self.retries, write.op_id.clone());
        loop {
            match self.call(self.remote.apply(write)).await {
                Ok(outcome) => {
                    self.retries.lock().await.clear(&write.op_id);
                    guard.defuse();
                    return Ok(outcome);
                }
                Err(e) if !e.is_transient() => {
                    self.retries.lock().await.clear(&write.op_id);
                    guard.defuse();
                    return Err(e);
                }
                Err(e) => {
                    let decision = self
                        .retries
                        .lock()
                        .await
                        .record_failure(&write.op_id, &e.to_string());
                    match decision {
                        RetryDecision::Retry { attempt } => {
                            let delay = calculate_backoff(
                                attempt,
                                self.config.base_delay_ms,
                                self.config.max_delay_ms,
                            );
                            warn!(
                                op_id = %write.op_id,
                                attempt,
                                max_retries = self.config.max_retries,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "Remote write failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::Exhausted { failures } => {
                            warn!(
                                op_id = %write.op_id,
                                attempts = failures.len(),
                                error = %e,
                                "Remote write still failing, keeping it queued"
                            );
                            self.outbox().record_failures(&write.op_id, failures);
                            guard.defuse();
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    /// Fold the authority's answer for one write into the local store.
    fn settle(&self, write: &PendingWrite, outcome: WriteOutcome) {
        let key = &write.key;
        let (remote_view, conflicted) = match outcome {
            WriteOutcome::Applied(records) => (records, false),
            WriteOutcome::Conflict(records) => (records, true),
        };

        let replaced = self.local.with_user_mut(&key.username, |entry| {
            let mut outbox = self.outbox();
            outbox.remove(&write.op_id);
            if conflicted {
                // Later writes for this key were validated against the rejected view.
                let discarded = outbox.discard_key(key);
                if discarded > 0 {
                    warn!(key = %key, discarded, "Discarding queued writes built on a stale view");
                }
            } else if outbox.has_pending(key) {
                return None;
            }
            drop(outbox);

            entry.unsynced.remove(key);
            if entry.engagements.records(key) == remote_view {
                return Some(false);
            }
            if remote_view.submission.is_none() {
                entry.under_review.remove(key);
            }
            entry.engagements.replace(remote_view);
            Some(true)
        });

        let Some(replaced) = replaced else {
            debug!(op_id = %write.op_id, "Write confirmed, newer local writes still queued");
            return;
        };
        let kind = if conflicted || replaced {
            ChangeKind::Reconciled
        } else {
            ChangeKind::Synced
        };
        if conflicted {
            warn!(op_id = %write.op_id, key = %key, "Authority holds a newer version, local view replaced");
        } else {
            debug!(op_id = %write.op_id, key = %key, kind = %kind, "Write confirmed by authority");
        }
        self.notifier.publish(ChangeEvent::new(
            key.username.clone(),
            key.challenge_id.clone(),
            kind,
        ));
    }
}

/// Periodically retry queued writes while the authority is reachable.
pub fn spawn_resync_task(reconciler: Arc<Reconciler>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if reconciler.pending_count() == 0 {
                continue;
            }
            if let Err(e) = reconciler.resync().await {
                debug!(error = %e, "Authority unreachable, writes stay queued");
            }
        }
    })
}
