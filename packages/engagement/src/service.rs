//! Facade tying the local store, the state machine and the reconciler together.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use common::config::SyncConfig;
use common::retry::spawn_cleanup_task;
use common::{
    Acceptance, Actor, ChangeEvent, ChangeKind, Challenge, EffectiveStatus, EngagementKey, Review,
    ReviewStatus, Submission, SubmissionPayload,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::catalog::ChallengeCatalog;
use crate::clock::{Clock, SystemClock};
use crate::consistency::AuditEntry;
use crate::error::{Result, ValidationError};
use crate::leaderboard::{self, Standing};
use crate::machine::{self, ReviewRequest, Transition};
use crate::scoring::{self, PointsMismatch};
use crate::store::{LocalStore, UserEngagements};
use crate::sync::{
    ChangeNotifier, PendingWrite, Reconciler, RemoteStore, ResyncReport, SyncState,
    spawn_resync_task,
};

/// Retry state untouched for this long belongs to an abandoned delivery.
const RETRY_STATE_MAX_AGE: Duration = Duration::from_secs(3600);

/// Result of a committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub key: EngagementKey,
    pub kind: ChangeKind,
    pub sync: SyncState,
}

#[derive(Clone)]
pub struct EngagementService {
    local: Arc<LocalStore>,
    catalog: Arc<dyn ChallengeCatalog>,
    reconciler: Arc<Reconciler>,
    clock: Arc<dyn Clock>,
    resync_interval: Duration,
}

impl EngagementService {
    pub fn new(
        catalog: Arc<dyn ChallengeCatalog>,
        remote: Arc<dyn RemoteStore>,
        config: SyncConfig,
    ) -> Self {
        Self::with_clock(catalog, remote, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        catalog: Arc<dyn ChallengeCatalog>,
        remote: Arc<dyn RemoteStore>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let local = Arc::new(LocalStore::new());
        let notifier = ChangeNotifier::new(config.notify_capacity);
        let resync_interval = config.resync_interval();
        let reconciler = Arc::new(Reconciler::new(local.clone(), remote, notifier, config));
        Self {
            local,
            catalog,
            reconciler,
            clock,
            resync_interval,
        }
    }

    /// Flush writes restored from a previous session, then start the
    /// background resync and retry cleanup tasks.
    pub async fn start(&self) -> Vec<JoinHandle<()>> {
        match self.reconciler.resync().await {
            Ok(report) if report.pending > 0 || report.rejected > 0 => {
                warn!(
                    pending = report.pending,
                    rejected = report.rejected,
                    "Some writes did not reach the authority at startup"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Authority unreachable at startup, writes stay queued"),
        }

        vec![
            spawn_resync_task(self.reconciler.clone(), self.resync_interval),
            spawn_cleanup_task(
                self.reconciler.retry_tracker(),
                self.resync_interval,
                RETRY_STATE_MAX_AGE,
            ),
        ]
    }

    fn authorize(actor: &Actor, username: &str) -> std::result::Result<(), ValidationError> {
        if actor.may_act_for(username) {
            Ok(())
        } else {
            Err(ValidationError::Unauthorized(format!(
                "{} may not act on engagements of {username}",
                actor.username
            )))
        }
    }

    fn require_management(actor: &Actor) -> std::result::Result<(), ValidationError> {
        if actor.is_management() {
            Ok(())
        } else {
            Err(ValidationError::Unauthorized(format!(
                "{} is not a reviewer",
                actor.username
            )))
        }
    }

    async fn challenge(&self, challenge_id: &str) -> std::result::Result<Challenge, ValidationError> {
        self.catalog
            .get_challenge(challenge_id)
            .await
            .ok_or_else(|| ValidationError::UnknownChallenge(challenge_id.to_string()))
    }

    /// Commit an intent locally and try to push it right away.
    async fn run(
        &self,
        username: &str,
        intent: impl FnOnce(
            &UserEngagements,
            DateTime<Utc>,
        ) -> std::result::Result<Transition, ValidationError>,
    ) -> Result<Receipt> {
        let now = self.clock.now();
        let transition = self.reconciler.commit(username, |snapshot| intent(snapshot, now))?;
        info!(
            username,
            challenge_id = %transition.key.challenge_id,
            attempt = transition.key.attempt,
            kind = %transition.kind,
            "Committed engagement change"
        );

        let sync = self.reconciler.push(&transition.key).await;
        match sync {
            SyncState::Synced => {}
            SyncState::Pending => warn!(
                username,
                challenge_id = %transition.key.challenge_id,
                "Saved locally, sync pending"
            ),
            SyncState::Rejected => error!(
                username,
                challenge_id = %transition.key.challenge_id,
                "Saved locally, refused by authority"
            ),
        }
        Ok(Receipt {
            key: transition.key,
            kind: transition.kind,
            sync,
        })
    }

    pub async fn accept(
        &self,
        actor: &Actor,
        username: &str,
        challenge_id: &str,
        committed_date: NaiveDate,
    ) -> Result<Receipt> {
        Self::authorize(actor, username)?;
        self.challenge(challenge_id).await?;
        self.run(username, |snapshot, now| {
            machine::accept(snapshot, challenge_id, committed_date, now)
        })
        .await
    }

    pub async fn submit(
        &self,
        actor: &Actor,
        username: &str,
        challenge_id: &str,
        payload: SubmissionPayload,
    ) -> Result<Receipt> {
        Self::authorize(actor, username)?;
        self.run(username, |snapshot, now| {
            machine::submit(snapshot, challenge_id, payload, now)
        })
        .await
    }

    pub async fn withdraw(
        &self,
        actor: &Actor,
        username: &str,
        challenge_id: &str,
    ) -> Result<Receipt> {
        Self::authorize(actor, username)?;
        self.run(username, |snapshot, now| {
            machine::withdraw(snapshot, challenge_id, now)
        })
        .await
    }

    pub async fn review(
        &self,
        actor: &Actor,
        username: &str,
        challenge_id: &str,
        request: ReviewRequest,
    ) -> Result<Receipt> {
        Self::require_management(actor)?;
        let challenge = self.challenge(challenge_id).await?;
        self.run(username, |snapshot, now| {
            machine::review(snapshot, &challenge, &request, &actor.username, now)
        })
        .await
    }

    /// Mark a pending submission as opened by a reviewer.
    ///
    /// The mark lives only in this process and is cleared by the review.
    pub async fn begin_review(&self, actor: &Actor, username: &str, challenge_id: &str) -> Result<()> {
        Self::require_management(actor)?;
        let no_pending = || ValidationError::NoPendingReview(challenge_id.to_string());

        self.local.with_user_mut(username, |entry| {
            let key = entry
                .engagements
                .current(challenge_id)
                .filter(|a| a.status.is_submitted())
                .map(|a| a.key.clone())
                .ok_or_else(no_pending)?;
            let awaiting = entry.engagements.submissions.contains_key(&key)
                && entry
                    .engagements
                    .reviews
                    .get(&key)
                    .is_none_or(|r| r.status == ReviewStatus::PendingReview);
            if !awaiting {
                return Err(no_pending());
            }
            entry.under_review.insert(key);
            Ok(())
        })?;

        info!(username, challenge_id, reviewer = %actor.username, "Review started");
        Ok(())
    }

    pub fn list_acceptances(&self, username: Option<&str>) -> Vec<Acceptance> {
        self.local.list_acceptances(username)
    }

    pub fn list_by_challenge(&self, challenge_id: &str) -> Vec<Acceptance> {
        self.local.list_by_challenge(challenge_id)
    }

    /// The latest attempt's acceptance of `challenge_id`.
    pub fn acceptance(&self, username: &str, challenge_id: &str) -> Option<Acceptance> {
        self.local
            .read_user(username, |entry| {
                entry.engagements.current(challenge_id).cloned()
            })
            .flatten()
    }

    pub fn submission(&self, username: &str, challenge_id: &str) -> Option<Submission> {
        let key = self.acceptance(username, challenge_id)?.key;
        self.local.get_submission(&key)
    }

    pub fn review_of(&self, username: &str, challenge_id: &str) -> Option<Review> {
        let key = self.acceptance(username, challenge_id)?.key;
        self.local.get_review(&key)
    }

    pub fn effective_status(&self, username: &str, challenge_id: &str) -> EffectiveStatus {
        self.local
            .read_user(username, |entry| {
                let under_review = entry
                    .engagements
                    .current(challenge_id)
                    .is_some_and(|a| entry.under_review.contains(&a.key));
                machine::effective_status(&entry.engagements, challenge_id, under_review)
            })
            .unwrap_or(EffectiveStatus::NotAccepted)
    }

    pub fn can_accept_new(&self, username: &str) -> bool {
        self.local
            .read_user(username, |entry| machine::can_accept_new(&entry.engagements))
            .unwrap_or(true)
    }

    /// Points of the most recent finalized review of `challenge_id`, or 0 if
    /// none was ever finalized.
    ///
    /// A re-accepted challenge keeps reporting the previous attempt's points
    /// until the new attempt is reviewed.
    pub fn points_earned(&self, username: &str, challenge_id: &str) -> i32 {
        self.local
            .read_user(username, |entry| {
                machine::points_earned(&entry.engagements, challenge_id)
            })
            .unwrap_or(0)
    }

    /// False while the latest attempt has writes the authority has not confirmed.
    pub fn is_synced(&self, username: &str, challenge_id: &str) -> bool {
        self.acceptance(username, challenge_id)
            .is_none_or(|a| !self.local.is_unsynced(&a.key))
    }

    pub fn standings(&self) -> Vec<Standing> {
        leaderboard::standings(&self.local.all_reviews())
    }

    /// Recompute every finalized review and report stored points that drifted.
    pub async fn audit_scores(&self) -> Vec<PointsMismatch> {
        let mut mismatches = Vec::new();
        for review in self.local.all_reviews() {
            if !review.status.is_final() {
                continue;
            }
            let (Some(acceptance), Some(submission)) = (
                self.local.get_acceptance(&review.key),
                self.local.get_submission(&review.key),
            ) else {
                continue;
            };
            let Some(challenge) = self.catalog.get_challenge(&review.key.challenge_id).await
            else {
                warn!(challenge_id = %review.key.challenge_id, "Challenge missing during score audit");
                continue;
            };
            if let Some(mismatch) =
                scoring::audit_points(&challenge, &acceptance, &submission, &review)
            {
                warn!(
                    submission_id = %mismatch.submission_id,
                    stored = ?mismatch.stored,
                    expected = mismatch.expected,
                    "Stored points differ from recomputed score"
                );
                mismatches.push(mismatch);
            }
        }
        mismatches
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.reconciler.notifier().subscribe()
    }

    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.reconciler.audit_log()
    }

    /// Repair decisions the authority holds for `username`, from any client
    /// or the auditor.
    pub async fn audit_history(&self, username: &str) -> Result<Vec<AuditEntry>> {
        Ok(self.reconciler.fetch_audits(username).await?)
    }

    /// Writes not yet confirmed, in delivery order. Persist these to survive a restart.
    pub fn pending_writes(&self) -> Vec<PendingWrite> {
        self.reconciler
            .pending_writes()
            .into_iter()
            .map(|queued| queued.write)
            .collect()
    }

    pub fn restore_pending(&self, writes: impl IntoIterator<Item = PendingWrite>) -> usize {
        self.reconciler.restore(writes)
    }

    /// Pull-refresh one user's records from the authority.
    pub async fn reload(&self, username: &str) -> Result<Option<AuditEntry>> {
        Ok(self.reconciler.reload(username, self.clock.now()).await?)
    }

    pub async fn resync(&self) -> Result<ResyncReport> {
        Ok(self.reconciler.resync().await?)
    }
}
