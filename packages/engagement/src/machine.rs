//! Engagement state machine.
//!
//! Per acceptance row:
//!
//! ```text
//! Accepted --submit--> Submitted --review--> Approved | Rejected | Needs Rework
//!    |                    |
//!    +------withdraw------+--> Withdrawn
//! ```
//!
//! Every function here is pure: it validates an intent against a snapshot of
//! one user's records and returns the [`Transition`] to apply, or the reason
//! it was refused. A user holds at most one active acceptance at a time, and a
//! terminal row is never reopened. Starting again means a new row with the
//! next attempt number.

use chrono::{DateTime, NaiveDate, Utc};
use common::record::next_updated_at;
use common::{
    Acceptance, AcceptanceStatus, ChangeKind, Challenge, EffectiveStatus, EngagementKey, Review,
    ReviewDecision, ReviewStatus, Submission, SubmissionPayload,
};

use crate::error::ValidationError;
use crate::scoring;
use crate::store::{RecordChange, UserEngagements};

/// The writes produced by one validated intent. Applied all-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub key: EngagementKey,
    pub kind: ChangeKind,
    pub changes: Vec<RecordChange>,
    /// Latest `updated_at` of the key before this transition.
    pub base_updated_at: Option<DateTime<Utc>>,
}

/// A reviewer's verdict on a pending submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRequest {
    pub decision: ReviewDecision,
    pub comment: Option<String>,
    /// Overrides the default rework penalty. Ignored for other decisions.
    pub penalty_override: Option<i32>,
}

impl ReviewRequest {
    pub fn new(decision: ReviewDecision) -> Self {
        Self {
            decision,
            comment: None,
            penalty_override: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_penalty(mut self, penalty: i32) -> Self {
        self.penalty_override = Some(penalty);
        self
    }
}

pub fn accept(
    snapshot: &UserEngagements,
    challenge_id: &str,
    committed_date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Transition, ValidationError> {
    if let Some(active) = snapshot.active().next() {
        return Err(ValidationError::AlreadyActive {
            username: snapshot.username.clone(),
            challenge_id: active.key.challenge_id.clone(),
        });
    }

    let attempt = snapshot
        .current(challenge_id)
        .map(|a| a.key.attempt + 1)
        .unwrap_or(1);
    let key = EngagementKey::new(snapshot.username.clone(), challenge_id, attempt);

    let acceptance = Acceptance {
        key: key.clone(),
        committed_date,
        accepted_at: now,
        status: AcceptanceStatus::Accepted,
        updated_at: now,
    };

    Ok(Transition {
        key,
        kind: ChangeKind::Accepted,
        changes: vec![RecordChange::PutAcceptance(acceptance)],
        base_updated_at: None,
    })
}

fn validate_payload(payload: &SubmissionPayload) -> Result<(), ValidationError> {
    if payload.attachment_urls.iter().any(|url| url.trim().is_empty()) {
        return Err(ValidationError::InvalidPayload(
            "attachment URLs must not be empty".into(),
        ));
    }
    let has_content = !payload.summary.trim().is_empty()
        || !payload.details.trim().is_empty()
        || !payload.attachment_urls.is_empty();
    if !has_content {
        return Err(ValidationError::InvalidPayload(
            "a submission needs a summary, details or an attachment".into(),
        ));
    }
    Ok(())
}

pub fn submit(
    snapshot: &UserEngagements,
    challenge_id: &str,
    payload: SubmissionPayload,
    now: DateTime<Utc>,
) -> Result<Transition, ValidationError> {
    let current = snapshot
        .current(challenge_id)
        .ok_or_else(|| ValidationError::NotAccepted(challenge_id.to_string()))?;
    let key = current.key.clone();

    if snapshot.submissions.contains_key(&key) {
        return Err(ValidationError::DuplicateSubmission(challenge_id.to_string()));
    }
    match current.status {
        AcceptanceStatus::Accepted => {}
        status if status.is_submitted() => {
            return Err(ValidationError::DuplicateSubmission(challenge_id.to_string()));
        }
        _ => return Err(ValidationError::NotAccepted(challenge_id.to_string())),
    }
    validate_payload(&payload)?;

    let base_updated_at = snapshot.updated_at(&key);
    let submission = Submission {
        key: key.clone(),
        submitted_at: now,
        solution: payload,
        submitted: true,
        updated_at: now,
    };
    let acceptance = Acceptance {
        status: AcceptanceStatus::Submitted,
        updated_at: next_updated_at(Some(current.updated_at), now),
        ..current.clone()
    };
    let review = Review::pending(key.clone(), now);

    Ok(Transition {
        key,
        kind: ChangeKind::Submitted,
        changes: vec![
            RecordChange::PutSubmission(submission),
            RecordChange::PutAcceptance(acceptance),
            RecordChange::PutReview(review),
        ],
        base_updated_at,
    })
}

pub fn withdraw(
    snapshot: &UserEngagements,
    challenge_id: &str,
    now: DateTime<Utc>,
) -> Result<Transition, ValidationError> {
    let current = snapshot
        .current(challenge_id)
        .ok_or_else(|| ValidationError::NotAccepted(challenge_id.to_string()))?;
    if !current.status.is_active() {
        return Err(ValidationError::NotActive {
            challenge_id: challenge_id.to_string(),
            status: current.status,
        });
    }
    Ok(force_withdraw(snapshot, current, now, ChangeKind::Withdrawn))
}

/// Withdraw `acceptance` without checking intent rules. Submission data is discarded.
pub(crate) fn force_withdraw(
    snapshot: &UserEngagements,
    acceptance: &Acceptance,
    now: DateTime<Utc>,
    kind: ChangeKind,
) -> Transition {
    let key = acceptance.key.clone();
    let mut changes = vec![RecordChange::PutAcceptance(Acceptance {
        status: AcceptanceStatus::Withdrawn,
        updated_at: next_updated_at(Some(acceptance.updated_at), now),
        ..acceptance.clone()
    })];
    if snapshot.submissions.contains_key(&key) {
        changes.push(RecordChange::DeleteSubmission(key.clone()));
    }
    if snapshot.reviews.contains_key(&key) {
        changes.push(RecordChange::DeleteReview(key.clone()));
    }

    Transition {
        base_updated_at: snapshot.updated_at(&key),
        key,
        kind,
        changes,
    }
}

pub fn review(
    snapshot: &UserEngagements,
    challenge: &Challenge,
    request: &ReviewRequest,
    reviewer: &str,
    now: DateTime<Utc>,
) -> Result<Transition, ValidationError> {
    let challenge_id = challenge.id.as_str();
    let no_pending = || ValidationError::NoPendingReview(challenge_id.to_string());

    if let Some(penalty) = request.penalty_override {
        if penalty < 0 {
            return Err(ValidationError::InvalidPenalty(penalty));
        }
    }

    let acceptance = snapshot.current(challenge_id).ok_or_else(no_pending)?;
    if !acceptance.status.is_submitted() {
        return Err(no_pending());
    }
    let key = acceptance.key.clone();
    let submission = snapshot.submissions.get(&key).ok_or_else(no_pending)?;

    // A submission without a review row is implicitly pending.
    let existing = snapshot.reviews.get(&key);
    if existing.is_some_and(|r| r.status != ReviewStatus::PendingReview) {
        return Err(no_pending());
    }
    let stub = existing
        .cloned()
        .unwrap_or_else(|| Review::pending(key.clone(), submission.submitted_at));

    let penalty_override = match request.decision {
        ReviewDecision::RequestRework => request.penalty_override,
        _ => None,
    };
    let points = scoring::score(
        challenge,
        acceptance,
        submission,
        request.decision,
        penalty_override,
    );

    let finalized = Review {
        status: request.decision.review_status(),
        reviewed_by: Some(reviewer.to_string()),
        reviewed_at: Some(now),
        review_comment: request.comment.clone(),
        points_awarded: Some(points),
        penalty_override,
        updated_at: next_updated_at(existing.map(|r| r.updated_at), now),
        ..stub
    };
    let mirrored = Acceptance {
        status: request.decision.acceptance_status(),
        updated_at: next_updated_at(Some(acceptance.updated_at), now),
        ..acceptance.clone()
    };

    Ok(Transition {
        base_updated_at: snapshot.updated_at(&key),
        key,
        kind: ChangeKind::Reviewed,
        changes: vec![
            RecordChange::PutReview(finalized),
            RecordChange::PutAcceptance(mirrored),
        ],
    })
}

/// Status of `challenge_id` as shown to callers.
///
/// `under_review` is the in-memory signal that a reviewer has opened the submission.
pub fn effective_status(
    snapshot: &UserEngagements,
    challenge_id: &str,
    under_review: bool,
) -> EffectiveStatus {
    let Some(acceptance) = snapshot.current(challenge_id) else {
        return EffectiveStatus::NotAccepted;
    };
    match acceptance.status {
        AcceptanceStatus::Accepted => EffectiveStatus::Accepted,
        AcceptanceStatus::Submitted | AcceptanceStatus::PendingReview => {
            if under_review {
                EffectiveStatus::UnderReview
            } else {
                EffectiveStatus::PendingReview
            }
        }
        AcceptanceStatus::UnderReview => EffectiveStatus::UnderReview,
        AcceptanceStatus::Approved => EffectiveStatus::Approved,
        AcceptanceStatus::Rejected => EffectiveStatus::Rejected,
        AcceptanceStatus::NeedsRework => EffectiveStatus::NeedsRework,
        AcceptanceStatus::Withdrawn => EffectiveStatus::Withdrawn,
    }
}

pub fn can_accept_new(snapshot: &UserEngagements) -> bool {
    !snapshot.has_active()
}

/// Points of the most recent finalized review of `challenge_id`, or 0.
pub fn points_earned(snapshot: &UserEngagements, challenge_id: &str) -> i32 {
    snapshot
        .reviews
        .values()
        .filter(|r| r.key.challenge_id == challenge_id && r.status.is_final())
        .max_by_key(|r| r.key.attempt)
        .and_then(|r| r.points_awarded)
        .unwrap_or(0)
}
