//! Points awarded when a review is finalized.
//!
//! The result depends only on the challenge's reward and penalty, the
//! committed date, the submission time, the decision and the reviewer's
//! optional penalty override, so it can be recomputed at any time for audits
//! or leaderboards.

use common::{Acceptance, Challenge, Review, ReviewDecision, ReviewStatus, Submission};

/// Penalty applied on a rework request when the reviewer does not supply one.
pub const DEFAULT_REWORK_PENALTY: i32 = 100;

/// True if the submission landed on or before the committed date (UTC).
pub fn is_on_time(acceptance: &Acceptance, submission: &Submission) -> bool {
    submission.submitted_at.date_naive() <= acceptance.committed_date
}

pub fn score(
    challenge: &Challenge,
    acceptance: &Acceptance,
    submission: &Submission,
    decision: ReviewDecision,
    penalty_override: Option<i32>,
) -> i32 {
    match decision {
        ReviewDecision::Approve => {
            if is_on_time(acceptance, submission) {
                challenge.points.max(0)
            } else {
                challenge.points.saturating_sub(challenge.penalty_points).max(0)
            }
        }
        ReviewDecision::RequestRework => {
            let penalty = penalty_override.unwrap_or(DEFAULT_REWORK_PENALTY);
            challenge.points.saturating_sub(penalty).max(0)
        }
        ReviewDecision::Reject => 0,
    }
}

/// Difference between the stored and recomputed points of a finalized review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointsMismatch {
    pub submission_id: String,
    pub stored: Option<i32>,
    pub expected: i32,
}

/// Recompute a finalized review's points and report any drift.
///
/// Returns `None` for reviews that are still pending or that match.
pub fn audit_points(
    challenge: &Challenge,
    acceptance: &Acceptance,
    submission: &Submission,
    review: &Review,
) -> Option<PointsMismatch> {
    let decision = match review.status {
        ReviewStatus::PendingReview => return None,
        ReviewStatus::Approved => ReviewDecision::Approve,
        ReviewStatus::Rejected => ReviewDecision::Reject,
        ReviewStatus::NeedsRework => ReviewDecision::RequestRework,
    };
    let expected = score(
        challenge,
        acceptance,
        submission,
        decision,
        review.penalty_override,
    );
    if review.points_awarded == Some(expected) {
        None
    } else {
        Some(PointsMismatch {
            submission_id: review.submission_id.clone(),
            stored: review.points_awarded,
            expected,
        })
    }
}
