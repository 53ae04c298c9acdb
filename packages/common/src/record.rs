use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::status::{AcceptanceStatus, ReviewStatus};

/// Default penalty for a late but approved submission.
pub const DEFAULT_PENALTY_POINTS: i32 = 50;

fn default_penalty_points() -> i32 {
    DEFAULT_PENALTY_POINTS
}

/// Challenge metadata as supplied by the catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: String,
    /// Base reward.
    pub points: i32,
    /// Deducted from `points` when an approved submission is late.
    #[serde(default = "default_penalty_points")]
    pub penalty_points: i32,
    pub deadline: Option<NaiveDate>,
}

impl Challenge {
    pub fn new(id: impl Into<String>, points: i32) -> Self {
        Self {
            id: id.into(),
            points,
            penalty_points: DEFAULT_PENALTY_POINTS,
            deadline: None,
        }
    }

    pub fn with_penalty(mut self, penalty_points: i32) -> Self {
        self.penalty_points = penalty_points;
        self
    }

    pub fn with_deadline(mut self, deadline: NaiveDate) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Identifies one engagement row.
///
/// `attempt` is 1 for the first acceptance of a challenge and grows each time
/// the user re-accepts the same challenge after a terminal status.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EngagementKey {
    pub username: String,
    pub challenge_id: String,
    pub attempt: u32,
}

impl EngagementKey {
    pub fn new(username: impl Into<String>, challenge_id: impl Into<String>, attempt: u32) -> Self {
        Self {
            username: username.into(),
            challenge_id: challenge_id.into(),
            attempt,
        }
    }

    /// Key of the review attached to this engagement's submission.
    pub fn submission_id(&self) -> String {
        if self.attempt <= 1 {
            format!("{}-{}", self.username, self.challenge_id)
        } else {
            format!("{}-{}-{}", self.username, self.challenge_id, self.attempt)
        }
    }
}

impl fmt::Display for EngagementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.username, self.challenge_id, self.attempt)
    }
}

/// A user's commitment to complete a challenge by a target date.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acceptance {
    pub key: EngagementKey,
    /// Date the user promises completion by.
    pub committed_date: NaiveDate,
    pub accepted_at: DateTime<Utc>,
    pub status: AcceptanceStatus,
    pub updated_at: DateTime<Utc>,
}

/// Free-text solution fields. Attachments are opaque URLs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionPayload {
    pub summary: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub attachment_urls: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub key: EngagementKey,
    pub submitted_at: DateTime<Utc>,
    pub solution: SubmissionPayload,
    /// Always true once the row exists.
    pub submitted: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub key: EngagementKey,
    pub submission_id: String,
    pub status: ReviewStatus,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_comment: Option<String>,
    /// `None` until the review is finalized.
    pub points_awarded: Option<i32>,
    /// Only meaningful for `NeedsRework`.
    pub penalty_override: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

impl Review {
    /// A fresh review stub awaiting a reviewer.
    pub fn pending(key: EngagementKey, now: DateTime<Utc>) -> Self {
        Self {
            submission_id: key.submission_id(),
            key,
            status: ReviewStatus::PendingReview,
            reviewed_by: None,
            reviewed_at: None,
            review_comment: None,
            points_awarded: None,
            penalty_override: None,
            updated_at: now,
        }
    }
}

/// Next `updated_at` for a record last written at `previous`.
///
/// Strictly increasing even when the wall clock stalls or goes backwards.
pub fn next_updated_at(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(prev) if prev >= now => prev + chrono::Duration::milliseconds(1),
        _ => now,
    }
}
