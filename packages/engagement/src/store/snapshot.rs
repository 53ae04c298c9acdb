use std::collections::BTreeMap;

use common::{Acceptance, EngagementKey, Review, Submission};
use serde::{Deserialize, Serialize};

/// A single write against the engagement tables.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RecordChange {
    PutAcceptance(Acceptance),
    PutSubmission(Submission),
    DeleteSubmission(EngagementKey),
    PutReview(Review),
    DeleteReview(EngagementKey),
}

impl RecordChange {
    pub fn key(&self) -> &EngagementKey {
        match self {
            Self::PutAcceptance(a) => &a.key,
            Self::PutSubmission(s) => &s.key,
            Self::PutReview(r) => &r.key,
            Self::DeleteSubmission(key) | Self::DeleteReview(key) => key,
        }
    }
}

/// Every record stored under one engagement key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementRecords {
    pub key: EngagementKey,
    pub acceptance: Option<Acceptance>,
    pub submission: Option<Submission>,
    pub review: Option<Review>,
}

impl EngagementRecords {
    pub fn empty(key: EngagementKey) -> Self {
        Self {
            key,
            acceptance: None,
            submission: None,
            review: None,
        }
    }

    /// Latest `updated_at` across the three records.
    pub fn updated_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        [
            self.acceptance.as_ref().map(|a| a.updated_at),
            self.submission.as_ref().map(|s| s.updated_at),
            self.review.as_ref().map(|r| r.updated_at),
        ]
        .into_iter()
        .flatten()
        .max()
    }
}

/// All engagement records belonging to one user.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserEngagements {
    pub username: String,
    pub acceptances: BTreeMap<EngagementKey, Acceptance>,
    pub submissions: BTreeMap<EngagementKey, Submission>,
    pub reviews: BTreeMap<EngagementKey, Review>,
}

impl UserEngagements {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    /// Builds a snapshot from flat record lists, dropping rows of other users.
    pub fn from_records(
        username: &str,
        acceptances: impl IntoIterator<Item = Acceptance>,
        submissions: impl IntoIterator<Item = Submission>,
        reviews: impl IntoIterator<Item = Review>,
    ) -> Self {
        let mut snapshot = Self::new(username);
        for a in acceptances.into_iter().filter(|a| a.key.username == username) {
            snapshot.acceptances.insert(a.key.clone(), a);
        }
        for s in submissions.into_iter().filter(|s| s.key.username == username) {
            snapshot.submissions.insert(s.key.clone(), s);
        }
        for r in reviews.into_iter().filter(|r| r.key.username == username) {
            snapshot.reviews.insert(r.key.clone(), r);
        }
        snapshot
    }

    /// The latest attempt of `challenge_id`, if the user ever accepted it.
    pub fn current(&self, challenge_id: &str) -> Option<&Acceptance> {
        self.acceptances
            .values()
            .filter(|a| a.key.challenge_id == challenge_id)
            .max_by_key(|a| a.key.attempt)
    }

    pub fn active(&self) -> impl Iterator<Item = &Acceptance> {
        self.acceptances.values().filter(|a| a.status.is_active())
    }

    pub fn has_active(&self) -> bool {
        self.active().next().is_some()
    }

    pub fn records(&self, key: &EngagementKey) -> EngagementRecords {
        EngagementRecords {
            key: key.clone(),
            acceptance: self.acceptances.get(key).cloned(),
            submission: self.submissions.get(key).cloned(),
            review: self.reviews.get(key).cloned(),
        }
    }

    /// Latest `updated_at` over the records of `key`.
    pub fn updated_at(&self, key: &EngagementKey) -> Option<chrono::DateTime<chrono::Utc>> {
        self.records(key).updated_at()
    }

    pub fn apply(&mut self, changes: &[RecordChange]) {
        for change in changes {
            match change {
                RecordChange::PutAcceptance(a) => {
                    self.acceptances.insert(a.key.clone(), a.clone());
                }
                RecordChange::PutSubmission(s) => {
                    self.submissions.insert(s.key.clone(), s.clone());
                }
                RecordChange::DeleteSubmission(key) => {
                    self.submissions.remove(key);
                }
                RecordChange::PutReview(r) => {
                    self.reviews.insert(r.key.clone(), r.clone());
                }
                RecordChange::DeleteReview(key) => {
                    self.reviews.remove(key);
                }
            }
        }
    }

    /// Overwrites everything stored under `records.key` with `records`.
    pub fn replace(&mut self, records: EngagementRecords) {
        let key = records.key;
        match records.acceptance {
            Some(a) => self.acceptances.insert(key.clone(), a),
            None => self.acceptances.remove(&key),
        };
        match records.submission {
            Some(s) => self.submissions.insert(key.clone(), s),
            None => self.submissions.remove(&key),
        };
        match records.review {
            Some(r) => self.reviews.insert(key, r),
            None => self.reviews.remove(&key),
        };
    }
}
