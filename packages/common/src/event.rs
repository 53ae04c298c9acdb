use std::fmt;

use serde::{Deserialize, Serialize};

/// What happened to an engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Accepted,
    Submitted,
    Withdrawn,
    Reviewed,
    /// A pending write reached the authority and matched the local view.
    Synced,
    /// The authority disagreed and its view replaced the local one.
    Reconciled,
    /// A pull refresh replaced the user's local records.
    Reloaded,
    /// A consistency violation was repaired.
    Repaired,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Submitted => "submitted",
            Self::Withdrawn => "withdrawn",
            Self::Reviewed => "reviewed",
            Self::Synced => "synced",
            Self::Reconciled => "reconciled",
            Self::Reloaded => "reloaded",
            Self::Repaired => "repaired",
        }
    }

    /// Routing topic, e.g. `engagement.submitted`.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Accepted => "engagement.accepted",
            Self::Submitted => "engagement.submitted",
            Self::Withdrawn => "engagement.withdrawn",
            Self::Reviewed => "engagement.reviewed",
            Self::Synced => "engagement.synced",
            Self::Reconciled => "engagement.reconciled",
            Self::Reloaded => "engagement.reloaded",
            Self::Repaired => "engagement.repaired",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification emitted after every committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub username: String,
    /// Empty for user-wide changes such as a reload.
    pub challenge_id: String,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(username: impl Into<String>, challenge_id: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            username: username.into(),
            challenge_id: challenge_id.into(),
            kind,
        }
    }
}
