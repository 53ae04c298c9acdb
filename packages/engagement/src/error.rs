use std::time::Duration;

use common::AcceptanceStatus;
use sea_orm::DbErr;
use thiserror::Error;

/// Rejected intents. Surfaced to the caller synchronously and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("User {username} already has an active engagement on challenge {challenge_id}")]
    AlreadyActive {
        username: String,
        challenge_id: String,
    },

    #[error("Challenge {0} has no acceptance awaiting a submission")]
    NotAccepted(String),

    #[error("Challenge {0} already has a submission")]
    DuplicateSubmission(String),

    #[error("Challenge {0} has no review pending")]
    NoPendingReview(String),

    #[error("Not allowed: {0}")]
    Unauthorized(String),

    #[error("Challenge {challenge_id} cannot be withdrawn from status {status}")]
    NotActive {
        challenge_id: String,
        status: AcceptanceStatus,
    },

    #[error("Challenge not found: {0}")]
    UnknownChallenge(String),

    #[error("Penalty override must not be negative (got {0})")]
    InvalidPenalty(i32),

    #[error("Invalid submission: {0}")]
    InvalidPayload(String),
}

/// Failures talking to the authoritative store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Network-level failures worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

impl From<DbErr> for StoreError {
    fn from(err: DbErr) -> Self {
        match err {
            DbErr::Conn(e) => StoreError::Unavailable(e.to_string()),
            DbErr::ConnectionAcquire(e) => StoreError::Unavailable(e.to_string()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Errors returned by the engagement service.
#[derive(Debug, Error)]
pub enum EngagementError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngagementError {
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(e) => Some(e),
            Self::Store(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngagementError>;
