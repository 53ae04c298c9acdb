#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Persisted status of an acceptance row.
///
/// When the `sea-orm` feature is enabled, this enum can be used directly in SeaORM entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
pub enum AcceptanceStatus {
    /// Committed to, nothing submitted yet.
    #[serde(rename = "Accepted")]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Accepted"))]
    Accepted,
    /// Solution handed in, review stub created.
    #[serde(rename = "Submitted")]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Submitted"))]
    Submitted,
    #[serde(rename = "Pending Review")]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Pending Review"))]
    PendingReview,
    #[serde(rename = "Under Review")]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Under Review"))]
    UnderReview,
    #[serde(rename = "Approved")]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Approved"))]
    Approved,
    #[serde(rename = "Rejected")]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Rejected"))]
    Rejected,
    #[serde(rename = "Needs Rework")]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Needs Rework"))]
    NeedsRework,
    #[serde(rename = "Withdrawn")]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Withdrawn"))]
    Withdrawn,
}

impl AcceptanceStatus {
    /// Returns true if this status blocks the user from accepting another challenge.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Accepted | Self::Submitted | Self::PendingReview | Self::UnderReview
        )
    }

    /// Returns true if no further transition can happen on this row.
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Returns true once a solution has been handed in for this row.
    pub fn is_submitted(&self) -> bool {
        matches!(
            self,
            Self::Submitted | Self::PendingReview | Self::UnderReview
        )
    }

    /// All possible status values.
    pub const ALL: &'static [AcceptanceStatus] = &[
        Self::Accepted,
        Self::Submitted,
        Self::PendingReview,
        Self::UnderReview,
        Self::Approved,
        Self::Rejected,
        Self::NeedsRework,
        Self::Withdrawn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::Submitted => "Submitted",
            Self::PendingReview => "Pending Review",
            Self::UnderReview => "Under Review",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::NeedsRework => "Needs Rework",
            Self::Withdrawn => "Withdrawn",
        }
    }
}

impl fmt::Display for AcceptanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for AcceptanceStatus {
    fn default() -> Self {
        Self::Accepted
    }
}

/// Status of the review attached to a submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
pub enum ReviewStatus {
    #[serde(rename = "Pending Review")]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Pending Review"))]
    PendingReview,
    #[serde(rename = "Approved")]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Approved"))]
    Approved,
    #[serde(rename = "Rejected")]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Rejected"))]
    Rejected,
    #[serde(rename = "Needs Rework")]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Needs Rework"))]
    NeedsRework,
}

impl ReviewStatus {
    /// Returns true if the review has been finalized by a reviewer.
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::PendingReview)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingReview => "Pending Review",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::NeedsRework => "Needs Rework",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for ReviewStatus {
    fn default() -> Self {
        Self::PendingReview
    }
}

/// Decision a reviewer takes on a pending submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
    RequestRework,
}

impl ReviewDecision {
    /// The review status a decision finalizes to.
    pub fn review_status(&self) -> ReviewStatus {
        match self {
            Self::Approve => ReviewStatus::Approved,
            Self::Reject => ReviewStatus::Rejected,
            Self::RequestRework => ReviewStatus::NeedsRework,
        }
    }

    /// The terminal status mirrored onto the acceptance.
    pub fn acceptance_status(&self) -> AcceptanceStatus {
        match self {
            Self::Approve => AcceptanceStatus::Approved,
            Self::Reject => AcceptanceStatus::Rejected,
            Self::RequestRework => AcceptanceStatus::NeedsRework,
        }
    }
}

/// Status of a (user, challenge) pair as reported to callers.
///
/// Derived from the acceptance, submission and review records; never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectiveStatus {
    #[serde(rename = "Not Accepted")]
    NotAccepted,
    #[serde(rename = "Accepted")]
    Accepted,
    #[serde(rename = "Pending Review")]
    PendingReview,
    #[serde(rename = "Under Review")]
    UnderReview,
    #[serde(rename = "Approved")]
    Approved,
    #[serde(rename = "Rejected")]
    Rejected,
    #[serde(rename = "Needs Rework")]
    NeedsRework,
    #[serde(rename = "Withdrawn")]
    Withdrawn,
}

impl EffectiveStatus {
    pub const ALL: &'static [EffectiveStatus] = &[
        Self::NotAccepted,
        Self::Accepted,
        Self::PendingReview,
        Self::UnderReview,
        Self::Approved,
        Self::Rejected,
        Self::NeedsRework,
        Self::Withdrawn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAccepted => "Not Accepted",
            Self::Accepted => "Accepted",
            Self::PendingReview => "Pending Review",
            Self::UnderReview => "Under Review",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::NeedsRework => "Needs Rework",
            Self::Withdrawn => "Withdrawn",
        }
    }
}

impl fmt::Display for EffectiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid status '{invalid}'. Valid values: {}", valid_statuses())]
pub struct ParseStatusError {
    invalid: String,
}

fn valid_statuses() -> String {
    AcceptanceStatus::ALL
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl FromStr for AcceptanceStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AcceptanceStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError {
                invalid: s.to_string(),
            })
    }
}
