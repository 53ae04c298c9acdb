//! Detection and repair of broken single-active-engagement state.
//!
//! Stale caches or writes from more than one device can leave a user with
//! several active acceptances. This is never corrected silently. The most
//! recently updated acceptance stays active, every other one is
//! force-withdrawn, and the decision is recorded as an [`AuditEntry`].

use chrono::{DateTime, Utc};
use common::{ChangeKind, EngagementKey};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::machine::{Transition, force_withdraw};
use crate::store::UserEngagements;

/// More than one active acceptance found for a single user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyViolation {
    pub username: String,
    pub active: Vec<EngagementKey>,
}

/// Record of a repair decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub username: String,
    pub kept: EngagementKey,
    pub withdrawn: Vec<EngagementKey>,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Repair {
    pub transitions: Vec<Transition>,
    pub audit: AuditEntry,
}

pub fn detect(snapshot: &UserEngagements) -> Option<ConsistencyViolation> {
    let active: Vec<EngagementKey> = snapshot.active().map(|a| a.key.clone()).collect();
    if active.len() > 1 {
        Some(ConsistencyViolation {
            username: snapshot.username.clone(),
            active,
        })
    } else {
        None
    }
}

/// Plan the repair for `snapshot`, or `None` if it is consistent.
pub fn repair(snapshot: &UserEngagements, now: DateTime<Utc>) -> Option<Repair> {
    let violation = detect(snapshot)?;

    let kept = snapshot
        .active()
        .max_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then(a.accepted_at.cmp(&b.accepted_at))
                .then(a.key.cmp(&b.key))
        })?
        .key
        .clone();

    let transitions: Vec<Transition> = snapshot
        .active()
        .filter(|a| a.key != kept)
        .map(|a| force_withdraw(snapshot, a, now, ChangeKind::Repaired))
        .collect();
    let withdrawn: Vec<EngagementKey> = transitions.iter().map(|t| t.key.clone()).collect();

    warn!(
        username = %violation.username,
        active = violation.active.len(),
        kept = %kept,
        withdrawn = ?withdrawn.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
        "Multiple active engagements found, force-withdrawing all but the most recent"
    );

    Some(Repair {
        transitions,
        audit: AuditEntry {
            id: Uuid::now_v7(),
            username: violation.username,
            kept,
            withdrawn,
            detected_at: now,
        },
    })
}
