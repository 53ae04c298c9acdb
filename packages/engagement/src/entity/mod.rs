pub mod acceptance;
pub mod repair_audit;
pub mod review;
pub mod submission;

use common::EngagementKey;

/// Composite primary key shared by the acceptance, submission and review tables.
pub type EngagementId = (String, String, i32);

pub fn engagement_id(key: &EngagementKey) -> EngagementId {
    (
        key.username.clone(),
        key.challenge_id.clone(),
        key.attempt as i32,
    )
}

pub(crate) fn engagement_key(username: &str, challenge_id: &str, attempt: i32) -> EngagementKey {
    EngagementKey::new(username, challenge_id, u32::try_from(attempt).unwrap_or(0))
}
