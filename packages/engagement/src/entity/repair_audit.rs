use common::EngagementKey;
use sea_orm::Set;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::consistency::AuditEntry;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "repair_audit")]
pub struct Model {
    /// UUIDv7, so rows sort by detection time.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(indexed)]
    pub username: String,

    pub kept_challenge_id: String,
    pub kept_attempt: i32,

    /// JSON array of the force-withdrawn engagement keys.
    #[sea_orm(column_type = "JsonBinary")]
    pub withdrawn: serde_json::Value,

    pub detected_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for AuditEntry {
    type Error = serde_json::Error;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let withdrawn: Vec<EngagementKey> = serde_json::from_value(model.withdrawn)?;
        Ok(AuditEntry {
            id: model.id,
            kept: super::engagement_key(&model.username, &model.kept_challenge_id, model.kept_attempt),
            username: model.username,
            withdrawn,
            detected_at: model.detected_at,
        })
    }
}

pub fn active_model(entry: &AuditEntry) -> Result<ActiveModel, serde_json::Error> {
    Ok(ActiveModel {
        id: Set(entry.id),
        username: Set(entry.username.clone()),
        kept_challenge_id: Set(entry.kept.challenge_id.clone()),
        kept_attempt: Set(entry.kept.attempt as i32),
        withdrawn: Set(serde_json::to_value(&entry.withdrawn)?),
        detected_at: Set(entry.detected_at),
    })
}
