use common::{Acceptance, AcceptanceStatus};
use sea_orm::Set;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "acceptance")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub username: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub challenge_id: String,
    /// 1 for the first acceptance, incremented on every re-acceptance.
    #[sea_orm(primary_key, auto_increment = false)]
    pub attempt: i32,

    pub committed_date: Date,
    pub accepted_at: DateTimeUtc,

    #[sea_orm(indexed)]
    pub status: AcceptanceStatus,

    pub updated_at: DateTimeUtc,

    /// Operation id of the last write applied to this engagement.
    pub last_operation_id: Option<String>,
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for Acceptance {
    fn from(model: Model) -> Self {
        Acceptance {
            key: super::engagement_key(&model.username, &model.challenge_id, model.attempt),
            committed_date: model.committed_date,
            accepted_at: model.accepted_at,
            status: model.status,
            updated_at: model.updated_at,
        }
    }
}

pub fn active_model(acceptance: &Acceptance, op_id: &str) -> ActiveModel {
    ActiveModel {
        username: Set(acceptance.key.username.clone()),
        challenge_id: Set(acceptance.key.challenge_id.clone()),
        attempt: Set(acceptance.key.attempt as i32),
        committed_date: Set(acceptance.committed_date),
        accepted_at: Set(acceptance.accepted_at),
        status: Set(acceptance.status),
        updated_at: Set(acceptance.updated_at),
        last_operation_id: Set(Some(op_id.to_string())),
    }
}
