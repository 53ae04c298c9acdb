use common::{Submission, SubmissionPayload};
use sea_orm::Set;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "submission")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub username: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub challenge_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub attempt: i32,

    pub submitted_at: DateTimeUtc,

    #[sea_orm(column_type = "Text")]
    pub summary: String,
    #[sea_orm(column_type = "Text")]
    pub details: String,
    /// JSON array of URLs.
    #[sea_orm(column_type = "JsonBinary")]
    pub attachment_urls: serde_json::Value,

    #[sea_orm(default_value = true)]
    pub submitted: bool,

    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Submission {
    type Error = serde_json::Error;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Submission {
            key: super::engagement_key(&model.username, &model.challenge_id, model.attempt),
            submitted_at: model.submitted_at,
            solution: SubmissionPayload {
                summary: model.summary,
                details: model.details,
                attachment_urls: serde_json::from_value(model.attachment_urls)?,
            },
            submitted: model.submitted,
            updated_at: model.updated_at,
        })
    }
}

pub fn active_model(submission: &Submission) -> Result<ActiveModel, serde_json::Error> {
    Ok(ActiveModel {
        username: Set(submission.key.username.clone()),
        challenge_id: Set(submission.key.challenge_id.clone()),
        attempt: Set(submission.key.attempt as i32),
        submitted_at: Set(submission.submitted_at),
        summary: Set(submission.solution.summary.clone()),
        details: Set(submission.solution.details.clone()),
        attachment_urls: Set(serde_json::to_value(&submission.solution.attachment_urls)?),
        submitted: Set(submission.submitted),
        updated_at: Set(submission.updated_at),
    })
}
