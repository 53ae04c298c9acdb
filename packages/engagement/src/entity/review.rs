use common::{Review, ReviewStatus};
use sea_orm::Set;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "review")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub username: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub challenge_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub attempt: i32,

    #[sea_orm(unique)]
    pub submission_id: String,

    #[sea_orm(indexed)]
    pub status: ReviewStatus,

    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTimeUtc>,

    #[sea_orm(column_type = "Text", nullable)]
    pub review_comment: Option<String>,

    /// Set once the review is finalized.
    pub points_awarded: Option<i32>,
    pub penalty_override: Option<i32>,

    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for Review {
    fn from(model: Model) -> Self {
        Review {
            key: super::engagement_key(&model.username, &model.challenge_id, model.attempt),
            submission_id: model.submission_id,
            status: model.status,
            reviewed_by: model.reviewed_by,
            reviewed_at: model.reviewed_at,
            review_comment: model.review_comment,
            points_awarded: model.points_awarded,
            penalty_override: model.penalty_override,
            updated_at: model.updated_at,
        }
    }
}

pub fn active_model(review: &Review) -> ActiveModel {
    ActiveModel {
        username: Set(review.key.username.clone()),
        challenge_id: Set(review.key.challenge_id.clone()),
        attempt: Set(review.key.attempt as i32),
        submission_id: Set(review.submission_id.clone()),
        status: Set(review.status),
        reviewed_by: Set(review.reviewed_by.clone()),
        reviewed_at: Set(review.reviewed_at),
        review_comment: Set(review.review_comment.clone()),
        points_awarded: Set(review.points_awarded),
        penalty_override: Set(review.penalty_override),
        updated_at: Set(review.updated_at),
    }
}
