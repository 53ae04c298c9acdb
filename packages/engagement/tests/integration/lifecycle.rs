use ::common::{Actor, AcceptanceStatus, ChangeKind, EffectiveStatus, ReviewDecision, ReviewStatus};
use engagement::{EngagementError, ReviewRequest, SyncState, ValidationError};

use crate::common::{EMPLOYEE, MANAGER, OTHER_EMPLOYEE, TestEnv, day, drain, employee, manager, payload};

fn validation(err: EngagementError) -> ValidationError {
    err.as_validation()
        .cloned()
        .unwrap_or_else(|| panic!("expected a validation error, got {err}"))
}

mod happy_path {
    use super::*;

    #[tokio::test]
    async fn on_time_approval_awards_full_points() {
        let env = TestEnv::new();

        let receipt = env.accept("c1").await;
        assert_eq!(receipt.sync, SyncState::Synced);
        assert_eq!(receipt.key.attempt, 1);
        assert_eq!(env.service.effective_status(EMPLOYEE, "c1"), EffectiveStatus::Accepted);
        assert!(!env.service.can_accept_new(EMPLOYEE));

        env.set_time(9, 15);
        env.submit("c1").await;
        assert_eq!(
            env.service.effective_status(EMPLOYEE, "c1"),
            EffectiveStatus::PendingReview
        );
        let stub = env.service.review_of(EMPLOYEE, "c1").unwrap();
        assert_eq!(stub.status, ReviewStatus::PendingReview);
        assert_eq!(stub.submission_id, "alice-c1");

        env.service.begin_review(&manager(), EMPLOYEE, "c1").await.unwrap();
        assert_eq!(
            env.service.effective_status(EMPLOYEE, "c1"),
            EffectiveStatus::UnderReview
        );

        env.set_time(11, 10);
        let receipt = env
            .service
            .review(
                &manager(),
                EMPLOYEE,
                "c1",
                ReviewRequest::new(ReviewDecision::Approve).with_comment("Great work"),
            )
            .await
            .unwrap();
        assert_eq!(receipt.kind, ChangeKind::Reviewed);
        assert_eq!(receipt.sync, SyncState::Synced);

        assert_eq!(env.service.effective_status(EMPLOYEE, "c1"), EffectiveStatus::Approved);
        assert_eq!(env.service.points_earned(EMPLOYEE, "c1"), 500);
        assert!(env.service.can_accept_new(EMPLOYEE));

        let review = env.service.review_of(EMPLOYEE, "c1").unwrap();
        assert_eq!(review.reviewed_by.as_deref(), Some(MANAGER));
        assert_eq!(review.review_comment.as_deref(), Some("Great work"));

        let remote = env.remote.user(EMPLOYEE);
        assert_eq!(
            remote.acceptances[&receipt.key].status,
            AcceptanceStatus::Approved
        );
        assert_eq!(remote.reviews[&receipt.key].points_awarded, Some(500));
    }

    #[tokio::test]
    async fn late_approval_deducts_penalty() {
        let env = TestEnv::new();
        env.accept("c1").await;

        env.set_time(12, 8);
        env.submit("c1").await;
        env.service
            .review(&manager(), EMPLOYEE, "c1", ReviewRequest::new(ReviewDecision::Approve))
            .await
            .unwrap();

        assert_eq!(env.service.points_earned(EMPLOYEE, "c1"), 450);
    }

    #[tokio::test]
    async fn rework_then_reaccept_starts_a_new_attempt() {
        let env = TestEnv::new();
        env.accept("c1").await;
        env.set_time(8, 9);
        env.submit("c1").await;

        env.service
            .review(
                &manager(),
                EMPLOYEE,
                "c1",
                ReviewRequest::new(ReviewDecision::RequestRework).with_penalty(120),
            )
            .await
            .unwrap();
        assert_eq!(
            env.service.effective_status(EMPLOYEE, "c1"),
            EffectiveStatus::NeedsRework
        );
        assert_eq!(env.service.points_earned(EMPLOYEE, "c1"), 380);
        assert!(env.service.can_accept_new(EMPLOYEE));

        env.set_time(13, 9);
        let receipt = env
            .service
            .accept(&employee(), EMPLOYEE, "c1", day(20))
            .await
            .unwrap();
        assert_eq!(receipt.key.attempt, 2);
        assert_eq!(env.service.effective_status(EMPLOYEE, "c1"), EffectiveStatus::Accepted);
        // The earlier attempt still counts until the new one is reviewed.
        assert_eq!(env.service.points_earned(EMPLOYEE, "c1"), 380);
        assert_eq!(env.service.list_acceptances(Some(EMPLOYEE)).len(), 2);

        env.set_time(14, 9);
        env.submit("c1").await;
        let second = env.service.submission(EMPLOYEE, "c1").unwrap();
        assert_eq!(second.key.attempt, 2);
        assert_eq!(env.service.review_of(EMPLOYEE, "c1").unwrap().submission_id, "alice-c1-2");
    }

    #[tokio::test]
    async fn rejection_scores_zero() {
        let env = TestEnv::new();
        env.accept("c2").await;
        env.submit("c2").await;
        env.service
            .review(&manager(), EMPLOYEE, "c2", ReviewRequest::new(ReviewDecision::Reject))
            .await
            .unwrap();

        assert_eq!(env.service.effective_status(EMPLOYEE, "c2"), EffectiveStatus::Rejected);
        assert_eq!(env.service.points_earned(EMPLOYEE, "c2"), 0);
    }
}

mod gating {
    use super::*;

    #[tokio::test]
    async fn second_active_acceptance_is_refused_until_withdrawn() {
        let env = TestEnv::new();
        env.accept("c1").await;

        let err = env
            .service
            .accept(&employee(), EMPLOYEE, "c2", day(10))
            .await
            .unwrap_err();
        assert!(matches!(
            validation(err),
            ValidationError::AlreadyActive { challenge_id, .. } if challenge_id == "c1"
        ));

        env.service.withdraw(&employee(), EMPLOYEE, "c1").await.unwrap();
        assert_eq!(env.service.effective_status(EMPLOYEE, "c1"), EffectiveStatus::Withdrawn);

        env.accept("c2").await;
        assert_eq!(env.service.effective_status(EMPLOYEE, "c2"), EffectiveStatus::Accepted);
    }

    #[tokio::test]
    async fn submitted_engagement_still_blocks_new_acceptance() {
        let env = TestEnv::new();
        env.accept("c1").await;
        env.submit("c1").await;

        assert!(!env.service.can_accept_new(EMPLOYEE));
        let err = env
            .service
            .accept(&employee(), EMPLOYEE, "c2", day(10))
            .await
            .unwrap_err();
        assert!(matches!(validation(err), ValidationError::AlreadyActive { .. }));
    }

    #[tokio::test]
    async fn withdrawing_discards_the_submission() {
        let env = TestEnv::new();
        env.accept("c1").await;
        env.submit("c1").await;

        env.service.withdraw(&employee(), EMPLOYEE, "c1").await.unwrap();
        assert!(env.service.submission(EMPLOYEE, "c1").is_none());
        assert!(env.service.review_of(EMPLOYEE, "c1").is_none());
        assert!(env.remote.user(EMPLOYEE).submissions.is_empty());

        let err = env
            .service
            .withdraw(&employee(), EMPLOYEE, "c1")
            .await
            .unwrap_err();
        assert!(matches!(validation(err), ValidationError::NotActive { .. }));
    }

    #[tokio::test]
    async fn users_are_gated_independently() {
        let env = TestEnv::new();
        env.accept("c1").await;
        env.service
            .accept(&Actor::employee(OTHER_EMPLOYEE), OTHER_EMPLOYEE, "c1", day(10))
            .await
            .unwrap();

        assert_eq!(env.service.list_by_challenge("c1").len(), 2);
        assert_eq!(env.service.list_acceptances(None).len(), 2);
    }
}

mod rejected_intents {
    use super::*;

    #[tokio::test]
    async fn submit_requires_an_open_acceptance() {
        let env = TestEnv::new();
        let err = env
            .service
            .submit(&employee(), EMPLOYEE, "c1", payload("Early"))
            .await
            .unwrap_err();
        assert!(matches!(validation(err), ValidationError::NotAccepted(_)));
    }

    #[tokio::test]
    async fn second_submission_is_a_duplicate() {
        let env = TestEnv::new();
        env.accept("c1").await;
        env.submit("c1").await;

        let err = env
            .service
            .submit(&employee(), EMPLOYEE, "c1", payload("Again"))
            .await
            .unwrap_err();
        assert!(matches!(validation(err), ValidationError::DuplicateSubmission(_)));
    }

    #[tokio::test]
    async fn empty_payload_is_refused() {
        let env = TestEnv::new();
        env.accept("c1").await;

        let err = env
            .service
            .submit(&employee(), EMPLOYEE, "c1", Default::default())
            .await
            .unwrap_err();
        assert!(matches!(validation(err), ValidationError::InvalidPayload(_)));
        assert_eq!(env.service.effective_status(EMPLOYEE, "c1"), EffectiveStatus::Accepted);
    }

    #[tokio::test]
    async fn unknown_challenge_cannot_be_accepted() {
        let env = TestEnv::new();
        let err = env
            .service
            .accept(&employee(), EMPLOYEE, "missing", day(10))
            .await
            .unwrap_err();
        assert!(matches!(validation(err), ValidationError::UnknownChallenge(_)));
        assert!(env.service.can_accept_new(EMPLOYEE));
    }

    #[tokio::test]
    async fn reviews_need_a_pending_submission() {
        let env = TestEnv::new();
        env.accept("c1").await;

        let err = env
            .service
            .review(&manager(), EMPLOYEE, "c1", ReviewRequest::new(ReviewDecision::Approve))
            .await
            .unwrap_err();
        assert!(matches!(validation(err), ValidationError::NoPendingReview(_)));

        env.submit("c1").await;
        env.service
            .review(&manager(), EMPLOYEE, "c1", ReviewRequest::new(ReviewDecision::Approve))
            .await
            .unwrap();
        let err = env
            .service
            .review(&manager(), EMPLOYEE, "c1", ReviewRequest::new(ReviewDecision::Reject))
            .await
            .unwrap_err();
        assert!(matches!(validation(err), ValidationError::NoPendingReview(_)));
        assert_eq!(env.service.points_earned(EMPLOYEE, "c1"), 500);
    }

    #[tokio::test]
    async fn negative_penalty_is_refused() {
        let env = TestEnv::new();
        env.accept("c1").await;
        env.submit("c1").await;

        let err = env
            .service
            .review(
                &manager(),
                EMPLOYEE,
                "c1",
                ReviewRequest::new(ReviewDecision::RequestRework).with_penalty(-5),
            )
            .await
            .unwrap_err();
        assert!(matches!(validation(err), ValidationError::InvalidPenalty(-5)));
    }
}

mod authorization {
    use super::*;

    #[tokio::test]
    async fn employees_cannot_act_for_others() {
        let env = TestEnv::new();
        let err = env
            .service
            .accept(&Actor::employee(OTHER_EMPLOYEE), EMPLOYEE, "c1", day(10))
            .await
            .unwrap_err();
        assert!(matches!(validation(err), ValidationError::Unauthorized(_)));
        assert!(env.service.list_acceptances(Some(EMPLOYEE)).is_empty());
    }

    #[tokio::test]
    async fn only_management_reviews() {
        let env = TestEnv::new();
        env.accept("c1").await;
        env.submit("c1").await;

        let err = env
            .service
            .review(&employee(), EMPLOYEE, "c1", ReviewRequest::new(ReviewDecision::Approve))
            .await
            .unwrap_err();
        assert!(matches!(validation(err), ValidationError::Unauthorized(_)));

        let err = env
            .service
            .begin_review(&employee(), EMPLOYEE, "c1")
            .await
            .unwrap_err();
        assert!(matches!(validation(err), ValidationError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn management_may_act_for_employees() {
        let env = TestEnv::new();
        env.service
            .accept(&manager(), EMPLOYEE, "c1", day(10))
            .await
            .unwrap();
        env.service.withdraw(&manager(), EMPLOYEE, "c1").await.unwrap();
        assert_eq!(env.service.effective_status(EMPLOYEE, "c1"), EffectiveStatus::Withdrawn);
    }
}

mod reporting {
    use super::*;

    #[tokio::test]
    async fn committed_changes_are_broadcast() {
        let env = TestEnv::new();
        let mut rx = env.service.subscribe();

        env.accept("c1").await;
        env.submit("c1").await;

        assert_eq!(
            drain(&mut rx),
            vec![
                ChangeKind::Accepted,
                ChangeKind::Synced,
                ChangeKind::Submitted,
                ChangeKind::Synced,
            ]
        );
    }

    #[tokio::test]
    async fn standings_rank_users_by_points() {
        let env = TestEnv::new();
        let bob = Actor::employee(OTHER_EMPLOYEE);

        env.accept("c1").await;
        env.submit("c1").await;
        env.service
            .review(&manager(), EMPLOYEE, "c1", ReviewRequest::new(ReviewDecision::Approve))
            .await
            .unwrap();

        env.service.accept(&bob, OTHER_EMPLOYEE, "c2", day(10)).await.unwrap();
        env.service
            .submit(&bob, OTHER_EMPLOYEE, "c2", payload("Mine"))
            .await
            .unwrap();
        env.service
            .review(&manager(), OTHER_EMPLOYEE, "c2", ReviewRequest::new(ReviewDecision::Approve))
            .await
            .unwrap();

        let standings = env.service.standings();
        assert_eq!(standings.len(), 2);
        assert_eq!(standings[0].username, EMPLOYEE);
        assert_eq!(standings[0].points, 500);
        assert_eq!(standings[1].points, 300);
        assert!(env.service.audit_scores().await.is_empty());
    }
}
