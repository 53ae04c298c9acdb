use std::time::{Duration, Instant};

use ::common::config::SyncConfig;
use ::common::{Acceptance, AcceptanceStatus, Actor, ChangeKind, EffectiveStatus, EngagementKey};
use engagement::{StoreError, SyncState};

use crate::common::{
    EMPLOYEE, OTHER_EMPLOYEE, TestEnv, at, day, drain, employee, payload, test_sync_config,
};

fn active(challenge_id: &str, hour: u32) -> Acceptance {
    Acceptance {
        key: EngagementKey::new(EMPLOYEE, challenge_id, 1),
        committed_date: day(10),
        accepted_at: at(5, hour),
        status: AcceptanceStatus::Accepted,
        updated_at: at(5, hour),
    }
}

mod offline {
    use super::*;

    #[tokio::test]
    async fn offline_accept_is_kept_locally_and_synced_later() {
        let env = TestEnv::new();
        env.remote.set_offline(true);

        let receipt = env.accept("c1").await;
        assert_eq!(receipt.sync, SyncState::Pending);
        assert_eq!(env.service.effective_status(EMPLOYEE, "c1"), EffectiveStatus::Accepted);
        assert!(!env.service.is_synced(EMPLOYEE, "c1"));
        assert!(env.remote.user(EMPLOYEE).acceptances.is_empty());
        assert_eq!(env.service.pending_writes().len(), 1);

        // Still offline: the resync refuses and nothing is lost.
        assert!(env.service.resync().await.is_err());
        assert_eq!(env.service.pending_writes().len(), 1);

        env.remote.set_offline(false);
        let report = env.service.resync().await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(report.pending, 0);
        assert!(env.service.is_synced(EMPLOYEE, "c1"));
        assert!(env.service.pending_writes().is_empty());
        assert_eq!(
            env.remote.user(EMPLOYEE).acceptances[&receipt.key].status,
            AcceptanceStatus::Accepted
        );
    }

    #[tokio::test]
    async fn queued_writes_reach_the_authority_in_order() {
        let env = TestEnv::new();
        env.remote.set_offline(true);

        env.accept("c1").await;
        let receipt = env.submit("c1").await;
        assert_eq!(receipt.sync, SyncState::Pending);
        assert_eq!(env.service.pending_writes().len(), 2);

        env.remote.set_offline(false);
        env.service.resync().await.unwrap();

        let remote = env.remote.user(EMPLOYEE);
        assert_eq!(
            remote.acceptances[&receipt.key].status,
            AcceptanceStatus::Submitted
        );
        assert!(remote.submissions.contains_key(&receipt.key));
        assert!(remote.reviews.contains_key(&receipt.key));
    }

    #[tokio::test]
    async fn timeouts_leave_the_write_pending() {
        let env = TestEnv::new();
        env.remote.set_latency(Duration::from_millis(200));

        let receipt = env.accept("c1").await;
        assert_eq!(receipt.sync, SyncState::Pending);
        assert!(env.remote.user(EMPLOYEE).acceptances.is_empty());

        env.remote.set_latency(Duration::ZERO);
        env.service.resync().await.unwrap();
        assert!(env.service.is_synced(EMPLOYEE, "c1"));
    }

    #[tokio::test]
    async fn restored_writes_are_flushed_on_start() {
        let env = TestEnv::new();
        env.remote.set_offline(true);
        env.accept("c1").await;
        let saved = env.service.pending_writes();

        // A fresh process picks up where the last one stopped.
        let restarted = env.second_device();
        assert_eq!(restarted.restore_pending(saved.clone()), 1);
        assert_eq!(restarted.restore_pending(saved), 0);
        assert_eq!(restarted.effective_status(EMPLOYEE, "c1"), EffectiveStatus::Accepted);

        env.remote.set_offline(false);
        let tasks = restarted.start().await;
        assert!(restarted.is_synced(EMPLOYEE, "c1"));
        assert_eq!(env.remote.user(EMPLOYEE).acceptances.len(), 1);
        for task in tasks {
            task.abort();
        }
    }
}

mod retries {
    use super::*;

    #[tokio::test]
    async fn transient_failures_within_budget_still_sync() {
        let env = TestEnv::new();
        env.remote.fail_next(2);

        let receipt = env.accept("c1").await;
        assert_eq!(receipt.sync, SyncState::Synced);
        assert_eq!(env.remote.apply_calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_report_pending() {
        let env = TestEnv::new();
        env.remote.fail_next(10);

        let receipt = env.accept("c1").await;
        assert_eq!(receipt.sync, SyncState::Pending);
        // First attempt plus three retries.
        assert_eq!(env.remote.apply_calls(), 4);

        env.remote.fail_next(0);
        env.service.resync().await.unwrap();
        assert!(env.service.is_synced(EMPLOYEE, "c1"));
    }

    #[tokio::test]
    async fn lost_acknowledgement_does_not_duplicate_the_write() {
        let env = TestEnv::new();
        env.remote.lose_next_acks(1);

        let receipt = env.accept("c1").await;
        assert_eq!(receipt.sync, SyncState::Synced);
        assert_eq!(env.remote.apply_calls(), 2);
        assert_eq!(env.remote.user(EMPLOYEE).acceptances.len(), 1);
    }
}

mod rejections {
    use super::*;

    #[tokio::test]
    async fn refused_write_is_reported_as_rejected() {
        let env = TestEnv::new();
        env.remote.reject_next(1);

        let receipt = env.accept("c1").await;
        assert_eq!(receipt.sync, SyncState::Rejected);
        assert_eq!(env.remote.apply_calls(), 1);
        assert!(!env.service.is_synced(EMPLOYEE, "c1"));
        assert!(env.service.pending_writes().is_empty());
        assert!(env.remote.user(EMPLOYEE).acceptances.is_empty());

        // The authority never saw the acceptance, so reload takes it back.
        env.service.reload(EMPLOYEE).await.unwrap();
        assert_eq!(env.service.effective_status(EMPLOYEE, "c1"), EffectiveStatus::NotAccepted);
        assert!(env.service.is_synced(EMPLOYEE, "c1"));
        assert!(env.service.can_accept_new(EMPLOYEE));
    }

    #[tokio::test]
    async fn resync_counts_rejected_keys_and_drops_writes_built_on_them() {
        let env = TestEnv::new();
        env.remote.set_offline(true);
        env.accept("c1").await;
        env.submit("c1").await;
        assert_eq!(env.service.pending_writes().len(), 2);

        env.remote.set_offline(false);
        env.remote.reject_next(1);
        let report = env.service.resync().await.unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(report.synced, 0);
        assert_eq!(report.pending, 0);
        assert!(env.service.pending_writes().is_empty());
        assert!(env.remote.user(EMPLOYEE).acceptances.is_empty());
        assert!(!env.service.is_synced(EMPLOYEE, "c1"));
    }
}

mod isolation {
    use super::*;

    #[tokio::test]
    async fn slow_delivery_for_one_user_does_not_hold_up_another() {
        let env = TestEnv::with_config(SyncConfig {
            remote_timeout_ms: 5000,
            ..test_sync_config()
        });
        env.remote
            .set_user_latency(OTHER_EMPLOYEE, Duration::from_millis(1500));

        let service = env.service.clone();
        let slow = tokio::spawn(async move {
            service
                .accept(&Actor::employee(OTHER_EMPLOYEE), OTHER_EMPLOYEE, "c2", day(10))
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        let receipt = env.accept("c1").await;
        let elapsed = started.elapsed();
        assert_eq!(receipt.sync, SyncState::Synced);
        assert!(
            elapsed < Duration::from_millis(500),
            "accept waited {elapsed:?} on another user's delivery"
        );

        let other = slow.await.unwrap().unwrap();
        assert_eq!(other.sync, SyncState::Synced);
        assert!(env.service.is_synced(OTHER_EMPLOYEE, "c2"));
    }
}

mod conflicts {
    use super::*;

    #[tokio::test]
    async fn authority_wins_over_a_stale_device() {
        let env = TestEnv::new();
        env.accept("c1").await;

        let other = env.second_device();
        other.reload(EMPLOYEE).await.unwrap();
        env.set_time(5, 10);
        other.withdraw(&employee(), EMPLOYEE, "c1").await.unwrap();

        // This device has not seen the withdrawal yet.
        let mut rx = env.service.subscribe();
        env.set_time(5, 11);
        let receipt = env
            .service
            .submit(&employee(), EMPLOYEE, "c1", payload("Stale"))
            .await
            .unwrap();
        assert_eq!(receipt.sync, SyncState::Synced);

        assert_eq!(env.service.effective_status(EMPLOYEE, "c1"), EffectiveStatus::Withdrawn);
        assert!(env.service.submission(EMPLOYEE, "c1").is_none());
        assert!(env.remote.user(EMPLOYEE).submissions.is_empty());
        assert_eq!(
            drain(&mut rx),
            vec![ChangeKind::Submitted, ChangeKind::Reconciled]
        );
    }

    #[tokio::test]
    async fn writes_queued_on_a_stale_view_are_discarded() {
        let env = TestEnv::new();
        env.accept("c1").await;

        let other = env.second_device();
        other.reload(EMPLOYEE).await.unwrap();
        env.set_time(5, 10);
        other.withdraw(&employee(), EMPLOYEE, "c1").await.unwrap();

        env.remote.set_offline(true);
        env.set_time(5, 11);
        env.submit("c1").await;
        env.service.withdraw(&employee(), EMPLOYEE, "c1").await.unwrap();
        assert_eq!(env.service.pending_writes().len(), 2);

        env.remote.set_offline(false);
        env.service.resync().await.unwrap();
        assert!(env.service.pending_writes().is_empty());
        assert!(env.service.is_synced(EMPLOYEE, "c1"));
        assert_eq!(
            env.service.acceptance(EMPLOYEE, "c1").unwrap().updated_at,
            env.remote.user(EMPLOYEE).acceptances[&EngagementKey::new(EMPLOYEE, "c1", 1)].updated_at
        );
    }
}

mod reload {
    use super::*;

    #[tokio::test]
    async fn reload_replaces_local_records() {
        let env = TestEnv::new();
        env.remote.seed(EMPLOYEE, |snapshot| {
            let a = active("c2", 9);
            snapshot.acceptances.insert(a.key.clone(), a);
        });

        assert!(env.service.can_accept_new(EMPLOYEE));
        let audit = env.service.reload(EMPLOYEE).await.unwrap();
        assert!(audit.is_none());
        assert_eq!(env.service.effective_status(EMPLOYEE, "c2"), EffectiveStatus::Accepted);
        assert!(!env.service.can_accept_new(EMPLOYEE));
    }

    #[tokio::test]
    async fn unreachable_authority_keeps_local_data() {
        let env = TestEnv::new();
        env.remote.set_offline(true);
        env.accept("c1").await;

        let err = env.service.reload(EMPLOYEE).await.unwrap_err();
        assert!(matches!(
            err,
            engagement::EngagementError::Store(StoreError::Unavailable(_))
        ));
        assert_eq!(env.service.effective_status(EMPLOYEE, "c1"), EffectiveStatus::Accepted);
        assert_eq!(env.service.pending_writes().len(), 1);
    }

    #[tokio::test]
    async fn reload_pushes_pending_writes_first() {
        let env = TestEnv::new();
        env.remote.set_offline(true);
        env.accept("c1").await;
        env.remote.set_offline(false);

        env.service.reload(EMPLOYEE).await.unwrap();
        assert_eq!(env.service.effective_status(EMPLOYEE, "c1"), EffectiveStatus::Accepted);
        assert!(env.service.is_synced(EMPLOYEE, "c1"));
        assert_eq!(env.remote.user(EMPLOYEE).acceptances.len(), 1);
    }

    #[tokio::test]
    async fn submit_failing_three_times_survives_reload() {
        // Three attempts in total, so three failures use up the budget.
        let env = TestEnv::with_config(SyncConfig {
            max_retries: 2,
            ..test_sync_config()
        });
        assert_eq!(env.accept("c1").await.sync, SyncState::Synced);

        env.remote.fail_next(3);
        env.set_time(8, 9);
        let receipt = env
            .service
            .submit(&employee(), EMPLOYEE, "c1", payload("Quarterly report"))
            .await
            .unwrap();
        assert_eq!(receipt.sync, SyncState::Pending);
        assert_eq!(env.remote.apply_calls(), 4);

        assert_eq!(
            env.service.acceptance(EMPLOYEE, "c1").unwrap().status,
            AcceptanceStatus::Submitted
        );
        assert_eq!(env.service.effective_status(EMPLOYEE, "c1"), EffectiveStatus::PendingReview);
        let local = env.service.submission(EMPLOYEE, "c1").unwrap();
        assert_eq!(local.solution.summary, "Quarterly report");
        assert!(env.remote.user(EMPLOYEE).submissions.is_empty());

        // Connectivity is back.
        assert!(env.service.reload(EMPLOYEE).await.unwrap().is_none());
        assert!(env.service.is_synced(EMPLOYEE, "c1"));
        assert!(env.service.pending_writes().is_empty());

        let remote = env.remote.user(EMPLOYEE);
        assert_eq!(remote.submissions.get(&receipt.key), Some(&local));
        assert_eq!(env.service.submission(EMPLOYEE, "c1"), Some(local));
        assert_eq!(
            env.service.acceptance(EMPLOYEE, "c1").as_ref(),
            remote.acceptances.get(&receipt.key)
        );
        assert_eq!(
            env.service.review_of(EMPLOYEE, "c1").as_ref(),
            remote.reviews.get(&receipt.key)
        );
        assert_eq!(env.service.effective_status(EMPLOYEE, "c1"), EffectiveStatus::PendingReview);
    }

    #[tokio::test]
    async fn multiple_active_acceptances_are_repaired() {
        let env = TestEnv::new();
        env.remote.seed(EMPLOYEE, |snapshot| {
            for a in [active("c1", 9), active("c2", 11)] {
                snapshot.acceptances.insert(a.key.clone(), a);
            }
        });
        let mut rx = env.service.subscribe();

        env.set_time(6, 9);
        let audit = env.service.reload(EMPLOYEE).await.unwrap().unwrap();
        assert_eq!(audit.kept, EngagementKey::new(EMPLOYEE, "c2", 1));
        assert_eq!(audit.withdrawn, vec![EngagementKey::new(EMPLOYEE, "c1", 1)]);
        assert_eq!(env.service.audit_log(), vec![audit.clone()]);
        assert_eq!(env.service.audit_history(EMPLOYEE).await.unwrap(), vec![audit]);

        assert_eq!(env.service.effective_status(EMPLOYEE, "c1"), EffectiveStatus::Withdrawn);
        assert_eq!(env.service.effective_status(EMPLOYEE, "c2"), EffectiveStatus::Accepted);
        assert!(env.service.is_synced(EMPLOYEE, "c1"));
        assert_eq!(
            env.remote.user(EMPLOYEE).acceptances[&EngagementKey::new(EMPLOYEE, "c1", 1)].status,
            AcceptanceStatus::Withdrawn
        );

        let kinds = drain(&mut rx);
        assert!(kinds.contains(&ChangeKind::Reloaded));
        assert!(kinds.contains(&ChangeKind::Repaired));
    }
}
