use std::sync::Arc;

use ::common::config::SyncConfig;
use ::common::{Actor, ChangeEvent, ChangeKind, Challenge, SubmissionPayload};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use engagement::{EngagementService, ManualClock, MemoryCatalog, MemoryRemote};
use tokio::sync::broadcast;

pub const EMPLOYEE: &str = "alice";
pub const OTHER_EMPLOYEE: &str = "bob";
pub const MANAGER: &str = "carol";

/// One engagement service wired to an in-memory authority and a manual clock.
pub struct TestEnv {
    pub service: EngagementService,
    pub remote: Arc<MemoryRemote>,
    pub catalog: Arc<MemoryCatalog>,
    pub clock: Arc<ManualClock>,
    config: SyncConfig,
}

/// Fast retries and a short timeout so failure paths finish quickly.
pub fn test_sync_config() -> SyncConfig {
    SyncConfig {
        max_retries: 3,
        base_delay_ms: 0,
        max_delay_ms: 0,
        remote_timeout_ms: 50,
        resync_interval_secs: 3600,
        notify_capacity: 64,
    }
}

/// 2024-01-`day`.
pub fn day(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).expect("valid test date")
}

pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0)
        .single()
        .expect("valid test time")
}

pub fn employee() -> Actor {
    Actor::employee(EMPLOYEE)
}

pub fn manager() -> Actor {
    Actor::manager(MANAGER)
}

pub fn payload(summary: &str) -> SubmissionPayload {
    SubmissionPayload {
        summary: summary.to_string(),
        details: "Steps and results".to_string(),
        attachment_urls: vec!["https://files.example.com/report.pdf".to_string()],
    }
}

impl TestEnv {
    /// Catalog: `c1` worth 500 (late penalty 50), `c2` worth 300, `c3` worth 40.
    pub fn new() -> Self {
        Self::with_config(test_sync_config())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        let catalog = Arc::new(MemoryCatalog::new([
            Challenge::new("c1", 500),
            Challenge::new("c2", 300),
            Challenge::new("c3", 40),
        ]));
        let remote = Arc::new(MemoryRemote::new());
        let clock = Arc::new(ManualClock::new(at(5, 9)));
        let service = EngagementService::with_clock(
            catalog.clone(),
            remote.clone(),
            config.clone(),
            clock.clone(),
        );
        Self {
            service,
            remote,
            catalog,
            clock,
            config,
        }
    }

    /// Another client of the same authority with its own empty local store.
    pub fn second_device(&self) -> EngagementService {
        EngagementService::with_clock(
            self.catalog.clone(),
            self.remote.clone(),
            self.config.clone(),
            self.clock.clone(),
        )
    }

    pub fn set_time(&self, day: u32, hour: u32) {
        self.clock.set(at(day, hour));
    }

    /// Accept `challenge_id` for [`EMPLOYEE`] committing to 2024-01-10.
    pub async fn accept(&self, challenge_id: &str) -> engagement::Receipt {
        self.service
            .accept(&employee(), EMPLOYEE, challenge_id, day(10))
            .await
            .expect("accept should succeed")
    }

    pub async fn submit(&self, challenge_id: &str) -> engagement::Receipt {
        self.service
            .submit(&employee(), EMPLOYEE, challenge_id, payload("Done"))
            .await
            .expect("submit should succeed")
    }
}

/// Drain every event currently buffered on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<ChangeEvent>) -> Vec<ChangeKind> {
    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind);
    }
    kinds
}
