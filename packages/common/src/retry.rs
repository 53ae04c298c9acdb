//! Bounded retry bookkeeping for writes pushed to the authority.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// One failed delivery of a pending write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFailure {
    /// 1-based, counted within one delivery round.
    pub attempt: u8,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the backoff of `attempt`, then try again.
    Retry { attempt: u8 },
    /// Budget spent. The write stays queued for the next resync.
    Exhausted { failures: Vec<DeliveryFailure> },
}

#[derive(Debug)]
struct Pending {
    failures: Vec<DeliveryFailure>,
    touched: Instant,
}

/// Failure counts per operation id.
///
/// An entry only exists while a delivery round for that op is in flight.
#[derive(Debug, Default)]
pub struct RetryTracker {
    ops: HashMap<String, Pending>,
    /// Retries granted after the first failure.
    max_retries: u8,
}

impl RetryTracker {
    pub fn new(max_retries: u8) -> Self {
        Self {
            ops: HashMap::new(),
            max_retries,
        }
    }

    pub fn record_failure(&mut self, op_id: &str, error: &str) -> RetryDecision {
        let pending = self.ops.entry(op_id.to_string()).or_insert_with(|| Pending {
            failures: Vec::new(),
            touched: Instant::now(),
        });

        let attempt = u8::try_from(pending.failures.len() + 1).unwrap_or(u8::MAX);
        pending.touched = Instant::now();
        pending.failures.push(DeliveryFailure {
            attempt,
            error: error.to_string(),
            failed_at: Utc::now(),
        });

        if attempt <= self.max_retries {
            return RetryDecision::Retry { attempt };
        }
        let failures = self
            .ops
            .remove(op_id)
            .map(|p| p.failures)
            .unwrap_or_default();
        RetryDecision::Exhausted { failures }
    }

    pub fn clear(&mut self, op_id: &str) {
        self.ops.remove(op_id);
    }

    /// Failures recorded so far in the current round.
    pub fn failures(&self, op_id: &str) -> usize {
        self.ops.get(op_id).map_or(0, |p| p.failures.len())
    }

    /// Forget rounds not touched within `max_age`. Returns how many were dropped.
    pub fn prune(&mut self, max_age: Duration) -> usize {
        let before = self.ops.len();
        self.ops.retain(|_, p| p.touched.elapsed() < max_age);
        before - self.ops.len()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Exponential backoff with up to 25% jitter, capped at `max_ms`.
///
/// `attempt` 1 waits `base_ms`, each further attempt doubles it.
pub fn calculate_backoff(attempt: u8, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 || base_ms == 0 {
        return Duration::ZERO;
    }

    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(u32::from(attempt - 1)));
    let jitter = rand::rng().random_range(0..=delay_ms / 4);
    Duration::from_millis(delay_ms.saturating_add(jitter).min(max_ms))
}

/// Drops an op's retry entry if the delivery future is cancelled mid-round.
pub struct RetryCleanupGuard<'a> {
    tracker: &'a Arc<Mutex<RetryTracker>>,
    op_id: String,
    defused: bool,
}

impl<'a> RetryCleanupGuard<'a> {
    pub fn new(tracker: &'a Arc<Mutex<RetryTracker>>, op_id: impl Into<String>) -> Self {
        Self {
            tracker,
            op_id: op_id.into(),
            defused: false,
        }
    }

    pub fn defuse(&mut self) {
        self.defused = true;
    }
}

impl Drop for RetryCleanupGuard<'_> {
    fn drop(&mut self) {
        if self.defused {
            return;
        }
        match self.tracker.try_lock() {
            Ok(mut tracker) => tracker.clear(&self.op_id),
            // Contended; the periodic prune picks it up.
            Err(_) => debug!(op_id = %self.op_id, "Retry entry left for cleanup task"),
        }
    }
}

pub fn spawn_cleanup_task(
    tracker: Arc<Mutex<RetryTracker>>,
    cleanup_interval: Duration,
    max_age: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);
        loop {
            interval.tick().await;
            let removed = tracker.lock().await.prune(max_age);
            if removed > 0 {
                info!(removed, "Pruned abandoned retry entries");
            }
        }
    })
}
