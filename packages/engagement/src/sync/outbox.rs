use std::collections::VecDeque;

use common::EngagementKey;
use common::retry::DeliveryFailure;

use super::remote::PendingWrite;

#[derive(Debug, Clone)]
pub struct QueuedWrite {
    pub write: PendingWrite,
    /// Failures from the last exhausted delivery round.
    pub failures: Vec<DeliveryFailure>,
}

/// FIFO of writes not yet confirmed by the authority.
///
/// Writes for one key are delivered strictly in the order they were queued.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: VecDeque<QueuedWrite>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `write`. Returns false if its `op_id` was already queued.
    pub fn push(&mut self, write: PendingWrite) -> bool {
        if self.queue.iter().any(|q| q.write.op_id == write.op_id) {
            return false;
        }
        self.queue.push_back(QueuedWrite {
            write,
            failures: Vec::new(),
        });
        true
    }

    /// The oldest queued write for `key`.
    pub fn front_for(&self, key: &EngagementKey) -> Option<PendingWrite> {
        self.queue
            .iter()
            .find(|q| &q.write.key == key)
            .map(|q| q.write.clone())
    }

    pub fn has_pending(&self, key: &EngagementKey) -> bool {
        self.queue.iter().any(|q| &q.write.key == key)
    }

    pub fn remove(&mut self, op_id: &str) -> Option<QueuedWrite> {
        let index = self.queue.iter().position(|q| q.write.op_id == op_id)?;
        self.queue.remove(index)
    }

    /// Drop every write queued for `key`.
    pub fn discard_key(&mut self, key: &EngagementKey) -> usize {
        let before = self.queue.len();
        self.queue.retain(|q| &q.write.key != key);
        before - self.queue.len()
    }

    pub fn record_failures(&mut self, op_id: &str, failures: Vec<DeliveryFailure>) {
        if let Some(queued) = self.queue.iter_mut().find(|q| q.write.op_id == op_id) {
            queued.failures = failures;
        }
    }

    /// Distinct keys in the order their first write was queued.
    pub fn keys(&self) -> Vec<EngagementKey> {
        let mut keys: Vec<EngagementKey> = Vec::new();
        for queued in &self.queue {
            if !keys.contains(&queued.write.key) {
                keys.push(queued.write.key.clone());
            }
        }
        keys
    }

    pub fn keys_for(&self, username: &str) -> Vec<EngagementKey> {
        self.keys()
            .into_iter()
            .filter(|key| key.username == username)
            .collect()
    }

    pub fn writes(&self) -> Vec<QueuedWrite> {
        self.queue.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
