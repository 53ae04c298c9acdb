use common::ChangeEvent;
use tokio::sync::broadcast;
use tracing::debug;

/// Fan-out of committed changes to interested views.
///
/// Publishing never blocks and never fails the mutation that triggered it.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ChangeEvent) {
        debug!(
            username = %event.username,
            challenge_id = %event.challenge_id,
            topic = event.kind.topic(),
            "Publishing change event"
        );
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}
