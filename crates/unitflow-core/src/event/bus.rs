//! In-process fan-out of `WorkflowEvent`s.
//!
//! Every engine publishes its lifecycle events here; observers subscribe and
//! see everything published after they subscribed. Delivery is best effort:
//! a receiver that falls more than `capacity` events behind gets `Lagged`.

use tokio::sync::broadcast;
use unitflow_types::event::WorkflowEvent;

/// Shared lifecycle event stream. Clones publish into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    /// Send `event` to current subscribers. Returns how many received it;
    /// zero when nobody is listening.
    pub fn publish(&self, event: WorkflowEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.receiver_count())
            .finish()
    }
}
