//! Event bus for lifecycle observation
//!
//! Pub/sub over a Tokio broadcast channel. Publishing never fails an engine
//! operation: with no subscribers the event is simply dropped.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::LifecycleEvent;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Broadcast bus for [`LifecycleEvent`]s
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: LifecycleEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "Event published"),
            Err(_) => debug!(event_type, "Event published (no receivers)"),
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Subscribe to events for one session only
    pub fn subscribe_session(&self, session_id: &str) -> SessionReceiver {
        SessionReceiver {
            receiver: self.subscribe(),
            session_id: session_id.to_string(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver that only yields events for a single session
pub struct SessionReceiver {
    receiver: broadcast::Receiver<LifecycleEvent>,
    session_id: String,
}

impl SessionReceiver {
    /// Receive the next event for this session
    pub async fn recv(&mut self) -> Result<LifecycleEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if event.session_id() == self.session_id {
                return Ok(event);
            }
        }
    }
}
