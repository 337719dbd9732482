use tokio::sync::broadcast;
use tracing::{debug, instrument};

use super::EngineEvent;

pub const EVENT_BUS_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        debug!("EventBus initialized with capacity: {}", EVENT_BUS_CAPACITY);
        Self { tx }
    }

    /// Publishes to current subscribers and returns how many received it.
    ///
    /// Having no subscribers is normal and not an error.
    #[instrument(skip(self, event), fields(event = event.name()))]
    pub fn publish(&self, event: EngineEvent) -> usize {
        match self.tx.send(event) {
            Ok(subscriber_count) => subscriber_count,
            Err(_) => {
                debug!("No subscribers for engine event");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
