use openmem_types::Observation;
use tokio::sync::broadcast;

/// Observation lifecycle events, emitted only after the row is durable
#[derive(Debug, Clone)]
pub enum ObservationEvent {
    Created(Observation),
    Revised {
        predecessor_id: String,
        observation: Observation,
    },
    /// Conflict evaluation discarded the capture
    Dropped {
        session_id: String,
        call_id: String,
    },
    Tombstoned {
        id: String,
    },
}

/// Broadcast fan-out with non-blocking sends. Slow subscribers lose events
/// instead of back-pressuring the pipeline; listeners observe the gap as a
/// `Lagged` receive error.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ObservationEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ObservationEvent> {
        self.sender.subscribe()
    }

    /// Fire-and-forget: an error just means nobody is listening
    pub fn emit(&self, event: ObservationEvent) {
        let _ = self.sender.send(event);
    }
}
