//! Observer registry with broadcast fan-out.

use super::{EngineEvent, EventSink};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Delivers events to registered sinks and broadcast subscribers.
///
/// Sinks are called synchronously in registration order, so every sink
/// observes events in the order they were published.
pub struct EventBus {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Creates a bus whose broadcast channel buffers `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sinks: RwLock::new(Vec::new()),
            sender,
        }
    }

    /// Registers an observer.
    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    /// Number of registered observers.
    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.sinks.read().len()
    }

    /// Opens a new broadcast subscription.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event to every observer and subscriber.
    pub fn publish(&self, event: EngineEvent) {
        trace!(event_type = event.event_type(), job_id = %event.job.id, "Publishing event");
        let sinks: Vec<Arc<dyn EventSink>> = self.sinks.read().clone();
        for sink in sinks {
            sink.try_emit(&event);
        }
        // no receivers is fine
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("sinks", &self.sink_count())
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
