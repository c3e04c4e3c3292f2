//! Event sink trait and implementations.

use super::EngineEvent;
use async_trait::async_trait;
use tracing::{debug, info, warn, Level};

/// Trait for event sinks that can receive events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: &EngineEvent) {
        self.try_emit(event);
    }

    /// Emits an event without blocking.
    ///
    /// This method must never panic; errors are logged and suppressed.
    fn try_emit(&self, event: &EngineEvent);
}

/// A no-op event sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    fn try_emit(&self, _event: &EngineEvent) {}
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    fn try_emit(&self, event: &EngineEvent) {
        let job = &event.job;
        match self.level {
            Level::DEBUG | Level::TRACE => debug!(
                event_type = event.event_type(),
                job_id = %job.id,
                target_id = %job.target_id,
                status = %job.status,
                "Event: {}", event.event_type()
            ),
            Level::WARN | Level::ERROR => warn!(
                event_type = event.event_type(),
                job_id = %job.id,
                target_id = %job.target_id,
                status = %job.status,
                "Event: {}", event.event_type()
            ),
            _ => info!(
                event_type = event.event_type(),
                job_id = %job.id,
                target_id = %job.target_id,
                status = %job.status,
                duration_ms = job.duration_ms,
                "Event: {}", event.event_type()
            ),
        }
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<EngineEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.read().clone()
    }

    /// Returns the event type strings in emission order.
    #[must_use]
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events.read().iter().map(EngineEvent::event_type).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events concerning one job.
    #[must_use]
    pub fn events_for_job(&self, job_id: &str) -> Vec<EngineEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.job.id == job_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    fn try_emit(&self, event: &EngineEvent) {
        self.events.write().push(event.clone());
    }
}
