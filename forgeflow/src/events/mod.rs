//! Outbound events for observability collaborators.
//!
//! Each terminal transition produces exactly one [`EngineEvent`] carrying
//! the full job snapshot. Events are published after the snapshot has been
//! written to the job store, so a subscriber that calls `get_job` on receipt
//! always sees the terminal state.

mod bus;
mod event;
mod sink;

pub use bus::EventBus;
pub use event::{EngineEvent, EventKind};
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
