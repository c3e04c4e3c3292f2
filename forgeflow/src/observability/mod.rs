//! Observability utilities.
//!
//! Components log through `tracing` with `job_id`, `target_id` and
//! `step_id` fields; this module installs a subscriber and builds the
//! per-job span the engine runs each job under.

mod logging;
mod spans;

pub use logging::{init_logging, LogFormat, DEFAULT_FILTER};
pub use spans::job_span;
