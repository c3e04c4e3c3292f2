//! Cooperative job cancellation.
//!
//! Every running job owns a [`CancellationToken`]; the engine keeps them in
//! a [`CancellationRegistry`] keyed by job id so `cancel_job` can reach the
//! job's task.

mod registry;
mod token;

pub use registry::CancellationRegistry;
pub use token::CancellationToken;
