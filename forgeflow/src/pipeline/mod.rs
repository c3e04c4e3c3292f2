//! Pipeline execution.
//!
//! This module provides:
//! - The command execution boundary and the shell executor
//! - The step runner with timeouts and retry budgets
//! - Retry backoff configuration
//! - The per-job pipeline executor

mod command;
mod executor;
mod retry;
mod runner;

pub use command::{CommandExecutor, CommandOutput, CommandRequest, ShellCommandExecutor};
pub use executor::PipelineExecutor;
pub use retry::{BackoffStrategy, JitterStrategy, RetryConfig};
pub use runner::{StepContext, StepRunner};
