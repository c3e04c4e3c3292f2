//! Error types for the forgeflow engine.
//!
//! Admission-time problems (unknown or disabled targets, a full gate in
//! reject mode) are returned synchronously to the caller. Everything that
//! goes wrong while a job executes is recorded on the job itself and never
//! surfaces as an `Err` from the request API.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for forgeflow operations.
#[derive(Debug, Error)]
pub enum ForgeflowError {
    /// No target is registered under the requested id.
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    /// The target exists but is disabled.
    #[error("Target disabled: {0}")]
    TargetDisabled(String),

    /// The concurrency gate is configured to reject and has no free slot.
    #[error("Concurrency exhausted: all {limit} job slots are in use")]
    ConcurrencyExhausted {
        /// Configured `max_concurrent_jobs`.
        limit: usize,
    },

    /// A step exceeded its wall-clock timeout.
    #[error("Step '{step}' timed out after {timeout_ms}ms")]
    StepTimeout {
        /// The step id.
        step: String,
        /// The timeout that was exceeded.
        timeout_ms: u64,
    },

    /// A step's command reported failure.
    #[error("Step '{step}' failed: {reason}")]
    StepExecutionFailed {
        /// The step id.
        step: String,
        /// Failure description from the command executor.
        reason: String,
    },

    /// A rollback job could not restore the previous version.
    #[error("Rollback of job {job_id} failed: {reason}")]
    RollbackFailed {
        /// The original (failed) job id.
        job_id: String,
        /// Why the rollback failed.
        reason: String,
    },

    /// A cache backend returned an unusable entry.
    #[error("{0}")]
    CacheCorruption(#[from] CacheError),

    /// No job is recorded under the requested id.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The job is not in a state that allows the requested operation.
    #[error("Job {job_id} is {status}; {operation} is not allowed")]
    InvalidJobState {
        /// The job id.
        job_id: String,
        /// The job's current status.
        status: String,
        /// The rejected operation.
        operation: String,
    },

    /// A target with the same id is already registered.
    #[error("Duplicate target id: {0}")]
    DuplicateTarget(String),

    /// A target definition failed validation.
    #[error("Invalid target '{target}': {reason}")]
    InvalidTarget {
        /// The target id (possibly empty).
        target: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForgeflowError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::TargetNotFound(_) => "TargetNotFound",
            Self::TargetDisabled(_) => "TargetDisabled",
            Self::ConcurrencyExhausted { .. } => "ConcurrencyExhausted",
            Self::StepTimeout { .. } => "StepTimeout",
            Self::StepExecutionFailed { .. } => "StepExecutionFailed",
            Self::RollbackFailed { .. } => "RollbackFailed",
            Self::CacheCorruption(_) => "CacheCorruption",
            Self::JobNotFound(_) => "JobNotFound",
            Self::InvalidJobState { .. } => "InvalidJobState",
            Self::DuplicateTarget(_) => "DuplicateTarget",
            Self::InvalidTarget { .. } => "InvalidTarget",
            Self::Config(_) => "Config",
            Self::Serialization(_) => "Serialization",
            Self::Io(_) => "Io",
        }
    }

    /// Returns true for errors raised while admitting a request.
    #[must_use]
    pub fn is_admission_error(&self) -> bool {
        matches!(
            self,
            Self::TargetNotFound(_) | Self::TargetDisabled(_) | Self::ConcurrencyExhausted { .. }
        )
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.code()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Errors reported by a cache backend.
///
/// The executor treats every variant as a miss.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The stored entry does not match the key it was filed under.
    #[error("Cache corruption for key '{key}': {reason}")]
    Corrupted {
        /// The key that was looked up.
        key: String,
        /// What the backend found wrong.
        reason: String,
    },

    /// The backend could not be reached.
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),
}

impl CacheError {
    /// Creates a corruption error.
    #[must_use]
    pub fn corrupted(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Failure reported by a [`CommandExecutor`](crate::pipeline::CommandExecutor).
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandError {
    /// The command did not finish within its time budget.
    #[error("command timed out after {timeout_ms}ms")]
    Timeout {
        /// The budget that was exceeded.
        timeout_ms: u64,
    },

    /// The command ran and exited unsuccessfully.
    #[error("command exited with status {exit_code:?}: {stderr}")]
    Failed {
        /// Exit code, when the process reported one.
        exit_code: Option<i32>,
        /// Captured error text.
        stderr: String,
    },

    /// The command could not be started at all.
    #[error("command could not be spawned: {0}")]
    Spawn(String),
}

impl CommandError {
    /// Creates a failure with an error message and no exit code.
    #[must_use]
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self::Failed {
            exit_code: None,
            stderr: stderr.into(),
        }
    }

    /// Returns true if this error is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ForgeflowError>;
