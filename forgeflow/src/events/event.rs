//! Event payloads.

use crate::core::Job;
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which terminal transition an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A job completed.
    JobCompleted,
    /// A job failed.
    JobFailed,
    /// A running job was cancelled.
    JobCancelled,
    /// A rollback job restored the last known good version.
    RollbackCompleted,
    /// A rollback job failed; not retried.
    RollbackFailed,
}

impl EventKind {
    /// Dotted event type string ("job.completed", ...).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JobCompleted => "job.completed",
            Self::JobFailed => "job.failed",
            Self::JobCancelled => "job.cancelled",
            Self::RollbackCompleted => "rollback.completed",
            Self::RollbackFailed => "rollback.failed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event with the terminal job it concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineEvent {
    /// What happened.
    pub kind: EventKind,
    /// Snapshot of the job at emission time.
    pub job: Job,
    /// When the event was emitted.
    pub emitted_at: Timestamp,
}

impl EngineEvent {
    /// Creates an event for a job snapshot.
    #[must_use]
    pub fn new(kind: EventKind, job: Job) -> Self {
        Self {
            kind,
            job,
            emitted_at: now_utc(),
        }
    }

    /// Dotted event type string.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        self.kind.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_strings() {
        assert_eq!(EventKind::JobCompleted.as_str(), "job.completed");
        assert_eq!(EventKind::RollbackFailed.to_string(), "rollback.failed");
    }

    #[test]
    fn test_event_kind_serialize() {
        let json = serde_json::to_string(&EventKind::JobCancelled).unwrap();
        assert_eq!(json, r#""job_cancelled""#);
    }
}
