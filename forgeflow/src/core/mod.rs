//! Core domain model types for forgeflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Step, job and target kind/status enums
//! - Target and step templates
//! - Jobs, step runs, log entries and artifacts

mod artifact;
mod job;
mod log;
mod status;
mod target;

pub use artifact::{Artifact, ArtifactSpec};
pub use job::{Job, StepRun};
pub use log::{LogEntry, LogLevel};
pub use status::{JobStatus, StepKind, StepStatus, TargetKind};
pub use target::{StepTemplate, Target};
