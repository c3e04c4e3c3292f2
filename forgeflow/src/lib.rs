//! # Forgeflow
//!
//! Build and deploy pipeline orchestration.
//!
//! Forgeflow runs jobs against registered targets with support for:
//!
//! - **Ordered steps**: Each target declares steps run in order with per-step timeouts and retries
//! - **Bounded concurrency**: A FIFO gate caps how many jobs run at once
//! - **Build caching**: Unchanged builds complete from cache without running a step
//! - **Automatic rollback**: Failed deploys redeploy the last known good version
//! - **Failure analysis**: Failures are grouped into recurring patterns with suggested fixes
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use forgeflow::prelude::*;
//!
//! let engine = Engine::builder()
//!     .with_target(
//!         Target::build("web")
//!             .with_step(StepTemplate::new("install", StepKind::Install, "npm ci"))
//!             .with_step(StepTemplate::new("bundle", StepKind::Bundle, "npm run build")),
//!     )
//!     .build()?;
//!
//! let job_id = engine.start_build(BuildRequest::new("web", "1.4.0"))?;
//! let job = engine.wait_for_job(&job_id, Duration::from_secs(60)).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod analysis;
pub mod cache;
pub mod cancellation;
pub mod concurrency;
pub mod config;
pub mod core;
pub mod engine;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod rollback;
pub mod store;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::analysis::{AnalysisReport, FailureAnalyzer, FailureCategory, FailurePattern};
    pub use crate::cache::{CacheStats, CacheStore, InMemoryCacheStore};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{AdmissionMode, CacheConfig, EngineConfig, ForgeflowConfig};
    pub use crate::core::{
        Artifact, ArtifactSpec, Job, JobStatus, LogEntry, LogLevel, StepKind, StepRun,
        StepStatus, StepTemplate, Target, TargetKind,
    };
    pub use crate::engine::{BuildRequest, DeployRequest, Engine, EngineBuilder, EngineRequest};
    pub use crate::errors::{ForgeflowError, Result};
    pub use crate::events::{EngineEvent, EventKind, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::pipeline::{CommandExecutor, RetryConfig, ShellCommandExecutor};
    pub use crate::utils::{generate_uuid, iso_timestamp, Timestamp};
    pub use std::time::Duration;
}
