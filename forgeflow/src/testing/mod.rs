//! Testing utilities for forgeflow engines.
//!
//! This module provides:
//! - Deterministic command executors (scripted and blocking)
//! - Target fixtures
//! - Assertions over jobs and collected events

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_event_types, assert_job_status, assert_step_status};
pub use fixtures::{build_target, deploy_target, engine_with, web_prod_target};
pub use mocks::{BlockingExecutor, ScriptedExecutor, StepScript};
