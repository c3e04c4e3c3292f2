//! Target and step templates.

use super::{ArtifactSpec, StepKind, TargetKind};
use crate::errors::{ForgeflowError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

fn default_timeout_ms() -> u64 {
    300_000
}

fn default_required() -> bool {
    true
}

fn default_enabled() -> bool {
    true
}

/// One unit of work within a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTemplate {
    /// Unique id within the target.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// What the step does.
    pub kind: StepKind,
    /// Opaque command handed to the command executor.
    pub command: String,
    /// Wall-clock budget for a single attempt.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Extra attempts after the first failure.
    #[serde(default)]
    pub max_retries: u32,
    /// Whether a failure aborts the job.
    #[serde(default = "default_required")]
    pub required: bool,
}

impl StepTemplate {
    /// Creates a required step with no retries and the default timeout.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: StepKind, command: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            command: command.into(),
            timeout_ms: default_timeout_ms(),
            max_retries: 0,
            required: true,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Marks the step optional; its failure only logs a warning.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// The per-attempt timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Total attempts allowed (`1 + max_retries`).
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// A registered build or deploy target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Unique id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Build or deploy.
    #[serde(default)]
    pub kind: TargetKind,
    /// Steps in execution order.
    pub steps: Vec<StepTemplate>,
    /// Where outputs land.
    #[serde(default)]
    pub output_dir: String,
    /// Disabled targets reject new jobs.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Overrides the kind-based cacheability default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cacheable: Option<bool>,
    /// Declared outputs, turned into artifacts on success.
    #[serde(default)]
    pub outputs: Vec<ArtifactSpec>,
    /// Initial last-known-good version for rollbacks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_version: Option<String>,
}

impl Target {
    /// Creates an enabled target with no steps.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: TargetKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            steps: Vec::new(),
            output_dir: String::new(),
            enabled: true,
            cacheable: None,
            outputs: Vec::new(),
            baseline_version: None,
        }
    }

    /// Creates a build target.
    #[must_use]
    pub fn build(id: impl Into<String>) -> Self {
        Self::new(id, TargetKind::Build)
    }

    /// Creates a deploy target.
    #[must_use]
    pub fn deploy(id: impl Into<String>) -> Self {
        Self::new(id, TargetKind::Deploy)
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Appends a step.
    #[must_use]
    pub fn with_step(mut self, step: StepTemplate) -> Self {
        self.steps.push(step);
        self
    }

    /// Sets the output directory.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<String>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Declares an output.
    #[must_use]
    pub fn with_output(mut self, output: ArtifactSpec) -> Self {
        self.outputs.push(output);
        self
    }

    /// Overrides cacheability.
    #[must_use]
    pub fn with_cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = Some(cacheable);
        self
    }

    /// Sets the baseline version used when no deploy has succeeded yet.
    #[must_use]
    pub fn with_baseline_version(mut self, version: impl Into<String>) -> Self {
        self.baseline_version = Some(version.into());
        self
    }

    /// Sets the enabled flag.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Whether jobs for this target consult the cache.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.cacheable
            .unwrap_or(matches!(self.kind, TargetKind::Build))
    }

    /// Whether failed jobs for this target may be rolled back.
    #[must_use]
    pub fn supports_rollback(&self) -> bool {
        matches!(self.kind, TargetKind::Deploy)
    }

    /// Looks up a step template by id.
    #[must_use]
    pub fn step(&self, id: &str) -> Option<&StepTemplate> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Checks the definition for structural problems.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| ForgeflowError::InvalidTarget {
            target: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("target id must not be empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(invalid("target must declare at least one step".to_string()));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(invalid("step id must not be empty".to_string()));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(invalid(format!("duplicate step id '{}'", step.id)));
            }
            if step.timeout_ms == 0 {
                return Err(invalid(format!("step '{}' has a zero timeout", step.id)));
            }
        }
        Ok(())
    }
}
