//! Step, job and target kind/status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of work a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Dependency installation.
    Install,
    /// Source compilation.
    Compile,
    /// Test suite execution.
    Test,
    /// Bundling of compiled output.
    Bundle,
    /// Post-build optimisation.
    Optimize,
    /// Packaging for distribution.
    Package,
    /// Pushing a package to an environment.
    Deploy,
    /// Probing a deployed environment.
    HealthCheck,
    /// Reverting an environment.
    Rollback,
}

impl StepKind {
    /// All step kinds in pipeline order.
    pub const ALL: [Self; 9] = [
        Self::Install,
        Self::Compile,
        Self::Test,
        Self::Bundle,
        Self::Optimize,
        Self::Package,
        Self::Deploy,
        Self::HealthCheck,
        Self::Rollback,
    ];

    /// Returns true for kinds whose success leaves something on disk.
    #[must_use]
    pub fn produces_output(&self) -> bool {
        matches!(self, Self::Compile | Self::Bundle | Self::Optimize | Self::Package)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Compile => write!(f, "compile"),
            Self::Test => write!(f, "test"),
            Self::Bundle => write!(f, "bundle"),
            Self::Optimize => write!(f, "optimize"),
            Self::Package => write!(f, "package"),
            Self::Deploy => write!(f, "deploy"),
            Self::HealthCheck => write!(f, "health_check"),
            Self::Rollback => write!(f, "rollback"),
        }
    }
}

/// The execution status of a single step run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet started.
    #[default]
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully (or satisfied from cache).
    Completed,
    /// Exhausted its attempts.
    Failed,
    /// Never ran because the job stopped early.
    Skipped,
    /// Interrupted by job cancellation.
    Cancelled,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl StepStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, waiting for a slot.
    #[default]
    Pending,
    /// Holding a slot and executing steps.
    Running,
    /// Every required step completed.
    Completed,
    /// A required step failed.
    Failed,
    /// Cancelled while running.
    Cancelled,
    /// Failed, then restored by a successful rollback job.
    RolledBack,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::RolledBack => write!(f, "rolled_back"),
        }
    }
}

impl JobStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::RolledBack
        )
    }

    /// Checks whether moving to `next` is a legal transition.
    ///
    /// `Failed -> RolledBack` is the single exit from a terminal status.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running | Self::Failed) => true,
            (Self::Running, Self::Completed | Self::Failed | Self::Cancelled) => true,
            (Self::Failed, Self::RolledBack) => true,
            _ => false,
        }
    }
}

/// Which of the two pipeline families a target belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Produces artifacts; cacheable by default.
    #[default]
    Build,
    /// Changes an environment; eligible for automatic rollback.
    Deploy,
}

impl TargetKind {
    /// Label used for the running phase ("building" / "deploying").
    #[must_use]
    pub fn running_label(&self) -> &'static str {
        match self {
            Self::Build => "building",
            Self::Deploy => "deploying",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build => write!(f, "build"),
            Self::Deploy => write!(f, "deploy"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_kind_display() {
        assert_eq!(StepKind::HealthCheck.to_string(), "health_check");
        assert_eq!(StepKind::Compile.to_string(), "compile");
        assert_eq!(StepKind::ALL.len(), 9);
    }

    #[test]
    fn test_step_kind_serialize() {
        let json = serde_json::to_string(&StepKind::HealthCheck).unwrap();
        assert_eq!(json, r#""health_check""#);
        let kind: StepKind = serde_json::from_str(r#""optimize""#).unwrap();
        assert_eq!(kind, StepKind::Optimize);
    }

    #[test]
    fn test_step_status_terminal() {
        assert!(StepStatus::Completed.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
        assert!(!StepStatus::Pending.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
        assert!(StepStatus::Cancelled.is_failure());
    }

    #[test]
    fn test_job_status_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Failed.can_transition_to(JobStatus::RolledBack));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::RolledBack.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn test_job_status_serialize() {
        let json = serde_json::to_string(&JobStatus::RolledBack).unwrap();
        assert_eq!(json, r#""rolled_back""#);
    }

    #[test]
    fn test_target_kind_label() {
        assert_eq!(TargetKind::Build.running_label(), "building");
        assert_eq!(TargetKind::Deploy.running_label(), "deploying");
    }
}
