//! Jobs and their per-step runs.

use super::{Artifact, JobStatus, LogEntry, LogLevel, StepKind, StepStatus, StepTemplate, Target, TargetKind};
use crate::errors::{ForgeflowError, Result};
use crate::utils::{duration_ms_between, now_utc, prefixed_id, Timestamp};
use serde::{Deserialize, Serialize};

/// One step template instantiated for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRun {
    /// The template's id.
    pub step_id: String,
    /// The template's name.
    pub name: String,
    /// The template's kind.
    pub kind: StepKind,
    /// Copied from the template so the run is self-describing.
    pub required: bool,
    /// Current status.
    pub status: StepStatus,
    /// When the first attempt started.
    pub started_at: Option<Timestamp>,
    /// When the last attempt ended.
    pub ended_at: Option<Timestamp>,
    /// Wall-clock time across all attempts.
    pub duration_ms: u64,
    /// Captured output of the successful attempt.
    pub output: Option<String>,
    /// Error of the last failed attempt.
    pub error: Option<String>,
    /// Number of attempts made.
    pub attempts: u32,
    /// Satisfied by a cache hit rather than execution.
    pub from_cache: bool,
}

impl StepRun {
    /// Creates a pending run for a template.
    #[must_use]
    pub fn pending(template: &StepTemplate) -> Self {
        Self {
            step_id: template.id.clone(),
            name: template.name.clone(),
            kind: template.kind,
            required: template.required,
            status: StepStatus::Pending,
            started_at: None,
            ended_at: None,
            duration_ms: 0,
            output: None,
            error: None,
            attempts: 0,
            from_cache: false,
        }
    }

    /// Marks the run as started now.
    pub fn start(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(now_utc());
    }

    /// Moves the run to a terminal status, stamping the end time.
    pub fn finish(&mut self, status: StepStatus) {
        let ended = now_utc();
        self.status = status;
        self.ended_at = Some(ended);
        if let Some(started) = self.started_at {
            self.duration_ms = duration_ms_between(started, ended);
        }
    }
}

/// One execution of a target for a specific version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique id.
    pub id: String,
    /// The target being run.
    pub target_id: String,
    /// Build or deploy, copied from the target.
    pub target_kind: TargetKind,
    /// Requested version.
    pub version: String,
    /// Advisory priority; admission is FIFO regardless.
    pub priority: i32,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Per-step runs in declared order.
    pub steps: Vec<StepRun>,
    /// Outputs of a completed job.
    pub artifacts: Vec<Artifact>,
    /// Append-only log.
    pub logs: Vec<LogEntry>,
    /// Key consulted in the cache store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    /// Whether the job was satisfied from cache.
    pub cache_hit: bool,
    /// Set on compensating jobs created by the rollback controller.
    pub rollback: bool,
    /// The failed job a rollback job compensates for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_job_id: Option<String>,
    /// The rollback job linked to this failed job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_job_id: Option<String>,
    /// Terminal error summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the request was accepted.
    pub created_at: Timestamp,
    /// When the job started running.
    pub started_at: Option<Timestamp>,
    /// When the job reached a terminal status.
    pub ended_at: Option<Timestamp>,
    /// Running time from start to end.
    pub duration_ms: u64,
}

impl Job {
    /// Creates a pending job with one pending run per target step.
    #[must_use]
    pub fn new(target: &Target, version: impl Into<String>, priority: i32) -> Self {
        Self {
            id: prefixed_id("job"),
            target_id: target.id.clone(),
            target_kind: target.kind,
            version: version.into(),
            priority,
            status: JobStatus::Pending,
            steps: target.steps.iter().map(StepRun::pending).collect(),
            artifacts: Vec::new(),
            logs: Vec::new(),
            cache_key: None,
            cache_hit: false,
            rollback: false,
            original_job_id: None,
            rollback_job_id: None,
            error: None,
            created_at: now_utc(),
            started_at: None,
            ended_at: None,
            duration_ms: 0,
        }
    }

    /// Creates the compensating job for a failed deploy.
    #[must_use]
    pub fn rollback_of(original: &Self, target: &Target, version: impl Into<String>) -> Self {
        let mut job = Self::new(target, version, original.priority);
        job.id = prefixed_id("rollback");
        job.rollback = true;
        job.original_job_id = Some(original.id.clone());
        job
    }

    /// Applies a status transition, rejecting illegal ones.
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ForgeflowError::InvalidJobState {
                job_id: self.id.clone(),
                status: self.status.to_string(),
                operation: format!("transition to {next}"),
            });
        }

        let now = now_utc();
        match next {
            JobStatus::Running => self.started_at = Some(now),
            JobStatus::RolledBack => {}
            _ if next.is_terminal() => {
                self.ended_at = Some(now);
                self.duration_ms = self
                    .started_at
                    .map_or(0, |started| duration_ms_between(started, now));
            }
            _ => {}
        }
        self.status = next;
        Ok(())
    }

    /// Appends a log entry.
    pub fn log(&mut self, entry: LogEntry) {
        self.logs.push(entry);
    }

    /// Appends a job-level log line.
    pub fn log_message(&mut self, level: LogLevel, component: &str, message: impl Into<String>) {
        self.logs.push(LogEntry::new(level, component, message));
    }

    /// Returns true once the job can no longer run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Human label for the current status ("building" / "deploying" while running).
    #[must_use]
    pub fn status_label(&self) -> String {
        if self.status == JobStatus::Running {
            self.target_kind.running_label().to_string()
        } else {
            self.status.to_string()
        }
    }

    /// Returns true if every required step completed.
    #[must_use]
    pub fn required_steps_completed(&self) -> bool {
        self.steps
            .iter()
            .filter(|s| s.required)
            .all(|s| s.status == StepStatus::Completed)
    }

    /// The first required step that failed or was cancelled.
    #[must_use]
    pub fn first_failed_required(&self) -> Option<&StepRun> {
        self.steps
            .iter()
            .find(|s| s.required && s.status.is_failure())
    }

    /// Looks up a step run by id.
    #[must_use]
    pub fn step(&self, step_id: &str) -> Option<&StepRun> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// Total attempts across all steps.
    #[must_use]
    pub fn total_attempts(&self) -> u32 {
        self.steps.iter().map(|s| s.attempts).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Target {
        Target::build("web")
            .with_step(StepTemplate::new("install", StepKind::Install, "npm ci"))
            .with_step(StepTemplate::new("lint", StepKind::Test, "npm run lint").optional())
            .with_step(StepTemplate::new("bundle", StepKind::Bundle, "npm run build"))
    }

    #[test]
    fn test_new_job_has_pending_steps() {
        let job = Job::new(&target(), "1.0.0", 0);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.steps.len(), 3);
        assert!(job.steps.iter().all(|s| s.status == StepStatus::Pending));
        assert!(job.id.starts_with("job-"));
    }

    #[test]
    fn test_transition_records_times() {
        let mut job = Job::new(&target(), "1.0.0", 0);
        job.transition(JobStatus::Running).unwrap();
        assert!(job.started_at.is_some());
        assert_eq!(job.status_label(), "building");
        job.transition(JobStatus::Completed).unwrap();
        assert!(job.ended_at.is_some());
        assert_eq!(job.status_label(), "completed");
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let mut job = Job::new(&target(), "1.0.0", 0);
        job.transition(JobStatus::Running).unwrap();
        job.transition(JobStatus::Completed).unwrap();
        let err = job.transition(JobStatus::Failed).unwrap_err();
        assert!(matches!(err, ForgeflowError::InvalidJobState { .. }));
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn test_required_steps_ignore_optional() {
        let mut job = Job::new(&target(), "1.0.0", 0);
        job.steps[0].status = StepStatus::Completed;
        job.steps[1].status = StepStatus::Failed;
        job.steps[2].status = StepStatus::Completed;
        assert!(job.required_steps_completed());
        assert!(job.first_failed_required().is_none());
    }

    #[test]
    fn test_rollback_job_links_original() {
        let t = target();
        let original = Job::new(&t, "2.0.0", 5);
        let rollback = Job::rollback_of(&original, &t, "1.9.0");
        assert!(rollback.rollback);
        assert_eq!(rollback.original_job_id.as_deref(), Some(original.id.as_str()));
        assert_eq!(rollback.version, "1.9.0");
        assert_eq!(rollback.priority, 5);
    }

    #[test]
    fn test_step_run_finish_sets_duration() {
        let mut run = StepRun::pending(&StepTemplate::new("a", StepKind::Test, "true"));
        run.start();
        run.finish(StepStatus::Completed);
        assert_eq!(run.status, StepStatus::Completed);
        assert!(run.ended_at.is_some());
    }
}
