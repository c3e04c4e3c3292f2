//! Rollback controller.
//!
//! When a deploy job fails and auto-rollback is on, the controller creates
//! exactly one compensating job that redeploys the target's last known good
//! version through the same executor. It never retries and never rolls back
//! a rollback.

use crate::cancellation::CancellationRegistry;
use crate::concurrency::ConcurrencyGate;
use crate::core::{Job, JobStatus, LogLevel, Target, TargetKind};
use crate::errors::ForgeflowError;
use crate::events::{EngineEvent, EventBus, EventKind};
use crate::pipeline::PipelineExecutor;
use crate::store::JobStore;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

const COMPONENT: &str = "rollback";

/// Result of one rollback attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackOutcome {
    /// The compensating job in its terminal state.
    pub job: Job,
    /// Whether the known good version was restored.
    pub restored: bool,
}

/// Tracks known good versions and runs compensating jobs.
pub struct RollbackController {
    known_good: DashMap<String, String>,
    executor: Arc<PipelineExecutor>,
    store: Arc<JobStore>,
    gate: ConcurrencyGate,
    cancellations: Arc<CancellationRegistry>,
    events: Arc<EventBus>,
}

impl RollbackController {
    /// Creates a controller sharing the engine's executor and resources.
    #[must_use]
    pub fn new(
        executor: Arc<PipelineExecutor>,
        store: Arc<JobStore>,
        gate: ConcurrencyGate,
        cancellations: Arc<CancellationRegistry>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            known_good: DashMap::new(),
            executor,
            store,
            gate,
            cancellations,
            events,
        }
    }

    /// Seeds known good versions from the targets' baselines.
    pub fn seed<'a>(&self, targets: impl IntoIterator<Item = &'a Target>) {
        for target in targets {
            if let (TargetKind::Deploy, Some(version)) = (target.kind, &target.baseline_version) {
                self.known_good.insert(target.id.clone(), version.clone());
            }
        }
    }

    /// Records a completed deploy as the new known good version.
    pub fn record_success(&self, job: &Job) {
        if job.target_kind == TargetKind::Deploy && job.status == JobStatus::Completed && !job.rollback {
            info!(target_id = %job.target_id, version = %job.version, "Recorded known good version");
            self.known_good.insert(job.target_id.clone(), job.version.clone());
        }
    }

    /// Last known good version of a target.
    #[must_use]
    pub fn last_known_good(&self, target_id: &str) -> Option<String> {
        self.known_good.get(target_id).map(|v| v.value().clone())
    }

    /// Returns true if a terminal job should be rolled back.
    #[must_use]
    pub fn should_roll_back(job: &Job, target: &Target, auto_rollback: bool) -> bool {
        auto_rollback && !job.rollback && target.supports_rollback() && job.status == JobStatus::Failed
    }

    /// Creates and runs the compensating job for a failed deploy.
    ///
    /// Emits `rollback.completed` or `rollback.failed` once the rollback job
    /// is stored. On success the original job moves to `rolled_back`.
    pub async fn roll_back(&self, original: &Job, target: &Target) -> RollbackOutcome {
        let version = self.last_known_good(&target.id);
        let mut job = Job::rollback_of(original, target, version.clone().unwrap_or_default());
        job.log_message(
            LogLevel::Info,
            COMPONENT,
            format!("Rolling back job {} of {}", original.id, target.id),
        );
        self.store.insert(job.clone());
        self.link(original, &job);

        let Some(version) = version else {
            let reason = ForgeflowError::RollbackFailed {
                job_id: original.id.clone(),
                reason: format!("no known good version for target '{}'", target.id),
            };
            warn!(job_id = %original.id, target_id = %target.id, "No known good version; rollback failed");
            job.error = Some(reason.to_string());
            job.log_message(LogLevel::Error, COMPONENT, reason.to_string());
            if let Err(err) = job.transition(JobStatus::Failed) {
                warn!(job_id = %job.id, error = %err, "Illegal rollback transition");
            }
            self.save(&job);
            self.events.publish(EngineEvent::new(EventKind::RollbackFailed, job.clone()));
            return RollbackOutcome { job, restored: false };
        };

        info!(
            job_id = %original.id,
            rollback_job_id = %job.id,
            version = %version,
            "Starting rollback"
        );

        let token = self.cancellations.register(&job.id);
        let job = match self.gate.acquire().await {
            Ok(_permit) => self.executor.execute_guarded(job, target, &token).await,
            Err(err) => {
                job.error = Some(err.to_string());
                if let Err(err) = job.transition(JobStatus::Failed) {
                    warn!(job_id = %job.id, error = %err, "Illegal rollback transition");
                }
                self.save(&job);
                job
            }
        };
        self.cancellations.remove(&job.id);

        let restored = job.status == JobStatus::Completed;
        if restored {
            let updated = self.store.update(&original.id, |o| {
                o.transition(JobStatus::RolledBack)?;
                o.log_message(
                    LogLevel::Info,
                    COMPONENT,
                    format!("Rolled back to {version} by {}", job.id),
                );
                Ok(())
            });
            if let Err(err) = updated {
                warn!(job_id = %original.id, error = %err, "Could not mark job rolled back");
            }
            info!(job_id = %original.id, rollback_job_id = %job.id, "Rollback completed");
            self.events.publish(EngineEvent::new(EventKind::RollbackCompleted, job.clone()));
        } else {
            warn!(
                job_id = %original.id,
                rollback_job_id = %job.id,
                status = %job.status,
                "Rollback failed; not retrying"
            );
            self.events.publish(EngineEvent::new(EventKind::RollbackFailed, job.clone()));
        }

        RollbackOutcome { job, restored }
    }

    fn link(&self, original: &Job, rollback: &Job) {
        let linked = self.store.update(&original.id, |o| {
            o.rollback_job_id = Some(rollback.id.clone());
            o.log_message(
                LogLevel::Warn,
                COMPONENT,
                format!("Rollback job {} created", rollback.id),
            );
            Ok(())
        });
        if let Err(err) = linked {
            warn!(job_id = %original.id, error = %err, "Could not link rollback job");
        }
    }

    fn save(&self, job: &Job) {
        if let Err(err) = self.store.save(job) {
            warn!(job_id = %job.id, error = %err, "Failed to store rollback job");
        }
    }
}

impl std::fmt::Debug for RollbackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackController")
            .field("known_good", &self.known_good.len())
            .finish_non_exhaustive()
    }
}
