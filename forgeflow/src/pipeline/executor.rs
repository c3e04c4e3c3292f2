//! Pipeline executor: the per-job state machine.
//!
//! The executor owns a [`Job`] from the moment it is admitted until it is
//! terminal. After every transition it publishes a snapshot to the
//! [`JobStore`], so readers never observe a half-updated job.

use super::runner::{StepContext, StepRunner};
use crate::cache::{job_cache_key, CacheStore};
use crate::cancellation::CancellationToken;
use crate::core::{Artifact, ArtifactSpec, Job, JobStatus, LogEntry, LogLevel, StepStatus, Target};
use crate::store::JobStore;
use crate::utils::sha256_hex;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

const COMPONENT: &str = "executor";
const FROM_CACHE_NOTE: &str = "completed from cache";

/// Runs a job's steps against its target.
pub struct PipelineExecutor {
    runner: StepRunner,
    cache: Arc<dyn CacheStore>,
    cache_enabled: bool,
    store: Arc<JobStore>,
}

impl PipelineExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(
        runner: StepRunner,
        cache: Arc<dyn CacheStore>,
        cache_enabled: bool,
        store: Arc<JobStore>,
    ) -> Self {
        Self {
            runner,
            cache,
            cache_enabled,
            store,
        }
    }

    /// Drives a pending job to a terminal status and returns it.
    ///
    /// The caller must already hold a concurrency permit for the job.
    pub async fn execute(&self, mut job: Job, target: &Target, token: &CancellationToken) -> Job {
        if let Err(err) = job.transition(JobStatus::Running) {
            warn!(job_id = %job.id, error = %err, "Job cannot start");
            return job;
        }
        job.log_message(
            LogLevel::Info,
            COMPONENT,
            format!("Job {} for {}@{}", job.status_label(), job.target_id, job.version),
        );
        info!(
            job_id = %job.id,
            target_id = %job.target_id,
            version = %job.version,
            rollback = job.rollback,
            "Job started"
        );
        self.publish(&job);

        if self.uses_cache(&job, target) {
            let key = job_cache_key(&job.target_id, &job.version);
            job.cache_key = Some(key.clone());
            if self.cache_hit(&mut job, &key).await {
                self.complete_from_cache(&mut job, target).await;
                return job;
            }
        }

        for index in 0..target.steps.len() {
            let template = &target.steps[index];

            if token.is_cancelled() {
                self.cancel(&mut job, index, token);
                return job;
            }

            job.steps[index].start();
            self.publish(&job);

            let outcome = {
                let mut ctx = StepContext {
                    job_id: &job.id,
                    target,
                    version: &job.version,
                    logs: &mut job.logs,
                };
                tokio::select! {
                    biased;
                    () = token.cancelled() => None,
                    run = self.runner.run(template, &mut ctx) => Some(run),
                }
            };

            let Some(run) = outcome else {
                self.cancel(&mut job, index, token);
                return job;
            };

            let failed = run.status == StepStatus::Failed;
            job.steps[index] = run;

            if failed && template.required {
                self.fail(&mut job, index);
                return job;
            }
            if failed {
                warn!(job_id = %job.id, step_id = %template.id, "Optional step failed; continuing");
                job.log(
                    LogEntry::new(
                        LogLevel::Warn,
                        COMPONENT,
                        format!("Optional step '{}' failed; continuing", template.name),
                    )
                    .for_step(&template.id),
                );
            }
            self.publish(&job);
        }

        self.complete(&mut job, target).await;
        job
    }

    /// Like [`execute`](Self::execute), but a panic inside execution fails
    /// the job from its last stored snapshot instead of unwinding.
    pub async fn execute_guarded(
        &self,
        job: Job,
        target: &Target,
        token: &CancellationToken,
    ) -> Job {
        let accepted = job.clone();
        match AssertUnwindSafe(self.execute(job, target, token)).catch_unwind().await {
            Ok(job) => job,
            Err(panic) => {
                let latest = self.store.get(&accepted.id).unwrap_or(accepted);
                self.recover(latest, &panic_message(panic.as_ref()))
            }
        }
    }

    fn recover(&self, mut job: Job, reason: &str) -> Job {
        warn!(job_id = %job.id, panic = %reason, "Job execution panicked");
        if job.is_terminal() {
            return job;
        }
        let message = format!("Job execution panicked: {reason}");
        if let Some(step) = job.steps.iter_mut().find(|s| s.status == StepStatus::Running) {
            step.error = Some(message.clone());
            step.finish(StepStatus::Failed);
        }
        job.error = Some(message.clone());
        job.log_message(LogLevel::Error, COMPONENT, message);
        self.finish(&mut job, JobStatus::Failed);
        job
    }

    fn uses_cache(&self, job: &Job, target: &Target) -> bool {
        self.cache_enabled && !job.rollback && target.is_cacheable()
    }

    async fn cache_hit(&self, job: &mut Job, key: &str) -> bool {
        match self.cache.lookup(key).await {
            Ok(Some(entry)) => {
                debug!(job_id = %job.id, key = %key, hits = entry.hits, "Cache hit");
                true
            }
            Ok(None) => {
                debug!(job_id = %job.id, key = %key, "Cache miss");
                false
            }
            Err(err) => {
                warn!(job_id = %job.id, key = %key, error = %err, "Cache lookup failed; treating as miss");
                job.log_message(
                    LogLevel::Warn,
                    COMPONENT,
                    format!("Cache lookup failed, running all steps: {err}"),
                );
                false
            }
        }
    }

    async fn complete_from_cache(&self, job: &mut Job, target: &Target) {
        for step in &mut job.steps {
            step.start();
            step.output = Some(FROM_CACHE_NOTE.to_string());
            step.from_cache = true;
            step.finish(StepStatus::Completed);
        }
        job.cache_hit = true;
        job.log_message(
            LogLevel::Info,
            COMPONENT,
            format!("All {} steps {FROM_CACHE_NOTE}", job.steps.len()),
        );
        job.artifacts = synthesize_artifacts(job, target).await;
        self.finish(job, JobStatus::Completed);
        info!(job_id = %job.id, target_id = %job.target_id, "Job completed from cache");
    }

    async fn complete(&self, job: &mut Job, target: &Target) {
        if !job.required_steps_completed() {
            // every required step either completed or aborted the loop
            job.error = Some("required steps did not complete".to_string());
            self.finish(job, JobStatus::Failed);
            return;
        }

        job.artifacts = synthesize_artifacts(job, target).await;
        if let Some(key) = job.cache_key.clone() {
            let size: u64 = job.artifacts.iter().map(|a| a.size_bytes).sum();
            self.cache.put(&key, size).await;
        }
        job.log_message(
            LogLevel::Info,
            COMPONENT,
            format!(
                "Job completed with {} artifact(s) in {} attempt(s)",
                job.artifacts.len(),
                job.total_attempts()
            ),
        );
        self.finish(job, JobStatus::Completed);
        info!(
            job_id = %job.id,
            target_id = %job.target_id,
            duration_ms = job.duration_ms,
            artifacts = job.artifacts.len(),
            "Job completed"
        );
    }

    fn fail(&self, job: &mut Job, index: usize) {
        let step = &job.steps[index];
        let message = format!(
            "Required step '{}' failed: {}",
            step.name,
            step.error.as_deref().unwrap_or("unknown error")
        );
        warn!(job_id = %job.id, step_id = %step.step_id, "Required step failed; aborting job");
        job.error = Some(message.clone());
        job.log_message(LogLevel::Error, COMPONENT, message);
        self.finish(job, JobStatus::Failed);
    }

    fn cancel(&self, job: &mut Job, index: usize, token: &CancellationToken) {
        let reason = token.reason().unwrap_or_else(|| "cancelled".to_string());
        // the step the job stopped at is cancelled whether or not it started
        if let Some(step) = job.steps.get_mut(index) {
            if matches!(step.status, StepStatus::Running | StepStatus::Pending) {
                step.error = Some(reason.clone());
                step.finish(StepStatus::Cancelled);
            }
        }
        for step in job.steps.iter_mut().skip(index) {
            if step.status == StepStatus::Pending {
                step.status = StepStatus::Skipped;
            }
        }
        info!(job_id = %job.id, reason = %reason, "Job cancelled");
        job.error = Some(format!("Cancelled: {reason}"));
        job.log_message(LogLevel::Warn, COMPONENT, format!("Job cancelled: {reason}"));
        self.finish(job, JobStatus::Cancelled);
    }

    fn finish(&self, job: &mut Job, status: JobStatus) {
        if let Err(err) = job.transition(status) {
            warn!(job_id = %job.id, error = %err, "Illegal terminal transition");
        }
        self.publish(job);
    }

    fn publish(&self, job: &Job) {
        if let Err(err) = self.store.save(job) {
            warn!(job_id = %job.id, error = %err, "Failed to publish job snapshot");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("runner", &self.runner)
            .field("cache_enabled", &self.cache_enabled)
            .finish_non_exhaustive()
    }
}

/// Builds the artifacts of a completed job from the target's declared outputs.
async fn synthesize_artifacts(job: &Job, target: &Target) -> Vec<Artifact> {
    let fallback = [ArtifactSpec::new("bundle", "bundle", "")];
    let specs: &[ArtifactSpec] = if target.outputs.is_empty() {
        &fallback
    } else {
        &target.outputs
    };

    let captured: Vec<&str> = job
        .steps
        .iter()
        .filter_map(|s| s.output.as_deref())
        .collect();

    let mut artifacts = Vec::with_capacity(specs.len());
    for spec in specs {
        let path = artifact_locator(&target.output_dir, spec);
        let size_bytes = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => 0,
        };
        let checksum = sha256_hex(
            format!(
                "{}:{}:{}:{}",
                job.id,
                job.version,
                spec.name,
                captured.join("\n")
            )
            .as_bytes(),
        );
        artifacts.push(Artifact::new(
            spec.name.clone(),
            spec.artifact_type.clone(),
            path,
            size_bytes,
            checksum,
        ));
    }
    artifacts
}

fn artifact_locator(output_dir: &str, spec: &ArtifactSpec) -> String {
    match (output_dir.is_empty(), spec.path.is_empty()) {
        (_, true) => output_dir.to_string(),
        (true, false) => spec.path.clone(),
        (false, false) => Path::new(output_dir).join(&spec.path).display().to_string(),
    }
}
