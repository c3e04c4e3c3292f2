//! The engine facade.
//!
//! An [`Engine`] owns every shared resource (registry, job store, cache,
//! concurrency gate, event bus) and exposes the request and query surface.
//! Each accepted job runs on its own tokio task; callers get the job id back
//! immediately and observe the outcome through [`Engine::get_job`],
//! [`Engine::wait_for_job`] or the event stream.

mod builder;
mod request;

pub use builder::EngineBuilder;
pub use request::{BuildRequest, DeployRequest, EngineRequest};

use crate::analysis::{AnalysisReport, FailureAnalyzer, FailurePattern};
use crate::cache::{CacheStats, CacheStore};
use crate::cancellation::{CancellationRegistry, CancellationToken};
use crate::concurrency::{ConcurrencyGate, GatePermit};
use crate::config::{AdmissionMode, EngineConfig};
use crate::core::{Job, JobStatus, LogLevel, Target, TargetKind};
use crate::errors::{ForgeflowError, Result};
use crate::events::{EngineEvent, EventBus, EventKind, EventSink};
use crate::observability::job_span;
use crate::pipeline::PipelineExecutor;
use crate::registry::TargetRegistry;
use crate::rollback::RollbackController;
use crate::store::JobStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn, Instrument};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

struct EngineInner {
    config: EngineConfig,
    registry: TargetRegistry,
    store: Arc<JobStore>,
    cache: Arc<dyn CacheStore>,
    gate: ConcurrencyGate,
    cancellations: Arc<CancellationRegistry>,
    executor: Arc<PipelineExecutor>,
    rollback: RollbackController,
    analyzer: FailureAnalyzer,
    events: Arc<EventBus>,
    active: AtomicUsize,
}

/// Decrements the in-flight counter even if the job task unwinds.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl EngineInner {
    async fn run(
        self: Arc<Self>,
        job: Job,
        target: Arc<Target>,
        token: Arc<CancellationToken>,
        permit: Option<GatePermit>,
    ) {
        let _active = ActiveGuard(&self.active);

        let delay = self.config.start_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let permit = match permit {
            Some(permit) => Ok(permit),
            None => self.gate.acquire().await,
        };
        let job = match permit {
            Ok(permit) => {
                let job = self.executor.execute_guarded(job, &target, &token).await;
                drop(permit);
                job
            }
            Err(err) => self.abort(job, &err),
        };
        self.cancellations.remove(&job.id);

        self.finish(job, &target).await;
    }

    fn abort(&self, mut job: Job, err: &ForgeflowError) -> Job {
        warn!(job_id = %job.id, error = %err, "Job could not acquire a slot");
        job.error = Some(err.to_string());
        job.log_message(LogLevel::Error, "engine", err.to_string());
        if let Err(e) = job.transition(JobStatus::Failed) {
            warn!(job_id = %job.id, error = %e, "Illegal transition");
        }
        if let Err(e) = self.store.save(&job) {
            warn!(job_id = %job.id, error = %e, "Failed to store job");
        }
        job
    }

    async fn finish(&self, job: Job, target: &Target) {
        self.rollback.record_success(&job);
        self.analyzer.record(&job);

        let kind = match job.status {
            JobStatus::Completed => Some(EventKind::JobCompleted),
            JobStatus::Failed => Some(EventKind::JobFailed),
            JobStatus::Cancelled => Some(EventKind::JobCancelled),
            _ => None,
        };
        if let Some(kind) = kind {
            self.events.publish(EngineEvent::new(kind, job.clone()));
        }

        if RollbackController::should_roll_back(&job, target, self.config.auto_rollback) {
            let outcome = self.rollback.roll_back(&job, target).await;
            self.analyzer.record(&outcome.job);
        }
    }
}

/// Pipeline orchestration engine.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Accepts a build request and returns the new job id.
    ///
    /// Fails synchronously only for admission problems: unknown or disabled
    /// target, a deploy target, or a full gate in reject mode. Must be called
    /// from within a tokio runtime.
    pub fn start_build(&self, request: BuildRequest) -> Result<String> {
        let target = self.admit(&request.target_id, TargetKind::Build)?;
        self.submit(target, request.version, request.priority)
    }

    /// Accepts a deploy request and returns the new job id.
    pub fn start_deployment(&self, request: DeployRequest) -> Result<String> {
        let target = self.admit(&request.target_id, TargetKind::Deploy)?;
        self.submit(target, request.version, 0)
    }

    /// Dispatches a serialised request. Returns the affected job id.
    pub fn handle_request(&self, request: EngineRequest) -> Result<String> {
        match request {
            EngineRequest::StartBuild(req) => self.start_build(req),
            EngineRequest::StartDeployment(req) => self.start_deployment(req),
            EngineRequest::CancelJob { job_id } => {
                self.cancel_job(&job_id)?;
                Ok(job_id)
            }
        }
    }

    fn admit(&self, target_id: &str, kind: TargetKind) -> Result<Arc<Target>> {
        let target = self.inner.registry.resolve_enabled(target_id)?;
        if target.kind != kind {
            return Err(ForgeflowError::InvalidTarget {
                target: target_id.to_string(),
                reason: format!("is a {} target, not a {kind} target", target.kind),
            });
        }
        Ok(target)
    }

    fn submit(&self, target: Arc<Target>, version: String, priority: i32) -> Result<String> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ForgeflowError::Config(format!("no tokio runtime: {e}")))?;

        let permit = match self.inner.config.admission_mode {
            AdmissionMode::Reject => Some(self.inner.gate.try_acquire()?),
            AdmissionMode::Queue => None,
        };

        let job = Job::new(&target, version, priority);
        let job_id = job.id.clone();
        info!(
            job_id = %job_id,
            target_id = %target.id,
            kind = %target.kind,
            version = %job.version,
            priority,
            "Job accepted"
        );
        self.inner.store.insert(job.clone());
        let token = self.inner.cancellations.register(&job_id);
        self.inner.active.fetch_add(1, Ordering::SeqCst);

        let span = job_span(&job);
        let inner = self.inner.clone();
        runtime.spawn(inner.run(job, target, token, permit).instrument(span));
        Ok(job_id)
    }

    /// All registered targets in registration order.
    #[must_use]
    pub fn list_targets(&self) -> Vec<Arc<Target>> {
        self.inner.registry.list()
    }

    /// Jobs newest first, optionally filtered by status.
    #[must_use]
    pub fn list_jobs(&self, status: Option<JobStatus>, limit: usize) -> Vec<Job> {
        self.inner.store.list(status, limit)
    }

    /// Snapshot of one job.
    pub fn get_job(&self, job_id: &str) -> Result<Job> {
        self.inner
            .store
            .get(job_id)
            .ok_or_else(|| ForgeflowError::JobNotFound(job_id.to_string()))
    }

    /// Requests cancellation of a running job.
    ///
    /// The job becomes `cancelled` as soon as its task observes the request;
    /// its slot is released at that point.
    pub fn cancel_job(&self, job_id: &str) -> Result<()> {
        let job = self.get_job(job_id)?;
        let invalid = || ForgeflowError::InvalidJobState {
            job_id: job_id.to_string(),
            status: job.status.to_string(),
            operation: "cancel".to_string(),
        };
        if job.status != JobStatus::Running {
            return Err(invalid());
        }
        let token = self.inner.cancellations.get(job_id).ok_or_else(invalid)?;
        if token.cancel("cancelled by request") {
            info!(job_id = %job_id, "Cancellation requested");
        }
        Ok(())
    }

    /// Cache counters.
    pub async fn get_cache_stats(&self) -> CacheStats {
        self.inner.cache.stats().await
    }

    /// Drops every cache entry.
    pub async fn clear_cache(&self) {
        self.inner.cache.clear().await;
        info!("Cache cleared");
    }

    /// Analysis report for one job against its target's recent history.
    pub fn analyze_job(&self, job_id: &str) -> Result<AnalysisReport> {
        let job = self.get_job(job_id)?;
        let history = self
            .inner
            .store
            .history(&job.target_id, self.inner.config.history_limit);
        Ok(self.inner.analyzer.analyze(&job, &history))
    }

    /// Recorded failure patterns, most frequent first.
    #[must_use]
    pub fn failure_patterns(&self) -> Vec<FailurePattern> {
        self.inner.analyzer.patterns()
    }

    /// Recomputes failure patterns from every stored job.
    pub fn rebuild_failure_patterns(&self) {
        let jobs = self.inner.store.list(None, usize::MAX);
        self.inner.analyzer.rebuild(&jobs);
    }

    /// Last known good version of a deploy target.
    #[must_use]
    pub fn last_known_good(&self, target_id: &str) -> Option<String> {
        self.inner.rollback.last_known_good(target_id)
    }

    /// Opens a subscription to outbound events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    /// Registers an event observer.
    pub fn add_event_sink(&self, sink: Arc<dyn EventSink>) {
        self.inner.events.add_sink(sink);
    }

    /// Jobs currently holding a slot.
    #[must_use]
    pub fn running_jobs(&self) -> usize {
        self.inner.gate.in_use()
    }

    /// Jobs queued for a slot.
    #[must_use]
    pub fn queued_jobs(&self) -> usize {
        self.inner.gate.waiting()
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Polls until a job is terminal or `timeout` elapses.
    ///
    /// Returns the latest snapshot either way; check its status.
    pub async fn wait_for_job(&self, job_id: &str, timeout: Duration) -> Result<Job> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self.get_job(job_id)?;
            if job.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(job);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Polls until no accepted job (or its rollback) is still in flight.
    ///
    /// Returns false if `timeout` elapsed first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.inner.active.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        true
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("targets", &self.inner.registry.len())
            .field("jobs", &self.inner.store.len())
            .field("running", &self.inner.gate.in_use())
            .field("queued", &self.inner.gate.waiting())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{StepKind, StepStatus, StepTemplate};
    use crate::testing::{ScriptedExecutor, StepScript};
    use pretty_assertions::assert_eq;

    const WAIT: Duration = Duration::from_secs(5);

    fn engine(commands: Arc<ScriptedExecutor>, config: EngineConfig) -> Engine {
        Engine::builder()
            .with_config(config)
            .with_target(
                Target::build("web")
                    .with_step(StepTemplate::new("install", StepKind::Install, "npm ci"))
                    .with_step(StepTemplate::new("bundle", StepKind::Bundle, "npm run build")),
            )
            .with_target(
                Target::deploy("prod")
                    .with_baseline_version("1.0.0")
                    .with_step(StepTemplate::new("deploy", StepKind::Deploy, "kubectl apply")),
            )
            .with_target(
                Target::build("legacy")
                    .with_enabled(false)
                    .with_step(StepTemplate::new("make", StepKind::Compile, "make")),
            )
            .with_command_executor(commands)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_admission_errors() {
        let engine = engine(Arc::new(ScriptedExecutor::new()), EngineConfig::default());
        assert!(matches!(
            engine.start_build(BuildRequest::new("nope", "1")),
            Err(ForgeflowError::TargetNotFound(_))
        ));
        assert!(matches!(
            engine.start_build(BuildRequest::new("legacy", "1")),
            Err(ForgeflowError::TargetDisabled(_))
        ));
        assert!(matches!(
            engine.start_build(BuildRequest::new("prod", "1")),
            Err(ForgeflowError::InvalidTarget { .. })
        ));
        assert!(engine.list_jobs(None, 10).is_empty());
    }

    #[test]
    fn test_start_outside_runtime_is_rejected() {
        let engine = engine(Arc::new(ScriptedExecutor::new()), EngineConfig::default());
        assert!(matches!(
            engine.start_build(BuildRequest::new("web", "1")),
            Err(ForgeflowError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_build_completes_and_is_analysed() {
        let commands = Arc::new(ScriptedExecutor::new());
        let engine = engine(commands.clone(), EngineConfig::default());

        let id = engine.start_build(BuildRequest::new("web", "1.0.0")).unwrap();
        let job = engine.wait_for_job(&id, WAIT).await.unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(commands.total_calls(), 2);
        let report = engine.analyze_job(&id).unwrap();
        assert_eq!(report.job_id, id);
        assert!(report.failure_patterns.is_empty());
    }

    #[tokio::test]
    async fn test_failed_build_records_pattern() {
        let commands = Arc::new(ScriptedExecutor::new());
        commands.script("bundle", StepScript::fail("JavaScript heap out of memory"));
        let engine = engine(commands, EngineConfig::default());

        let id = engine.start_build(BuildRequest::new("web", "1.0.0")).unwrap();
        assert!(engine.wait_idle(WAIT).await);

        let job = engine.get_job(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.step("bundle").unwrap().status, StepStatus::Failed);
        let patterns = engine.failure_patterns();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].category, crate::analysis::FailureCategory::Memory);

        engine.rebuild_failure_patterns();
        assert_eq!(engine.failure_patterns()[0].frequency, 1);
    }

    #[tokio::test]
    async fn test_completed_deploy_updates_known_good() {
        let engine = engine(Arc::new(ScriptedExecutor::new()), EngineConfig::default());
        assert_eq!(engine.last_known_good("prod").as_deref(), Some("1.0.0"));

        let id = engine
            .handle_request(EngineRequest::StartDeployment(DeployRequest::new("prod", "1.1.0")))
            .unwrap();
        engine.wait_for_job(&id, WAIT).await.unwrap();
        assert!(engine.wait_idle(WAIT).await);

        assert_eq!(engine.last_known_good("prod").as_deref(), Some("1.1.0"));
    }

    #[tokio::test]
    async fn test_cancel_requires_running_job() {
        let engine = engine(Arc::new(ScriptedExecutor::new()), EngineConfig::default());
        assert!(matches!(engine.cancel_job("missing"), Err(ForgeflowError::JobNotFound(_))));

        let id = engine.start_build(BuildRequest::new("web", "1.0.0")).unwrap();
        engine.wait_for_job(&id, WAIT).await.unwrap();
        assert!(matches!(
            engine.cancel_job(&id),
            Err(ForgeflowError::InvalidJobState { .. })
        ));
    }

    #[tokio::test]
    async fn test_cache_queries() {
        let engine = engine(Arc::new(ScriptedExecutor::new()), EngineConfig::default());
        let id = engine.start_build(BuildRequest::new("web", "1.0.0")).unwrap();
        engine.wait_for_job(&id, WAIT).await.unwrap();

        assert_eq!(engine.get_cache_stats().await.entries, 1);
        engine.clear_cache().await;
        assert_eq!(engine.get_cache_stats().await.entries, 0);
    }
}
