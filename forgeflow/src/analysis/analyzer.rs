//! Failure analyzer.

use super::report::{
    AnalysisReport, OptimizationInsights, PerformanceMetrics, Priority, Recommendation,
    ResourceUsage, StepResourceUsage, StepTiming,
};
use super::{FailureCategory, FailurePattern, SignatureNormalizer};
use crate::core::{Job, JobStatus, StepKind, StepRun, StepStatus};
use crate::errors::Result;
use crate::utils::now_utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

const SLOW_JOB_MS: u64 = 5 * 60 * 1000;
const BOTTLENECK_SHARE: f64 = 0.5;
const BOTTLENECK_MIN_MS: u64 = 1000;
const UNSTABLE_SUCCESS_RATE: f64 = 0.8;
const MIN_HISTORY_RUNS: usize = 3;
const RECURRING_FREQUENCY: u32 = 3;

/// (cpu factor, memory MB, disk MB) per step kind.
fn resource_profile(kind: StepKind) -> (f64, u64, u64) {
    match kind {
        StepKind::Install => (0.5, 512, 300),
        StepKind::Compile => (1.0, 1024, 100),
        StepKind::Test => (0.8, 768, 20),
        StepKind::Bundle => (0.9, 1024, 50),
        StepKind::Optimize => (1.0, 768, 30),
        StepKind::Package => (0.4, 256, 150),
        StepKind::Deploy | StepKind::Rollback => (0.2, 256, 10),
        StepKind::HealthCheck => (0.05, 64, 0),
    }
}

/// A failure extracted from a terminal job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureSignature {
    /// Category.
    pub category: FailureCategory,
    /// `category:normalised message`.
    pub signature: String,
    /// The raw message.
    pub message: String,
}

/// Aggregates failure patterns and produces per-job reports.
#[derive(Debug)]
pub struct FailureAnalyzer {
    normalizer: SignatureNormalizer,
    patterns: RwLock<HashMap<String, FailurePattern>>,
}

impl FailureAnalyzer {
    /// Creates an analyzer with an empty pattern table.
    pub fn new() -> Result<Self> {
        Ok(Self {
            normalizer: SignatureNormalizer::new()?,
            patterns: RwLock::new(HashMap::new()),
        })
    }

    /// The failure of a failed job, if it has one.
    ///
    /// A job that was rolled back keeps the failure that triggered it.
    #[must_use]
    pub fn failure_of(&self, job: &Job) -> Option<FailureSignature> {
        if !matches!(job.status, JobStatus::Failed | JobStatus::RolledBack) {
            return None;
        }
        let message = job
            .first_failed_required()
            .and_then(|step| step.error.clone())
            .or_else(|| job.error.clone())?;
        let category = FailureCategory::classify(&message);
        Some(FailureSignature {
            category,
            signature: self.normalizer.signature(category, &message),
            message,
        })
    }

    /// Merges a terminal job into the pattern table.
    ///
    /// Returns the updated pattern when the job failed.
    pub fn record(&self, job: &Job) -> Option<FailurePattern> {
        let failure = self.failure_of(job)?;
        let at = job.ended_at.unwrap_or_else(now_utc);
        let mut patterns = self.patterns.write();
        let pattern = patterns
            .entry(failure.signature.clone())
            .and_modify(|p| p.observe(&job.target_id, at))
            .or_insert_with(|| {
                FailurePattern::first(
                    failure.signature.clone(),
                    failure.category,
                    &job.target_id,
                    &failure.message,
                    at,
                )
            });
        debug!(
            job_id = %job.id,
            signature = %pattern.signature,
            frequency = pattern.frequency,
            "Recorded failure pattern"
        );
        Some(pattern.clone())
    }

    /// Recomputes the pattern table from scratch.
    pub fn rebuild(&self, jobs: &[Job]) {
        self.patterns.write().clear();
        let mut ordered: Vec<&Job> = jobs.iter().collect();
        ordered.sort_by_key(|j| j.created_at);
        for job in ordered {
            self.record(job);
        }
    }

    /// All patterns, most frequent first.
    #[must_use]
    pub fn patterns(&self) -> Vec<FailurePattern> {
        let mut patterns: Vec<_> = self.patterns.read().values().cloned().collect();
        patterns.sort_by(|a, b| {
            b.frequency
                .cmp(&a.frequency)
                .then_with(|| a.signature.cmp(&b.signature))
        });
        patterns
    }

    /// Looks up one pattern.
    #[must_use]
    pub fn pattern(&self, signature: &str) -> Option<FailurePattern> {
        self.patterns.read().get(signature).cloned()
    }

    /// Builds the report for a job given earlier runs of its target.
    #[must_use]
    pub fn analyze(&self, job: &Job, history: &[Job]) -> AnalysisReport {
        let performance = performance(job);
        let optimization = optimization(job, history, &performance);
        let resource_usage = resource_usage(job);
        let failure = self.failure_of(job);
        let failure_patterns: Vec<FailurePattern> = failure
            .as_ref()
            .and_then(|f| self.pattern(&f.signature))
            .into_iter()
            .collect();

        let mut recommendations = Vec::new();
        if performance.total_duration_ms > SLOW_JOB_MS {
            recommendations.push(Recommendation::new(
                "performance",
                Priority::High,
                format!(
                    "Job took {}s; split the pipeline into smaller chunks",
                    performance.total_duration_ms / 1000
                ),
            ));
        }
        if let Some(step) = &optimization.bottleneck_step {
            recommendations.push(
                Recommendation::new(
                    "performance",
                    Priority::Medium,
                    format!(
                        "Step '{step}' takes {:.0}% of the job; optimise it first",
                        optimization.bottleneck_share * 100.0
                    ),
                )
                .for_step(step),
            );
        }
        for step in job.steps.iter().filter(|s| s.attempts > 1) {
            recommendations.push(
                Recommendation::new(
                    "reliability",
                    Priority::Medium,
                    format!(
                        "Step '{}' needed {} attempts; investigate flakiness",
                        step.step_id, step.attempts
                    ),
                )
                .for_step(&step.step_id),
            );
        }
        if optimization.cache_missed {
            recommendations.push(Recommendation::new(
                "cache",
                Priority::Low,
                format!(
                    "Version {} was not cached; repeat runs of it will skip execution",
                    job.version
                ),
            ));
        }
        if let Some(rate) = optimization.history_success_rate {
            if optimization.history_runs >= MIN_HISTORY_RUNS && rate < UNSTABLE_SUCCESS_RATE {
                recommendations.push(Recommendation::new(
                    "reliability",
                    Priority::High,
                    format!(
                        "Target '{}' succeeded in {:.0}% of the last {} runs; stabilise it",
                        job.target_id,
                        rate * 100.0,
                        optimization.history_runs
                    ),
                ));
            }
        }
        if let Some(failure) = &failure {
            let fix = failure.category.fixes().first().copied().unwrap_or_default();
            match failure_patterns.first() {
                Some(pattern) if pattern.frequency >= RECURRING_FREQUENCY => {
                    recommendations.push(Recommendation::new(
                        "failure",
                        Priority::High,
                        format!(
                            "Recurring {} failure seen {} times: {fix}",
                            pattern.category, pattern.frequency
                        ),
                    ));
                }
                _ => recommendations.push(Recommendation::new(
                    "failure",
                    Priority::Medium,
                    format!("{} failure: {fix}", failure.category),
                )),
            }
        }
        recommendations.sort_by_key(|r| r.priority);

        AnalysisReport {
            job_id: job.id.clone(),
            target_id: job.target_id.clone(),
            performance,
            optimization,
            failure_patterns,
            resource_usage,
            recommendations,
        }
    }

    /// Number of distinct patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.read().len()
    }

    /// Returns true if no failure was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.read().is_empty()
    }
}

fn executed(step: &StepRun) -> bool {
    !step.from_cache && step.attempts > 0
}

fn performance(job: &Job) -> PerformanceMetrics {
    let steps: Vec<StepTiming> = job
        .steps
        .iter()
        .map(|s| StepTiming {
            step_id: s.step_id.clone(),
            kind: s.kind,
            status: s.status,
            duration_ms: s.duration_ms,
            attempts: s.attempts,
        })
        .collect();
    let ran: Vec<&StepRun> = job.steps.iter().filter(|s| executed(s)).collect();
    let slowest_step = ran
        .iter()
        .max_by_key(|s| s.duration_ms)
        .map(|s| s.step_id.clone());
    let average_step_ms = if ran.is_empty() {
        0
    } else {
        ran.iter().map(|s| s.duration_ms).sum::<u64>() / ran.len() as u64
    };

    PerformanceMetrics {
        total_duration_ms: job.duration_ms,
        steps,
        slowest_step,
        average_step_ms,
        total_attempts: job.total_attempts(),
    }
}

fn optimization(job: &Job, history: &[Job], performance: &PerformanceMetrics) -> OptimizationInsights {
    let total = if performance.total_duration_ms > 0 {
        performance.total_duration_ms
    } else {
        job.steps.iter().map(|s| s.duration_ms).sum()
    };

    let (bottleneck_step, bottleneck_share) = job
        .steps
        .iter()
        .filter(|s| executed(s))
        .max_by_key(|s| s.duration_ms)
        .filter(|_| total > 0)
        .map(|s| (s, s.duration_ms as f64 / total as f64))
        .filter(|(s, share)| *share > BOTTLENECK_SHARE && s.duration_ms > BOTTLENECK_MIN_MS)
        .map_or((None, 0.0), |(s, share)| (Some(s.step_id.clone()), share));

    let earlier: Vec<&Job> = history
        .iter()
        .filter(|h| h.id != job.id && h.target_id == job.target_id && !h.rollback && h.is_terminal())
        .collect();
    let history_runs = earlier.len();
    let (history_success_rate, history_average_duration_ms) = if earlier.is_empty() {
        (None, None)
    } else {
        let completed = earlier
            .iter()
            .filter(|h| matches!(h.status, JobStatus::Completed))
            .count();
        let total_ms: u64 = earlier.iter().map(|h| h.duration_ms).sum();
        (
            Some(completed as f64 / history_runs as f64),
            Some(total_ms / history_runs as u64),
        )
    };

    OptimizationInsights {
        cache_hit: job.cache_hit,
        cache_missed: job.cache_key.is_some() && !job.cache_hit,
        bottleneck_step,
        bottleneck_share,
        retried_steps: job
            .steps
            .iter()
            .filter(|s| s.attempts > 1)
            .map(|s| s.step_id.clone())
            .collect(),
        history_runs,
        history_success_rate,
        history_average_duration_ms,
    }
}

fn resource_usage(job: &Job) -> ResourceUsage {
    let steps: Vec<StepResourceUsage> = job
        .steps
        .iter()
        .filter(|s| executed(s) && s.status != StepStatus::Skipped)
        .map(|s| {
            let (cpu_factor, memory_mb, disk_mb) = resource_profile(s.kind);
            StepResourceUsage {
                step_id: s.step_id.clone(),
                kind: s.kind,
                cpu_seconds: s.duration_ms as f64 / 1000.0 * cpu_factor,
                memory_mb,
                disk_mb,
            }
        })
        .collect();

    ResourceUsage {
        cpu_seconds: steps.iter().map(|s| s.cpu_seconds).sum(),
        peak_memory_mb: steps.iter().map(|s| s.memory_mb).max().unwrap_or(0),
        disk_mb: steps.iter().map(|s| s.disk_mb).sum(),
        steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{StepTemplate, Target};
    use pretty_assertions::assert_eq;

    fn target() -> Target {
        Target::build("web")
            .with_step(StepTemplate::new("install", StepKind::Install, "npm ci"))
            .with_step(StepTemplate::new("compile", StepKind::Compile, "tsc"))
            .with_step(StepTemplate::new("test", StepKind::Test, "npm test"))
    }

    fn finished(status: JobStatus, durations: [u64; 3]) -> Job {
        let mut job = Job::new(&target(), "1.0.0", 0);
        job.transition(JobStatus::Running).unwrap();
        for (step, ms) in job.steps.iter_mut().zip(durations) {
            step.start();
            step.finish(StepStatus::Completed);
            step.duration_ms = ms;
            step.attempts = 1;
        }
        if status == JobStatus::Failed {
            let last = job.steps.last_mut().unwrap();
            last.status = StepStatus::Failed;
            last.error = Some("Step 'test' timed out after 300000ms".to_string());
        }
        job.transition(status).unwrap();
        job.duration_ms = durations.iter().sum();
        job
    }

    #[test]
    fn test_rolled_back_job_keeps_its_failure() {
        let analyzer = FailureAnalyzer::new().unwrap();
        let mut job = finished(JobStatus::Failed, [1, 1, 1]);
        let recorded = analyzer.record(&job).unwrap();
        job.transition(JobStatus::RolledBack).unwrap();

        let failure = analyzer.failure_of(&job).unwrap();
        assert_eq!(failure.signature, recorded.signature);

        analyzer.rebuild(&[job.clone()]);
        assert_eq!(analyzer.patterns().len(), 1);
        assert_eq!(analyzer.patterns()[0].frequency, 1);
        assert_eq!(analyzer.analyze(&job, &[]).failure_patterns.len(), 1);
    }

    #[test]
    fn test_record_only_failed_jobs() {
        let analyzer = FailureAnalyzer::new().unwrap();
        assert!(analyzer.record(&finished(JobStatus::Completed, [1, 1, 1])).is_none());
        let pattern = analyzer.record(&finished(JobStatus::Failed, [1, 1, 1])).unwrap();
        assert_eq!(pattern.category, FailureCategory::Timeout);
        assert_eq!(pattern.signature, "timeout:step 'test' timed out after #ms");
        assert_eq!(analyzer.len(), 1);
    }

    #[test]
    fn test_same_signature_accumulates() {
        let analyzer = FailureAnalyzer::new().unwrap();
        for _ in 0..3 {
            analyzer.record(&finished(JobStatus::Failed, [1, 1, 1]));
        }
        let patterns = analyzer.patterns();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].frequency, 3);
        assert_eq!(patterns[0].affected_targets, vec!["web"]);
    }

    #[test]
    fn test_rebuild_replaces_table() {
        let analyzer = FailureAnalyzer::new().unwrap();
        analyzer.record(&finished(JobStatus::Failed, [1, 1, 1]));
        analyzer.record(&finished(JobStatus::Failed, [1, 1, 1]));
        analyzer.rebuild(&[finished(JobStatus::Failed, [1, 1, 1])]);
        assert_eq!(analyzer.patterns()[0].frequency, 1);
        analyzer.rebuild(&[]);
        assert!(analyzer.is_empty());
    }

    #[test]
    fn test_slow_job_and_bottleneck() {
        let analyzer = FailureAnalyzer::new().unwrap();
        let job = finished(JobStatus::Completed, [10_000, 400_000, 20_000]);
        let report = analyzer.analyze(&job, &[]);

        assert_eq!(report.performance.slowest_step.as_deref(), Some("compile"));
        assert_eq!(report.optimization.bottleneck_step.as_deref(), Some("compile"));
        let topics: Vec<_> = report.recommendations.iter().map(|r| r.message.clone()).collect();
        assert!(topics.iter().any(|m| m.contains("smaller chunks")));
        assert!(topics.iter().any(|m| m.contains("'compile'")));
        assert_eq!(report.recommendations[0].priority, Priority::High);
    }

    #[test]
    fn test_fast_job_has_no_performance_advice() {
        let analyzer = FailureAnalyzer::new().unwrap();
        let report = analyzer.analyze(&finished(JobStatus::Completed, [100, 300, 100]), &[]);
        assert!(report.optimization.bottleneck_step.is_none());
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn test_unstable_history() {
        let analyzer = FailureAnalyzer::new().unwrap();
        let history = vec![
            finished(JobStatus::Failed, [1, 1, 1]),
            finished(JobStatus::Failed, [1, 1, 1]),
            finished(JobStatus::Completed, [1, 1, 1]),
        ];
        let report = analyzer.analyze(&finished(JobStatus::Completed, [1, 1, 1]), &history);
        assert_eq!(report.optimization.history_runs, 3);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.topic == "reliability" && r.priority == Priority::High));
    }

    #[test]
    fn test_recurring_failure_and_retries() {
        let analyzer = FailureAnalyzer::new().unwrap();
        let mut job = finished(JobStatus::Failed, [1, 1, 1]);
        job.steps[0].attempts = 3;
        for _ in 0..3 {
            analyzer.record(&job);
        }
        let report = analyzer.analyze(&job, &[]);

        assert_eq!(report.failure_patterns.len(), 1);
        assert_eq!(report.optimization.retried_steps, vec!["install"]);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.message.starts_with("Recurring timeout failure seen 3 times")));
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.step_id.as_deref() == Some("install")));
    }

    #[test]
    fn test_resource_usage_skips_cached_steps() {
        let analyzer = FailureAnalyzer::new().unwrap();
        let mut job = finished(JobStatus::Completed, [2_000, 2_000, 2_000]);
        job.steps[2].from_cache = true;
        let usage = analyzer.analyze(&job, &[]).resource_usage;

        assert_eq!(usage.steps.len(), 2);
        assert_eq!(usage.peak_memory_mb, 1024);
        assert_eq!(usage.disk_mb, 400);
        assert!((usage.cpu_seconds - 3.0).abs() < 1e-9);
    }
}
