//! Analysis report types.

use super::FailurePattern;
use crate::core::{StepKind, StepStatus};
use serde::{Deserialize, Serialize};

/// Timing of one step run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTiming {
    /// Step id.
    pub step_id: String,
    /// Step kind.
    pub kind: StepKind,
    /// Final status.
    pub status: StepStatus,
    /// Wall-clock time.
    pub duration_ms: u64,
    /// Attempts made.
    pub attempts: u32,
}

/// How long the job and its steps took.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Job duration.
    pub total_duration_ms: u64,
    /// Per-step timings in declared order.
    pub steps: Vec<StepTiming>,
    /// Slowest step, if any step ran.
    pub slowest_step: Option<String>,
    /// Mean duration of the steps that ran.
    pub average_step_ms: u64,
    /// Attempts across all steps.
    pub total_attempts: u32,
}

/// Where time or work could be saved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationInsights {
    /// The job was served from cache.
    pub cache_hit: bool,
    /// The job consulted the cache and missed.
    pub cache_missed: bool,
    /// Step taking the largest share of the job.
    pub bottleneck_step: Option<String>,
    /// That step's share of the job duration, 0.0..=1.0.
    pub bottleneck_share: f64,
    /// Steps that needed more than one attempt.
    pub retried_steps: Vec<String>,
    /// Earlier terminal runs of the same target considered.
    pub history_runs: usize,
    /// Share of those runs that completed.
    pub history_success_rate: Option<f64>,
    /// Mean duration of those runs.
    pub history_average_duration_ms: Option<u64>,
}

/// Estimated resources of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResourceUsage {
    /// Step id.
    pub step_id: String,
    /// Step kind.
    pub kind: StepKind,
    /// Estimated CPU time.
    pub cpu_seconds: f64,
    /// Estimated peak memory.
    pub memory_mb: u64,
    /// Estimated disk written.
    pub disk_mb: u64,
}

/// Estimated resources of the whole job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Sum of step CPU estimates.
    pub cpu_seconds: f64,
    /// Largest step memory estimate.
    pub peak_memory_mb: u64,
    /// Sum of step disk estimates.
    pub disk_mb: u64,
    /// Per-step estimates for steps that executed.
    pub steps: Vec<StepResourceUsage>,
}

/// Urgency of a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Act now.
    High,
    /// Worth scheduling.
    Medium,
    /// Nice to have.
    Low,
}

/// One actionable suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Short machine-readable topic ("performance", "cache", ...).
    pub topic: String,
    /// Urgency.
    pub priority: Priority,
    /// Human-readable suggestion.
    pub message: String,
    /// Step the suggestion is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
}

impl Recommendation {
    pub(crate) fn new(topic: &str, priority: Priority, message: impl Into<String>) -> Self {
        Self {
            topic: topic.to_string(),
            priority,
            message: message.into(),
            step_id: None,
        }
    }

    pub(crate) fn for_step(mut self, step_id: &str) -> Self {
        self.step_id = Some(step_id.to_string());
        self
    }
}

/// Everything the analyzer knows about one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// The analysed job.
    pub job_id: String,
    /// Its target.
    pub target_id: String,
    /// Timings.
    pub performance: PerformanceMetrics,
    /// Savings.
    pub optimization: OptimizationInsights,
    /// Known patterns matching this job's failure.
    pub failure_patterns: Vec<FailurePattern>,
    /// Estimated resources.
    pub resource_usage: ResourceUsage,
    /// Suggestions, highest priority first.
    pub recommendations: Vec<Recommendation>,
}
