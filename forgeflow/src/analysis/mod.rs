//! Post-hoc failure analysis.
//!
//! Every terminal job is fed to the [`FailureAnalyzer`], which folds failed
//! jobs into a table of recurring [`FailurePattern`]s. Reports combine that
//! table with timings, cache behaviour, estimated resource usage and the
//! target's recent history into deterministic recommendations.

mod analyzer;
mod patterns;
mod report;

pub use analyzer::{FailureAnalyzer, FailureSignature};
pub use patterns::{FailureCategory, FailurePattern, SignatureNormalizer};
pub use report::{
    AnalysisReport, OptimizationInsights, PerformanceMetrics, Priority, Recommendation,
    ResourceUsage, StepResourceUsage, StepTiming,
};
