//! Per-job spans.

use crate::core::Job;
use tracing::{info_span, Span};

/// Span covering a job's whole life on its task.
#[must_use]
pub fn job_span(job: &Job) -> Span {
    info_span!(
        "job",
        job_id = %job.id,
        target_id = %job.target_id,
        kind = %job.target_kind,
        version = %job.version,
    )
}
