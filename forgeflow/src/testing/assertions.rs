//! Assertions over jobs and events.

use crate::core::{Job, JobStatus, StepStatus};
use crate::events::CollectingEventSink;

/// Asserts a job's status.
///
/// # Panics
///
/// Panics if the status differs.
pub fn assert_job_status(job: &Job, expected: JobStatus) {
    assert_eq!(
        job.status, expected,
        "job {} expected {expected}, got {} (error: {:?})",
        job.id, job.status, job.error
    );
}

/// Asserts the status of one step run.
///
/// # Panics
///
/// Panics if the step is missing or its status differs.
pub fn assert_step_status(job: &Job, step_id: &str, expected: StepStatus) {
    let Some(step) = job.step(step_id) else {
        panic!("job {} has no step '{step_id}'", job.id);
    };
    assert_eq!(
        step.status, expected,
        "step '{step_id}' expected {expected}, got {} (error: {:?})",
        step.status, step.error
    );
}

/// Asserts the exact sequence of event types a sink collected.
///
/// # Panics
///
/// Panics if the sequence differs.
pub fn assert_event_types(sink: &CollectingEventSink, expected: &[&str]) {
    assert_eq!(sink.event_types(), expected, "unexpected event sequence");
}
