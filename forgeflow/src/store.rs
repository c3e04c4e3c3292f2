//! Job store.
//!
//! Append-only record of every job ever accepted. The executor publishes a
//! fresh snapshot after each transition; readers always get clones, so a
//! terminal job reads back identically no matter how often it is fetched.

use crate::core::{Job, JobStatus};
use crate::errors::{ForgeflowError, Result};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::trace;

/// Concurrent, append-only job records.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: DashMap<String, Job>,
    order: RwLock<Vec<String>>,
}

impl JobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly accepted job.
    pub fn insert(&self, job: Job) {
        let id = job.id.clone();
        if self.jobs.insert(id.clone(), job).is_none() {
            self.order.write().push(id);
        }
    }

    /// Replaces the stored snapshot of an existing job.
    pub fn save(&self, job: &Job) -> Result<()> {
        let mut entry = self
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| ForgeflowError::JobNotFound(job.id.clone()))?;
        trace!(job_id = %job.id, status = %job.status, "Saving job snapshot");
        *entry = job.clone();
        Ok(())
    }

    /// Applies a mutation to a stored job and returns the new snapshot.
    pub fn update<F>(&self, id: &str, f: F) -> Result<Job>
    where
        F: FnOnce(&mut Job) -> Result<()>,
    {
        let mut entry = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| ForgeflowError::JobNotFound(id.to_string()))?;
        f(&mut entry)?;
        Ok(entry.clone())
    }

    /// Fetches a snapshot by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.get(id).map(|j| j.value().clone())
    }

    /// Lists jobs newest first, optionally filtered by status.
    #[must_use]
    pub fn list(&self, status: Option<JobStatus>, limit: usize) -> Vec<Job> {
        let order = self.order.read();
        order
            .iter()
            .rev()
            .filter_map(|id| self.get(id))
            .filter(|job| status.map_or(true, |s| job.status == s))
            .take(limit)
            .collect()
    }

    /// Terminal jobs of one target, newest first.
    #[must_use]
    pub fn history(&self, target_id: &str, limit: usize) -> Vec<Job> {
        let order = self.order.read();
        order
            .iter()
            .rev()
            .filter_map(|id| self.get(id))
            .filter(|job| job.target_id == target_id && job.is_terminal())
            .take(limit)
            .collect()
    }

    /// Number of jobs per status.
    #[must_use]
    pub fn status_counts(&self) -> HashMap<JobStatus, usize> {
        let mut counts = HashMap::new();
        for entry in &self.jobs {
            *counts.entry(entry.value().status).or_insert(0) += 1;
        }
        counts
    }

    /// Total number of jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true if the store has no jobs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{StepKind, StepTemplate, Target};

    fn job(target: &str) -> Job {
        let target =
            Target::build(target).with_step(StepTemplate::new("a", StepKind::Install, "true"));
        Job::new(&target, "1.0.0", 0)
    }

    #[test]
    fn test_insert_get() {
        let store = JobStore::new();
        let j = job("web");
        let id = j.id.clone();
        store.insert(j);
        assert_eq!(store.get(&id).unwrap().id, id);
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_save_requires_existing() {
        let store = JobStore::new();
        assert!(matches!(store.save(&job("web")), Err(ForgeflowError::JobNotFound(_))));
    }

    #[test]
    fn test_list_newest_first_with_filter() {
        let store = JobStore::new();
        let a = job("web");
        let b = job("web");
        let mut c = job("api");
        c.transition(JobStatus::Running).unwrap();
        let ids = (a.id.clone(), b.id.clone(), c.id.clone());
        store.insert(a);
        store.insert(b);
        store.insert(c);

        let all: Vec<_> = store.list(None, 10).into_iter().map(|j| j.id).collect();
        assert_eq!(all, vec![ids.2.clone(), ids.1.clone(), ids.0]);

        let running = store.list(Some(JobStatus::Running), 10);
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, ids.2);

        assert_eq!(store.list(None, 1).len(), 1);
    }

    #[test]
    fn test_history_only_terminal_for_target() {
        let store = JobStore::new();
        let mut done = job("web");
        done.transition(JobStatus::Running).unwrap();
        done.transition(JobStatus::Completed).unwrap();
        store.insert(done);
        store.insert(job("web"));
        store.insert(job("api"));

        let history = store.history("web", 10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, JobStatus::Completed);
    }

    #[test]
    fn test_update() {
        let store = JobStore::new();
        let j = job("web");
        let id = j.id.clone();
        store.insert(j);
        let updated = store
            .update(&id, |job| {
                job.rollback_job_id = Some("rollback-1".to_string());
                Ok(())
            })
            .unwrap();
        assert_eq!(updated.rollback_job_id.as_deref(), Some("rollback-1"));
        assert_eq!(store.status_counts().get(&JobStatus::Pending), Some(&1));
    }
}
