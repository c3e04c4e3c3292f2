//! Job id to cancellation token mapping.

use super::CancellationToken;
use dashmap::DashMap;
use std::sync::Arc;

/// Tokens of jobs that have not finished yet.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tokens: DashMap<String, Arc<CancellationToken>>,
}

impl CancellationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and stores a token for a job.
    pub fn register(&self, job_id: &str) -> Arc<CancellationToken> {
        let token = Arc::new(CancellationToken::new());
        self.tokens.insert(job_id.to_string(), token.clone());
        token
    }

    /// Returns the token for a job, if it is still tracked.
    #[must_use]
    pub fn get(&self, job_id: &str) -> Option<Arc<CancellationToken>> {
        self.tokens.get(job_id).map(|t| t.value().clone())
    }

    /// Forgets a finished job.
    pub fn remove(&self, job_id: &str) {
        self.tokens.remove(job_id);
    }

    /// Number of tracked jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns true if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
