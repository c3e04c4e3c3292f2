//! FIFO concurrency gate.
//!
//! Backed by a tokio semaphore, which grants permits strictly in the order
//! they were requested. Job priority is not consulted.

use crate::errors::{ForgeflowError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, trace};

/// A held slot. The slot is released when the permit is dropped.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    in_use: Arc<AtomicUsize>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        let remaining = self.in_use.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        trace!(in_use = remaining, "Released concurrency slot");
    }
}

/// Counts a caller queued in [`ConcurrencyGate::acquire`] until it leaves.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(waiting: &'a AtomicUsize) -> Self {
        waiting.fetch_add(1, Ordering::SeqCst);
        Self(waiting)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounds the number of simultaneously running jobs.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    limit: usize,
    semaphore: Arc<Semaphore>,
    in_use: Arc<AtomicUsize>,
    waiting: Arc<AtomicUsize>,
}

impl ConcurrencyGate {
    /// Creates a gate with `limit` slots (at least one).
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            semaphore: Arc::new(Semaphore::new(limit)),
            in_use: Arc::new(AtomicUsize::new(0)),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Waits for a free slot, queueing behind earlier callers.
    ///
    /// Dropping the returned future before it resolves leaves the queue.
    pub async fn acquire(&self) -> Result<GatePermit> {
        let acquired = {
            let _waiting = WaitingGuard::enter(&self.waiting);
            self.semaphore.clone().acquire_owned().await
        };

        let permit = acquired
            .map_err(|_| ForgeflowError::ConcurrencyExhausted { limit: self.limit })?;
        Ok(self.wrap(permit))
    }

    /// Takes a slot only if one is free right now.
    pub fn try_acquire(&self) -> Result<GatePermit> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Ok(self.wrap(permit)),
            Err(TryAcquireError::NoPermits | TryAcquireError::Closed) => {
                debug!(limit = self.limit, "Concurrency gate full; rejecting");
                Err(ForgeflowError::ConcurrencyExhausted { limit: self.limit })
            }
        }
    }

    fn wrap(&self, permit: OwnedSemaphorePermit) -> GatePermit {
        let in_use = self.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(in_use, limit = self.limit, "Acquired concurrency slot");
        GatePermit {
            _permit: permit,
            in_use: self.in_use.clone(),
        }
    }

    /// Configured number of slots.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Free slots.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Callers queued in `acquire`.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let gate = ConcurrencyGate::new(2);
        let a = gate.acquire().await.unwrap();
        let b = gate.acquire().await.unwrap();
        assert_eq!(gate.in_use(), 2);
        assert_eq!(gate.available(), 0);
        drop(a);
        assert_eq!(gate.in_use(), 1);
        assert_eq!(gate.available(), 1);
        drop(b);
        assert_eq!(gate.available(), 2);
    }

    #[tokio::test]
    async fn test_try_acquire_rejects_when_full() {
        let gate = ConcurrencyGate::new(1);
        let _held = gate.try_acquire().unwrap();
        assert!(matches!(
            gate.try_acquire(),
            Err(ForgeflowError::ConcurrencyExhausted { limit: 1 })
        ));
    }

    #[tokio::test]
    async fn test_zero_limit_clamped() {
        assert_eq!(ConcurrencyGate::new(0).limit(), 1);
    }

    #[tokio::test]
    async fn test_waiters_admitted_in_fifo_order() {
        let gate = ConcurrencyGate::new(1);
        let held = gate.acquire().await.unwrap();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..3 {
            let task_gate = gate.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _permit = task_gate.acquire().await.unwrap();
                order.lock().push(i);
            }));
            // make sure each waiter is queued before the next one
            while gate.waiting() < i + 1 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }

        drop(held);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_abandoned_acquire_leaves_queue() {
        let gate = ConcurrencyGate::new(1);
        let _held = gate.acquire().await.unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(20), gate.acquire()).await;

        assert!(waited.is_err());
        assert_eq!(gate.waiting(), 0);
        assert_eq!(gate.in_use(), 1);
    }
}
