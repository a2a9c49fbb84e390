//! Bulkhead limiting concurrent calls to one dependency.
//!
//! Named after ship bulkheads that contain flooding to one compartment: a
//! slow dependency may stall at most `max_concurrent` callers, keeping the
//! rest of the service responsive. Waiting callers are parked on the
//! semaphore and woken early if their request context is cancelled.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn, Span};

use crate::context::RequestContext;

/// Failure surfaced by [`Bulkhead::execute`].
#[derive(Debug, Error)]
pub enum BulkheadError<E> {
    /// No permit became available before the context was cancelled.
    #[error("bulkhead limit reached")]
    Rejected,

    /// The operation ran and failed.
    #[error(transparent)]
    Operation(E),
}

/// Counting-semaphore concurrency gate.
pub struct Bulkhead {
    semaphore: Semaphore,
    max_concurrent: usize,
    admitted: AtomicU64,
    rejected: AtomicU64,
}

impl Bulkhead {
    /// Bulkhead admitting at most `max_concurrent` operations; zero is
    /// clamped to one.
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Semaphore::new(max_concurrent),
            max_concurrent,
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Operations currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.semaphore.available_permits()
    }

    /// Total operations admitted since construction.
    pub fn admitted_total(&self) -> u64 {
        self.admitted.load(Ordering::Acquire)
    }

    /// Total acquisitions abandoned due to cancellation.
    pub fn rejected_total(&self) -> u64 {
        self.rejected.load(Ordering::Acquire)
    }

    /// Run `op` once a permit is available.
    ///
    /// Waits until a permit frees up or `ctx` is cancelled; rejected calls
    /// never invoke `op`. The permit is held in a guard, so it is released
    /// on success, failure, and panic alike.
    pub async fn execute<F, Fut, T, E>(
        &self,
        ctx: &RequestContext,
        op: F,
    ) -> Result<T, BulkheadError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let span = Span::current();

        if ctx.is_cancelled() {
            return self.reject(&span);
        }

        let permit = tokio::select! {
            permit = self.semaphore.acquire() => match permit {
                Ok(permit) => permit,
                // the semaphore is never closed; treat it as saturation
                Err(_) => return self.reject(&span),
            },
            _ = ctx.cancelled() => return self.reject(&span),
        };
        let _permit = permit;

        self.admitted.fetch_add(1, Ordering::Relaxed);
        span.record("bulkhead.max", self.max_concurrent as u64);
        debug!(in_flight = self.in_flight(), max = self.max_concurrent, "bulkhead admitted call");

        op().await.map_err(BulkheadError::Operation)
    }

    fn reject<T, E>(&self, span: &Span) -> Result<T, BulkheadError<E>> {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        span.record("bulkhead.rejected", true);
        warn!(max = self.max_concurrent, "cancelled while waiting for a bulkhead permit");
        Err(BulkheadError::Rejected)
    }
}

impl std::fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bulkhead")
            .field("max_concurrent", &self.max_concurrent)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}
