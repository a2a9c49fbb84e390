//! Request-scoped cancellation and deadlines.
//!
//! A [`RequestContext`] threads one cancellation signal and an optional hard
//! deadline through every reliability layer. Layers observe it at their
//! suspension points: the bulkhead while waiting for a permit, the retry
//! executor around each attempt and during backoff sleeps. Timeouts are
//! deadlines on the context, not a separate mechanism.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Cancellation signal plus optional deadline. Cheap to clone; clones share
/// the same signal.
#[derive(Debug, Clone)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Context with no deadline, cancelled only explicitly.
    pub fn new() -> Self {
        Self { cancel: CancellationToken::new(), deadline: None }
    }

    /// Derive a child context whose deadline is `budget` from now, never
    /// later than the parent's own deadline. Cancelling the parent cancels
    /// the child; cancelling the child leaves the parent untouched.
    pub fn with_budget(&self, budget: Duration) -> Self {
        let candidate = Instant::now() + budget;
        let deadline = match self.deadline {
            Some(parent) => Some(parent.min(candidate)),
            None => Some(candidate),
        };
        Self { cancel: self.cancel.child_token(), deadline }
    }

    /// Explicitly cancel this context and all children derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True once the signal fired or the deadline passed.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves when the context is cancelled or its deadline passes. Never
    /// resolves for an unbounded context that is never cancelled.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_is_not_cancelled() {
        let ctx = RequestContext::new();
        assert!(!ctx.is_cancelled());
        assert_eq!(ctx.remaining(), None);
    }

    #[test]
    fn explicit_cancel_is_observed() {
        let ctx = RequestContext::new();
        ctx.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn child_deadline_never_exceeds_parent() {
        let parent = RequestContext::new().with_budget(Duration::from_millis(50));
        let child = parent.with_budget(Duration::from_secs(60));

        let remaining = child.remaining().expect("child must carry a deadline");
        assert!(remaining <= Duration::from_millis(50));
    }

    #[test]
    fn parent_cancel_propagates_to_child() {
        let parent = RequestContext::new();
        let child = parent.with_budget(Duration::from_secs(60));

        parent.cancel();
        assert!(child.is_cancelled());
        assert!(parent.is_cancelled());
    }

    #[test]
    fn child_cancel_does_not_touch_parent() {
        let parent = RequestContext::new();
        let child = parent.with_budget(Duration::from_secs(60));

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_when_deadline_passes() {
        let ctx = RequestContext::new().with_budget(Duration::from_millis(20));

        let start = Instant::now();
        ctx.cancelled().await;

        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_on_explicit_cancel() {
        let ctx = RequestContext::new();
        let waiter = ctx.clone();

        let handle = tokio::spawn(async move { waiter.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        ctx.cancel();

        handle.await.expect("waiter task must finish");
    }
}
