//! Resilience patterns for calling an unreliable dependency.
//!
//! This module provides the failure-mode controls the order workflow layers
//! around its outbound payment call:
//! - **Backoff**: jittered exponential delay calculation
//! - **Retry**: bounded attempts over a cancellable request context
//! - **Circuit breaker**: per-dependency state machine that sheds load after
//!   a failure streak
//! - **Bulkhead**: counting semaphore limiting concurrent calls
//!
//! Each control is an independent value with a single `execute` entry point;
//! the caller composes them explicitly so the ordering is visible and
//! testable. The intended nesting, outermost first, is
//! bulkhead → breaker → retry → operation: bulkhead rejections then never
//! count against the breaker, and one breaker "failure" is one completed
//! retry cycle rather than one attempt.
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use orderflow_common::context::RequestContext;
//! use orderflow_common::resilience::{
//!     BreakerPolicy, Bulkhead, CircuitBreaker, RetryClass, RetryExecutor, RetryPolicy,
//! };
//!
//! #[derive(Debug)]
//! struct Unavailable;
//!
//! impl std::fmt::Display for Unavailable {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "dependency unavailable")
//!     }
//! }
//!
//! impl RetryClass for Unavailable {
//!     fn is_retryable(&self) -> bool {
//!         true
//!     }
//! }
//!
//! # async fn example() {
//! let bulkhead = Bulkhead::new(10);
//! let breaker = CircuitBreaker::new(BreakerPolicy::new("dependency"));
//! let retry = RetryExecutor::new(RetryPolicy::default());
//!
//! let ctx = RequestContext::new();
//! let payment_ctx = ctx.with_budget(Duration::from_millis(500));
//!
//! let result = bulkhead
//!     .execute(&ctx, || async {
//!         breaker
//!             .execute(|| async {
//!                 retry
//!                     .execute(&payment_ctx, |_attempt| async {
//!                         Err::<(), _>(Unavailable)
//!                     })
//!                     .await
//!             })
//!             .await
//!     })
//!     .await;
//! assert!(result.is_err());
//! # }
//! ```

pub mod backoff;
pub mod bulkhead;
pub mod circuit_breaker;
pub mod retry;

pub use bulkhead::{Bulkhead, BulkheadError};
pub use circuit_breaker::{
    BreakerError, BreakerPolicy, BreakerPolicyBuilder, CircuitBreaker, CircuitState, Counts,
};
pub use retry::{RetryClass, RetryError, RetryExecutor, RetryPolicy, RetryPolicyBuilder};
