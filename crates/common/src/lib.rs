//! Reliability toolkit shared by the orderflow services.
//!
//! Generic building blocks for calling an unreliable dependency:
//! - [`context::RequestContext`]: one cancellation signal and an optional
//!   hard deadline, threaded through every layer
//! - [`clock`]: monotonic time abstraction so cooldown-driven state machines
//!   can be tested without real sleeps
//! - [`resilience`]: backoff calculation, bounded-attempt retry, circuit
//!   breaker, and bulkhead
//! - [`idempotency`]: keyed response cache with background expiry
//!
//! Everything here is generic over the protected operation; nothing depends
//! on the order domain or on HTTP.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod clock;
pub mod context;
pub mod idempotency;
pub mod resilience;

// Re-export commonly used types for convenience
// ------------------------------------------------
pub use clock::{Clock, MockClock, SystemClock};
pub use context::RequestContext;
pub use idempotency::IdempotencyStore;
pub use resilience::{
    BreakerError, BreakerPolicy, Bulkhead, BulkheadError, CircuitBreaker, CircuitState, Counts,
    RetryClass, RetryError, RetryExecutor, RetryPolicy,
};
