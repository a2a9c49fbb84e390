//! Bounded-attempt retry execution.
//!
//! The executor runs an operation up to `max_attempts` times, classifying
//! each failure through [`RetryClass`], sleeping a jittered exponential
//! backoff between attempts, and observing the request context at every
//! suspension point. Attempt indices and backoff delays are recorded on the
//! active tracing span so every retry is visible to operators.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn, Span};

use crate::context::RequestContext;
use crate::resilience::backoff;

/// Classification of a failed attempt.
///
/// Implemented by the operation's error type; the executor retries only
/// failures that report themselves retryable.
pub trait RetryClass {
    /// Whether another attempt could plausibly succeed.
    fn is_retryable(&self) -> bool;

    /// HTTP status behind the failure, when the failure was a response
    /// rather than a transport error. Selects which span event is emitted
    /// before backing off.
    fn status(&self) -> Option<u16> {
        None
    }
}

/// Immutable retry configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of calls, the initial attempt included.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
    /// Growth factor applied per attempt; must be >= 1.
    pub backoff_multiplier: f64,
    /// Jitter window as a fraction of the nominal delay, in [0, 1].
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter_fraction: 0.3,
        }
    }
}

impl RetryPolicy {
    /// Start building a policy from the defaults.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }
        if self.max_backoff < self.initial_backoff {
            return Err("max_backoff must be at least initial_backoff".to_string());
        }
        if self.backoff_multiplier < 1.0 {
            return Err("backoff_multiplier must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err("jitter_fraction must be within [0, 1]".to_string());
        }
        Ok(())
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self { policy: RetryPolicy::default() }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts;
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.policy.initial_backoff = backoff;
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.policy.max_backoff = backoff;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.policy.backoff_multiplier = multiplier;
        self
    }

    pub fn jitter_fraction(mut self, fraction: f64) -> Self {
        self.policy.jitter_fraction = fraction;
        self
    }

    pub fn build(self) -> Result<RetryPolicy, String> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}

/// Terminal failure of a retry sequence.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last attempt's error.
    #[error("all {attempts} attempts failed: {last}")]
    Exhausted { attempts: u32, last: E },

    /// The first non-retryable failure, returned without further attempts.
    #[error("non-retryable failure: {0}")]
    NonRetryable(E),

    /// The context was cancelled or its deadline passed.
    #[error("cancelled before an attempt could complete")]
    Cancelled,
}

/// Runs operations under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create an executor; a zero `max_attempts` is clamped to one call.
    pub fn new(policy: RetryPolicy) -> Self {
        let policy = RetryPolicy { max_attempts: policy.max_attempts.max(1), ..policy };
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails terminally, or attempts run out.
    ///
    /// The closure receives the 0-based attempt index. Cancellation is
    /// observed before each attempt, while an attempt is in flight, and
    /// during the backoff sleep; a cancelled sleep never produces a further
    /// attempt, and no sleep follows the final attempt.
    pub async fn execute<F, Fut, T, E>(
        &self,
        ctx: &RequestContext,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryClass + fmt::Display,
    {
        let span = Span::current();
        let mut attempt: u32 = 0;

        loop {
            if ctx.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            span.record("retry.attempt", attempt);

            let outcome = tokio::select! {
                outcome = op(attempt) => outcome,
                _ = ctx.cancelled() => {
                    warn!(attempt, "attempt cancelled mid-flight");
                    return Err(RetryError::Cancelled);
                }
            };

            match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        span.record("retry.succeeded", true);
                        debug!(attempt, "operation recovered after retrying");
                    }
                    return Ok(value);
                }
                Err(error) if !error.is_retryable() => {
                    debug!(attempt, %error, "failure is not retryable");
                    return Err(RetryError::NonRetryable(error));
                }
                Err(error) => {
                    match error.status() {
                        Some(status) => tracing::info!(status_code = status, "retry_due_to_status"),
                        None => tracing::info!(error = %error, "retry_due_to_error"),
                    }

                    if attempt + 1 >= self.policy.max_attempts {
                        span.record("retry.exhausted", true);
                        warn!(
                            attempts = self.policy.max_attempts,
                            last_error = %error,
                            "all retry attempts failed"
                        );
                        return Err(RetryError::Exhausted {
                            attempts: self.policy.max_attempts,
                            last: error,
                        });
                    }

                    let delay = backoff::delay_for(&self.policy, attempt, &mut rand::thread_rng());
                    span.record("retry.backoff_ms", delay.as_millis() as u64);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = ctx.cancelled() => {
                            warn!(attempt, "cancelled during retry backoff");
                            return Err(RetryError::Cancelled);
                        }
                    }

                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;

    /// Test failure carrying its own classification.
    #[derive(Debug)]
    enum TestError {
        Transient,
        Status(u16),
        Fatal,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient failure"),
                TestError::Status(status) => write!(f, "status {status}"),
                TestError::Fatal => write!(f, "fatal failure"),
            }
        }
    }

    impl RetryClass for TestError {
        fn is_retryable(&self) -> bool {
            !matches!(self, TestError::Fatal)
        }

        fn status(&self) -> Option<u16> {
            match self {
                TestError::Status(status) => Some(*status),
                _ => None,
            }
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            backoff_multiplier: 2.0,
            jitter_fraction: 0.0,
        }
    }

    #[test]
    fn default_policy_matches_payment_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(50));
        assert_eq!(policy.max_backoff, Duration::from_secs(1));
        assert_eq!(policy.backoff_multiplier, 2.0);
        assert_eq!(policy.jitter_fraction, 0.3);
    }

    #[test]
    fn builder_validates_configuration() {
        assert!(RetryPolicy::builder().max_attempts(0).build().is_err());
        assert!(RetryPolicy::builder().backoff_multiplier(0.5).build().is_err());
        assert!(RetryPolicy::builder().jitter_fraction(1.5).build().is_err());
        assert!(RetryPolicy::builder()
            .initial_backoff(Duration::from_secs(2))
            .max_backoff(Duration::from_secs(1))
            .build()
            .is_err());

        let policy = RetryPolicy::builder()
            .max_attempts(5)
            .initial_backoff(Duration::from_millis(10))
            .jitter_fraction(0.0)
            .build()
            .expect("valid policy");
        assert_eq!(policy.max_attempts, 5);
    }

    #[tokio::test]
    async fn success_on_first_attempt_makes_one_call() {
        let executor = RetryExecutor::new(fast_policy(3));
        let calls = Arc::new(AtomicU32::new(0));
        let ctx = RequestContext::new();

        let result = executor
            .execute(&ctx, |_attempt| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TestError>(42)
                }
            })
            .await;

        assert_eq!(result.expect("should succeed"), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let executor = RetryExecutor::new(fast_policy(3));
        let calls = Arc::new(AtomicU32::new(0));
        let ctx = RequestContext::new();

        let result = executor
            .execute(&ctx, |_attempt| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(TestError::Status(500))
                    } else {
                        Ok("recovered")
                    }
                }
            })
            .await;

        assert_eq!(result.expect("should recover"), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// With a downstream that always fails, exactly `max_attempts` calls are
    /// made and the last failure is carried out.
    #[tokio::test]
    async fn exhaustion_makes_exactly_max_attempts_calls() {
        let executor = RetryExecutor::new(fast_policy(3));
        let calls = Arc::new(AtomicU32::new(0));
        let ctx = RequestContext::new();

        let result: Result<(), _> = executor
            .execute(&ctx, |_attempt| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Transient)
                }
            })
            .await;

        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(last, TestError::Transient));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_failure_stops_after_one_call() {
        let executor = RetryExecutor::new(fast_policy(5));
        let calls = Arc::new(AtomicU32::new(0));
        let ctx = RequestContext::new();

        let result: Result<(), _> = executor
            .execute(&ctx, |_attempt| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Fatal)
                }
            })
            .await;

        assert!(matches!(result, Err(RetryError::NonRetryable(TestError::Fatal))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_attempt_policy_never_retries() {
        let executor = RetryExecutor::new(fast_policy(1));
        let calls = Arc::new(AtomicU32::new(0));
        let ctx = RequestContext::new();

        let result: Result<(), _> = executor
            .execute(&ctx, |_attempt| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Transient)
                }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// A context cancelled up front yields zero calls.
    #[tokio::test]
    async fn cancelled_context_makes_no_calls() {
        let executor = RetryExecutor::new(fast_policy(3));
        let calls = Arc::new(AtomicU32::new(0));
        let ctx = RequestContext::new();
        ctx.cancel();

        let result: Result<(), RetryError<TestError>> = executor
            .execute(&ctx, |_attempt| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_during_backoff_stops_the_sequence() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter_fraction: 0.0,
        };
        let executor = RetryExecutor::new(policy);
        let calls = Arc::new(AtomicU32::new(0));
        let ctx = RequestContext::new();

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let result: Result<(), _> = executor
            .execute(&ctx, |_attempt| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Transient)
                }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "no attempt after a cancelled sleep");
        assert!(start.elapsed() < Duration::from_millis(150));
    }

    /// A deadline firing while an attempt is in flight aborts the attempt.
    #[tokio::test]
    async fn deadline_aborts_an_in_flight_attempt() {
        let executor = RetryExecutor::new(fast_policy(3));
        let ctx = RequestContext::new().with_budget(Duration::from_millis(30));

        let start = Instant::now();
        let result: Result<(), RetryError<TestError>> = executor
            .execute(&ctx, |_attempt| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn attempt_index_is_passed_to_the_operation() {
        let executor = RetryExecutor::new(fast_policy(3));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let ctx = RequestContext::new();

        let _result: Result<(), _> = executor
            .execute(&ctx, |attempt| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().expect("test lock").push(attempt);
                    Err(TestError::Transient)
                }
            })
            .await;

        assert_eq!(*seen.lock().expect("test lock"), vec![0, 1, 2]);
    }
}
