//! Circuit breaker guarding one downstream dependency.
//!
//! The breaker is a three-state machine shared by every request to a
//! dependency. While `Closed` it accumulates failure counts over a rolling
//! window and trips once the policy's predicate holds; while `Open` it sheds
//! calls until the cooldown elapses; while `HalfOpen` it admits a bounded
//! number of probe calls and closes again only when a probe generation
//! completes without a failure. All state lives under a single mutex, so
//! transitions are linearizable and the trip predicate always sees a
//! point-in-time snapshot of the counts.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn, Span};

use crate::clock::{Clock, SystemClock};

/// Request and failure counts accumulated over the current rolling window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_failures: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn record_success(&mut self) {
        self.requests += 1;
        self.consecutive_failures = 0;
    }

    fn record_failure(&mut self) {
        self.requests += 1;
        self.total_failures += 1;
        self.consecutive_failures += 1;
    }
}

/// Decision function evaluated after each failure while closed.
pub type TripPredicate = Arc<dyn Fn(Counts) -> bool + Send + Sync>;

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Immutable breaker configuration.
#[derive(Clone)]
pub struct BreakerPolicy {
    /// Dependency identifier used in span attributes and log fields.
    pub name: String,
    /// Probes allowed in flight while half-open.
    pub half_open_probe_budget: u32,
    /// Window over which counts accumulate while closed.
    pub rolling_window: Duration,
    /// Cooldown after opening before the first probe is admitted.
    pub open_cooldown: Duration,
    /// Returns true when the breaker should trip after a failure.
    pub trip_predicate: TripPredicate,
}

impl fmt::Debug for BreakerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerPolicy")
            .field("name", &self.name)
            .field("half_open_probe_budget", &self.half_open_probe_budget)
            .field("rolling_window", &self.rolling_window)
            .field("open_cooldown", &self.open_cooldown)
            .finish_non_exhaustive()
    }
}

/// Default trip rule: five consecutive failures, or a 60% failure rate once
/// at least ten requests are in the window.
fn default_trip(counts: Counts) -> bool {
    if counts.consecutive_failures >= 5 {
        return true;
    }
    counts.requests >= 10
        && f64::from(counts.total_failures) / f64::from(counts.requests) >= 0.6
}

impl BreakerPolicy {
    /// Policy with the default thresholds for the named dependency.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            half_open_probe_budget: 3,
            rolling_window: Duration::from_secs(10),
            open_cooldown: Duration::from_secs(30),
            trip_predicate: Arc::new(default_trip),
        }
    }

    /// Start building a policy from the defaults.
    pub fn builder(name: impl Into<String>) -> BreakerPolicyBuilder {
        BreakerPolicyBuilder { policy: Self::new(name) }
    }
}

/// Builder for [`BreakerPolicy`].
#[derive(Debug)]
pub struct BreakerPolicyBuilder {
    policy: BreakerPolicy,
}

impl BreakerPolicyBuilder {
    pub fn half_open_probe_budget(mut self, budget: u32) -> Self {
        self.policy.half_open_probe_budget = budget;
        self
    }

    pub fn rolling_window(mut self, window: Duration) -> Self {
        self.policy.rolling_window = window;
        self
    }

    pub fn open_cooldown(mut self, cooldown: Duration) -> Self {
        self.policy.open_cooldown = cooldown;
        self
    }

    pub fn trip_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(Counts) -> bool + Send + Sync + 'static,
    {
        self.policy.trip_predicate = Arc::new(predicate);
        self
    }

    pub fn build(self) -> Result<BreakerPolicy, String> {
        if self.policy.half_open_probe_budget == 0 {
            return Err("half_open_probe_budget must be greater than 0".to_string());
        }
        Ok(self.policy)
    }
}

/// Failure surfaced by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Shed without invoking the operation.
    #[error("{dependency} circuit breaker is open")]
    Open { dependency: String },

    /// The operation ran and failed; counted against the breaker.
    #[error(transparent)]
    Operation(E),
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    counts: Counts,
    window_started_at: Instant,
    opened_at: Option<Instant>,
    half_open_inflight: u32,
    half_open_failed: bool,
}

/// Per-dependency circuit breaker.
///
/// One breaker failure corresponds to one failed invocation of the wrapped
/// operation; in the payment stack the breaker wraps the retry executor, so
/// a failure here is an exhausted (or cancelled) retry cycle, not a single
/// attempt.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    policy: BreakerPolicy,
    state: Mutex<BreakerState>,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("policy", &self.policy)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Breaker on the system clock.
    pub fn new(policy: BreakerPolicy) -> Self {
        Self::with_clock(policy, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Breaker on an injected clock (tests step a mock through cooldowns).
    pub fn with_clock(policy: BreakerPolicy, clock: C) -> Self {
        let state = BreakerState {
            state: CircuitState::Closed,
            counts: Counts::default(),
            window_started_at: clock.now(),
            opened_at: None,
            half_open_inflight: 0,
            half_open_failed: false,
        };
        Self { policy, state: Mutex::new(state), clock }
    }

    pub fn policy(&self) -> &BreakerPolicy {
        &self.policy
    }

    /// Current state, without advancing time-based transitions.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Snapshot of the current window's counts.
    pub fn counts(&self) -> Counts {
        self.lock().counts
    }

    /// Run `op` through the breaker.
    ///
    /// The state is consulted and advanced under the lock, a half-open probe
    /// slot is reserved if applicable, and the lock is released before the
    /// operation is awaited. Completion reacquires the lock to update the
    /// counts and evaluate the trip predicate.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let span = Span::current();

        let admitted_as_probe = {
            let mut guard = self.lock();
            let now = self.clock.now();
            self.advance(&mut guard, now);
            span.record("cb.state", tracing::field::display(guard.state));

            match guard.state {
                CircuitState::Closed => false,
                CircuitState::Open => {
                    span.record("cb.open", true);
                    warn!(dependency = %self.policy.name, "circuit open, shedding call");
                    return Err(BreakerError::Open { dependency: self.policy.name.clone() });
                }
                CircuitState::HalfOpen => {
                    if guard.half_open_inflight >= self.policy.half_open_probe_budget {
                        span.record("cb.open", true);
                        debug!(
                            dependency = %self.policy.name,
                            inflight = guard.half_open_inflight,
                            "half-open probe budget exhausted"
                        );
                        return Err(BreakerError::Open { dependency: self.policy.name.clone() });
                    }
                    guard.half_open_inflight += 1;
                    true
                }
            }
        };

        let result = op().await;

        {
            let mut guard = self.lock();
            let now = self.clock.now();
            match &result {
                Ok(_) => self.on_success(&mut guard, admitted_as_probe, now),
                Err(error) => {
                    debug!(dependency = %self.policy.name, error = %error, "protected call failed");
                    self.on_failure(&mut guard, admitted_as_probe, now);
                }
            }
        }

        result.map_err(BreakerError::Operation)
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // a poisoned lock still holds consistent counts; keep serving
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply time-based transitions: window expiry while closed, cooldown
    /// expiry while open.
    fn advance(&self, guard: &mut BreakerState, now: Instant) {
        match guard.state {
            CircuitState::Closed => {
                if now.duration_since(guard.window_started_at) >= self.policy.rolling_window {
                    guard.counts = Counts::default();
                    guard.window_started_at = now;
                }
            }
            CircuitState::Open => {
                let opened_at = guard.opened_at.unwrap_or(guard.window_started_at);
                if now.duration_since(opened_at) >= self.policy.open_cooldown {
                    self.transition(guard, CircuitState::HalfOpen, now);
                }
            }
            CircuitState::HalfOpen => {}
        }
    }

    fn on_success(&self, guard: &mut BreakerState, probe: bool, now: Instant) {
        match guard.state {
            CircuitState::Closed => guard.counts.record_success(),
            CircuitState::HalfOpen if probe => {
                guard.counts.record_success();
                guard.half_open_inflight = guard.half_open_inflight.saturating_sub(1);
                if !guard.half_open_failed && guard.half_open_inflight == 0 {
                    self.transition(guard, CircuitState::Closed, now);
                }
            }
            // late completion from a previous generation; nothing to count
            _ => {}
        }
    }

    fn on_failure(&self, guard: &mut BreakerState, probe: bool, now: Instant) {
        match guard.state {
            CircuitState::Closed => {
                guard.counts.record_failure();
                if (self.policy.trip_predicate)(guard.counts) {
                    self.transition(guard, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen if probe => {
                guard.half_open_failed = true;
                // any probe failure reopens with a fresh cooldown
                self.transition(guard, CircuitState::Open, now);
            }
            _ => {}
        }
    }

    fn transition(&self, guard: &mut BreakerState, to: CircuitState, now: Instant) {
        let from = guard.state;
        guard.state = to;
        guard.counts = Counts::default();
        guard.window_started_at = now;
        guard.half_open_inflight = 0;
        guard.half_open_failed = false;
        guard.opened_at = (to == CircuitState::Open).then_some(now);

        info!(
            dependency = %self.policy.name,
            from = %from,
            to = %to,
            "circuit state changed"
        );
    }
}
