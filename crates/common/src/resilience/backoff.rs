//! Jittered exponential backoff calculation.
//!
//! Pure modulo the supplied random source; the retry executor passes
//! `rand::thread_rng()` in production and tests pass a seeded generator or
//! a zero jitter fraction for determinism.

use std::time::Duration;

use rand::Rng;

use super::retry::RetryPolicy;

/// Exponent cap keeping `multiplier^attempt` well inside f64 range.
const MAX_BACKOFF_EXPONENT: u32 = 32;

/// Delay to sleep after attempt `attempt` (0-based) fails.
///
/// `nominal = initial_backoff * multiplier^attempt`, clamped to
/// `max_backoff`; jitter perturbs the result by a uniform draw from
/// ±`jitter_fraction` of the nominal value, floored at zero.
pub fn delay_for<R: Rng>(policy: &RetryPolicy, attempt: u32, rng: &mut R) -> Duration {
    let exponent = attempt.min(MAX_BACKOFF_EXPONENT);
    let nominal = (policy.initial_backoff.as_secs_f64()
        * policy.backoff_multiplier.powi(exponent as i32))
    .min(policy.max_backoff.as_secs_f64());

    let window = nominal * policy.jitter_fraction;
    let jitter = if window > 0.0 { rng.gen_range(-window..=window) } else { 0.0 };

    Duration::from_secs_f64((nominal + jitter).max(0.0))
}
