//! Exponential backoff math.
//!
//! The functions here are pure: the caller supplies the random sample used
//! for jitter, which keeps this crate free of an RNG and makes the math
//! testable with fixed inputs.

use std::time::Duration;

use crate::config::RetryConfig;

/// Jitter spreads a delay by up to this fraction in either direction.
pub const JITTER_FACTOR: f64 = 0.25;

/// Un-jittered delay after the failed attempt `attempt` (0-indexed).
///
/// `min(base_delay * exponential_base^attempt, max_delay)`
pub fn base_delay(config: &RetryConfig, attempt: u32) -> Duration {
    if config.base_delay.is_zero() {
        return Duration::ZERO;
    }
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let secs = config.base_delay.as_secs_f64() * config.exponential_base.powi(exponent);
    let capped = secs.min(config.max_delay.as_secs_f64());

    Duration::try_from_secs_f64(capped).unwrap_or(config.max_delay)
}

/// Apply jitter to a delay.
///
/// `sample` is a uniform value in `[0.0, 1.0)`, mapped onto
/// `[-JITTER_FACTOR, +JITTER_FACTOR]` of the delay. The result never goes
/// below zero.
pub fn apply_jitter(delay: Duration, sample: f64) -> Duration {
    let secs = delay.as_secs_f64();
    let offset = (sample.clamp(0.0, 1.0) * 2.0 - 1.0) * JITTER_FACTOR * secs;

    Duration::try_from_secs_f64((secs + offset).max(0.0)).unwrap_or(delay)
}

/// Delay to sleep after the failed attempt `attempt`, jittered when enabled.
pub fn delay_for_attempt(config: &RetryConfig, attempt: u32, sample: f64) -> Duration {
    let delay = base_delay(config, attempt);
    if config.jitter {
        apply_jitter(delay, sample)
    } else {
        delay
    }
}

/// Un-jittered delays between every pair of attempts.
///
/// A policy with `max_attempts = n` sleeps at most `n - 1` times.
pub fn backoff_schedule(config: &RetryConfig) -> Vec<Duration> {
    (0..config.max_attempts.saturating_sub(1))
        .map(|attempt| base_delay(config, attempt))
        .collect()
}
