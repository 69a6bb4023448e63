//! Retry backoff and circuit-breaker policy.
//!
//! Two pure-function responsibilities bundled in one module because they
//! share the same inputs (an `InferenceError`) and the same parameters
//! live together in configuration: how long to wait before retrying a
//! task, and when to stop routing to a host entirely.

use std::time::Duration;

use rand::Rng;

use crate::error::InferenceError;

/// Narrow seam so tests can assert on the non-jittered formula without
/// depending on the global RNG's behaviour.
fn jitter_factor() -> f64 {
    rand::rng().random_range(0.5..=1.5)
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// `attempt_index` is 0-based: the delay before the *second* call.
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let raw = self.initial_delay_ms as f64 * self.exponential_base.powi(attempt_index as i32);
        let capped = raw.min(self.max_delay_ms as f64);
        let scaled = if self.jitter {
            capped * jitter_factor()
        } else {
            capped
        };
        Duration::from_millis(scaled.max(0.0) as u64)
    }

    /// Lower bound on `delay_for`, ignoring jitter -- used by tests that
    /// assert an observed inter-attempt delay respects the backoff floor.
    pub fn min_delay_for(&self, attempt_index: u32) -> Duration {
        let raw = self.initial_delay_ms as f64 * self.exponential_base.powi(attempt_index as i32);
        let capped = raw.min(self.max_delay_ms as f64);
        let floor = if self.jitter { capped * 0.5 } else { capped };
        Duration::from_millis(floor.max(0.0) as u64)
    }

    pub fn should_retry(&self, attempt_index: u32, error: &InferenceError) -> bool {
        if attempt_index + 1 >= self.max_attempts {
            return false;
        }
        error.is_retryable()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitPolicy {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitPolicy {
    fn default() -> Self {
        Self { failure_threshold: 3, cooldown: Duration::from_secs(300) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout_error() -> InferenceError {
        InferenceError::Timeout { host: "h1".into(), timeout_secs: 30 }
    }

    fn validation_error() -> InferenceError {
        InferenceError::Validation { host: "h1".into(), reason: "invalid prompt".into() }
    }

    #[test]
    fn delay_grows_exponentially_without_jitter() {
        let policy = RetryPolicy { jitter: false, ..Default::default() };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn delay_is_capped_at_max_delay_ms() {
        let policy = RetryPolicy { jitter: false, max_delay_ms: 500, ..Default::default() };
        assert_eq!(policy.delay_for(10), Duration::from_millis(500));
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let d = policy.delay_for(1).as_millis() as f64;
            assert!(d >= 100.0 && d <= 300.0, "delay {d} out of jitter bounds");
        }
    }

    #[test]
    fn should_retry_false_at_last_attempt() {
        let policy = RetryPolicy { max_attempts: 3, ..Default::default() };
        assert!(policy.should_retry(0, &timeout_error()));
        assert!(policy.should_retry(1, &timeout_error()));
        assert!(!policy.should_retry(2, &timeout_error()));
    }

    #[test]
    fn should_retry_false_for_validation_errors() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(0, &validation_error()));
    }

    #[test]
    fn default_circuit_policy_matches_documented_defaults() {
        let policy = CircuitPolicy::default();
        assert_eq!(policy.failure_threshold, 3);
        assert_eq!(policy.cooldown, Duration::from_secs(300));
    }
}
