//! Retry policy and per-call attempt trace

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Statuses retried with backoff
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Retry policy configuration
///
/// `attempts` counts retries after the initial request: with the default of 3
/// a permanently failing endpoint sees four requests, separated by 5s, 10s
/// and 20s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt
    pub attempts: u32,
    /// Delay before the first retry; doubles for each further retry
    #[serde(with = "duration_secs")]
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_base: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Create policy
    #[inline]
    #[must_use]
    pub fn new(attempts: u32, backoff_base: Duration) -> Self {
        Self {
            attempts,
            backoff_base,
        }
    }

    /// Policy that never retries
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Whether a status is retried
    #[inline]
    #[must_use]
    pub fn is_retryable_status(status: u16) -> bool {
        RETRYABLE_STATUSES.contains(&status)
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }

    /// Full backoff schedule for this policy
    #[must_use]
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.attempts).map(|r| self.delay_for(r)).collect()
    }
}

/// Outcome of one attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AttemptOutcome {
    /// A response was received
    Status {
        /// HTTP status
        code: u16,
    },
    /// No response (connect error or timeout)
    TransportFailure {
        /// Redacted failure description
        message: String,
    },
}

/// Trace of one logical call across its attempts
///
/// Local to a single call; never shared between calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryableCall {
    /// HTTP method
    pub method: String,
    /// Redacted path
    pub path: String,
    /// Attempt outcomes, in order
    pub attempts: Vec<AttemptOutcome>,
    /// Backoff delays actually waited, in order
    #[serde(with = "duration_secs_vec")]
    pub delays: Vec<Duration>,
}

impl RetryableCall {
    /// Start trace for a call
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            attempts: Vec::new(),
            delays: Vec::new(),
        }
    }

    /// Number of attempts made
    #[inline]
    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// Number of retries performed
    #[inline]
    #[must_use]
    pub fn retry_count(&self) -> usize {
        self.delays.len()
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

mod duration_secs_vec {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::ptr_arg)]
    pub(super) fn serialize<S: Serializer>(value: &Vec<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(value.iter().map(Duration::as_secs_f64))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Duration>, D::Error> {
        let secs = Vec::<f64>::deserialize(deserializer)?;
        Ok(secs.into_iter().map(|s| Duration::from_secs_f64(s.max(0.0))).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.backoff_base, Duration::from_secs(5));
    }

    #[test]
    fn default_schedule_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for(3), Duration::from_secs(20));
        assert_eq!(
            policy.schedule(),
            vec![Duration::from_secs(5), Duration::from_secs(10), Duration::from_secs(20)]
        );
    }

    #[test]
    fn retryable_statuses() {
        for status in [429, 500, 502, 503, 504] {
            assert!(RetryPolicy::is_retryable_status(status));
        }
        for status in [400, 401, 403, 404, 409, 501] {
            assert!(!RetryPolicy::is_retryable_status(status));
        }
    }

    #[test]
    fn no_retry_policy_has_empty_schedule() {
        assert!(RetryPolicy::none().schedule().is_empty());
    }

    #[test]
    fn policy_roundtrips_through_json() {
        let policy = RetryPolicy::new(2, Duration::from_secs(1));
        let json = serde_json::to_string(&policy).unwrap();
        let back: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy);
    }
}
