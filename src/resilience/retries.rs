//! Retry classification and policy.
//!
//! # Responsibilities
//! - Classify upstream statuses into success, throttle, transient and fatal
//! - Decide how many attempts a request gets and how long to wait between them
//!
//! # Design Decisions
//! - 429 and 5xx are retried; other 4xx never are
//! - 1xx and 3xx are unexpected: the transport follows redirects, so one reaching
//!   the collector is a misconfigured endpoint and is not retried
//! - Transport errors (timeouts, resets, refused connections) are always retryable
//! - Delays come from `backoff::calculate_backoff` so retries are jittered

use std::time::Duration;

use crate::config::CollectorSettings;
use crate::resilience::backoff::calculate_backoff;

/// How the request loop should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Surface immediately.
    Never,
    /// Retry after an exponential delay while attempts remain.
    WithBackoff,
    /// The breaker refused the call; the cycle ends without a transport call.
    CircuitOpen,
}

/// Coarse class of an HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Throttled,
    ServerError,
    ClientError,
    Unexpected,
}

impl StatusClass {
    pub fn of(status: u16) -> Self {
        match status {
            200..=299 => Self::Success,
            429 => Self::Throttled,
            500..=599 => Self::ServerError,
            400..=499 => Self::ClientError,
            _ => Self::Unexpected,
        }
    }

    pub fn retry_class(self) -> RetryClass {
        match self {
            Self::Throttled | Self::ServerError => RetryClass::WithBackoff,
            Self::Success | Self::ClientError | Self::Unexpected => RetryClass::Never,
        }
    }
}

/// Attempt budget and delay schedule for one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &CollectorSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_secs_f64(settings.retry_delay_secs.max(0.0)),
            max_delay: Duration::from_secs_f64(settings.max_retry_delay_secs.max(0.0)),
        }
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the retry that follows failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay, self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classes() {
        assert_eq!(StatusClass::of(200), StatusClass::Success);
        assert_eq!(StatusClass::of(204), StatusClass::Success);
        assert_eq!(StatusClass::of(429), StatusClass::Throttled);
        assert_eq!(StatusClass::of(503), StatusClass::ServerError);
        assert_eq!(StatusClass::of(404), StatusClass::ClientError);
        assert_eq!(StatusClass::of(304), StatusClass::Unexpected);
        assert_eq!(StatusClass::of(101), StatusClass::Unexpected);
        assert_eq!(StatusClass::of(302).retry_class(), RetryClass::Never);

        assert_eq!(StatusClass::of(429).retry_class(), RetryClass::WithBackoff);
        assert_eq!(StatusClass::of(500).retry_class(), RetryClass::WithBackoff);
        assert_eq!(StatusClass::of(400).retry_class(), RetryClass::Never);
    }

    #[test]
    fn test_policy_from_settings() {
        let settings = CollectorSettings {
            max_retries: 3,
            retry_delay_secs: 1.0,
            max_retry_delay_secs: 4.0,
            ..Default::default()
        };
        let policy = RetryPolicy::from_settings(&settings);
        assert_eq!(policy.max_attempts(), 4);

        let third = policy.delay_for(2);
        assert!(third >= Duration::from_secs(4) && third < Duration::from_millis(4400));
        let capped = policy.delay_for(5);
        assert!(capped < Duration::from_millis(4400));
    }
}
