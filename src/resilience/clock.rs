//! Wall-clock time that follows Tokio's monotonic clock.
//!
//! Persisted snapshots need real timestamps, while pacing and open-circuit
//! timeouts must be measurable under `tokio::time::pause()`. `Clock` anchors a
//! wall-clock reading to a Tokio `Instant` and derives every later reading
//! from the monotonic elapsed time, so both needs are served by one source.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// A wall clock driven by Tokio's (pausable) monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    wall_anchor: DateTime<Utc>,
    mono_anchor: Instant,
}

impl Clock {
    /// Anchor a clock at the current time.
    pub fn system() -> Self {
        Self {
            wall_anchor: Utc::now(),
            mono_anchor: Instant::now(),
        }
    }

    /// Current wall-clock time.
    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.mono_anchor);
        self.wall_anchor + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

/// Seconds from `earlier` to `later` as a float, negative if `later` is before.
pub fn secs_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let micros = (later - earlier).num_microseconds().unwrap_or(i64::MAX);
    micros as f64 / 1_000_000.0
}

/// Add fractional seconds to a timestamp, saturating at the latest representable time.
pub fn add_secs(at: DateTime<Utc>, secs: f64) -> DateTime<Utc> {
    if secs <= 0.0 || !secs.is_finite() {
        return at;
    }
    let delta = chrono::Duration::microseconds((secs * 1_000_000.0) as i64);
    at.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Positive duration until `target`, zero if it is already in the past.
pub fn until(now: DateTime<Utc>, target: DateTime<Utc>) -> Duration {
    (target - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_clock_follows_paused_time() {
        let clock = Clock::system();
        let start = clock.now();

        tokio::time::advance(Duration::from_secs(90)).await;

        let elapsed = secs_between(start, clock.now());
        assert!((elapsed - 90.0).abs() < 0.01);
    }

    #[test]
    fn test_secs_between_is_signed() {
        let a = Utc::now();
        let b = add_secs(a, 5.0);
        assert!((secs_between(a, b) - 5.0).abs() < 1e-6);
        assert!((secs_between(b, a) + 5.0).abs() < 1e-6);
        assert_eq!(until(b, a), Duration::ZERO);
    }

    #[test]
    fn test_add_secs_saturates() {
        let now = Utc::now();
        assert_eq!(add_secs(now, 1e15), DateTime::<Utc>::MAX_UTC);
        assert_eq!(add_secs(now, 1e30), DateTime::<Utc>::MAX_UTC);
        assert_eq!(add_secs(now, f64::NAN), now);
    }
}
