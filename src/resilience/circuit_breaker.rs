//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: upstream assumed down, calls fail fast
//! - Half-Open: a few probe calls decide whether the upstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: now >= last_state_change + current_timeout
//! Half-Open → Closed: successes >= half_open_success_threshold (of half_open_max_calls)
//! Half-Open → Open: any failure, timeout *= timeout_multiplier (capped)
//! ```
//!
//! # Design Decisions
//! - One breaker per collector, mutated only by that collector's task
//! - Fail fast in Open state (no transport call)
//! - Majority of probes in Half-Open (a single lucky probe never closes the circuit)
//! - Lifetime counters survive operator resets

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

use crate::config::CircuitBreakerConfig;
use crate::resilience::clock::{self, Clock};

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - calls are allowed.
    Closed,
    /// Upstream is failing - calls are blocked.
    Open,
    /// Testing recovery - limited calls allowed.
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding used for the state gauge.
    pub fn as_gauge(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Persistable snapshot of a circuit breaker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub half_open_attempts: u32,
    pub current_timeout_secs: f64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_state_change_time: DateTime<Utc>,

    pub total_successes: u64,
    pub total_failures: u64,
    pub circuit_opens: u64,
    pub successful_recoveries: u64,
    pub failed_recoveries: u64,
    pub cumulative_open_secs: f64,

    /// Outcomes since the last operator reset, used for the health score.
    pub window_successes: u64,
    pub window_failures: u64,
    pub last_reset_time: Option<DateTime<Utc>>,
}

impl CircuitBreakerState {
    fn new(name: &str, config: &CircuitBreakerConfig, now: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            half_open_attempts: 0,
            current_timeout_secs: config.timeout_secs,
            last_failure_time: None,
            last_state_change_time: now,
            total_successes: 0,
            total_failures: 0,
            circuit_opens: 0,
            successful_recoveries: 0,
            failed_recoveries: 0,
            cumulative_open_secs: 0.0,
            window_successes: 0,
            window_failures: 0,
            last_reset_time: None,
        }
    }

    /// Ratio of successful outcomes in the scoring window.
    pub fn health_score(&self) -> f64 {
        let total = self.window_successes + self.window_failures;
        if total == 0 {
            return if self.last_reset_time.is_some() { 1.0 } else { 0.0 };
        }
        self.window_successes as f64 / total as f64
    }

    fn reopen_at(&self) -> DateTime<Utc> {
        clock::add_secs(self.last_state_change_time, self.current_timeout_secs)
    }
}

/// Point-in-time view of a circuit breaker for health reporting.
#[derive(Clone, Debug, Serialize)]
pub struct CircuitBreakerStatus {
    #[serde(flatten)]
    pub snapshot: CircuitBreakerState,
    pub health_score: f64,
    /// Seconds until an open circuit admits a probe.
    pub retry_after_secs: Option<f64>,
    pub config: CircuitBreakerConfig,
}

/// Failure-isolation state machine guarding one collector's upstream.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<CircuitBreakerState>,
    config: CircuitBreakerConfig,
    clock: Clock,
}

impl CircuitBreaker {
    /// Create a breaker in the Closed state.
    pub fn new(name: &str, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Clock::system())
    }

    pub fn with_clock(name: &str, config: CircuitBreakerConfig, clock: Clock) -> Self {
        let state = CircuitBreakerState::new(name, &config, clock.now());
        Self {
            inner: Mutex::new(state),
            config,
            clock,
        }
    }

    /// Lock the state mutex, recovering from poison if necessary.
    ///
    /// The worst case after a poisoned lock is a slightly stale counter,
    /// which is better than taking the collector down.
    fn lock(&self) -> MutexGuard<'_, CircuitBreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Check whether a call may be attempted now.
    ///
    /// Handles the Open → Half-Open transition once the timeout has elapsed
    /// and counts half-open probes against `half_open_max_calls`.
    pub fn can_attempt(&self) -> bool {
        let now = self.clock.now();
        let mut guard = self.lock();
        let s = &mut *guard;

        match s.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if now < s.reopen_at() {
                    return false;
                }
                s.cumulative_open_secs += clock::secs_between(s.last_state_change_time, now).max(0.0);
                s.state = CircuitState::HalfOpen;
                s.last_state_change_time = now;
                s.consecutive_successes = 0;
                s.half_open_attempts = 1;
                tracing::info!(
                    circuit = %s.name,
                    timeout_secs = s.current_timeout_secs,
                    "Circuit transitioning from OPEN to HALF_OPEN"
                );
                true
            }
            CircuitState::HalfOpen => {
                if s.half_open_attempts < self.config.half_open_max_calls {
                    s.half_open_attempts += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let now = self.clock.now();
        let mut guard = self.lock();
        let s = &mut *guard;

        match s.state {
            CircuitState::Closed => {
                s.consecutive_failures = 0;
                s.total_successes += 1;
                s.window_successes += 1;
            }
            CircuitState::HalfOpen => {
                s.total_successes += 1;
                s.window_successes += 1;
                s.consecutive_successes += 1;
                tracing::debug!(
                    circuit = %s.name,
                    successes = s.consecutive_successes,
                    required = self.config.half_open_success_threshold,
                    "Probe succeeded in HALF_OPEN"
                );

                if s.consecutive_successes >= self.config.half_open_success_threshold {
                    s.state = CircuitState::Closed;
                    s.last_state_change_time = now;
                    s.consecutive_failures = 0;
                    s.consecutive_successes = 0;
                    s.half_open_attempts = 0;
                    s.current_timeout_secs = self.config.timeout_secs;
                    s.successful_recoveries += 1;
                    tracing::info!(circuit = %s.name, "Circuit recovered, now CLOSED");
                }
            }
            CircuitState::Open => {
                tracing::debug!(circuit = %s.name, "Ignoring late success while OPEN");
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut guard = self.lock();
        let s = &mut *guard;
        s.last_failure_time = Some(now);

        match s.state {
            CircuitState::Closed => {
                s.total_failures += 1;
                s.window_failures += 1;
                s.consecutive_failures += 1;
                if s.consecutive_failures >= self.config.failure_threshold {
                    s.state = CircuitState::Open;
                    s.last_state_change_time = now;
                    s.circuit_opens += 1;
                    tracing::info!(
                        circuit = %s.name,
                        failures = s.consecutive_failures,
                        timeout_secs = s.current_timeout_secs,
                        "Circuit OPEN after consecutive failures"
                    );
                } else {
                    tracing::debug!(
                        circuit = %s.name,
                        failures = s.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "Failure recorded"
                    );
                }
            }
            CircuitState::HalfOpen => {
                s.total_failures += 1;
                s.window_failures += 1;
                s.consecutive_failures += 1;
                s.state = CircuitState::Open;
                s.last_state_change_time = now;
                s.consecutive_successes = 0;
                s.half_open_attempts = 0;
                s.failed_recoveries += 1;
                s.current_timeout_secs = (s.current_timeout_secs * self.config.timeout_multiplier)
                    .min(self.config.max_timeout_secs);
                tracing::info!(
                    circuit = %s.name,
                    timeout_secs = s.current_timeout_secs,
                    "Probe failed in HALF_OPEN, circuit reopened"
                );
            }
            CircuitState::Open => {
                // Already open: only the failure timestamp moves.
                tracing::debug!(circuit = %s.name, "Failure recorded while already OPEN");
            }
        }
    }

    /// Operator override: open the circuit now.
    pub fn force_open(&self) {
        let now = self.clock.now();
        let mut guard = self.lock();
        let s = &mut *guard;
        s.state = CircuitState::Open;
        s.last_state_change_time = now;
        s.consecutive_failures = 0;
        s.consecutive_successes = 0;
        s.half_open_attempts = 0;
        tracing::warn!(circuit = %s.name, "Circuit forced OPEN");
    }

    /// Operator override: close the circuit now, keeping the grown timeout.
    pub fn force_close(&self) {
        let now = self.clock.now();
        let mut guard = self.lock();
        let s = &mut *guard;
        Self::leave_open(s, now);
        s.state = CircuitState::Closed;
        s.last_state_change_time = now;
        s.consecutive_failures = 0;
        s.consecutive_successes = 0;
        s.half_open_attempts = 0;
        tracing::warn!(circuit = %s.name, "Circuit forced CLOSED");
    }

    /// Reset to a fresh Closed state, preserving lifetime counters.
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut guard = self.lock();
        let s = &mut *guard;
        Self::leave_open(s, now);
        s.state = CircuitState::Closed;
        s.last_state_change_time = now;
        s.consecutive_failures = 0;
        s.consecutive_successes = 0;
        s.half_open_attempts = 0;
        s.current_timeout_secs = self.config.timeout_secs;
        s.last_failure_time = None;
        s.window_successes = 0;
        s.window_failures = 0;
        s.last_reset_time = Some(now);
        tracing::info!(circuit = %s.name, "Circuit manually reset");
    }

    fn leave_open(s: &mut CircuitBreakerState, now: DateTime<Utc>) {
        if s.state == CircuitState::Open {
            s.cumulative_open_secs += clock::secs_between(s.last_state_change_time, now).max(0.0);
        }
    }

    /// Current state without triggering transitions.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn health_score(&self) -> f64 {
        self.lock().health_score()
    }

    /// Copy of the persistable state.
    pub fn snapshot(&self) -> CircuitBreakerState {
        self.lock().clone()
    }

    /// Replace the current state with a previously persisted snapshot.
    pub fn restore(&self, snapshot: CircuitBreakerState) {
        let mut guard = self.lock();
        let s = &mut *guard;
        tracing::info!(
            circuit = %s.name,
            state = %snapshot.state,
            opens = snapshot.circuit_opens,
            "Restored circuit breaker state"
        );
        let name = std::mem::take(&mut s.name);
        *s = CircuitBreakerState { name, ..snapshot };
    }

    /// Snapshot plus derived fields.
    pub fn status(&self) -> CircuitBreakerStatus {
        let now = self.clock.now();
        let snapshot = self.snapshot();
        let retry_after_secs = (snapshot.state == CircuitState::Open)
            .then(|| clock::secs_between(now, snapshot.reopen_at()).max(0.0));
        CircuitBreakerStatus {
            health_score: snapshot.health_score(),
            retry_after_secs,
            config: self.config.clone(),
            snapshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn breaker(failure_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold,
                timeout_secs: 60.0,
                ..Default::default()
            },
        )
    }

    async fn open_then_wait(cb: &CircuitBreaker, secs: u64) {
        for _ in 0..cb.config().failure_threshold {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_starts_closed() {
        let cb = breaker(5);
        assert!(cb.can_attempt());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.health_score(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_at_threshold() {
        let cb = breaker(5);
        for _ in 0..4 {
            cb.record_failure();
        }
        assert!(cb.can_attempt());
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_attempt());
        assert_eq!(cb.snapshot().circuit_opens, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_failures() {
        let cb = breaker(3);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.consecutive_failures(), 0);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_only_after_timeout() {
        let cb = breaker(2);
        open_then_wait(&cb, 59).await;
        assert!(!cb.can_attempt());
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.can_attempt());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_majority_closes() {
        let cb = breaker(2);
        open_then_wait(&cb, 60).await;

        assert!(cb.can_attempt());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert!(cb.can_attempt());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);

        let snap = cb.snapshot();
        assert_eq!(snap.successful_recoveries, 1);
        assert_eq!(snap.current_timeout_secs, 60.0);
        assert!(snap.cumulative_open_secs >= 60.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_probes() {
        let cb = breaker(1);
        open_then_wait(&cb, 60).await;

        assert!(cb.can_attempt());
        assert!(cb.can_attempt());
        assert!(cb.can_attempt());
        // Three probes outstanding, none decided.
        assert!(!cb.can_attempt());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_grows_timeout() {
        let cb = breaker(1);
        open_then_wait(&cb, 60).await;
        assert!(cb.can_attempt());
        cb.record_success();
        cb.record_failure();

        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.current_timeout_secs, 90.0);
        assert_eq!(snap.failed_recoveries, 1);

        // The grown timeout is what gates the next probe.
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!cb.can_attempt());
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cb.can_attempt());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_growth_is_capped() {
        let cb = CircuitBreaker::new(
            "capped",
            CircuitBreakerConfig {
                failure_threshold: 1,
                timeout_secs: 3000.0,
                ..Default::default()
            },
        );
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(3000)).await;
        assert!(cb.can_attempt());
        cb.record_failure();
        assert_eq!(cb.snapshot().current_timeout_secs, 3600.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_while_open_only_updates_timestamp() {
        let cb = breaker(2);
        cb.record_failure();
        cb.record_failure();
        let before = cb.snapshot();

        tokio::time::advance(Duration::from_secs(5)).await;
        cb.record_failure();
        let after = cb.snapshot();

        assert_eq!(after.total_failures, before.total_failures);
        assert_eq!(after.circuit_opens, before.circuit_opens);
        assert_eq!(after.last_state_change_time, before.last_state_change_time);
        assert!(after.last_failure_time > before.last_failure_time);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_preserves_history() {
        let cb = breaker(2);
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(cb.health_score(), 1.0);
        assert_eq!(snap.total_failures, 2);
        assert_eq!(snap.circuit_opens, 1);
        assert!(cb.can_attempt());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_on_fresh_breaker_scores_healthy() {
        let cb = breaker(2);
        cb.reset();
        assert_eq!(cb.health_score(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_open_and_close() {
        let cb = breaker(5);
        cb.force_open();
        assert!(!cb.can_attempt());
        assert_eq!(cb.snapshot().circuit_opens, 0);

        cb.force_close();
        assert!(cb.can_attempt());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_score_tracks_outcomes() {
        let cb = breaker(10);
        cb.record_success();
        cb.record_success();
        cb.record_success();
        cb.record_failure();
        assert!((cb.health_score() - 0.75).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_retry_after() {
        let cb = breaker(1);
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(20)).await;

        let status = cb.status();
        let remaining = status.retry_after_secs.unwrap();
        assert!((remaining - 40.0).abs() < 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_round_trip() {
        let cb = breaker(2);
        cb.record_success();
        cb.record_failure();
        cb.record_failure();

        let snapshot = cb.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: CircuitBreakerState = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, snapshot);

        let restored = breaker(2);
        restored.restore(decoded);
        assert_eq!(restored.state(), CircuitState::Open);
        assert!(!restored.can_attempt());
    }
}
