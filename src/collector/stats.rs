//! Collector statistics and health derivation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::config::CollectorSettings;
use crate::resilience::{CircuitBreakerStatus, RateLimiterStats};

use super::{CollectionOutcome, CollectorPhase};

/// Derived collector health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Failed,
    CircuitOpen,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Degraded => write!(f, "DEGRADED"),
            Self::Failed => write!(f, "FAILED"),
            Self::CircuitOpen => write!(f, "CIRCUIT_OPEN"),
        }
    }
}

/// Counters and timestamps for one collector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectorStatistics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Calls refused by the open circuit; never reached the transport.
    pub rejected_requests: u64,
    pub data_points_collected: u64,
    pub collection_cycles: u64,
    pub failed_cycles: u64,
    pub consecutive_failed_cycles: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub last_collection_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_error_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Failure ratio over the recent outcome window.
    pub recent_failure_rate: f64,
}

/// Full health view returned by `health_check()`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub name: String,
    pub healthy: bool,
    pub status: HealthStatus,
    pub phase: CollectorPhase,
    pub is_running: bool,
    pub circuit_breaker: CircuitBreakerStatus,
    pub rate_limiter: RateLimiterStats,
    pub statistics: CollectorStatistics,
}

struct Inner {
    stats: CollectorStatistics,
    recent: VecDeque<bool>,
    config_error: Option<String>,
}

/// Thread-safe statistics accumulator.
pub(crate) struct StatsTracker {
    inner: Mutex<Inner>,
    window: usize,
}

impl StatsTracker {
    pub(crate) fn new(settings: &CollectorSettings) -> Self {
        Self {
            inner: Mutex::new(Inner {
                stats: CollectorStatistics::default(),
                recent: VecDeque::with_capacity(settings.health_window),
                config_error: None,
            }),
            window: settings.health_window.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Statistics mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub(crate) fn mark_started(&self, now: DateTime<Utc>) {
        self.lock().stats.started_at = Some(now);
    }

    pub(crate) fn mark_config_error(&self, error: Option<String>) {
        self.lock().config_error = error;
    }

    pub(crate) fn has_config_error(&self) -> bool {
        self.lock().config_error.is_some()
    }

    pub(crate) fn record_request(&self, success: bool, error: Option<String>, now: DateTime<Utc>) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.stats.total_requests += 1;
        if success {
            inner.stats.successful_requests += 1;
            inner.stats.last_success_time = Some(now);
        } else {
            inner.stats.failed_requests += 1;
            inner.stats.last_error_time = Some(now);
            inner.stats.last_error = error;
        }
        if inner.recent.len() == self.window {
            inner.recent.pop_front();
        }
        inner.recent.push_back(success);
    }

    pub(crate) fn record_rejected(&self) {
        self.lock().stats.rejected_requests += 1;
    }

    pub(crate) fn record_cycle(&self, outcome: &CollectionOutcome, now: DateTime<Utc>) {
        let mut guard = self.lock();
        let stats = &mut guard.stats;
        stats.collection_cycles += 1;
        stats.last_collection_time = Some(now);
        stats.data_points_collected += outcome.data_points_collected;
        if outcome.success {
            stats.consecutive_failed_cycles = 0;
        } else {
            stats.failed_cycles += 1;
            stats.consecutive_failed_cycles += 1;
            if let Some(last) = outcome.errors.last() {
                stats.last_error = Some(last.clone());
                stats.last_error_time = Some(now);
            }
        }
    }

    pub(crate) fn add_data_points(&self, count: u64) {
        self.lock().stats.data_points_collected += count;
    }

    fn failure_rate(recent: &VecDeque<bool>) -> f64 {
        if recent.is_empty() {
            return 0.0;
        }
        recent.iter().filter(|ok| !**ok).count() as f64 / recent.len() as f64
    }

    pub(crate) fn snapshot(&self) -> CollectorStatistics {
        let inner = self.lock();
        CollectorStatistics {
            recent_failure_rate: Self::failure_rate(&inner.recent),
            ..inner.stats.clone()
        }
    }

    /// Operator reset. Keeps `started_at` and the configuration verdict.
    pub(crate) fn reset(&self) {
        let mut inner = self.lock();
        let started_at = inner.stats.started_at;
        inner.stats = CollectorStatistics {
            started_at,
            ..Default::default()
        };
        inner.recent.clear();
    }

    /// Status from the statistics plus the breaker's openness.
    pub(crate) fn status(&self, circuit_open: bool, settings: &CollectorSettings) -> HealthStatus {
        let inner = self.lock();
        if inner.config_error.is_some() {
            HealthStatus::Failed
        } else if circuit_open {
            HealthStatus::CircuitOpen
        } else if inner.stats.consecutive_failed_cycles >= settings.failed_cycle_threshold {
            HealthStatus::Failed
        } else if Self::failure_rate(&inner.recent) > settings.degraded_failure_rate {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}
