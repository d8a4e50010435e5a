//! Collector lifecycle.
//!
//! # Data Flow
//! ```text
//! CollectorService::start → loop task (one per collector)
//!     every collection_interval:
//!         Collector::collect_data(&CollectorCore)
//!             → CollectorCore::make_request(endpoint, request)
//!                 → CircuitBreaker::can_attempt        (gate)
//!                 → AdaptiveRateLimiter::wait          (pace, cancellable)
//!                 → Transport::request under timeout
//!                 → classify, record in breaker + limiter, retry with backoff
//!             → CollectorCore::store_records → DataSink
//!         fold CollectionOutcome into statistics
//!     stop signal → loop exits after the in-flight call
//! ```
//!
//! # Phases
//! ```text
//! Created → connect → Connected → start → Running → stop → Stopped → disconnect → Disconnected
//!              ↘ validation error → Failed              Stopped → start → Running
//! ```
//!
//! # Design Decisions
//! - `Collector` only knows how to fetch and parse; resilience lives in `CollectorCore`
//! - Calls within one collector are strictly sequential (cycle lock)
//! - Per-cycle errors are logged and folded into statistics, never fatal to the loop

pub mod context;
pub mod http_json;
pub mod service;
pub mod stats;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CollectorError;

pub use context::CollectorCore;
pub use http_json::HttpJsonCollector;
pub use service::{CollectorBuilder, CollectorService};
pub use stats::{CollectorStatistics, HealthReport, HealthStatus};

/// Lifecycle phase of a collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorPhase {
    Created,
    Connected,
    Running,
    Stopped,
    Disconnected,
    /// `connect()` rejected the configuration.
    Failed,
}

/// Result of one collection cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionOutcome {
    pub success: bool,
    pub data_points_collected: u64,
    pub errors: Vec<String>,
}

impl CollectionOutcome {
    pub fn succeeded(data_points_collected: u64) -> Self {
        Self {
            success: true,
            data_points_collected,
            errors: Vec::new(),
        }
    }

    pub fn failed(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data_points_collected: 0,
            errors,
        }
    }
}

/// Inclusive start, exclusive end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Result of `backfill_historical`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillResult {
    /// True iff no chunk failed.
    pub success: bool,
    pub data_points_collected: u64,
    pub time_range: TimeRange,
    pub errors: Vec<String>,
    pub chunks_total: u32,
    pub chunks_failed: u32,
}

/// Source-specific polling logic.
///
/// Implementations issue every outbound call through
/// [`CollectorCore::make_request`] so the breaker and limiter see it.
#[async_trait]
pub trait Collector: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Reject unusable configuration before anything runs.
    fn validate_config(&self) -> Result<(), CollectorError> {
        Ok(())
    }

    /// One collection cycle.
    async fn collect_data(&self, ctx: &CollectorCore) -> Result<CollectionOutcome, CollectorError>;

    /// Length of one backfill chunk.
    fn backfill_chunk(&self) -> chrono::Duration {
        chrono::Duration::hours(24)
    }

    /// Fetch one historical chunk, returning the number of data points stored.
    async fn fetch_range(
        &self,
        _ctx: &CollectorCore,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<u64, CollectorError> {
        Err(CollectorError::InvalidState(format!(
            "collector '{}' does not support backfill",
            self.name()
        )))
    }
}
