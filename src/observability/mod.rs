//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Collectors, breakers and limiters produce:
//!     → logging.rs (structured tracing events, one span per collection cycle)
//!     → metrics.rs (counters, gauges, histograms via the `metrics` facade)
//!
//! Consumers:
//!     → stdout subscriber (RUST_LOG or observability.log_level)
//!     → Prometheus scrape endpoint (only when metrics_enabled)
//! ```
//!
//! # Design Decisions
//! - Fields, not interpolated strings, for values worth filtering on
//! - Metric updates are no-ops until an exporter is installed
//! - Cycle ids (uuid v4) correlate every event of one collection cycle

pub mod logging;
pub mod metrics;
