//! Resilience substrate for continuously running external-data collectors.

pub mod collector;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod persistence;
pub mod resilience;
pub mod sink;
pub mod transport;

pub use collector::{Collector, CollectorBuilder, CollectorService, HealthReport, HealthStatus};
pub use config::schema::RuntimeConfig;
pub use error::CollectorError;
pub use lifecycle::CollectorRegistry;
pub use resilience::{AdaptiveRateLimiter, CircuitBreaker, CircuitState};
