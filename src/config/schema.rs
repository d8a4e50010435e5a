//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the collector
//! runtime. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the collector runtime.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Where circuit breaker and rate limiter snapshots are checkpointed.
    pub persistence: PersistenceConfig,

    /// Where collected records are written.
    pub sink: SinkConfig,

    /// Registry shutdown settings.
    pub shutdown: ShutdownConfig,

    /// Resilience defaults inherited by every collector.
    pub defaults: DefaultsConfig,

    /// Collector definitions.
    pub collectors: Vec<CollectorDefinition>,
}

/// Defaults applied to every collector unless overridden.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DefaultsConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub collector: CollectorSettings,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed before the circuit opens.
    pub failure_threshold: u32,

    /// Base time the circuit stays open before probing, in seconds.
    pub timeout_secs: f64,

    /// Probe calls allowed while half-open.
    pub half_open_max_calls: u32,

    /// Successful probes needed to close the circuit.
    pub half_open_success_threshold: u32,

    /// Growth factor applied to the timeout after a failed probe.
    pub timeout_multiplier: f64,

    /// Upper bound for the grown timeout, in seconds.
    pub max_timeout_secs: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_secs: 300.0,
            half_open_max_calls: 3,
            half_open_success_threshold: 2,
            timeout_multiplier: 1.5,
            max_timeout_secs: 3600.0,
        }
    }
}

/// Adaptive rate limiter configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Starting rate in calls per second.
    pub default_rate: f64,

    /// Length of the sliding window used to cap bursts, in seconds.
    pub window_size_secs: f64,

    /// Hard ceiling in calls per second.
    pub max_rate: f64,

    /// Hard floor in calls per second.
    pub min_rate: f64,

    /// Fraction of the header-derived rate actually used.
    pub safety_margin: f64,

    /// Largest backoff multiplier after repeated throttling.
    pub max_backoff_multiplier: f64,

    /// Quiet period after which the backoff multiplier relaxes, in seconds.
    pub backoff_decay_secs: f64,

    /// Responses slower than this reduce the rate, in seconds.
    pub slow_response_secs: f64,

    /// Responses faster than this raise the rate, in seconds.
    pub fast_response_secs: f64,

    /// Multiplier applied on a slow response.
    pub slow_response_factor: f64,

    /// Multiplier applied on a fast response.
    pub fast_response_factor: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_rate: 1.0,
            window_size_secs: 60.0,
            max_rate: 10.0,
            min_rate: 0.01,
            safety_margin: 0.7,
            max_backoff_multiplier: 16.0,
            backoff_decay_secs: 300.0,
            slow_response_secs: 2.0,
            fast_response_secs: 0.5,
            slow_response_factor: 0.9,
            fast_response_factor: 1.05,
        }
    }
}

/// Per-collector runtime settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CollectorSettings {
    /// Seconds between collection cycles.
    pub collection_interval_secs: f64,

    /// Retries after the first attempt for retryable failures.
    pub max_retries: u32,

    /// Base delay for exponential retry backoff, in seconds.
    pub retry_delay_secs: f64,

    /// Cap for a single retry delay, in seconds.
    pub max_retry_delay_secs: f64,

    /// Transport timeout for one call, in seconds.
    pub request_timeout_secs: f64,

    /// Recent failure rate above which the collector reports Degraded.
    pub degraded_failure_rate: f64,

    /// Number of recent request outcomes the failure rate is computed over.
    pub health_window: usize,

    /// Consecutive failed cycles after which the collector reports Failed.
    pub failed_cycle_threshold: u32,

    /// How long `stop()` waits for the loop to exit. Defaults to request timeout + 5s.
    pub stop_grace_secs: Option<f64>,

    /// Interval between periodic rate limiter checkpoints, in seconds.
    pub state_persist_interval_secs: f64,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            collection_interval_secs: 60.0,
            max_retries: 3,
            retry_delay_secs: 1.0,
            max_retry_delay_secs: 60.0,
            request_timeout_secs: 30.0,
            degraded_failure_rate: 0.5,
            health_window: 20,
            failed_cycle_threshold: 3,
            stop_grace_secs: None,
            state_persist_interval_secs: 300.0,
        }
    }
}

impl CollectorSettings {
    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs_f64(self.collection_interval_secs.max(0.001))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_secs.max(0.001))
    }

    pub fn stop_grace(&self) -> Duration {
        let secs = self
            .stop_grace_secs
            .unwrap_or(self.request_timeout_secs + 5.0);
        Duration::from_secs_f64(secs.max(0.0))
    }

    pub fn state_persist_interval(&self) -> Duration {
        Duration::from_secs_f64(self.state_persist_interval_secs.max(1.0))
    }
}

/// Persistence backend selection.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceBackend {
    Memory,
    File,
}

/// Persistence configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub backend: PersistenceBackend,

    /// State file path (file backend only).
    pub path: Option<String>,

    /// Time-to-live for persisted snapshots, in seconds.
    pub state_ttl_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: PersistenceBackend::Memory,
            path: None,
            state_ttl_secs: 24 * 60 * 60,
        }
    }
}

/// Sink selection.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Memory,
    JsonLines,
}

/// Sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: SinkKind,

    /// Output file (json_lines only).
    pub path: Option<String>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::Memory,
            path: None,
        }
    }
}

/// Registry shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Upper bound for stopping all collectors, in seconds.
    pub grace_secs: f64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_secs: 35.0 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Kinds of collector the runtime can build from configuration.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CollectorKind {
    #[default]
    HttpJson,
}

/// A single collector definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectorDefinition {
    /// Unique collector name, also the persistence key suffix.
    pub name: String,

    #[serde(default)]
    pub kind: CollectorKind,

    /// API base URL (e.g., "https://api.example.com").
    pub base_url: String,

    /// Endpoint path polled every cycle (e.g., "/v1/quotes").
    pub endpoint: String,

    /// Static query parameters sent with every call.
    #[serde(default)]
    pub params: Vec<(String, String)>,

    /// Static headers sent with every call.
    #[serde(default)]
    pub headers: Vec<(String, String)>,

    /// JSON pointer to the record array in the response (empty = whole body).
    #[serde(default)]
    pub records_pointer: String,

    /// Backfill chunk length in hours.
    #[serde(default = "default_backfill_chunk_hours")]
    pub backfill_chunk_hours: u32,

    /// Query parameter carrying the chunk start during backfill.
    #[serde(default = "default_backfill_start_param")]
    pub backfill_start_param: String,

    /// Query parameter carrying the chunk end during backfill.
    #[serde(default = "default_backfill_end_param")]
    pub backfill_end_param: String,

    /// Overrides of the circuit breaker defaults.
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    /// Overrides of the rate limiter defaults.
    pub rate_limit: Option<RateLimitConfig>,

    /// Overrides of the collector defaults.
    pub collector: Option<CollectorSettings>,
}

fn default_backfill_chunk_hours() -> u32 {
    24
}

fn default_backfill_start_param() -> String {
    "start".to_string()
}

fn default_backfill_end_param() -> String {
    "end".to_string()
}

impl CollectorDefinition {
    /// Circuit breaker settings after applying overrides.
    pub fn circuit_breaker_config(&self, defaults: &DefaultsConfig) -> CircuitBreakerConfig {
        self.circuit_breaker
            .clone()
            .unwrap_or_else(|| defaults.circuit_breaker.clone())
    }

    /// Rate limiter settings after applying overrides.
    pub fn rate_limit_config(&self, defaults: &DefaultsConfig) -> RateLimitConfig {
        self.rate_limit
            .clone()
            .unwrap_or_else(|| defaults.rate_limit.clone())
    }

    /// Collector settings after applying overrides.
    pub fn collector_settings(&self, defaults: &DefaultsConfig) -> CollectorSettings {
        self.collector
            .clone()
            .unwrap_or_else(|| defaults.collector.clone())
    }
}
