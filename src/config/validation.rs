//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (rates, thresholds, timeouts)
//! - Check collector names are unique and URLs parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RuntimeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{
    CircuitBreakerConfig, CollectorDefinition, CollectorSettings, PersistenceBackend, RateLimitConfig,
    RuntimeConfig, SinkKind,
};

/// One semantic problem, located by a dotted field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check a loaded configuration, collecting every problem.
pub fn validate_config(config: &RuntimeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_circuit_breaker("defaults.circuit_breaker", &config.defaults.circuit_breaker, &mut errors);
    check_rate_limit("defaults.rate_limit", &config.defaults.rate_limit, &mut errors);
    check_collector_settings("defaults.collector", &config.defaults.collector, &mut errors);

    if config.persistence.backend == PersistenceBackend::File && config.persistence.path.is_none() {
        errors.push(ValidationError::new("persistence.path", "required for the file backend"));
    }
    if config.persistence.state_ttl_secs == 0 {
        errors.push(ValidationError::new("persistence.state_ttl_secs", "must be greater than 0"));
    }
    if config.sink.kind == SinkKind::JsonLines && config.sink.path.is_none() {
        errors.push(ValidationError::new("sink.path", "required for the json_lines sink"));
    }
    if !(config.shutdown.grace_secs > 0.0) {
        errors.push(ValidationError::new("shutdown.grace_secs", "must be greater than 0"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    let mut names = HashSet::new();
    for (i, collector) in config.collectors.iter().enumerate() {
        let prefix = format!("collectors[{i}]");
        if !collector.name.is_empty() && !names.insert(collector.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{prefix}.name"),
                format!("duplicate collector name '{}'", collector.name),
            ));
        }
        check_collector(&prefix, collector, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_collector(prefix: &str, collector: &CollectorDefinition, errors: &mut Vec<ValidationError>) {
    if collector.name.trim().is_empty() {
        errors.push(ValidationError::new(format!("{prefix}.name"), "must not be empty"));
    }

    match url::Url::parse(&collector.base_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(ValidationError::new(
            format!("{prefix}.base_url"),
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new(format!("{prefix}.base_url"), e.to_string())),
    }

    if !collector.records_pointer.is_empty() && !collector.records_pointer.starts_with('/') {
        errors.push(ValidationError::new(
            format!("{prefix}.records_pointer"),
            "must be empty or start with '/'",
        ));
    }
    if collector.backfill_chunk_hours == 0 {
        errors.push(ValidationError::new(
            format!("{prefix}.backfill_chunk_hours"),
            "must be greater than 0",
        ));
    }

    if let Some(cb) = &collector.circuit_breaker {
        check_circuit_breaker(&format!("{prefix}.circuit_breaker"), cb, errors);
    }
    if let Some(rl) = &collector.rate_limit {
        check_rate_limit(&format!("{prefix}.rate_limit"), rl, errors);
    }
    if let Some(settings) = &collector.collector {
        check_collector_settings(&format!("{prefix}.collector"), settings, errors);
    }
}

fn check_circuit_breaker(prefix: &str, cb: &CircuitBreakerConfig, errors: &mut Vec<ValidationError>) {
    if cb.failure_threshold == 0 {
        errors.push(ValidationError::new(format!("{prefix}.failure_threshold"), "must be at least 1"));
    }
    if !(cb.timeout_secs > 0.0) {
        errors.push(ValidationError::new(format!("{prefix}.timeout_secs"), "must be greater than 0"));
    }
    if cb.half_open_max_calls == 0 {
        errors.push(ValidationError::new(format!("{prefix}.half_open_max_calls"), "must be at least 1"));
    }
    if cb.half_open_success_threshold == 0 || cb.half_open_success_threshold > cb.half_open_max_calls {
        errors.push(ValidationError::new(
            format!("{prefix}.half_open_success_threshold"),
            "must be between 1 and half_open_max_calls",
        ));
    }
    if !(cb.timeout_multiplier >= 1.0) {
        errors.push(ValidationError::new(format!("{prefix}.timeout_multiplier"), "must be at least 1.0"));
    }
    if !(cb.max_timeout_secs >= cb.timeout_secs) {
        errors.push(ValidationError::new(
            format!("{prefix}.max_timeout_secs"),
            "must not be below timeout_secs",
        ));
    }
}

fn check_rate_limit(prefix: &str, rl: &RateLimitConfig, errors: &mut Vec<ValidationError>) {
    if !(rl.min_rate > 0.0) {
        errors.push(ValidationError::new(format!("{prefix}.min_rate"), "must be greater than 0"));
    }
    if !(rl.max_rate >= rl.min_rate) {
        errors.push(ValidationError::new(format!("{prefix}.max_rate"), "must not be below min_rate"));
    }
    if !(rl.default_rate >= rl.min_rate && rl.default_rate <= rl.max_rate) {
        errors.push(ValidationError::new(
            format!("{prefix}.default_rate"),
            "must lie between min_rate and max_rate",
        ));
    }
    if !(rl.window_size_secs > 0.0) {
        errors.push(ValidationError::new(format!("{prefix}.window_size_secs"), "must be greater than 0"));
    }
    if !(rl.safety_margin > 0.0 && rl.safety_margin <= 1.0) {
        errors.push(ValidationError::new(format!("{prefix}.safety_margin"), "must be in (0, 1]"));
    }
    if !(rl.max_backoff_multiplier >= 1.0) {
        errors.push(ValidationError::new(
            format!("{prefix}.max_backoff_multiplier"),
            "must be at least 1.0",
        ));
    }
    if !(rl.backoff_decay_secs > 0.0) {
        errors.push(ValidationError::new(format!("{prefix}.backoff_decay_secs"), "must be greater than 0"));
    }
    if !(rl.fast_response_secs <= rl.slow_response_secs) {
        errors.push(ValidationError::new(
            format!("{prefix}.fast_response_secs"),
            "must not exceed slow_response_secs",
        ));
    }
    if !(rl.slow_response_factor > 0.0 && rl.slow_response_factor <= 1.0) {
        errors.push(ValidationError::new(format!("{prefix}.slow_response_factor"), "must be in (0, 1]"));
    }
    if !(rl.fast_response_factor >= 1.0) {
        errors.push(ValidationError::new(format!("{prefix}.fast_response_factor"), "must be at least 1.0"));
    }
}

fn check_collector_settings(prefix: &str, s: &CollectorSettings, errors: &mut Vec<ValidationError>) {
    if !(s.collection_interval_secs > 0.0) {
        errors.push(ValidationError::new(
            format!("{prefix}.collection_interval_secs"),
            "must be greater than 0",
        ));
    }
    if !(s.request_timeout_secs > 0.0) {
        errors.push(ValidationError::new(format!("{prefix}.request_timeout_secs"), "must be greater than 0"));
    }
    if !(s.retry_delay_secs >= 0.0) || !(s.max_retry_delay_secs >= s.retry_delay_secs) {
        errors.push(ValidationError::new(
            format!("{prefix}.retry_delay_secs"),
            "must be non-negative and not exceed max_retry_delay_secs",
        ));
    }
    if !(0.0..=1.0).contains(&s.degraded_failure_rate) {
        errors.push(ValidationError::new(format!("{prefix}.degraded_failure_rate"), "must be in [0, 1]"));
    }
    if s.health_window == 0 {
        errors.push(ValidationError::new(format!("{prefix}.health_window"), "must be at least 1"));
    }
    if s.failed_cycle_threshold == 0 {
        errors.push(ValidationError::new(format!("{prefix}.failed_cycle_threshold"), "must be at least 1"));
    }
    if s.stop_grace_secs.is_some_and(|g| !(g >= 0.0)) {
        errors.push(ValidationError::new(format!("{prefix}.stop_grace_secs"), "must not be negative"));
    }
}
