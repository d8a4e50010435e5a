//! Metrics collection and exposition.
//!
//! # Metrics
//! - `collector_requests_total` (counter): outbound calls by collector, outcome
//! - `collector_request_duration_seconds` (histogram): transport latency
//! - `collector_circuit_state` (gauge): 0 closed, 1 half-open, 2 open
//! - `collector_rate_limit_rate` (gauge): effective calls/s by endpoint
//! - `collector_rate_limit_wait_seconds` (histogram): time spent pacing
//! - `collector_cycles_total` (counter): collection cycles by result
//! - `collector_data_points_total` (counter): records handed to the sink

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::CircuitState;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(collector: &str, outcome: &'static str, latency: Option<Duration>) {
    metrics::counter!(
        "collector_requests_total",
        "collector" => collector.to_string(),
        "outcome" => outcome
    )
    .increment(1);

    if let Some(latency) = latency {
        metrics::histogram!(
            "collector_request_duration_seconds",
            "collector" => collector.to_string()
        )
        .record(latency.as_secs_f64());
    }
}

pub fn record_circuit_state(collector: &str, state: CircuitState) {
    metrics::gauge!("collector_circuit_state", "collector" => collector.to_string()).set(state.as_gauge());
}

pub fn record_rate(collector: &str, endpoint: &str, rate: f64) {
    metrics::gauge!(
        "collector_rate_limit_rate",
        "collector" => collector.to_string(),
        "endpoint" => endpoint.to_string()
    )
    .set(rate);
}

pub fn record_wait(collector: &str, waited: Duration) {
    metrics::histogram!("collector_rate_limit_wait_seconds", "collector" => collector.to_string())
        .record(waited.as_secs_f64());
}

pub fn record_cycle(collector: &str, success: bool) {
    let result = if success { "success" } else { "failure" };
    metrics::counter!(
        "collector_cycles_total",
        "collector" => collector.to_string(),
        "result" => result
    )
    .increment(1);
}

pub fn record_data_points(collector: &str, count: u64) {
    metrics::counter!("collector_data_points_total", "collector" => collector.to_string()).increment(count);
}
