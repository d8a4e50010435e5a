//! Shared per-collector context: breaker, limiter, transport, store and sink.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CollectorSettings;
use crate::error::CollectorError;
use crate::lifecycle::shutdown::Shutdown;
use crate::observability::metrics;
use crate::persistence::{self, PersistenceStore};
use crate::resilience::headers::parse_retry_after;
use crate::resilience::{
    timeouts, AdaptiveRateLimiter, CircuitBreaker, CircuitBreakerState, CircuitState, Clock, RateLimiterState,
    RetryClass, RetryPolicy, StatusClass,
};
use crate::sink::{DataSink, Record};
use crate::transport::{Transport, TransportRequest, TransportResponse};

use super::stats::StatsTracker;

/// Longest response body excerpt carried in a fatal request error.
const ERROR_BODY_EXCERPT: usize = 256;

/// Everything a collector needs to talk to its upstream safely.
pub struct CollectorCore {
    pub(crate) name: String,
    pub(crate) settings: CollectorSettings,
    pub(crate) breaker: CircuitBreaker,
    pub(crate) limiter: AdaptiveRateLimiter,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) store: Arc<dyn PersistenceStore>,
    pub(crate) sink: Arc<dyn DataSink>,
    pub(crate) stats: StatsTracker,
    pub(crate) shutdown: Shutdown,
    pub(crate) clock: Clock,
    pub(crate) state_ttl: Duration,
    /// Serialises cycles, on-demand collections and backfills.
    pub(crate) cycle_lock: tokio::sync::Mutex<()>,
}

impl CollectorCore {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn limiter(&self) -> &AdaptiveRateLimiter {
        &self.limiter
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Issue `request` against `endpoint` with gating, pacing, timeout and retries.
    ///
    /// `endpoint` is the rate limiter key; it is usually the request path.
    pub async fn make_request(
        &self,
        endpoint: &str,
        request: TransportRequest,
    ) -> Result<TransportResponse, CollectorError> {
        let policy = RetryPolicy::from_settings(&self.settings);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let err = match self.attempt_once(endpoint, request.clone()).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            match err.retry_class() {
                RetryClass::CircuitOpen | RetryClass::Never => return Err(err),
                RetryClass::WithBackoff if attempt >= policy.max_attempts() => {
                    tracing::error!(
                        collector = %self.name,
                        endpoint = %endpoint,
                        attempts = attempt,
                        error = %err,
                        "Retries exhausted"
                    );
                    return Err(CollectorError::Collection {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                RetryClass::WithBackoff => {
                    let delay = policy.delay_for(attempt - 1);
                    tracing::warn!(
                        collector = %self.name,
                        endpoint = %endpoint,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Request failed, retrying"
                    );
                    self.sleep_unless_stopped(delay).await?;
                }
            }
        }
    }

    /// Sleep for `delay`, or fail with `Cancelled` if stop is signalled first.
    pub async fn sleep_unless_stopped(&self, delay: Duration) -> Result<(), CollectorError> {
        let mut stop = self.shutdown.subscribe();
        if stop.is_triggered() {
            return Err(CollectorError::Cancelled);
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = stop.wait() => Err(CollectorError::Cancelled),
        }
    }

    async fn attempt_once(
        &self,
        endpoint: &str,
        mut request: TransportRequest,
    ) -> Result<TransportResponse, CollectorError> {
        let state_before = self.breaker.state();

        if !self.breaker.can_attempt() {
            let retry_after = self.breaker.status().retry_after_secs.unwrap_or(0.0);
            tracing::debug!(
                collector = %self.name,
                endpoint = %endpoint,
                retry_after_secs = retry_after,
                "Circuit open, call skipped"
            );
            self.stats.record_rejected();
            metrics::record_request(&self.name, "circuit_open", None);
            return Err(CollectorError::CircuitOpen {
                name: self.name.clone(),
                retry_after: Duration::try_from_secs_f64(retry_after).unwrap_or_default(),
            });
        }

        let mut stop = self.shutdown.subscribe();
        let waited = tokio::select! {
            waited = self.limiter.wait(Some(endpoint)) => waited,
            _ = stop.wait() => return Err(CollectorError::Cancelled),
        };
        if !waited.is_zero() {
            metrics::record_wait(&self.name, waited);
        }

        let budget = self.settings.request_timeout();
        request.timeout = budget;
        let started = Instant::now();
        let result = timeouts::with_timeout(budget, self.transport.request(request)).await;
        let latency = started.elapsed();
        let now = self.clock.now();

        let outcome = match result {
            Ok(response) => self.classify(endpoint, response, latency),
            Err(e) => {
                self.breaker.record_failure();
                metrics::record_request(&self.name, "transport_error", Some(latency));
                Err(CollectorError::Transport(e))
            }
        };

        match &outcome {
            Ok(_) => self.stats.record_request(true, None, now),
            Err(e) => self.stats.record_request(false, Some(e.to_string()), now),
        }
        metrics::record_rate(&self.name, endpoint, self.limiter.effective_rate(Some(endpoint)));

        let state_after = self.breaker.state();
        if state_after != state_before {
            metrics::record_circuit_state(&self.name, state_after);
            self.persist_breaker().await;
        }

        outcome
    }

    fn classify(
        &self,
        endpoint: &str,
        response: TransportResponse,
        latency: Duration,
    ) -> Result<TransportResponse, CollectorError> {
        let status = response.status;
        match StatusClass::of(status) {
            StatusClass::Success => {
                self.limiter.parse_headers(&response.headers, Some(endpoint));
                self.limiter.record_response_time(Some(endpoint), latency);
                self.breaker.record_success();
                metrics::record_request(&self.name, "success", Some(latency));
                Ok(response)
            }
            StatusClass::Throttled => {
                let retry_after = response
                    .headers
                    .get("retry-after")
                    .and_then(|v| parse_retry_after(v, self.clock.now()));
                self.limiter.record_throttled(Some(endpoint), retry_after);
                self.breaker.record_failure();
                metrics::record_request(&self.name, "throttled", Some(latency));
                Err(CollectorError::Throttled { retry_after })
            }
            StatusClass::ServerError => {
                self.limiter.parse_headers(&response.headers, Some(endpoint));
                self.breaker.record_failure();
                metrics::record_request(&self.name, "server_error", Some(latency));
                Err(CollectorError::Upstream { status })
            }
            StatusClass::ClientError => {
                self.limiter.parse_headers(&response.headers, Some(endpoint));
                self.breaker.record_failure();
                metrics::record_request(&self.name, "client_error", Some(latency));
                let mut body = response.text();
                if body.len() > ERROR_BODY_EXCERPT {
                    let mut cut = ERROR_BODY_EXCERPT;
                    while !body.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    body.truncate(cut);
                }
                tracing::error!(collector = %self.name, endpoint = %endpoint, status, "Request rejected by upstream");
                Err(CollectorError::FatalRequest { status, body })
            }
            StatusClass::Unexpected => {
                self.breaker.record_failure();
                metrics::record_request(&self.name, "unexpected_status", Some(latency));
                tracing::error!(collector = %self.name, endpoint = %endpoint, status, "Unexpected upstream status");
                Err(CollectorError::InvalidResponse(format!("unexpected status {status}")))
            }
        }
    }

    /// Hand parsed records to the sink, returning how many were stored.
    pub async fn store_records(&self, records: Vec<Record>) -> Result<u64, CollectorError> {
        let count = records.len() as u64;
        if count == 0 {
            return Ok(0);
        }
        if let Err(e) = self.sink.store(records).await {
            tracing::error!(collector = %self.name, error = %e, "Sink rejected records");
            return Err(e.into());
        }
        metrics::record_data_points(&self.name, count);
        Ok(count)
    }

    /// Restore breaker and limiter from the store, or keep fresh defaults.
    pub(crate) async fn load_state(&self) {
        let key = persistence::circuit_breaker_key(&self.name);
        match persistence::load_json::<CircuitBreakerState>(&*self.store, &key).await {
            Ok(Some(snapshot)) => self.breaker.restore(snapshot),
            Ok(None) => tracing::debug!(collector = %self.name, "No persisted circuit breaker state"),
            Err(e) => tracing::warn!(
                collector = %self.name,
                error = %e,
                "Failed to load circuit breaker state, starting fresh"
            ),
        }

        let key = persistence::rate_limiter_key(&self.name);
        match persistence::load_json::<RateLimiterState>(&*self.store, &key).await {
            Ok(Some(snapshot)) => self.limiter.restore(snapshot),
            Ok(None) => tracing::debug!(collector = %self.name, "No persisted rate limiter state"),
            Err(e) => tracing::warn!(
                collector = %self.name,
                error = %e,
                "Failed to load rate limiter state, starting fresh"
            ),
        }

        metrics::record_circuit_state(&self.name, self.breaker.state());
    }

    pub(crate) async fn persist_breaker(&self) {
        let key = persistence::circuit_breaker_key(&self.name);
        let snapshot = self.breaker.snapshot();
        if let Err(e) = persistence::save_json(&*self.store, &key, &snapshot, self.state_ttl).await {
            tracing::warn!(collector = %self.name, error = %e, "Failed to persist circuit breaker state");
        }
    }

    pub(crate) async fn persist_limiter(&self) {
        let key = persistence::rate_limiter_key(&self.name);
        let snapshot = self.limiter.snapshot();
        if let Err(e) = persistence::save_json(&*self.store, &key, &snapshot, self.state_ttl).await {
            tracing::warn!(collector = %self.name, error = %e, "Failed to persist rate limiter state");
        }
    }

    pub(crate) async fn persist_all(&self) {
        self.persist_breaker().await;
        self.persist_limiter().await;
    }

    /// Operator reset of the breaker, dropping its checkpoint.
    pub(crate) async fn reset_breaker(&self) {
        self.breaker.reset();
        metrics::record_circuit_state(&self.name, CircuitState::Closed);
        let key = persistence::circuit_breaker_key(&self.name);
        if let Err(e) = self.store.delete(&key).await {
            tracing::warn!(collector = %self.name, error = %e, "Failed to delete circuit breaker state");
        }
    }
}
