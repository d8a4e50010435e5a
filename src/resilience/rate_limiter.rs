//! Adaptive per-endpoint rate limiter.
//!
//! # Pacing
//! ```text
//! effective_rate = min(endpoint_rate, global_rate*) / backoff_multiplier
//! delay = max(
//!     backoff_until - now,                       // Retry-After gate
//!     reset_time - now   if remaining == 0,      // exhausted quota
//!     last_call + 1/effective_rate - now,        // spacing
//!     oldest_in_window + window - now  if full,  // sliding-window cap
//! )
//! * the global cap is skipped once headers supplied a quota for the endpoint
//! ```
//!
//! # Adaptation
//! - Quota headers: rate = safety_margin × remaining / seconds_until_reset
//! - 429: endpoint rate halves, backoff multiplier doubles (capped)
//! - Quiet periods: the multiplier's excess over 1.0 halves per decay period
//! - Latency: slow responses shave the rate, fast ones grow it, never above
//!   the header-derived ceiling and never while backing off

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::config::RateLimitConfig;
use crate::resilience::clock::{self, Clock};
use crate::resilience::headers::{HeaderParser, RateLimitInfo};
use crate::transport::Headers;

/// Endpoint key used when the caller does not name one.
pub const GLOBAL_ENDPOINT: &str = "*";

/// Pacing and quota state for one endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EndpointState {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_time: Option<DateTime<Utc>>,
    pub requests_made: u64,
    pub violations: u64,
    pub in_backoff: bool,
    pub backoff_until: Option<DateTime<Utc>>,
    /// Base rate in calls per second, before the backoff multiplier.
    pub current_rate: f64,
    /// Ceiling derived from the last quota headers.
    pub quota_rate: Option<f64>,
    pub last_request_time: Option<DateTime<Utc>>,
}

impl EndpointState {
    fn new(rate: f64) -> Self {
        Self {
            limit: None,
            remaining: None,
            reset_time: None,
            requests_made: 0,
            violations: 0,
            in_backoff: false,
            backoff_until: None,
            current_rate: rate,
            quota_rate: None,
            last_request_time: None,
        }
    }
}

/// Persistable snapshot of a rate limiter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterState {
    pub name: String,
    pub configured_default_rate: f64,
    pub current_global_rate: f64,
    pub backoff_multiplier: f64,
    pub total_requests: u64,
    pub total_violations: u64,
    pub total_wait_secs: f64,
    pub total_adjustments: u64,
    pub min_rate_seen: f64,
    pub max_rate_seen: f64,
    pub last_violation_time: Option<DateTime<Utc>>,
    pub last_decay_time: Option<DateTime<Utc>>,
    pub endpoints: BTreeMap<String, EndpointState>,
}

impl RateLimiterState {
    fn new(name: &str, config: &RateLimitConfig) -> Self {
        Self {
            name: name.to_string(),
            configured_default_rate: config.default_rate,
            current_global_rate: config.default_rate,
            backoff_multiplier: 1.0,
            total_requests: 0,
            total_violations: 0,
            total_wait_secs: 0.0,
            total_adjustments: 0,
            min_rate_seen: config.default_rate,
            max_rate_seen: config.default_rate,
            last_violation_time: None,
            last_decay_time: None,
            endpoints: BTreeMap::new(),
        }
    }

    fn note_rate(&mut self, rate: f64) {
        self.total_adjustments += 1;
        self.min_rate_seen = self.min_rate_seen.min(rate);
        self.max_rate_seen = self.max_rate_seen.max(rate);
    }
}

/// Limiter state plus the runtime-only call log.
struct Inner {
    state: RateLimiterState,
    call_log: HashMap<String, VecDeque<DateTime<Utc>>>,
}

/// Snapshot plus effective rates, for health reporting.
#[derive(Clone, Debug, Serialize)]
pub struct RateLimiterStats {
    #[serde(flatten)]
    pub state: RateLimiterState,
    pub effective_rates: BTreeMap<String, f64>,
    pub config: RateLimitConfig,
}

/// Self-tuning call pacer for one collector.
pub struct AdaptiveRateLimiter {
    inner: Mutex<Inner>,
    config: RateLimitConfig,
    parser: HeaderParser,
    clock: Clock,
}

impl AdaptiveRateLimiter {
    pub fn new(name: &str, config: RateLimitConfig) -> Self {
        Self::with_clock(name, config, Clock::system())
    }

    pub fn with_clock(name: &str, config: RateLimitConfig, clock: Clock) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RateLimiterState::new(name, &config),
                call_log: HashMap::new(),
            }),
            config,
            parser: HeaderParser::default(),
            clock,
        }
    }

    /// Use a custom header strategy list.
    pub fn with_parser(mut self, parser: HeaderParser) -> Self {
        self.parser = parser;
        self
    }

    /// Lock the state mutex, recovering from poison if necessary.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Rate limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn name(&self) -> String {
        self.lock().state.name.clone()
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn key(endpoint: Option<&str>) -> &str {
        endpoint.unwrap_or(GLOBAL_ENDPOINT)
    }

    fn endpoint_mut<'a>(state: &'a mut RateLimiterState, key: &str) -> &'a mut EndpointState {
        let rate = state.current_global_rate;
        state
            .endpoints
            .entry(key.to_string())
            .or_insert_with(|| EndpointState::new(rate))
    }

    fn effective_rate_of(&self, state: &RateLimiterState, ep: &EndpointState) -> f64 {
        let base = if ep.quota_rate.is_some() {
            ep.current_rate
        } else {
            ep.current_rate.min(state.current_global_rate)
        };
        (base.min(self.config.max_rate) / state.backoff_multiplier.max(1.0)).max(self.config.min_rate)
    }

    /// Forget header-derived quota once its window has reset.
    fn expire_quota(ep: &mut EndpointState, now: DateTime<Utc>) {
        if ep.reset_time.is_some_and(|reset| reset <= now) {
            ep.remaining = None;
            ep.reset_time = None;
            ep.quota_rate = None;
        }
    }

    /// Calls per second currently allowed on `endpoint`.
    pub fn effective_rate(&self, endpoint: Option<&str>) -> f64 {
        let now = self.clock.now();
        let mut inner = self.lock();
        let key = Self::key(endpoint);
        let ep = Self::endpoint_mut(&mut inner.state, key);
        Self::expire_quota(ep, now);
        let ep = ep.clone();
        self.effective_rate_of(&inner.state, &ep)
    }

    /// Relax the backoff multiplier after quiet periods.
    fn apply_decay(&self, state: &mut RateLimiterState, now: DateTime<Utc>) {
        if state.backoff_multiplier > 1.0 {
            let anchor = match (state.last_violation_time, state.last_decay_time) {
                (Some(v), Some(d)) => Some(v.max(d)),
                (v, d) => v.or(d),
            };
            if let Some(mut anchor) = anchor {
                let period = self.config.backoff_decay_secs.max(1.0);
                let mut decayed = false;
                while clock::secs_between(anchor, now) >= period {
                    state.backoff_multiplier = 1.0 + (state.backoff_multiplier - 1.0) / 2.0;
                    anchor = clock::add_secs(anchor, period);
                    decayed = true;
                    if state.backoff_multiplier < 1.01 {
                        state.backoff_multiplier = 1.0;
                        break;
                    }
                }
                if decayed {
                    state.last_decay_time = Some(anchor);
                    tracing::info!(
                        limiter = %state.name,
                        multiplier = state.backoff_multiplier,
                        "Backoff multiplier decayed"
                    );
                }
            }
        }

        if state.backoff_multiplier <= 1.0 {
            for ep in state.endpoints.values_mut() {
                if ep.in_backoff && ep.backoff_until.map_or(true, |until| until <= now) {
                    ep.in_backoff = false;
                }
            }
        }
    }

    /// Time the next call on `key` must wait, zero if it may go now.
    fn next_delay(&self, inner: &mut Inner, key: &str, now: DateTime<Utc>) -> Duration {
        let window = self.config.window_size_secs.max(0.001);
        let ep = Self::endpoint_mut(&mut inner.state, key);

        Self::expire_quota(ep, now);

        let mut delay = Duration::ZERO;

        if let Some(until) = ep.backoff_until {
            delay = delay.max(clock::until(now, until));
        }
        if let (Some(0), Some(reset)) = (ep.remaining, ep.reset_time) {
            delay = delay.max(clock::until(now, reset));
        }

        let ep = ep.clone();
        let rate = self.effective_rate_of(&inner.state, &ep);
        if let Some(last) = ep.last_request_time {
            let next = clock::add_secs(last, 1.0 / rate);
            delay = delay.max(clock::until(now, next));
        }

        let log = inner.call_log.entry(key.to_string()).or_default();
        let horizon = now - chrono::Duration::microseconds((window * 1_000_000.0) as i64);
        while log.front().is_some_and(|t| *t <= horizon) {
            log.pop_front();
        }
        let cap = ((rate * window).floor() as usize).max(1);
        if log.len() >= cap {
            if let Some(oldest) = log.get(log.len() - cap) {
                delay = delay.max(clock::until(now, clock::add_secs(*oldest, window)));
            }
        }

        delay
    }

    fn record_call(inner: &mut Inner, key: &str, now: DateTime<Utc>) {
        inner.state.total_requests += 1;
        let ep = Self::endpoint_mut(&mut inner.state, key);
        ep.requests_made += 1;
        ep.last_request_time = Some(now);
        if let Some(remaining) = ep.remaining {
            ep.remaining = Some(remaining.saturating_sub(1));
        }
        inner.call_log.entry(key.to_string()).or_default().push_back(now);
    }

    /// Block until the next call on `endpoint` is allowed, then claim it.
    ///
    /// Returns how long the caller was suspended.
    pub async fn wait(&self, endpoint: Option<&str>) -> Duration {
        let key = Self::key(endpoint);
        let mut waited = Duration::ZERO;

        loop {
            let delay = {
                let now = self.clock.now();
                let mut inner = self.lock();
                self.apply_decay(&mut inner.state, now);
                let delay = self.next_delay(&mut inner, key, now);
                if delay.is_zero() {
                    Self::record_call(&mut inner, key, now);
                    inner.state.total_wait_secs += waited.as_secs_f64();
                    return waited;
                }
                delay
            };

            tracing::debug!(endpoint = %key, delay_ms = delay.as_millis() as u64, "Rate limiter pacing call");
            tokio::time::sleep(delay).await;
            waited += delay;
        }
    }

    /// Adapt to quota headers from a response.
    pub fn parse_headers(&self, headers: &Headers, endpoint: Option<&str>) -> Option<RateLimitInfo> {
        let now = self.clock.now();
        let info = self.parser.parse(headers, now)?;
        let key = Self::key(endpoint);

        let mut guard = self.lock();
        let state = &mut guard.state;
        let (min_rate, max_rate) = (self.config.min_rate, self.config.max_rate);

        let ep = Self::endpoint_mut(state, key);
        if info.limit.is_some() {
            ep.limit = info.limit;
        }
        if info.remaining.is_some() {
            ep.remaining = info.remaining;
        }
        if info.reset_at.is_some() {
            ep.reset_time = info.reset_at;
        }

        if let Some(retry_after) = info.retry_after {
            let until = clock::add_secs(now, retry_after.as_secs_f64());
            ep.backoff_until = Some(ep.backoff_until.map_or(until, |u| u.max(until)));
            ep.in_backoff = true;
            tracing::warn!(endpoint = %key, retry_after_secs = retry_after.as_secs_f64(), "Server requested Retry-After");
        }

        let mut new_rate = None;
        if let (Some(remaining), Some(reset)) = (ep.remaining, ep.reset_time) {
            let secs = clock::secs_between(now, reset);
            if remaining > 0 && secs > 0.0 {
                let exhausting = remaining as f64 / secs;
                let rate = (exhausting * self.config.safety_margin).clamp(min_rate, max_rate);
                ep.current_rate = rate;
                ep.quota_rate = Some(rate);
                new_rate = Some(rate);
                tracing::debug!(
                    endpoint = %key,
                    source = info.source,
                    remaining,
                    reset_in_secs = secs,
                    rate,
                    "Rate adapted from quota headers"
                );
            }
        }

        if let Some(rate) = new_rate {
            if key == GLOBAL_ENDPOINT {
                state.current_global_rate = rate;
            }
            state.note_rate(rate);
        }

        Some(info)
    }

    /// React to an explicit throttle (HTTP 429).
    pub fn record_throttled(&self, endpoint: Option<&str>, retry_after: Option<Duration>) {
        let now = self.clock.now();
        let key = Self::key(endpoint);
        let mut guard = self.lock();
        let state = &mut guard.state;

        state.total_violations += 1;
        state.last_violation_time = Some(now);
        state.backoff_multiplier = (state.backoff_multiplier * 2.0).min(self.config.max_backoff_multiplier);
        let multiplier = state.backoff_multiplier;

        let ep = Self::endpoint_mut(state, key);
        ep.violations += 1;
        ep.current_rate = (ep.current_rate / 2.0).max(self.config.min_rate);
        ep.in_backoff = true;
        if let Some(retry_after) = retry_after {
            let until = clock::add_secs(now, retry_after.as_secs_f64());
            ep.backoff_until = Some(ep.backoff_until.map_or(until, |u| u.max(until)));
        }
        let rate = ep.current_rate;

        if key == GLOBAL_ENDPOINT {
            state.current_global_rate = rate;
        }
        state.note_rate(rate);

        tracing::warn!(
            limiter = %state.name,
            endpoint = %key,
            rate,
            multiplier,
            retry_after_secs = retry_after.map(|d| d.as_secs_f64()),
            "Throttled by upstream, backing off"
        );
    }

    /// Passive adaptation from observed latency.
    pub fn record_response_time(&self, endpoint: Option<&str>, latency: Duration) {
        let now = self.clock.now();
        let key = Self::key(endpoint);
        let mut guard = self.lock();
        self.apply_decay(&mut guard.state, now);
        let state = &mut guard.state;

        if state.backoff_multiplier > 1.0 {
            return;
        }
        let ep = Self::endpoint_mut(state, key);
        if ep.in_backoff {
            return;
        }
        Self::expire_quota(ep, now);

        let secs = latency.as_secs_f64();
        let old = ep.current_rate;
        let new = if secs > self.config.slow_response_secs {
            (old * self.config.slow_response_factor).max(self.config.min_rate)
        } else if secs < self.config.fast_response_secs {
            let ceiling = ep.quota_rate.unwrap_or(self.config.max_rate).min(self.config.max_rate);
            (old * self.config.fast_response_factor).min(ceiling).max(old.min(ceiling))
        } else {
            old
        };

        if (new - old).abs() > f64::EPSILON {
            ep.current_rate = new;
            if key == GLOBAL_ENDPOINT {
                state.current_global_rate = new;
            }
            state.note_rate(new);
            tracing::trace!(endpoint = %key, latency_ms = latency.as_millis() as u64, rate = new, "Rate adapted from latency");
        }
    }

    /// Scale the rate of one endpoint, or the global rate and every endpoint.
    pub fn adjust_rate(&self, factor: f64, endpoint: Option<&str>) {
        if !(factor.is_finite() && factor > 0.0) {
            tracing::warn!(factor, "Ignoring invalid rate adjustment factor");
            return;
        }
        let (min_rate, max_rate) = (self.config.min_rate, self.config.max_rate);
        let mut guard = self.lock();
        let state = &mut guard.state;

        match endpoint {
            Some(key) => {
                let ep = Self::endpoint_mut(state, key);
                ep.current_rate = (ep.current_rate * factor).clamp(min_rate, max_rate);
                let rate = ep.current_rate;
                if key == GLOBAL_ENDPOINT {
                    state.current_global_rate = rate;
                }
                state.note_rate(rate);
            }
            None => {
                state.current_global_rate = (state.current_global_rate * factor).clamp(min_rate, max_rate);
                for ep in state.endpoints.values_mut() {
                    ep.current_rate = (ep.current_rate * factor).clamp(min_rate, max_rate);
                }
                let rate = state.current_global_rate;
                state.note_rate(rate);
            }
        }
        tracing::info!(limiter = %state.name, factor, endpoint = ?endpoint, "Rate adjusted");
    }

    /// Whether `endpoint` is currently backing off.
    pub fn is_in_backoff(&self, endpoint: Option<&str>) -> bool {
        let now = self.clock.now();
        let mut guard = self.lock();
        self.apply_decay(&mut guard.state, now);
        let multiplier = guard.state.backoff_multiplier;
        guard
            .state
            .endpoints
            .get(Self::key(endpoint))
            .is_some_and(|ep| ep.in_backoff || ep.backoff_until.is_some_and(|u| u > now))
            || multiplier > 1.0
    }

    /// Snapshot plus effective rates.
    pub fn stats(&self) -> RateLimiterStats {
        let now = self.clock.now();
        let mut guard = self.lock();
        self.apply_decay(&mut guard.state, now);
        let state = guard.state.clone();
        let effective_rates = state
            .endpoints
            .iter()
            .map(|(k, ep)| (k.clone(), self.effective_rate_of(&state, ep)))
            .collect();
        RateLimiterStats {
            state,
            effective_rates,
            config: self.config.clone(),
        }
    }

    pub fn snapshot(&self) -> RateLimiterState {
        self.lock().state.clone()
    }

    /// Replace the current state with a previously persisted snapshot.
    pub fn restore(&self, snapshot: RateLimiterState) {
        let mut guard = self.lock();
        let name = std::mem::take(&mut guard.state.name);
        tracing::info!(
            limiter = %name,
            endpoints = snapshot.endpoints.len(),
            multiplier = snapshot.backoff_multiplier,
            "Restored rate limiter state"
        );
        guard.state = RateLimiterState { name, ..snapshot };
        guard.call_log.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn limiter(default_rate: f64, window_size_secs: f64) -> AdaptiveRateLimiter {
        AdaptiveRateLimiter::new(
            "test",
            RateLimitConfig {
                default_rate,
                window_size_secs,
                ..Default::default()
            },
        )
    }

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs.iter().copied().collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_between_calls() {
        let rl = limiter(2.0, 60.0);
        assert_eq!(rl.wait(None).await, Duration::ZERO);

        let start = Instant::now();
        rl.wait(None).await;
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(rl.snapshot().total_requests, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rolling_window_never_exceeds_rate() {
        let rl = limiter(1.0, 10.0);
        let origin = Instant::now();
        let mut issued = Vec::new();
        for _ in 0..30 {
            rl.wait(Some("quotes")).await;
            issued.push(origin.elapsed().as_secs_f64());
        }

        for (i, start) in issued.iter().enumerate() {
            let in_window = issued[i..].iter().filter(|t| **t < start + 10.0).count();
            assert!(in_window <= 10, "window at {start} held {in_window} calls");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_quota_blocks_until_reset() {
        let rl = limiter(5.0, 60.0);
        rl.parse_headers(
            &headers(&[("X-RateLimit-Remaining", "0"), ("X-RateLimit-Reset", "60")]),
            Some("quotes"),
        )
        .unwrap();

        let start = Instant::now();
        rl.wait(Some("quotes")).await;
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_blocks_endpoint() {
        let rl = limiter(5.0, 60.0);
        rl.record_throttled(Some("quotes"), Some(Duration::from_secs(30)));

        let start = Instant::now();
        rl.wait(Some("quotes")).await;
        assert!(start.elapsed() >= Duration::from_secs(30));

        // Other endpoints keep their own schedule.
        let start = Instant::now();
        rl.wait(Some("news")).await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_headers_set_conservative_rate() {
        let rl = limiter(5.0, 60.0);
        rl.parse_headers(
            &headers(&[
                ("X-RateLimit-Limit", "100"),
                ("X-RateLimit-Remaining", "10"),
                ("X-RateLimit-Reset", "10"),
            ]),
            Some("quotes"),
        );

        let rate = rl.effective_rate(Some("quotes"));
        assert!((rate - 0.7).abs() < 0.01, "rate was {rate}");

        let origin = Instant::now();
        let mut calls = 0;
        loop {
            rl.wait(Some("quotes")).await;
            if origin.elapsed() >= Duration::from_secs(10) {
                break;
            }
            calls += 1;
        }
        assert!(calls <= 10, "issued {calls} calls in 10s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_halves_rate_and_doubles_multiplier() {
        let rl = limiter(1.0, 60.0);
        rl.record_throttled(Some("quotes"), None);

        let snap = rl.snapshot();
        assert_eq!(snap.backoff_multiplier, 2.0);
        assert_eq!(snap.total_violations, 1);
        assert_eq!(snap.endpoints["quotes"].current_rate, 0.5);
        assert!((rl.effective_rate(Some("quotes")) - 0.25).abs() < 1e-9);

        for _ in 0..10 {
            rl.record_throttled(Some("quotes"), None);
        }
        assert_eq!(rl.snapshot().backoff_multiplier, 16.0);
        assert!(rl.effective_rate(Some("quotes")) >= rl.config().min_rate);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_decays_gradually() {
        let rl = limiter(1.0, 60.0);
        rl.record_throttled(None, None);
        rl.record_throttled(None, None);
        assert_eq!(rl.snapshot().backoff_multiplier, 4.0);

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(rl.stats().state.backoff_multiplier, 4.0);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(rl.stats().state.backoff_multiplier, 2.5);

        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(rl.stats().state.backoff_multiplier, 1.75);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(rl.stats().state.backoff_multiplier, 1.0);
        assert!(!rl.is_in_backoff(None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_adaptation() {
        let rl = limiter(1.0, 60.0);
        rl.record_response_time(Some("slow"), Duration::from_secs(3));
        assert!((rl.snapshot().endpoints["slow"].current_rate - 0.9).abs() < 1e-9);

        rl.record_response_time(Some("slow"), Duration::from_millis(100));
        assert!((rl.snapshot().endpoints["slow"].current_rate - 0.945).abs() < 1e-9);

        // Never while backing off.
        rl.record_throttled(Some("slow"), None);
        let before = rl.snapshot().endpoints["slow"].current_rate;
        rl.record_response_time(Some("slow"), Duration::from_secs(5));
        assert_eq!(rl.snapshot().endpoints["slow"].current_rate, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_responses_respect_quota_ceiling() {
        let rl = limiter(1.0, 60.0);
        rl.parse_headers(
            &headers(&[("RateLimit-Remaining", "20"), ("RateLimit-Reset", "10")]),
            Some("quotes"),
        );
        let ceiling = rl.snapshot().endpoints["quotes"].quota_rate.unwrap();
        for _ in 0..20 {
            rl.record_response_time(Some("quotes"), Duration::from_millis(50));
        }
        assert!(rl.snapshot().endpoints["quotes"].current_rate <= ceiling + 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_ceiling_expires_with_reset() {
        let rl = limiter(1.0, 60.0);
        rl.parse_headers(
            &headers(&[("RateLimit-Remaining", "20"), ("RateLimit-Reset", "10")]),
            Some("quotes"),
        );
        assert!((rl.effective_rate(Some("quotes")) - 1.4).abs() < 1e-9);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!((rl.effective_rate(Some("quotes")) - 1.0).abs() < 1e-9);

        let ep = &rl.snapshot().endpoints["quotes"];
        assert_eq!(ep.quota_rate, None);
        assert_eq!(ep.remaining, None);
        assert_eq!(ep.reset_time, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adjust_rate_clamps() {
        let rl = limiter(1.0, 60.0);
        rl.wait(Some("a")).await;
        rl.adjust_rate(100.0, None);

        let snap = rl.snapshot();
        assert_eq!(snap.current_global_rate, 10.0);
        assert_eq!(snap.endpoints["a"].current_rate, 10.0);
        assert_eq!(snap.max_rate_seen, 10.0);

        rl.adjust_rate(0.0001, Some("a"));
        assert_eq!(rl.snapshot().endpoints["a"].current_rate, 0.01);

        rl.adjust_rate(-1.0, None);
        assert_eq!(rl.snapshot().current_global_rate, 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_round_trip() {
        let rl = limiter(1.0, 60.0);
        rl.wait(Some("quotes")).await;
        rl.parse_headers(
            &headers(&[
                ("X-RateLimit-Limit", "100"),
                ("X-RateLimit-Remaining", "50"),
                ("X-RateLimit-Reset", "30"),
            ]),
            Some("quotes"),
        );
        rl.record_throttled(Some("news"), Some(Duration::from_secs(5)));

        let snapshot = rl.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: RateLimiterState = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, snapshot);

        let restored = limiter(1.0, 60.0);
        restored.restore(decoded);
        assert_eq!(restored.snapshot(), snapshot);
    }
}
