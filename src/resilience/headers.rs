//! Rate-limit header parsing.
//!
//! Vendors advertise quota in different header families. Each family is a
//! named [`HeaderStrategy`]; strategies are tried in priority order and the
//! first one that recognises its headers supplies the limit triple.
//! `Retry-After` is read independently because it can accompany any family.
//!
//! ```text
//! x-ratelimit   X-RateLimit-Limit / -Remaining / -Reset (epoch or delta seconds)
//! ietf          RateLimit-Limit / -Remaining / -Reset   (delta seconds)
//! retry-after   Retry-After                             (delta seconds or HTTP date)
//! ```

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::resilience::clock;
use crate::transport::Headers;

/// `Reset` values above this are treated as Unix timestamps.
const EPOCH_THRESHOLD: f64 = 1_000_000_000.0;

/// Longest delay a server header may impose.
pub const MAX_HEADER_DELAY_SECS: f64 = 24.0 * 60.0 * 60.0;

/// Quota information extracted from one response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitInfo {
    /// Name of the strategy that matched.
    pub source: &'static str,
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
    pub retry_after: Option<Duration>,
}

impl RateLimitInfo {
    pub fn has_quota(&self) -> bool {
        self.limit.is_some() || self.remaining.is_some() || self.reset_at.is_some()
    }
}

/// One vendor header convention.
pub trait HeaderStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Parse the headers, or `None` if this family is absent.
    fn parse(&self, headers: &Headers, now: DateTime<Utc>) -> Option<RateLimitInfo>;
}

/// Limit/Remaining/Reset triple under a common prefix.
pub struct PrefixedTriple {
    name: &'static str,
    prefix: &'static str,
    reset_may_be_epoch: bool,
}

impl PrefixedTriple {
    /// `X-RateLimit-*` (GitHub, Twitter and most REST vendors).
    pub const fn x_ratelimit() -> Self {
        Self {
            name: "x-ratelimit",
            prefix: "x-ratelimit-",
            reset_may_be_epoch: true,
        }
    }

    /// IETF draft `RateLimit-*`.
    pub const fn ietf() -> Self {
        Self {
            name: "ietf",
            prefix: "ratelimit-",
            reset_may_be_epoch: false,
        }
    }

    fn field(&self, headers: &Headers, field: &str) -> Option<String> {
        headers
            .get(&format!("{}{}", self.prefix, field))
            .map(|v| v.trim().to_string())
    }
}

impl HeaderStrategy for PrefixedTriple {
    fn name(&self) -> &'static str {
        self.name
    }

    fn parse(&self, headers: &Headers, now: DateTime<Utc>) -> Option<RateLimitInfo> {
        let limit = self.field(headers, "limit").and_then(|v| parse_count(&v));
        let remaining = self.field(headers, "remaining").and_then(|v| parse_count(&v));
        let reset_at = self
            .field(headers, "reset")
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|value| value.is_finite())
            .map(|value| {
                let ceiling = clock::add_secs(now, MAX_HEADER_DELAY_SECS);
                if self.reset_may_be_epoch && value > EPOCH_THRESHOLD {
                    DateTime::<Utc>::from_timestamp_millis((value * 1000.0) as i64)
                        .unwrap_or(ceiling)
                        .min(ceiling)
                } else {
                    clock::add_secs(now, value.min(MAX_HEADER_DELAY_SECS))
                }
            });

        let info = RateLimitInfo {
            source: self.name,
            limit,
            remaining,
            reset_at,
            retry_after: None,
        };
        info.has_quota().then_some(info)
    }
}

/// `Retry-After` as delta seconds or an HTTP date.
pub struct RetryAfter;

impl HeaderStrategy for RetryAfter {
    fn name(&self) -> &'static str {
        "retry-after"
    }

    fn parse(&self, headers: &Headers, now: DateTime<Utc>) -> Option<RateLimitInfo> {
        let retry_after = parse_retry_after(headers.get("retry-after")?, now)?;
        Some(RateLimitInfo {
            source: self.name(),
            retry_after: Some(retry_after),
            ..Default::default()
        })
    }
}

/// Parse a `Retry-After` value, capped at [`MAX_HEADER_DELAY_SECS`].
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    let cap = Duration::from_secs(MAX_HEADER_DELAY_SECS as u64);
    if let Ok(secs) = value.parse::<f64>() {
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        return Duration::try_from_secs_f64(secs.min(MAX_HEADER_DELAY_SECS)).ok();
    }
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|at| clock::until(now, at.with_timezone(&Utc)).min(cap))
}

fn parse_count(value: &str) -> Option<u64> {
    // Some vendors send "100, 100;w=60" style policies; the first number is the quota.
    let head = value.split([',', ';']).next()?.trim();
    head.parse::<u64>()
        .ok()
        .or_else(|| head.parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v as u64))
}

/// Ordered set of strategies.
pub struct HeaderParser {
    quota: Vec<Box<dyn HeaderStrategy>>,
    retry_after: Box<dyn HeaderStrategy>,
}

impl HeaderParser {
    pub fn new(quota: Vec<Box<dyn HeaderStrategy>>) -> Self {
        Self {
            quota,
            retry_after: Box::new(RetryAfter),
        }
    }

    /// Strategy names in priority order.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.quota
            .iter()
            .map(|s| s.name())
            .chain(std::iter::once(self.retry_after.name()))
            .collect()
    }

    /// Run the strategies; `None` when no known header is present.
    pub fn parse(&self, headers: &Headers, now: DateTime<Utc>) -> Option<RateLimitInfo> {
        let quota = self.quota.iter().find_map(|s| s.parse(headers, now));
        let retry_after = self
            .retry_after
            .parse(headers, now)
            .and_then(|info| info.retry_after);

        match (quota, retry_after) {
            (Some(mut info), retry_after) => {
                info.retry_after = retry_after;
                Some(info)
            }
            (None, Some(retry_after)) => Some(RateLimitInfo {
                source: self.retry_after.name(),
                retry_after: Some(retry_after),
                ..Default::default()
            }),
            (None, None) => None,
        }
    }
}

impl Default for HeaderParser {
    fn default() -> Self {
        Self::new(vec![
            Box::new(PrefixedTriple::x_ratelimit()),
            Box::new(PrefixedTriple::ietf()),
        ])
    }
}
