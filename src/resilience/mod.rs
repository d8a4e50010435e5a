//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! CollectorCore::make_request(endpoint):
//!     → circuit_breaker.rs (gate: reject while OPEN, no limiter interaction)
//!     → rate_limiter.rs    (pace: spacing, window, quota and Retry-After gates)
//!     → timeouts.rs        (bound the transport call)
//!     → retries.rs         (classify status / error, decide retry)
//!     → backoff.rs         (exponential delay with jitter between attempts)
//!
//! Response headers → headers.rs (ordered strategies) → rate_limiter.rs
//! ```
//!
//! # Design Decisions
//! - Breaker and limiter are plain synchronous state machines behind a `Mutex`;
//!   only `AdaptiveRateLimiter::wait` suspends
//! - All time comes from `clock.rs`, so paused tokio time drives every transition
//! - Snapshots are serde structs persisted verbatim and restored on connect

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod headers;
pub mod rate_limiter;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerState, CircuitBreakerStatus, CircuitState};
pub use clock::Clock;
pub use headers::{HeaderParser, HeaderStrategy, RateLimitInfo};
pub use rate_limiter::{AdaptiveRateLimiter, EndpointState, RateLimiterState, RateLimiterStats};
pub use retries::{RetryClass, RetryPolicy, StatusClass};
