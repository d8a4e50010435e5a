//! Collector error taxonomy.

use std::time::Duration;
use thiserror::Error;

use crate::persistence::PersistenceError;
use crate::resilience::RetryClass;
use crate::sink::SinkError;
use crate::transport::TransportError;

/// Errors surfaced by collectors and their request path.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Invalid collector configuration; fatal at `connect()`.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The breaker refused the call.
    #[error("circuit breaker '{name}' is open, retry in {retry_after:?}")]
    CircuitOpen { name: String, retry_after: Duration },

    /// HTTP 429 from the upstream.
    #[error("throttled by upstream")]
    Throttled { retry_after: Option<Duration> },

    /// 5xx from the upstream.
    #[error("upstream error: status {status}")]
    Upstream { status: u16 },

    /// No response (timeout, reset, refused).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// 4xx other than 429; never retried.
    #[error("request rejected: status {status}: {body}")]
    FatalRequest { status: u16, body: String },

    /// Retryable failures exhausted the attempt budget.
    #[error("request failed after {attempts} attempts: {last}")]
    Collection {
        attempts: u32,
        #[source]
        last: Box<CollectorError>,
    },

    /// A response arrived but could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// `stop()` was signalled while waiting.
    #[error("cancelled by stop request")]
    Cancelled,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    /// A collector implementation panicked during a cycle.
    #[error("collector panicked: {0}")]
    Panicked(String),

    /// Lifecycle method called in the wrong phase.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl CollectorError {
    /// How the request loop should treat this error.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::CircuitOpen { .. } => RetryClass::CircuitOpen,
            Self::Throttled { .. } | Self::Upstream { .. } | Self::Transport(_) => RetryClass::WithBackoff,
            _ => RetryClass::Never,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}
