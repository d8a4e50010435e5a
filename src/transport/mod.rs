//! Transport abstraction.
//!
//! # Data Flow
//! ```text
//! CollectorCore::make_request
//!     → Transport::request(TransportRequest)
//!     → TransportResponse { status, headers, body }  (any status, including 4xx/5xx)
//!     → TransportError                               (no response at all)
//! ```
//!
//! # Design Decisions
//! - The core never depends on a concrete HTTP client; only this shape
//! - HTTP error statuses are responses, not errors; classification happens upstream
//! - Timeouts are enforced by the caller, the transport only receives the budget

pub mod http;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub use http::ReqwestTransport;

/// HTTP method subset used by collectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// Case-insensitive response/request header map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(HashMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0.insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Look up a header by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// One outbound call.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub params: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub timeout: Duration,
}

impl TransportRequest {
    /// A GET request with no parameters and a 30s timeout.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Headers::new(),
            params: Vec::new(),
            body: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// A response from the upstream, whatever its status.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Failures where no response was received.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Other(String),
}

/// Outbound call capability used by collectors.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Prepare the transport for use. Called from `connect()`.
    async fn open(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Perform one call.
    async fn request(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;

    /// Release resources. Called from `disconnect()`.
    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_are_case_insensitive() {
        let headers: Headers = [("X-RateLimit-Remaining", "10")].into_iter().collect();
        assert_eq!(headers.get("x-ratelimit-remaining"), Some("10"));
        assert_eq!(headers.get("X-RATELIMIT-REMAINING"), Some("10"));
        assert_eq!(headers.get("retry-after"), None);
    }

    #[test]
    fn test_request_builder() {
        let req = TransportRequest::get("https://api.example.com/v1")
            .with_param("symbol", "AAPL")
            .with_header("Accept", "application/json");
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.params, vec![("symbol".to_string(), "AAPL".to_string())]);
        assert_eq!(req.headers.get("accept"), Some("application/json"));
    }
}
