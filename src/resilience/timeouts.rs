//! Timeout enforcement.
//!
//! Every transport call runs under the collector's request timeout; an expired
//! budget surfaces as [`TransportError::Timeout`] and is treated like any other
//! transient failure.

use std::future::Future;
use std::time::Duration;

use crate::transport::TransportError;

/// Run `fut`, failing with `TransportError::Timeout` after `budget`.
pub async fn with_timeout<F, T>(budget: Duration, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(budget)),
    }
}
