//! Durable checkpoints for resilience state.
//!
//! # Data Flow
//! ```text
//! connect():    store.get("circuitbreaker:{name}") → CircuitBreaker::restore
//!               store.get("ratelimiter:{name}")    → AdaptiveRateLimiter::restore
//! transition:   CircuitBreaker::snapshot → store.set(key, json, ttl)
//! periodic /
//! disconnect(): AdaptiveRateLimiter::snapshot → store.set(key, json, ttl)
//! ```
//!
//! # Design Decisions
//! - Values are opaque JSON strings; the store never interprets them
//! - Last write wins, expired entries read as absent
//! - A broken store degrades to fresh defaults, it never blocks a collector

pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Default lifetime of a checkpoint.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("persistence I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("persistence encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("persistence backend error: {0}")]
    Backend(String),
}

/// Key/value store with per-entry TTL.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), PersistenceError>;

    async fn delete(&self, key: &str) -> Result<(), PersistenceError>;
}

pub fn circuit_breaker_key(name: &str) -> String {
    format!("circuitbreaker:{name}")
}

pub fn rate_limiter_key(name: &str) -> String {
    format!("ratelimiter:{name}")
}

/// Serialize `value` and store it under `key`.
pub async fn save_json<T: Serialize + Sync>(
    store: &dyn PersistenceStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), PersistenceError> {
    let encoded = serde_json::to_string(value)?;
    store.set(key, encoded, ttl).await
}

/// Load and decode the value stored under `key`, if any.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn PersistenceStore,
    key: &str,
) -> Result<Option<T>, PersistenceError> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Checkpoint {
        failures: u32,
    }

    #[test]
    fn test_keys() {
        assert_eq!(circuit_breaker_key("quotes"), "circuitbreaker:quotes");
        assert_eq!(rate_limiter_key("quotes"), "ratelimiter:quotes");
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let store = MemoryStore::new();
        save_json(&store, "k", &Checkpoint { failures: 3 }, DEFAULT_STATE_TTL)
            .await
            .unwrap();
        let loaded: Option<Checkpoint> = load_json(&store, "k").await.unwrap();
        assert_eq!(loaded, Some(Checkpoint { failures: 3 }));

        store.set("bad", "{not json".into(), DEFAULT_STATE_TTL).await.unwrap();
        let err = load_json::<Checkpoint>(&store, "bad").await.unwrap_err();
        assert!(matches!(err, PersistenceError::Encoding(_)));
    }
}
