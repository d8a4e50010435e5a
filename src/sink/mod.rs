//! Downstream record sinks.
//!
//! Collectors hand parsed records to a [`DataSink`]; what happens after that
//! (database, bus, file) is the sink's business.

pub mod jsonl;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use jsonl::JsonLinesSink;
pub use memory::MemorySink;

/// One collected data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Name of the collector that produced it.
    pub source: String,
    pub collected_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl Record {
    pub fn new(source: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            source: source.into(),
            collected_at: Utc::now(),
            payload,
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("sink rejected records: {0}")]
    Rejected(String),
}

/// Destination for collected records.
#[async_trait]
pub trait DataSink: Send + Sync {
    async fn store(&self, records: Vec<Record>) -> Result<(), SinkError>;
}
