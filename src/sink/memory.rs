//! In-process buffer sink.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{DataSink, Record, SinkError};

/// Keeps every record in memory. Clones share the buffer.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<Record>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Record>> {
        self.records.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Memory sink mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn records(&self) -> Vec<Record> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl DataSink for MemorySink {
    async fn store(&self, records: Vec<Record>) -> Result<(), SinkError> {
        self.lock().extend(records);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_clones_share_buffer() {
        let sink = MemorySink::new();
        let handle = sink.clone();
        sink.store(vec![Record::new("a", json!({"x": 1})), Record::new("a", json!({"x": 2}))])
            .await
            .unwrap();
        assert_eq!(handle.len(), 2);
        assert_eq!(handle.records()[1].payload, json!({"x": 2}));
    }
}
