//! Collector registry.
//!
//! Owns every collector of a runtime. `init` brings them up one by one and
//! reports failures without aborting the rest; `shutdown` stops them all
//! concurrently, each bounded by the grace period, then disconnects them.

use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::collector::{CollectorService, HealthReport};
use crate::error::CollectorError;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("collector '{0}' is already registered")]
    Duplicate(String),
}

/// Explicitly owned set of collectors, in registration order.
#[derive(Default)]
pub struct CollectorRegistry {
    collectors: Vec<Arc<CollectorService>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, collector: CollectorService) -> Result<Arc<CollectorService>, RegistryError> {
        if self.get(collector.name()).is_some() {
            return Err(RegistryError::Duplicate(collector.name().to_string()));
        }
        let collector = Arc::new(collector);
        self.collectors.push(Arc::clone(&collector));
        tracing::debug!(collector = %collector.name(), "Collector registered");
        Ok(collector)
    }

    pub fn get(&self, name: &str) -> Option<Arc<CollectorService>> {
        self.collectors.iter().find(|c| c.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.collectors.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Connect and start every collector; returns the ones that failed.
    pub async fn init(&self) -> Vec<(String, CollectorError)> {
        let mut failures = Vec::new();
        for collector in &self.collectors {
            let result = match collector.connect().await {
                Ok(()) => collector.start().await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::error!(collector = %collector.name(), error = %e, "Collector failed to start");
                failures.push((collector.name().to_string(), e));
            }
        }

        tracing::info!(
            started = self.collectors.len() - failures.len(),
            failed = failures.len(),
            "Collector registry initialised"
        );
        failures
    }

    /// Stop every collector concurrently, then disconnect them.
    pub async fn shutdown(&self, grace: Duration) {
        tracing::info!(
            collectors = self.collectors.len(),
            grace_secs = grace.as_secs_f64(),
            "Shutting down collectors"
        );

        join_all(self.collectors.iter().map(|c| c.stop_with_grace(grace))).await;

        for collector in &self.collectors {
            if let Err(e) = collector.disconnect().await {
                tracing::warn!(collector = %collector.name(), error = %e, "Disconnect failed");
            }
        }
        tracing::info!("All collectors shut down");
    }

    /// Health report of every collector.
    pub fn health(&self) -> Vec<HealthReport> {
        self.collectors.iter().map(|c| c.health_check()).collect()
    }
}
