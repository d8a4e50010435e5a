//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the shared collaborators (store, sink, transport) from configuration
//! - Build one collector per `[[collectors]]` entry with its effective settings
//! - Register them in a `CollectorRegistry` owned by the caller
//!
//! # Design Decisions
//! - Fail fast: a store or sink that cannot be built is fatal
//! - One `reqwest` client is shared by every collector

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::collector::{CollectorBuilder, HttpJsonCollector};
use crate::config::{CollectorKind, PersistenceBackend, RuntimeConfig, SinkKind};
use crate::lifecycle::registry::{CollectorRegistry, RegistryError};
use crate::persistence::{FileStore, MemoryStore, PersistenceError, PersistenceStore};
use crate::sink::{DataSink, JsonLinesSink, MemorySink};
use crate::transport::{ReqwestTransport, Transport};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("missing path for {0}")]
    MissingPath(&'static str),
}

pub fn build_store(config: &RuntimeConfig) -> Result<Arc<dyn PersistenceStore>, StartupError> {
    Ok(match config.persistence.backend {
        PersistenceBackend::Memory => Arc::new(MemoryStore::new()),
        PersistenceBackend::File => {
            let path = config
                .persistence
                .path
                .as_deref()
                .ok_or(StartupError::MissingPath("persistence.path"))?;
            Arc::new(FileStore::open(path)?)
        }
    })
}

pub fn build_sink(config: &RuntimeConfig) -> Result<Arc<dyn DataSink>, StartupError> {
    Ok(match config.sink.kind {
        SinkKind::Memory => Arc::new(MemorySink::new()),
        SinkKind::JsonLines => {
            let path = config.sink.path.as_deref().ok_or(StartupError::MissingPath("sink.path"))?;
            Arc::new(JsonLinesSink::new(path))
        }
    })
}

/// Build the registry with the default `reqwest` transport.
pub fn build_registry(config: &RuntimeConfig) -> Result<CollectorRegistry, StartupError> {
    build_registry_with_transport(config, Arc::new(ReqwestTransport::new()))
}

/// Build the registry around a caller-supplied transport.
pub fn build_registry_with_transport(
    config: &RuntimeConfig,
    transport: Arc<dyn Transport>,
) -> Result<CollectorRegistry, StartupError> {
    let store = build_store(config)?;
    let sink = build_sink(config)?;
    let ttl = Duration::from_secs(config.persistence.state_ttl_secs);

    let mut registry = CollectorRegistry::new();
    for def in &config.collectors {
        let collector = match def.kind {
            CollectorKind::HttpJson => HttpJsonCollector::from_definition(def),
        };
        let service = CollectorBuilder::new(collector)
            .settings(def.collector_settings(&config.defaults))
            .circuit_breaker(def.circuit_breaker_config(&config.defaults))
            .rate_limit(def.rate_limit_config(&config.defaults))
            .transport(Arc::clone(&transport))
            .store(Arc::clone(&store))
            .sink(Arc::clone(&sink))
            .state_ttl(ttl)
            .build();
        registry.register(service)?;
    }

    tracing::info!(collectors = registry.len(), "Collectors built from configuration");
    Ok(registry)
}
