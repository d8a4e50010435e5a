//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! collectors.toml
//!     → loader.rs (read & deserialize)
//!     → validation.rs (semantic checks, every problem reported)
//!     → RuntimeConfig (validated, immutable)
//!     → lifecycle::startup builds one collector per [[collectors]] entry
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - `[defaults.*]` blocks apply to every collector; a collector may replace a block wholesale
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    CircuitBreakerConfig, CollectorDefinition, CollectorKind, CollectorSettings, DefaultsConfig,
    ObservabilityConfig, PersistenceBackend, PersistenceConfig, RateLimitConfig, RuntimeConfig,
    ShutdownConfig, SinkConfig, SinkKind,
};
pub use validation::{validate_config, ValidationError};
