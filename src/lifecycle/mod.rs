//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     RuntimeConfig → store + sink + transport → one CollectorService per definition
//!     → CollectorRegistry
//!
//! Registry (registry.rs):
//!     init()     → connect + start every collector, collect failures
//!     shutdown() → stop all concurrently (bounded) → disconnect all
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → registry shutdown
//!
//! Shutdown (shutdown.rs):
//!     stop signal shared by a collector's loop and its cancellable waits
//! ```
//!
//! # Design Decisions
//! - The registry is an explicit value owned by `main`, never a global
//! - One failing collector never prevents the others from starting
//! - Shutdown has a deadline: collectors that overrun their grace are aborted

pub mod registry;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use registry::{CollectorRegistry, RegistryError};
pub use shutdown::{Shutdown, ShutdownSignal};
