//! Collector runtime.
//!
//! # Architecture Overview
//!
//! ```text
//!   collectors.toml ──▶ config ──▶ lifecycle::startup ──▶ CollectorRegistry
//!                                                              │
//!          ┌───────────────────────────────────────────────────┤ one task each
//!          ▼                                                   ▼
//!   CollectorService (loop) ...                         CollectorService (loop)
//!          │
//!          ▼
//!   CollectorCore::make_request
//!     circuit breaker gate ─▶ adaptive rate limiter ─▶ transport (timeout)
//!          │                                               │
//!          ▼                                               ▼
//!   PersistenceStore (breaker/limiter checkpoints)     DataSink (records)
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use collector_resilience::config::{load_config, ConfigError};
use collector_resilience::lifecycle::{signals, startup};
use collector_resilience::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "collector-resilience", version, about = "Run resilient external-data collectors")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "collectors.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start every collector and run until SIGINT/SIGTERM.
    Run,
    /// Load and validate the configuration, then exit.
    Validate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::Validate => validate(&cli.config),
        Command::Run => match run(&cli.config).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "Collector runtime failed");
                eprintln!("error: {e}");
                ExitCode::FAILURE
            }
        },
    }
}

fn validate(path: &std::path::Path) -> ExitCode {
    match load_config(path) {
        Ok(config) => {
            println!("{}: OK ({} collectors)", path.display(), config.collectors.len());
            ExitCode::SUCCESS
        }
        Err(ConfigError::Validation(errors)) => {
            eprintln!("{}: {} problem(s)", path.display(), errors.len());
            for error in errors {
                eprintln!("  - {error}");
            }
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("{}: {e}", path.display());
            ExitCode::FAILURE
        }
    }
}

async fn run(path: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(path)?;
    logging::init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        collectors = config.collectors.len(),
        "collector-resilience starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = startup::build_registry(&config)?;
    let failures = registry.init().await;
    if !failures.is_empty() && failures.len() == registry.len() {
        tracing::error!("No collector could be started");
    }

    signals::wait_for_shutdown_signal().await;

    registry
        .shutdown(Duration::from_secs_f64(config.shutdown.grace_secs))
        .await;

    tracing::info!("Shutdown complete");
    Ok(())
}
