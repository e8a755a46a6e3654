//! Pylon - reliable telemetry delivery for intermittently-connected sensors
//!
//! # Usage
//!
//! ```bash
//! # Run the collector
//! pylon serve --config server.toml
//!
//! # Run the sensor agent
//! pylon sensor --config sensor.toml
//!
//! # Feed a measurement result into the local queue
//! pylon enqueue --config sensor.toml result.json
//! ```

mod cmd;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pylon_config::{LogConfig, LogFormat};

/// Pylon - reliable telemetry delivery pipeline
#[derive(Parser, Debug)]
#[command(name = "pylon")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the collector server
    Serve(cmd::serve::ServeArgs),

    /// Run the sensor agent
    Sensor(cmd::sensor::SensorArgs),

    /// Chunk a payload into the local durable queue
    Enqueue(cmd::enqueue::EnqueueArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => cmd::serve::run(args).await,
        Command::Sensor(args) => cmd::sensor::run(args).await,
        Command::Enqueue(args) => cmd::enqueue::run(args).await,
    }
}

/// Initialize the tracing subscriber from the configured log section
///
/// RUST_LOG overrides the configured level when set.
pub(crate) fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.as_str()))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Console => {
            registry
                .with(fmt::layer().with_target(true).with_thread_ids(false))
                .init();
        }
        LogFormat::Json => {
            registry.with(fmt::layer().json()).init();
        }
    }

    Ok(())
}
