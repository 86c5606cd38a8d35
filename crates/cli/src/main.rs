//! # scanrig
//!
//! `run` builds the rig from a blueprint with mock surfaces, cameras and
//! pattern sources and acquires the configured batches. `validate` and
//! `info` inspect a blueprint without starting any projector thread.

mod cli;
mod commands;
mod error;
mod rig;

use anyhow::Result;
use clap::Parser;
use observability::ObservabilityConfig;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_info, run_rig, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    // SCANRIG_* overrides may come from .env
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    init_logging(&cli)?;

    info!(version = env!("CARGO_PKG_VERSION"), "scanrig starting");

    let result = match &cli.command {
        Commands::Run(args) => run_rig(args).await,
        Commands::Validate(args) => run_validate(args),
        Commands::Info(args) => run_info(args),
    };

    if let Err(ref e) = result {
        tracing::error!(command = cli.command.name(), error = %e, "command failed");
    }

    result
}

/// Install the subscriber for the chosen verbosity and format.
/// `run --metrics-port` starts the exporter later, once the rig is built.
fn init_logging(cli: &Cli) -> Result<()> {
    let format = match cli.log_format {
        cli::LogFormat::Json => observability::LogFormat::Json,
        cli::LogFormat::Pretty => observability::LogFormat::Pretty,
        cli::LogFormat::Compact => observability::LogFormat::Compact,
    };
    observability::init(
        &ObservabilityConfig::from_verbosity(cli.verbose, cli.quiet).with_format(format),
    )
}
