//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use contracts::AcquisitionMode;

/// scanrig - projector/camera synchronization for structured-light scanning
#[derive(Parser, Debug)]
#[command(
    name = "scanrig",
    author,
    version,
    about = "Structured-light projector/camera synchronization",
    long_about = "Drives one or more projectors through pattern batches and triggers the\n\
                  attached cameras inside each frame's stable window.\n\n\
                  The `run` command simulates the rig described by a configuration file\n\
                  with mock surfaces, cameras and pattern sources."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "SCANRIG_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "SCANRIG_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Acquire pattern batches on a simulated rig
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Run(_) => "run",
            Commands::Validate(_) => "validate",
            Commands::Info(_) => "info",
        }
    }
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "rig.toml", env = "SCANRIG_CONFIG")]
    pub config: PathBuf,

    /// Override the number of batches from configuration
    #[arg(long, env = "SCANRIG_BATCHES")]
    pub batches: Option<u32>,

    /// Override the acquisition mode of every projector
    #[arg(long, value_enum, env = "SCANRIG_MODE")]
    pub mode: Option<ModeArg>,

    /// Seconds to wait for each batch before aborting it (0 = no limit)
    #[arg(long, default_value = "120", env = "SCANRIG_BATCH_TIMEOUT")]
    pub batch_timeout: u64,

    /// Milliseconds of preview between batches
    #[arg(long, default_value = "0", env = "SCANRIG_PREVIEW_MS")]
    pub preview_ms: u64,

    /// Validate configuration and exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "SCANRIG_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "rig.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "rig.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show attached cameras per projector
    #[arg(long)]
    pub cameras: bool,

    /// Show the computed timing budget per projector
    #[arg(long)]
    pub timing: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

/// Acquisition mode override
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    Blocking,
    Concurrent,
    NonBlocking,
    Fixed,
}

impl From<ModeArg> for AcquisitionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Blocking => AcquisitionMode::Blocking {
                concurrent_delay: false,
            },
            ModeArg::Concurrent => AcquisitionMode::Blocking {
                concurrent_delay: true,
            },
            ModeArg::NonBlocking => AcquisitionMode::NonBlocking,
            ModeArg::Fixed => AcquisitionMode::Fixed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_overrides() {
        let cli = Cli::parse_from([
            "scanrig",
            "run",
            "--config",
            "bench.toml",
            "--mode",
            "non-blocking",
            "--batches",
            "3",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.config, PathBuf::from("bench.toml"));
        assert_eq!(args.mode, Some(ModeArg::NonBlocking));
        assert_eq!(args.batches, Some(3));
        assert_eq!(
            AcquisitionMode::from(ModeArg::Concurrent),
            AcquisitionMode::Blocking {
                concurrent_delay: true
            }
        );
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["scanrig", "-q", "-v", "validate"]);
        assert!(result.is_err());
    }
}
