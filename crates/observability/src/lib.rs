//! # Observability
//!
//! Logging and Prometheus metrics for the scanning rig.
//!
//! Every projector runs on its own `projector-<id>` thread and every mock
//! camera on `camera-<id>`, so log lines carry the thread name. Verbosity
//! steps raise the engine crates first: `-v` shows batch and prepare flow,
//! `-vv` shows per-frame triggers and presents.
//!
//! ```ignore
//! let config = ObservabilityConfig::from_verbosity(1, false).with_metrics_port(Some(9000));
//! observability::init(&config)?;
//! ```

pub mod metrics;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub use crate::metrics::{
    record_batch_completed, record_frame_presented, record_refresh_wait, record_render_duration,
    record_schedule_depth, record_sync_fault, record_trigger_dropped, record_trigger_fired,
    AcquisitionAggregator, AcquisitionSummary, RunningStats, StatsSummary,
};

/// Crates whose per-frame events are worth raising before everything else
const ENGINE_TARGETS: [&str; 3] = ["sync_engine", "event_bus", "mock_devices"];

/// Log line layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, with file, line and thread fields
    Json,
    #[default]
    Pretty,
    Compact,
}

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    pub directives: String,
    /// Ignore `RUST_LOG` (quiet runs)
    pub force_directives: bool,
    /// Prometheus listener port, `None` to skip the exporter
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self::from_verbosity(0, false)
    }
}

impl ObservabilityConfig {
    /// Directives for a `-v` count; `quiet` keeps warnings only
    pub fn from_verbosity(verbose: u8, quiet: bool) -> Self {
        let engine = |level: &str| {
            ENGINE_TARGETS
                .iter()
                .map(|target| format!("{target}={level}"))
                .collect::<Vec<_>>()
                .join(",")
        };
        let directives = match (quiet, verbose) {
            (true, _) => "warn".to_string(),
            (false, 0) => "info".to_string(),
            (false, 1) => format!("info,{}", engine("debug")),
            (false, _) => format!("debug,{}", engine("trace")),
        };
        Self {
            log_format: LogFormat::default(),
            directives,
            force_directives: quiet,
            metrics_port: None,
        }
    }

    pub fn with_format(mut self, log_format: LogFormat) -> Self {
        self.log_format = log_format;
        self
    }

    pub fn with_metrics_port(mut self, port: Option<u16>) -> Self {
        self.metrics_port = port;
        self
    }

    fn filter(&self) -> EnvFilter {
        if self.force_directives {
            return EnvFilter::new(&self.directives);
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.directives))
    }
}

/// Install the global subscriber and, if a port is set, the Prometheus exporter
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let fmt_layer = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_thread_names(true).boxed(),
        LogFormat::Compact => fmt::layer().compact().with_thread_names(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(config.filter())
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    if let Some(port) = config.metrics_port {
        init_metrics_only(port)?;
    }

    tracing::debug!(
        log_format = ?config.log_format,
        directives = %config.directives,
        metrics_port = ?config.metrics_port,
        "observability initialized"
    );
    Ok(())
}

/// Install the Prometheus exporter and describe the rig metrics
///
/// For callers that install their own tracing subscriber.
pub fn init_metrics_only(port: u16) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus recorder")?;
    metrics::describe();

    tracing::info!(port, "Prometheus metrics endpoint initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_info_without_exporter() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.directives, "info");
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_verbosity_raises_engine_crates_first() {
        let debug = ObservabilityConfig::from_verbosity(1, false);
        assert!(debug.directives.starts_with("info,"));
        assert!(debug.directives.contains("sync_engine=debug"));
        assert!(debug.directives.contains("mock_devices=debug"));

        let trace = ObservabilityConfig::from_verbosity(3, false);
        assert!(trace.directives.contains("sync_engine=trace"));
    }

    #[test]
    fn test_quiet_ignores_env() {
        let config = ObservabilityConfig::from_verbosity(2, true);
        assert_eq!(config.directives, "warn");
        assert!(config.force_directives);
    }
}
