//! Error types for rig orchestration.

use thiserror::Error;

/// Failures that stop a simulated rig run
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// A device thread could not be started
    #[error("Failed to start {device}: {source}")]
    Spawn {
        device: String,
        #[source]
        source: std::io::Error,
    },

    /// Display settings rejected by a projector
    #[error("Projector '{projector}' rejected display settings: {source}")]
    DisplaySettings {
        projector: String,
        #[source]
        source: contracts::ConfigError,
    },

    /// A projector did not finish prepare in time
    #[error("Projector '{projector}' did not become ready within {waited_ms} ms")]
    NotReady { projector: String, waited_ms: u64 },

    /// A batch did not finish in time
    #[error("Batch {batch} did not finish on projector '{projector}'")]
    BatchTimeout { batch: u32, projector: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn spawn(device: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            device: device.into(),
            source,
        }
    }
}
