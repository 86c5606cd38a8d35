//! RigBlueprint - Config Loader output
//!
//! Describes a complete scanning rig: projectors, attached cameras, pattern
//! sets and multi-projector synchronization groups.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{AcquisitionMode, PixelFormat, RationalRate};

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete rig configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RigBlueprint {
    /// Configuration version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Rig-wide settings
    #[validate(nested)]
    pub rig: RigSettings,

    /// Projectors, one engine thread each
    #[validate(length(min = 1), nested)]
    pub projectors: Vec<ProjectorConfig>,

    /// Cameras, each attached to one projector
    #[serde(default)]
    #[validate(nested)]
    pub cameras: Vec<CameraConfig>,

    /// Projectors presenting in lock-step
    #[serde(default)]
    #[validate(nested)]
    pub sync_groups: Vec<SyncGroupConfig>,
}

/// Rig-wide settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RigSettings {
    /// Rig name (logs only)
    #[validate(length(min = 1))]
    pub name: String,

    /// How long batch end waits for camera confirmation
    #[serde(default = "default_batch_end_timeout_ms")]
    #[validate(range(min = 1))]
    pub batch_end_timeout_ms: u64,

    /// Number of batches `scanrig run` acquires before exiting
    #[serde(default = "default_one")]
    #[validate(range(min = 1))]
    pub batches: u32,
}

fn default_batch_end_timeout_ms() -> u64 {
    15_000
}

fn default_one() -> u32 {
    1
}

fn default_refresh_hz() -> f64 {
    60.0
}

/// One projector and its pattern sequence
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProjectorConfig {
    /// Unique identifier
    #[validate(length(min = 1))]
    pub id: String,

    /// Display refresh rate in Hz
    #[serde(default = "default_refresh_hz")]
    #[validate(range(min = 1.0, max = 1000.0))]
    pub refresh_hz: f64,

    /// Refresh intervals each frame stays on screen
    #[serde(default = "default_one")]
    #[validate(range(min = 1))]
    pub present_intervals: u32,

    /// Delay between presentation and camera trigger (ms)
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub delay_ms: f64,

    /// Acquisition mode
    #[serde(default)]
    pub mode: AcquisitionMode,

    /// Captures per batch in fixed-pattern mode
    #[serde(default = "default_one")]
    #[validate(range(min = 1))]
    pub fixed_captures: u32,

    /// Patterns to project
    #[validate(nested)]
    pub patterns: PatternSetConfig,
}

impl ProjectorConfig {
    /// Refresh rate as a rational with millihertz resolution
    pub fn refresh_rate(&self) -> RationalRate {
        RationalRate::new((self.refresh_hz * 1000.0).round() as u32, 1000)
    }
}

/// Synthetic pattern set
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PatternSetConfig {
    /// Number of patterns per batch
    #[validate(range(min = 1))]
    pub count: u32,

    #[validate(range(min = 1))]
    pub width: u32,

    #[validate(range(min = 1))]
    pub height: u32,

    #[serde(default)]
    pub format: PixelFormat,
}

/// One camera
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CameraConfig {
    /// Unique identifier
    #[validate(length(min = 1))]
    pub id: String,

    /// Projector this camera is attached to
    #[validate(length(min = 1))]
    pub projector: String,

    /// Exposure time (ms)
    #[validate(range(min = 0.0))]
    pub exposure_ms: f64,

    /// Sensor readout after exposure (ms)
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub readout_ms: f64,
}

/// Projectors synchronized through shared barriers
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SyncGroupConfig {
    #[validate(length(min = 1))]
    pub name: String,

    /// Projector ids, at least two
    #[validate(length(min = 2))]
    pub members: Vec<String>,
}
