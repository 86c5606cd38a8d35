//! Layered error definitions
//!
//! Categorized by source: config / surface / engine faults

use thiserror::Error;

use crate::DeviceId;

/// Configuration and IO errors
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Render surface failure while drawing a frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// Render target was lost and can be recreated
    #[error("render target lost")]
    TargetLost,

    /// Graphics device is gone
    #[error("graphics device lost: {0}")]
    DeviceLost(String),

    #[error("render failed: {0}")]
    Failed(String),
}

impl RenderError {
    /// Whether recreating the render target may fix the failure
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RenderError::TargetLost)
    }
}

/// Render surface failure while presenting
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PresentError {
    /// Output is occluded (window minimized, display off)
    #[error("surface occluded")]
    Occluded,

    #[error("present failed: {0}")]
    Failed(String),
}

/// Render surface failure while waiting for the refresh pulse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    /// The output does not expose a refresh pulse
    #[error("refresh pulse unsupported")]
    Unsupported,

    #[error("refresh wait failed: {0}")]
    Failed(String),
}

/// Faults absorbed by the projector loop.
///
/// None of these leave the projector thread; each is logged, counted and the
/// loop continues with degraded timing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncFault {
    /// Refresh rate indeterminate, timing cannot be recomputed
    #[error("timing unavailable: {reason}")]
    TimingUnavailable { reason: String },

    #[error("render failed for frame {key}: {source}")]
    RenderFailed {
        key: u64,
        #[source]
        source: RenderError,
    },

    #[error("present failed for frame {key}: {source}")]
    PresentFailed {
        key: u64,
        #[source]
        source: PresentError,
    },

    #[error("refresh wait failed: {source}")]
    RefreshWaitFailed {
        #[source]
        source: RefreshError,
    },

    /// Trigger window expired before it could fire
    #[error("trigger for frame {key} dropped, {late_by_us} us past its window")]
    TriggerDropped { key: u64, late_by_us: i64 },

    /// One camera did not accept its trigger
    #[error("camera '{camera}' rejected trigger for frame {key}")]
    TriggerFailed { key: u64, camera: DeviceId },

    /// A multi-projector barrier point did not resolve within one poll
    #[error("barrier '{point}' stalled on projector '{projector}'")]
    BarrierStall {
        point: &'static str,
        projector: DeviceId,
    },

    /// Cameras did not confirm the end of the batch in time
    #[error("batch end not confirmed by {missing:?} after {waited_ms} ms")]
    BatchEndTimeout {
        missing: Vec<DeviceId>,
        waited_ms: u64,
    },
}

impl SyncFault {
    /// Stable label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            SyncFault::TimingUnavailable { .. } => "timing_unavailable",
            SyncFault::RenderFailed { .. } => "render_failed",
            SyncFault::PresentFailed { .. } => "present_failed",
            SyncFault::RefreshWaitFailed { .. } => "refresh_wait_failed",
            SyncFault::TriggerDropped { .. } => "trigger_dropped",
            SyncFault::TriggerFailed { .. } => "trigger_failed",
            SyncFault::BarrierStall { .. } => "barrier_stall",
            SyncFault::BatchEndTimeout { .. } => "batch_end_timeout",
        }
    }

    /// Create timing unavailable fault
    pub fn timing_unavailable(reason: impl Into<String>) -> Self {
        Self::TimingUnavailable {
            reason: reason.into(),
        }
    }
}

/// Rejected display/delay settings
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("present interval count must be >= 1, got {0}")]
    InvalidPresentIntervals(u32),

    #[error("delay must be a finite, non-negative number of milliseconds, got {0}")]
    InvalidDelay(f64),

    #[error(transparent)]
    Timing(#[from] SyncFault),
}
