//! Projector runtime state shared between the control handle and the
//! projector thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contracts::{AcquisitionMode, CameraLink, DeviceId, ProjectorConfig, RigSettings};
use event_bus::{Signal, SignalHub};
use observability::AcquisitionAggregator;
use parking_lot::{Mutex, RwLock};

use crate::barrier::SyncGroup;
use crate::diagnostics::{Diagnostics, DEFAULT_TRACE_CAPACITY};
use crate::surface::SharedSurface;
use crate::timing::DisplaySettings;

/// Settings applied by the projector thread at prepare and batch begin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub display: DisplaySettings,
    pub mode: AcquisitionMode,
    /// Captures per batch in fixed-pattern mode
    pub fixed_captures: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            display: DisplaySettings::default(),
            mode: AcquisitionMode::default(),
            fixed_captures: 1,
        }
    }
}

/// Static configuration of one projector engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub id: DeviceId,
    pub settings: EngineSettings,
    /// Ceiling on the wait for cameras to confirm batch end
    pub batch_end_timeout: Duration,
    /// Capacity of each diagnostic ring
    pub trace_capacity: usize,
}

impl EngineConfig {
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            settings: EngineSettings::default(),
            batch_end_timeout: Duration::from_secs(15),
            trace_capacity: DEFAULT_TRACE_CAPACITY,
        }
    }

    /// Engine configuration for a blueprint projector
    pub fn from_blueprint(projector: &ProjectorConfig, rig: &RigSettings) -> Self {
        Self {
            id: DeviceId::from(projector.id.as_str()),
            settings: EngineSettings {
                display: DisplaySettings {
                    present_intervals: projector.present_intervals,
                    delay_ms: projector.delay_ms,
                },
                mode: projector.mode,
                fixed_captures: projector.fixed_captures,
            },
            batch_end_timeout: Duration::from_millis(rig.batch_end_timeout_ms),
            trace_capacity: DEFAULT_TRACE_CAPACITY,
        }
    }

    pub fn with_mode(mut self, mode: AcquisitionMode) -> Self {
        self.settings.mode = mode;
        self
    }

    pub fn with_display(mut self, present_intervals: u32, delay_ms: f64) -> Self {
        self.settings.display = DisplaySettings {
            present_intervals,
            delay_ms,
        };
        self
    }

    pub fn with_batch_end_timeout(mut self, timeout: Duration) -> Self {
        self.batch_end_timeout = timeout;
        self
    }
}

/// Control signals of one projector
#[derive(Debug, Clone)]
pub struct ControlSignals {
    pub terminate: Signal,
    pub prepare: Signal,
    pub begin_batch: Signal,
    pub resume: Signal,
    pub change_identity: Signal,
    /// Set once prepare completed
    pub ready: Signal,
    /// Set once the batch ended and the display is blank
    pub batch_finished: Signal,
    pub identity_ack: Signal,
}

impl ControlSignals {
    pub fn new(hub: &Arc<SignalHub>, id: &DeviceId) -> Self {
        let named = |name: &str| hub.signal(format!("{id}/{name}"));
        Self {
            terminate: named("terminate"),
            prepare: named("prepare"),
            begin_batch: named("begin-batch"),
            resume: named("resume"),
            change_identity: named("change-identity"),
            ready: named("ready"),
            batch_finished: named("batch-finished"),
            identity_ack: named("identity-ack"),
        }
    }

    /// Signals that end any wait of the projector thread
    pub fn cancel_set(&self) -> [&Signal; 2] {
        [&self.terminate, &self.prepare]
    }

    /// Signals the idle loop reacts to, in priority order
    pub fn control_set(&self) -> [&Signal; 5] {
        [
            &self.terminate,
            &self.prepare,
            &self.change_identity,
            &self.begin_batch,
            &self.resume,
        ]
    }
}

/// Membership of a projector in a sync group
#[derive(Debug, Clone)]
pub struct SyncMembership {
    pub group: Arc<SyncGroup>,
    pub slot: usize,
}

/// State shared by [`crate::ProjectorHandle`] and the projector thread
pub(crate) struct ProjectorShared {
    pub hub: Arc<SignalHub>,
    pub signals: ControlSignals,
    pub id: RwLock<DeviceId>,
    pub surface: SharedSurface,
    /// Attached cameras, in attachment order
    pub cameras: RwLock<Vec<Arc<dyn CameraLink>>>,
    pub sync: RwLock<Option<SyncMembership>>,
    pub settings: Mutex<EngineSettings>,
    pub pending_identity: Mutex<Option<(DeviceId, DeviceId)>>,
    pub diagnostics: Mutex<Diagnostics>,
    pub statistics: Mutex<AcquisitionAggregator>,
    pub frames_projected: AtomicU64,
    pub running: AtomicBool,
}

impl ProjectorShared {
    pub fn new(
        config: &EngineConfig,
        hub: &Arc<SignalHub>,
        surface: SharedSurface,
    ) -> Self {
        Self {
            hub: Arc::clone(hub),
            signals: ControlSignals::new(hub, &config.id),
            id: RwLock::new(config.id.clone()),
            surface,
            cameras: RwLock::new(Vec::new()),
            sync: RwLock::new(None),
            settings: Mutex::new(config.settings),
            pending_identity: Mutex::new(None),
            diagnostics: Mutex::new(Diagnostics::new(config.trace_capacity)),
            statistics: Mutex::new(AcquisitionAggregator::new()),
            frames_projected: AtomicU64::new(0),
            running: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id.read().clone()
    }

    /// Snapshot of the attached cameras
    pub fn cameras(&self) -> Vec<Arc<dyn CameraLink>> {
        self.cameras.read().clone()
    }

    /// Longest exposure among attached cameras
    pub fn max_exposure(&self) -> Duration {
        self.cameras
            .read()
            .iter()
            .map(|camera| camera.exposure())
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Frames fully captured by every attached camera
    pub fn captured_count(&self) -> u64 {
        self.cameras
            .read()
            .iter()
            .map(|camera| camera.captured_count())
            .min()
            .unwrap_or(0)
    }

    pub fn frames_projected(&self) -> u64 {
        self.frames_projected.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{PatternSetConfig, PixelFormat};

    #[test]
    fn test_config_from_blueprint() {
        let projector = ProjectorConfig {
            id: "prj".into(),
            refresh_hz: 120.0,
            present_intervals: 4,
            delay_ms: 45.0,
            mode: AcquisitionMode::NonBlocking,
            fixed_captures: 3,
            patterns: PatternSetConfig {
                count: 2,
                width: 4,
                height: 4,
                format: PixelFormat::Gray8,
            },
        };
        let rig = RigSettings {
            name: "bench".into(),
            batch_end_timeout_ms: 500,
            batches: 1,
        };

        let config = EngineConfig::from_blueprint(&projector, &rig);
        assert_eq!(config.id.as_str(), "prj");
        assert_eq!(config.settings.display.present_intervals, 4);
        assert_eq!(config.settings.fixed_captures, 3);
        assert_eq!(config.batch_end_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_control_signal_names() {
        let hub = SignalHub::new();
        let signals = ControlSignals::new(&hub, &"p0".into());
        assert_eq!(signals.terminate.name(), "p0/terminate");
        assert!(signals.control_set()[1].same_as(&signals.prepare));
    }
}
