//! # Sync Engine
//!
//! Projector-camera synchronization for structured-light acquisition.
//!
//! Each projector runs its own thread that renders pattern frames, presents
//! them on refresh pulses and fires camera triggers inside the window in which
//! the presented image is stable. Projectors in a [`SyncGroup`] meet at
//! barrier points so they present and trigger in lock-step.
//!
//! Responsibilities:
//! - Timing budget from refresh rate, present duration and trigger delay
//! - Blocking, concurrent-delay, non-blocking and fixed-pattern acquisition
//! - Trigger schedule with drop-on-expiry for non-blocking acquisition
//! - Multi-projector barriers with present/refresh counter comparison
//! - Batch lifecycle: prepare, begin, end confirmation, preview
//!
//! ## Usage
//!
//! ```ignore
//! use sync_engine::{EngineConfig, ProjectorHandle};
//!
//! let hub = event_bus::SignalHub::new();
//! let projector = ProjectorHandle::spawn(
//!     EngineConfig::new("prj-0").with_display(4, 45.0),
//!     &hub,
//!     surface,
//!     source,
//! )?;
//! projector.add_camera(camera);
//!
//! projector.prepare_reconfigure();
//! projector.wait_ready(Duration::from_secs(5));
//! projector.start_batch();
//! projector.wait_batch_end(Duration::from_secs(30));
//!
//! let (projected, captured) = projector.get_projected_and_captured_counts();
//! projector.terminate();
//! ```

mod barrier;
pub mod clock;
mod diagnostics;
mod engine;
mod handle;
mod schedule;
mod state;
mod surface;
mod timing;
pub mod transition;

pub use barrier::{BarrierPoint, CrossOutcome, SyncGroup, STALL_BACKOFF};
pub use diagnostics::{
    ControlMessage, Diagnostics, DiagnosticsSnapshot, EventTrace, MessageTrace,
    DEFAULT_TRACE_CAPACITY,
};
pub use engine::EARLY_TRIGGER_SPIN;
pub use handle::{ProjectorHandle, IDENTITY_ACK_TIMEOUT};
pub use schedule::{open_entry, ScheduleError, TriggerQueue, TriggerWindow};
pub use state::{ControlSignals, EngineConfig, EngineSettings, SyncMembership};
pub use surface::{
    ReconfigureOutcome, SharedSurface, SurfaceCounters, SurfaceSnapshot, SurfaceStep,
};
pub use timing::{DisplaySettings, TimingBudget};
pub use transition::{AfterCapture, EngineEvent, Step};
