//! ProjectorHandle - control API of a running projector thread

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use contracts::{AcquisitionMode, CameraLink, ConfigError, DeviceId, FrameSource, RenderSurface, SurfaceReconfigure};
use event_bus::SignalHub;
use observability::AcquisitionSummary;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::barrier::SyncGroup;
use crate::diagnostics::{ControlMessage, DiagnosticsSnapshot, MessageTrace};
use crate::engine::ProjectorEngine;
use crate::state::{EngineConfig, ProjectorShared, SyncMembership};
use crate::surface::{ReconfigureOutcome, SharedSurface, SurfaceSnapshot};
use crate::timing::{DisplaySettings, TimingBudget};

/// How long [`ProjectorHandle::change_identity`] waits for the projector
/// thread to acknowledge
pub const IDENTITY_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Handle to a running projector thread.
///
/// Cheap to clone; every clone controls the same thread. Control calls only
/// set signals or swap shared settings and return immediately unless they
/// are documented to wait.
#[derive(Clone)]
pub struct ProjectorHandle {
    shared: Arc<ProjectorShared>,
    thread: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for ProjectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectorHandle")
            .field("id", &self.id())
            .field("running", &self.is_running())
            .finish()
    }
}

impl ProjectorHandle {
    /// Spawn the projector thread. It starts idle; call
    /// [`prepare_reconfigure`](Self::prepare_reconfigure) before a batch.
    pub fn spawn(
        config: EngineConfig,
        hub: &Arc<SignalHub>,
        surface: Arc<dyn RenderSurface>,
        source: Arc<dyn FrameSource>,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(ProjectorShared::new(
            &config,
            hub,
            SharedSurface::new(surface),
        ));
        let engine = ProjectorEngine::new(Arc::clone(&shared), source, config.batch_end_timeout);

        let thread = std::thread::Builder::new()
            .name(format!("projector-{}", config.id))
            .spawn(move || engine.run())?;

        info!(projector = %config.id, mode = config.settings.mode.label(), "projector spawned");
        Ok(Self {
            shared,
            thread: Arc::new(Mutex::new(Some(thread))),
        })
    }

    fn trace(&self, message: ControlMessage, wparam: u64, lparam: i64) {
        self.shared
            .diagnostics
            .lock()
            .push_message(MessageTrace::new(message, wparam, lparam));
    }

    pub fn id(&self) -> DeviceId {
        self.shared.id()
    }

    /// Begin acquiring a batch with the current settings
    pub fn start_batch(&self) {
        self.trace(ControlMessage::StartBatch, 0, 0);
        let signals = &self.shared.signals;
        signals.batch_finished.reset();
        signals.begin_batch.set();
    }

    /// Abort whatever is running, drain cameras and decoder, and re-arm.
    /// [`wait_ready`](Self::wait_ready) returns once it completed.
    pub fn prepare_reconfigure(&self) {
        self.trace(ControlMessage::PrepareReconfigure, 0, 0);
        let signals = &self.shared.signals;
        signals.ready.reset();
        signals.prepare.set();
    }

    /// Leave the batch-finished state and start the render-only preview
    pub fn resume_preview(&self) {
        self.trace(ControlMessage::ResumePreview, 0, 0);
        self.shared.signals.resume.set();
    }

    /// Attach a camera. Attaching the same id twice is a no-op.
    pub fn add_camera(&self, camera: Arc<dyn CameraLink>) -> bool {
        let id = camera.id();
        let mut cameras = self.shared.cameras.write();
        if cameras.iter().any(|c| c.id() == id) {
            debug!(projector = %self.id(), camera = %id, "camera already attached");
            return false;
        }
        cameras.push(camera);
        let count = cameras.len();
        drop(cameras);

        self.trace(ControlMessage::AddCamera, count as u64, 0);
        info!(projector = %self.id(), camera = %id, count, "camera attached");
        true
    }

    pub fn remove_camera(&self, id: &DeviceId) -> bool {
        let mut cameras = self.shared.cameras.write();
        let before = cameras.len();
        cameras.retain(|c| &c.id() != id);
        let removed = cameras.len() != before;
        let count = cameras.len();
        drop(cameras);

        self.trace(ControlMessage::RemoveCamera, count as u64, i64::from(removed));
        if removed {
            info!(projector = %self.id(), camera = %id, count, "camera detached");
        }
        removed
    }

    pub fn cameras(&self) -> Vec<DeviceId> {
        self.shared.cameras().iter().map(|c| c.id()).collect()
    }

    /// Synchronize this projector with `peers`.
    ///
    /// Reuses the group any of them already belongs to, otherwise creates
    /// one. Must be called while no batch runs; members must share mode and
    /// display settings.
    pub fn add_sync_peers(&self, peers: &[&ProjectorHandle]) -> Arc<SyncGroup> {
        let existing = std::iter::once(self)
            .chain(peers.iter().copied())
            .find_map(|handle| handle.sync_group());
        let group = existing.unwrap_or_else(|| {
            SyncGroup::new(&self.shared.hub, format!("sync-{}", self.id()))
        });

        self.join_sync_group(&group);
        for peer in peers {
            peer.join_sync_group(&group);
        }
        self.trace(ControlMessage::AddSyncPeers, group.len() as u64, 0);
        group
    }

    /// Join `group`, leaving any other group first
    pub fn join_sync_group(&self, group: &Arc<SyncGroup>) {
        let id = self.id();
        let mut sync = self.shared.sync.write();
        if let Some(current) = sync.as_ref() {
            if Arc::ptr_eq(&current.group, group) {
                return;
            }
            current.group.leave(&id);
        }
        let slot = group.join(id.clone());
        *sync = Some(SyncMembership {
            group: Arc::clone(group),
            slot,
        });
        info!(projector = %id, group = group.name(), slot, members = group.len(), "joined sync group");
    }

    /// Leave the current sync group. `false` if not synchronized.
    pub fn remove_sync_peers(&self) -> bool {
        let Some(membership) = self.shared.sync.write().take() else {
            return false;
        };
        let id = self.id();
        let remaining = membership.group.leave(&id);
        self.trace(ControlMessage::RemoveSyncPeers, remaining as u64, 0);
        info!(projector = %id, group = membership.group.name(), remaining, "left sync group");
        true
    }

    pub fn sync_group(&self) -> Option<Arc<SyncGroup>> {
        self.shared.sync.read().as_ref().map(|m| Arc::clone(&m.group))
    }

    /// Store present duration and trigger delay for the next batch.
    ///
    /// Rejected settings leave the stored ones untouched.
    #[instrument(level = "debug", skip(self), fields(projector = %self.id()))]
    pub fn set_display_and_delay(
        &self,
        present_intervals: u32,
        delay_ms: f64,
    ) -> Result<(), ConfigError> {
        self.trace(
            ControlMessage::SetDisplayAndDelay,
            u64::from(present_intervals),
            delay_ms.round() as i64,
        );
        if present_intervals == 0 {
            return Err(ConfigError::InvalidPresentIntervals(present_intervals));
        }
        if !delay_ms.is_finite() || delay_ms < 0.0 {
            return Err(ConfigError::InvalidDelay(delay_ms));
        }

        let display = DisplaySettings {
            present_intervals,
            delay_ms,
        };
        let budget = TimingBudget::compute(
            self.shared.surface.current_refresh_rate(),
            self.shared.surface.fallback_refresh_rate(),
            display,
            self.shared.max_exposure(),
        )?;
        self.shared.settings.lock().display = display;
        debug!(
            delay_whole_intervals = budget.delay_whole_intervals,
            delay_fraction_ticks = budget.delay_fraction_ticks,
            "display settings stored"
        );
        Ok(())
    }

    /// Mode used from the next batch on
    pub fn set_acquisition_mode(&self, mode: AcquisitionMode) {
        let code = match mode {
            AcquisitionMode::Blocking {
                concurrent_delay: false,
            } => 0,
            AcquisitionMode::Blocking {
                concurrent_delay: true,
            } => 1,
            AcquisitionMode::NonBlocking => 2,
            AcquisitionMode::Fixed => 3,
        };
        self.trace(ControlMessage::SetAcquisitionMode, code, 0);
        self.shared.settings.lock().mode = mode;
    }

    /// Captures per batch in fixed-pattern mode
    pub fn set_fixed_captures(&self, captures: u32) {
        self.shared.settings.lock().fixed_captures = captures.max(1);
    }

    pub fn acquisition_mode(&self) -> AcquisitionMode {
        self.shared.settings.lock().mode
    }

    /// Rename the projector and its decoder. Waits for the projector thread
    /// to apply it; `false` if it did not within [`IDENTITY_ACK_TIMEOUT`].
    pub fn change_identity(&self, projector: DeviceId, decoder: DeviceId) -> bool {
        self.trace(ControlMessage::ChangeIdentity, 0, 0);
        let signals = &self.shared.signals;
        *self.shared.pending_identity.lock() = Some((projector.clone(), decoder));
        signals.identity_ack.reset();
        signals.change_identity.set();

        let applied = signals.identity_ack.wait(Some(IDENTITY_ACK_TIMEOUT));
        if !applied {
            warn!(projector = %projector, "identity change not acknowledged");
        }
        applied
    }

    /// Frames presented in the current batch, and frames captured by every
    /// attached camera
    pub fn get_projected_and_captured_counts(&self) -> (u32, u32) {
        let projected = u32::try_from(self.shared.frames_projected()).unwrap_or(u32::MAX);
        let captured = u32::try_from(self.shared.captured_count()).unwrap_or(u32::MAX);
        (projected, captured)
    }

    /// Wait until a requested prepare completed
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        self.shared.signals.ready.wait(Some(timeout))
    }

    pub fn is_ready(&self) -> bool {
        self.shared.signals.ready.is_set()
    }

    /// Wait until the running batch ended and the display was blanked
    pub fn wait_batch_end(&self, timeout: Duration) -> bool {
        self.shared.signals.batch_finished.wait(Some(timeout))
    }

    /// Apply a resize or fullscreen toggle from the UI thread without
    /// blocking on the projector thread
    pub fn request_surface_reconfigure(&self, request: SurfaceReconfigure) -> ReconfigureOutcome {
        let outcome = self.shared.surface.request_reconfigure(request);
        self.trace(ControlMessage::SurfaceReconfigure, outcome as u64, 0);
        outcome
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.shared.diagnostics.lock().snapshot()
    }

    /// Frame statistics since the last prepare
    pub fn statistics(&self) -> AcquisitionSummary {
        self.shared.statistics.lock().summary()
    }

    pub fn counters(&self) -> SurfaceSnapshot {
        self.shared.surface.counters().snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stop the projector thread and wait for it to exit
    pub fn terminate(&self) {
        self.trace(ControlMessage::Terminate, 0, 0);
        self.shared.signals.terminate.set();

        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                warn!(projector = %self.id(), "projector thread panicked");
            }
        }
        self.remove_sync_peers();
    }
}
