//! Rig orchestrator - builds the simulated rig and drives its batches.
//!
//! Every projector gets a mock surface pulsing at its configured refresh
//! rate and an in-memory pattern source; cameras are mock acquisition
//! threads. Sync groups from the blueprint are joined before the first
//! prepare.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use contracts::{AcquisitionMode, CameraLink, RigBlueprint};
use event_bus::SignalHub;
use mock_devices::{
    MockCamera, MockCameraConfig, MockFrameSource, MockSurface, MockSurfaceConfig, PatternSet,
};
use sync_engine::{EngineConfig, ProjectorHandle};
use tracing::{debug, info, instrument, warn};

use super::stats::{BatchReport, RunStats};
use crate::error::CliError;

/// How long a prepare may take before the run is aborted
const PREPARE_TIMEOUT: Duration = Duration::from_secs(10);

/// Batch wait used when no batch timeout is configured
const UNBOUNDED_BATCH_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Rig run configuration
#[derive(Debug, Clone)]
pub struct RigConfig {
    /// The rig blueprint configuration
    pub blueprint: RigBlueprint,

    /// Batches to acquire
    pub batches: u32,

    /// Mode applied to every projector instead of the configured one
    pub mode_override: Option<AcquisitionMode>,

    /// Per-batch limit (None = wait forever)
    pub batch_timeout: Option<Duration>,

    /// Preview between batches
    pub preview: Duration,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

struct ProjectorSlot {
    handle: ProjectorHandle,
    surface: Arc<MockSurface>,
    cameras: Vec<Arc<MockCamera>>,
}

/// Simulated rig
pub struct Rig {
    config: RigConfig,
    projectors: Vec<ProjectorSlot>,
}

impl Rig {
    /// Spawn every device of the blueprint
    pub fn build(config: RigConfig) -> Result<Self, CliError> {
        let hub = SignalHub::new();
        let blueprint = &config.blueprint;
        let mut projectors = Vec::with_capacity(blueprint.projectors.len());

        for projector in &blueprint.projectors {
            let mut engine = EngineConfig::from_blueprint(projector, &blueprint.rig);
            if let Some(mode) = config.mode_override {
                engine = engine.with_mode(mode);
            }

            let surface = Arc::new(MockSurface::new(MockSurfaceConfig::from_projector(
                projector,
            )));
            let source = Arc::new(MockFrameSource::new(
                format!("{}-decoder", projector.id),
                PatternSet::from_config(&projector.patterns),
            ));
            let handle = ProjectorHandle::spawn(engine, &hub, surface.clone(), source)
                .map_err(|e| CliError::spawn(format!("projector '{}'", projector.id), e))?;

            handle
                .set_display_and_delay(projector.present_intervals, projector.delay_ms)
                .map_err(|source| CliError::DisplaySettings {
                    projector: projector.id.clone(),
                    source,
                })?;

            let mut cameras = Vec::new();
            for camera in blueprint.cameras.iter().filter(|c| c.projector == projector.id) {
                let mock = MockCamera::spawn(MockCameraConfig::from_config(camera), &hub)
                    .map_err(|e| CliError::spawn(format!("camera '{}'", camera.id), e))?;
                handle.add_camera(mock.clone() as Arc<dyn CameraLink>);
                cameras.push(mock);
            }

            info!(
                projector = %projector.id,
                refresh_hz = projector.refresh_hz,
                cameras = cameras.len(),
                patterns = projector.patterns.count,
                "projector configured"
            );
            projectors.push(ProjectorSlot {
                handle,
                surface,
                cameras,
            });
        }

        let rig = Self { config, projectors };
        rig.join_sync_groups();
        Ok(rig)
    }

    fn find(&self, id: &str) -> Option<&ProjectorSlot> {
        self.projectors.iter().find(|p| p.handle.id().as_str() == id)
    }

    fn join_sync_groups(&self) {
        for group in &self.config.blueprint.sync_groups {
            let members: Vec<&ProjectorHandle> = group
                .members
                .iter()
                .filter_map(|id| self.find(id).map(|slot| &slot.handle))
                .collect();
            let Some((first, peers)) = members.split_first() else {
                continue;
            };

            let modes: Vec<AcquisitionMode> = members.iter().map(|h| h.acquisition_mode()).collect();
            if modes.windows(2).any(|w| w[0] != w[1]) {
                warn!(group = %group.name, "sync group members use different acquisition modes");
            }
            let joined = first.add_sync_peers(peers);
            info!(group = %group.name, members = joined.len(), "sync group formed");
        }
    }

    /// Acquire every batch, then shut the rig down
    pub fn run(self) -> Result<RunStats, CliError> {
        let start = Instant::now();

        if let Some(port) = self.config.metrics_port {
            match observability::init_metrics_only(port) {
                Ok(()) => info!("Metrics endpoint available on port {}", port),
                Err(e) => warn!(error = %e, "Metrics endpoint not started"),
            }
        }

        let mut stats = RunStats::default();
        let result = (1..=self.config.batches).try_for_each(|batch| {
            let reports = self.run_batch(batch)?;
            stats.batches.extend(reports);
            if !self.config.preview.is_zero() && batch < self.config.batches {
                self.preview();
            }
            Ok::<(), CliError>(())
        });

        for slot in &self.projectors {
            stats.summaries.push((slot.handle.id().to_string(), slot.handle.statistics()));
            stats.surface_presents += slot.surface.calls().presents;
        }
        self.shutdown();
        stats.duration = start.elapsed();
        result.map(|()| stats)
    }

    #[instrument(level = "info", skip(self))]
    fn run_batch(&self, batch: u32) -> Result<Vec<BatchReport>, CliError> {
        for slot in &self.projectors {
            slot.handle.prepare_reconfigure();
        }
        for slot in &self.projectors {
            if !slot.handle.wait_ready(PREPARE_TIMEOUT) {
                return Err(CliError::NotReady {
                    projector: slot.handle.id().to_string(),
                    waited_ms: PREPARE_TIMEOUT.as_millis() as u64,
                });
            }
        }

        let started = Instant::now();
        for slot in &self.projectors {
            slot.handle.start_batch();
        }

        let timeout = self.config.batch_timeout.unwrap_or(UNBOUNDED_BATCH_WAIT);
        let mut reports = Vec::with_capacity(self.projectors.len());
        for slot in &self.projectors {
            let remaining = timeout.saturating_sub(started.elapsed());
            if !slot.handle.wait_batch_end(remaining) {
                for other in &self.projectors {
                    other.handle.prepare_reconfigure();
                }
                return Err(CliError::BatchTimeout {
                    batch,
                    projector: slot.handle.id().to_string(),
                });
            }
            let (projected, captured) = slot.handle.get_projected_and_captured_counts();
            let report = BatchReport {
                batch,
                projector: slot.handle.id().to_string(),
                projected,
                captured,
                duration: started.elapsed(),
                dropped_keys: missing_keys(&slot.cameras, projected),
            };
            debug!(?report, "batch report");
            reports.push(report);
        }
        Ok(reports)
    }

    fn preview(&self) {
        for slot in &self.projectors {
            slot.handle.resume_preview();
        }
        thread::sleep(self.config.preview);
    }

    fn shutdown(&self) {
        for slot in &self.projectors {
            slot.handle.terminate();
        }
        for slot in &self.projectors {
            for camera in &slot.cameras {
                camera.shutdown();
            }
        }
        info!("rig shut down");
    }
}

/// Keys below `projected` that no camera of the projector captured
fn missing_keys(cameras: &[Arc<MockCamera>], projected: u32) -> usize {
    cameras
        .iter()
        .map(|camera| {
            let captured = camera.captured_keys();
            (0..u64::from(projected))
                .filter(|key| !captured.contains(key))
                .count()
        })
        .max()
        .unwrap_or(0)
}
