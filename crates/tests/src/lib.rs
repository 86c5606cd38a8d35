//! # Integration Tests
//!
//! End-to-end tests of the projector engine against simulated devices.
//!
//! Covers:
//! - Contract snapshot checks
//! - Configuration driven rigs
//! - Blocking, concurrent-delay, fixed and non-blocking batches
//! - Sync groups, cancellation, identity changes and preview

#[cfg(test)]
mod contract_tests {
    use contracts::{AcquisitionMode, ConfigVersion, DeviceId, FrameRecord};

    #[test]
    fn test_contracts_compile() {
        let _ = ConfigVersion::V1;
        assert_eq!(
            AcquisitionMode::default(),
            AcquisitionMode::Blocking {
                concurrent_delay: false
            }
        );
    }

    #[test]
    fn test_rekeyed_record_keeps_timing() {
        let mut record = FrameRecord::new(0, DeviceId::from("prj"));
        record.present_counter = 4;
        record.timing.presented = Some(1_000);

        let copy = record.rekeyed(7);
        assert_eq!(copy.key, 7);
        assert_eq!(copy.present_counter, 4);
        assert_eq!(copy.timing.presented, Some(1_000));
    }
}

/// Simulated single-projector rig shared by the end-to-end tests
#[cfg(test)]
mod bench {
    use std::sync::Arc;
    use std::time::Duration;

    use contracts::{CameraLink, DeviceId};
    use event_bus::SignalHub;
    use mock_devices::{MockCamera, MockCameraConfig, MockFrameSource, MockSurface, PatternSet};
    use sync_engine::{EngineConfig, ProjectorHandle};

    pub const WAIT: Duration = Duration::from_secs(10);

    pub struct Bench {
        pub hub: Arc<SignalHub>,
        pub handle: ProjectorHandle,
        pub surface: Arc<MockSurface>,
        pub source: Arc<MockFrameSource>,
        pub cameras: Vec<Arc<MockCamera>>,
    }

    impl Bench {
        pub fn new(config: EngineConfig, patterns: u64) -> Self {
            Self::with_hub(SignalHub::new(), config, patterns)
        }

        pub fn with_hub(hub: Arc<SignalHub>, config: EngineConfig, patterns: u64) -> Self {
            Self::with_surface(hub, config, patterns, MockSurface::with_hz(120))
        }

        pub fn with_surface(
            hub: Arc<SignalHub>,
            config: EngineConfig,
            patterns: u64,
            surface: MockSurface,
        ) -> Self {
            let surface = Arc::new(surface);
            let source = Arc::new(MockFrameSource::new(
                format!("{}-decoder", config.id),
                PatternSet::new(patterns, 16, 8),
            ));
            let handle = ProjectorHandle::spawn(config, &hub, surface.clone(), source.clone())
                .expect("spawn projector");
            Self {
                hub,
                handle,
                surface,
                source,
                cameras: Vec::new(),
            }
        }

        pub fn camera(&mut self, id: &str, exposure_ms: u64) -> Arc<MockCamera> {
            self.camera_with(MockCameraConfig::new(id, Duration::from_millis(exposure_ms)))
        }

        pub fn camera_with(&mut self, config: MockCameraConfig) -> Arc<MockCamera> {
            let camera = MockCamera::spawn(config, &self.hub).expect("spawn camera");
            assert!(self.handle.add_camera(camera.clone() as Arc<dyn CameraLink>));
            self.cameras.push(camera.clone());
            camera
        }

        pub fn prepare(&self) {
            self.handle.prepare_reconfigure();
            assert!(self.handle.wait_ready(WAIT), "prepare did not complete");
        }

        /// Prepare, run one batch and wait for its end
        pub fn run_batch(&self) {
            self.prepare();
            self.handle.start_batch();
            assert!(self.handle.wait_batch_end(WAIT), "batch did not finish");
        }

        pub fn id(&self) -> DeviceId {
            self.handle.id()
        }
    }

    impl Drop for Bench {
        fn drop(&mut self) {
            self.handle.terminate();
            for camera in &self.cameras {
                camera.shutdown();
            }
        }
    }

    /// Keys `0..n` in order
    pub fn gap_free(n: u64) -> Vec<u64> {
        (0..n).collect()
    }
}

#[cfg(test)]
mod config_tests {
    use std::sync::Arc;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{AcquisitionMode, CameraLink};
    use event_bus::SignalHub;
    use mock_devices::{MockCamera, MockCameraConfig, MockFrameSource, MockSurface, MockSurfaceConfig, PatternSet};
    use sync_engine::{EngineConfig, ProjectorHandle};

    use crate::bench::{gap_free, WAIT};

    const RIG: &str = r#"
[rig]
name = "bench"
batch_end_timeout_ms = 2000

[[projectors]]
id = "left"
refresh_hz = 120.0
present_intervals = 1
delay_ms = 4.0
mode = { kind = "blocking", concurrent_delay = true }
patterns = { count = 6, width = 32, height = 16 }

[[cameras]]
id = "cam-left"
projector = "left"
exposure_ms = 3.0
readout_ms = 1.0
"#;

    #[test]
    fn test_blueprint_driven_batch() {
        let blueprint = ConfigLoader::load_from_str(RIG, ConfigFormat::Toml).unwrap();
        let projector = &blueprint.projectors[0];
        assert_eq!(
            projector.mode,
            AcquisitionMode::Blocking {
                concurrent_delay: true
            }
        );

        let hub = SignalHub::new();
        let surface = Arc::new(MockSurface::new(MockSurfaceConfig::from_projector(projector)));
        let source = Arc::new(MockFrameSource::new(
            "left-decoder",
            PatternSet::from_config(&projector.patterns),
        ));
        let handle = ProjectorHandle::spawn(
            EngineConfig::from_blueprint(projector, &blueprint.rig),
            &hub,
            surface.clone(),
            source.clone(),
        )
        .unwrap();
        let camera = MockCamera::spawn(MockCameraConfig::from_config(&blueprint.cameras[0]), &hub).unwrap();
        handle.add_camera(camera.clone() as Arc<dyn CameraLink>);

        handle.prepare_reconfigure();
        assert!(handle.wait_ready(WAIT));
        handle.start_batch();
        assert!(handle.wait_batch_end(WAIT));

        assert_eq!(camera.captured_keys(), gap_free(6));
        assert_eq!(handle.get_projected_and_captured_counts(), (6, 6));
        assert_eq!(source.fetched(), 6);

        handle.terminate();
        camera.shutdown();
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashSet;
    use std::thread;
    use std::time::{Duration, Instant};

    use contracts::{
        AcquisitionMode, ConfigError, DeviceId, FrameSource, RationalRate, SurfaceReconfigure,
    };
    use event_bus::SignalHub;
    use mock_devices::{MockCameraConfig, MockSurface, MockSurfaceConfig};
    use sync_engine::clock::instant_to_ticks;
    use sync_engine::{EngineConfig, EngineEvent, ReconfigureOutcome};

    use crate::bench::{gap_free, Bench, WAIT};

    #[test]
    fn test_blocking_batch_triggers_every_frame() {
        let mut bench = Bench::new(EngineConfig::new("prj").with_display(1, 5.0), 8);
        let cam_a = bench.camera("cam-a", 2);
        let cam_b = bench.camera("cam-b", 3);

        bench.run_batch();

        for camera in [&cam_a, &cam_b] {
            assert_eq!(camera.captured_keys(), gap_free(8));
            assert_eq!(camera.rejected_triggers(), 0);
            for capture in camera.captures() {
                let record = capture.record.expect("record delivered before trigger");
                assert_eq!(record.key, capture.key);
                assert_eq!(record.projector_id, bench.id());
                assert!(record.flags.is_batch && record.flags.is_blocking_mode);
                let earliest = record.timing.earliest_trigger.expect("presented");
                assert!(
                    instant_to_ticks(capture.triggered_at) >= earliest,
                    "key {} triggered before the presentation delay elapsed",
                    capture.key
                );
            }
        }
        let last = cam_a.captures().last().and_then(|c| c.record.clone()).unwrap();
        assert!(last.flags.is_last_frame);

        assert_eq!(bench.handle.get_projected_and_captured_counts(), (8, 8));
        let stats = bench.handle.statistics();
        assert_eq!(stats.triggers_fired, 16);
        assert_eq!(stats.faults, 0);
        assert_eq!(bench.surface.on_screen(), None, "display blanked at batch end");
    }

    #[test]
    fn test_present_counters_increase() {
        let mut bench = Bench::new(EngineConfig::new("prj"), 5);
        let camera = bench.camera("cam", 1);

        bench.run_batch();

        let records: Vec<_> = camera.captures().into_iter().filter_map(|c| c.record).collect();
        assert_eq!(records.len(), 5);
        for pair in records.windows(2) {
            assert!(pair[1].present_counter > pair[0].present_counter);
            assert!(pair[1].refresh_counter >= pair[0].refresh_counter);
            assert!(pair[1].render_counter > pair[0].render_counter);
        }
    }

    #[test]
    fn test_concurrent_delay_batch() {
        let config = EngineConfig::new("prj")
            .with_mode(AcquisitionMode::Blocking {
                concurrent_delay: true,
            })
            .with_display(2, 12.0);
        let mut bench = Bench::new(config, 6);
        let camera = bench.camera("cam", 2);

        bench.run_batch();

        assert_eq!(camera.captured_keys(), gap_free(6));
        for capture in camera.captures() {
            let record = capture.record.unwrap();
            let earliest = record.timing.earliest_trigger.unwrap();
            assert!(instant_to_ticks(capture.triggered_at) >= earliest);
        }
        assert_eq!(bench.handle.get_projected_and_captured_counts(), (6, 6));
    }

    #[test]
    fn test_fixed_pattern_captures_one_frame_repeatedly() {
        let mut bench = Bench::new(EngineConfig::new("prj").with_mode(AcquisitionMode::Fixed), 4);
        let camera = bench.camera("cam", 1);
        bench.handle.set_fixed_captures(5);

        bench.run_batch();

        assert_eq!(camera.captured_keys(), gap_free(5));
        let patterns: HashSet<_> = camera
            .captures()
            .into_iter()
            .map(|c| c.record.and_then(|r| r.pattern).map(|p| p.index))
            .collect();
        assert_eq!(patterns, HashSet::from([Some(0)]));
        assert!(camera.template().is_some_and(|t| t.flags.is_fixed_pattern));
        assert_eq!(bench.handle.get_projected_and_captured_counts(), (1, 5));
    }

    #[test]
    fn test_non_blocking_triggers_inside_window() {
        let config = EngineConfig::new("prj")
            .with_mode(AcquisitionMode::NonBlocking)
            .with_display(3, 0.0);
        let mut bench = Bench::new(config, 12);
        let camera = bench.camera_with(
            MockCameraConfig::new("cam", Duration::from_millis(2))
                .with_readout(Duration::from_millis(1)),
        );

        bench.run_batch();

        let captures = camera.captures();
        assert!(!captures.is_empty(), "no trigger fired");
        let slack = 1_000_000;
        for capture in &captures {
            let record = capture.record.as_ref().expect("record for triggered key");
            let fired = instant_to_ticks(capture.triggered_at);
            let earliest = record.timing.earliest_trigger.unwrap();
            let latest = record.timing.latest_trigger.unwrap();
            assert!(fired >= earliest, "key {} fired early", capture.key);
            assert!(fired <= latest + slack, "key {} fired late", capture.key);
        }
        let keys = camera.captured_keys();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));

        let (projected, _) = bench.handle.get_projected_and_captured_counts();
        assert_eq!(projected, 12);
        let stats = bench.handle.statistics();
        assert!(stats.triggers_fired + stats.triggers_dropped <= u64::from(projected));
    }

    #[test]
    fn test_batch_without_cameras_only_projects() {
        let bench = Bench::new(EngineConfig::new("prj"), 5);
        bench.run_batch();

        assert_eq!(bench.handle.get_projected_and_captured_counts(), (5, 0));
        assert_eq!(bench.surface.calls().presents, 5);
    }

    #[test]
    fn test_sync_group_batch() {
        let hub = SignalHub::new();
        let mut left = Bench::with_hub(hub.clone(), EngineConfig::new("left"), 6);
        let mut right = Bench::with_hub(hub.clone(), EngineConfig::new("right"), 6);
        let cam_left = left.camera("cam-left", 2);
        let cam_right = right.camera("cam-right", 2);

        let group = left.handle.add_sync_peers(&[&right.handle]);
        assert_eq!(group.len(), 2);
        assert!(right.handle.sync_group().is_some());

        left.prepare();
        right.prepare();
        left.handle.start_batch();
        right.handle.start_batch();
        assert!(left.handle.wait_batch_end(WAIT));
        assert!(right.handle.wait_batch_end(WAIT));

        assert_eq!(cam_left.captured_keys(), gap_free(6));
        assert_eq!(cam_right.captured_keys(), gap_free(6));
        assert_eq!(left.surface.calls().presents, right.surface.calls().presents);

        assert!(right.handle.remove_sync_peers());
        assert_eq!(group.len(), 1);
        assert!(!right.handle.remove_sync_peers());
    }

    #[test]
    fn test_prepare_cancels_pending_triggers() {
        let mut bench = Bench::new(EngineConfig::new("prj").with_display(1, 300.0), 4);
        let camera = bench.camera("cam", 1);

        bench.prepare();
        bench.handle.start_batch();
        thread::sleep(Duration::from_millis(60));

        bench.prepare();
        thread::sleep(Duration::from_millis(400));

        assert!(camera.captures().is_empty(), "trigger fired after prepare");
        assert_eq!(camera.rejected_triggers(), 0);
        assert!(bench
            .handle
            .diagnostics()
            .events
            .iter()
            .any(|e| e.event == EngineEvent::PrepareReconfigure));
    }

    #[test]
    fn test_silent_camera_batch_still_ends() {
        let config = EngineConfig::new("prj").with_batch_end_timeout(Duration::from_millis(100));
        let mut bench = Bench::new(config, 3);
        let camera = bench.camera_with(
            MockCameraConfig::new("cam", Duration::from_millis(1)).silent_on_batch_end(),
        );

        bench.run_batch();

        assert_eq!(camera.captured_keys(), gap_free(3));
        assert!(bench.handle.statistics().faults >= 1);
    }

    /// Poll `condition` until it holds or [`WAIT`] elapses
    fn eventually(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_prepare_interrupts_batch_end_confirmation() {
        let config = EngineConfig::new("prj").with_batch_end_timeout(Duration::from_secs(5));
        let mut bench = Bench::new(config, 3);
        let camera = bench.camera_with(
            MockCameraConfig::new("cam", Duration::from_millis(1)).silent_on_batch_end(),
        );

        bench.prepare();
        bench.handle.start_batch();
        assert!(eventually(|| camera.captures().len() == 3));
        thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        bench.handle.prepare_reconfigure();
        assert!(bench.handle.wait_ready(WAIT));
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "prepare waited for the batch end timeout: {:?}",
            started.elapsed()
        );
        assert!(!bench.handle.wait_batch_end(Duration::ZERO));
        assert!(camera.captures().is_empty());
    }

    #[test]
    fn test_prepare_interrupts_capture_wait() {
        let mut bench = Bench::new(EngineConfig::new("prj").with_display(1, 0.0), 4);
        let camera = bench.camera_with(
            MockCameraConfig::new("cam", Duration::from_millis(1)).stall_after_trigger(),
        );

        bench.prepare();
        bench.handle.start_batch();
        assert!(eventually(|| camera.captures().len() == 1));
        thread::sleep(Duration::from_millis(50));
        assert!(!bench.handle.wait_batch_end(Duration::ZERO));

        let started = Instant::now();
        bench.handle.prepare_reconfigure();
        assert!(bench.handle.wait_ready(WAIT));
        assert!(started.elapsed() < Duration::from_secs(1));

        thread::sleep(Duration::from_millis(200));
        assert!(camera.captures().is_empty(), "trigger fired after prepare");
        assert_eq!(camera.rejected_triggers(), 0);
        assert!(bench
            .handle
            .diagnostics()
            .events
            .iter()
            .any(|e| e.event == EngineEvent::PrepareReconfigure));
    }

    #[test]
    fn test_preview_survives_failing_presents() {
        let surface = MockSurface::new(MockSurfaceConfig {
            failing_presents: (1..=5).collect(),
            ..Default::default()
        });
        let bench = Bench::with_surface(SignalHub::new(), EngineConfig::new("prj"), 0, surface);
        bench.prepare();

        bench.handle.resume_preview();
        assert!(eventually(|| bench.surface.calls().presents > 10));
        assert!(bench.handle.is_running());
        assert_eq!(bench.handle.statistics().faults, 0);
    }

    #[test]
    fn test_change_identity() {
        let mut bench = Bench::new(EngineConfig::new("prj-a"), 3);
        let camera = bench.camera("cam", 1);

        assert!(bench
            .handle
            .change_identity(DeviceId::from("prj-b"), DeviceId::from("dec-b")));
        assert_eq!(bench.handle.id(), DeviceId::from("prj-b"));
        assert_eq!(bench.source.id(), DeviceId::from("dec-b"));

        bench.run_batch();
        assert!(camera
            .captures()
            .iter()
            .all(|c| c.record.as_ref().is_some_and(|r| r.projector_id == DeviceId::from("prj-b"))));

        // Serviced while the finished batch waits for resume
        assert!(bench
            .handle
            .change_identity(DeviceId::from("prj-c"), DeviceId::from("dec-c")));
        assert_eq!(bench.handle.id(), DeviceId::from("prj-c"));
        assert_eq!(bench.source.id(), DeviceId::from("dec-c"));
    }

    #[test]
    fn test_resume_starts_preview_with_default_mode() {
        let mut bench = Bench::new(EngineConfig::new("prj").with_mode(AcquisitionMode::Fixed), 3);
        let camera = bench.camera("cam", 1);
        bench.handle.set_fixed_captures(2);

        bench.run_batch();
        assert_eq!(camera.captured_keys(), gap_free(2));
        let presents = bench.surface.calls().presents;

        bench.handle.resume_preview();
        thread::sleep(Duration::from_millis(150));

        assert!(bench.surface.calls().presents > presents + 3);
        assert_eq!(bench.handle.acquisition_mode(), AcquisitionMode::default());
        assert_eq!(camera.captured_keys(), gap_free(2), "preview does not trigger");
    }

    #[test]
    fn test_set_display_and_delay_rejects_bad_settings() {
        let bench = Bench::new(EngineConfig::new("prj"), 1);

        assert!(matches!(
            bench.handle.set_display_and_delay(0, 5.0),
            Err(ConfigError::InvalidPresentIntervals(0))
        ));
        assert!(matches!(
            bench.handle.set_display_and_delay(1, -1.0),
            Err(ConfigError::InvalidDelay(_))
        ));
        assert!(matches!(
            bench.handle.set_display_and_delay(1, f64::NAN),
            Err(ConfigError::InvalidDelay(_))
        ));
        assert!(bench.handle.set_display_and_delay(2, 10.0).is_ok());
    }

    #[test]
    fn test_set_display_and_delay_without_refresh_rate() {
        let surface = MockSurface::new(MockSurfaceConfig {
            refresh_rate: RationalRate::new(0, 1),
            ..Default::default()
        });
        let bench = Bench::with_surface(SignalHub::new(), EngineConfig::new("prj"), 1, surface);

        assert!(matches!(
            bench.handle.set_display_and_delay(1, 5.0),
            Err(ConfigError::Timing(_))
        ));
    }

    #[test]
    fn test_surface_reconfigure_while_idle() {
        let bench = Bench::new(EngineConfig::new("prj"), 1);
        bench.prepare();

        assert_eq!(
            bench
                .handle
                .request_surface_reconfigure(SurfaceReconfigure::Resize {
                    width: 640,
                    height: 480
                }),
            ReconfigureOutcome::Applied
        );
        assert_eq!(bench.surface.size(), (640, 480));
        assert_eq!(
            bench
                .handle
                .request_surface_reconfigure(SurfaceReconfigure::Resize {
                    width: 0,
                    height: 480
                }),
            ReconfigureOutcome::Failed
        );
    }

    #[test]
    fn test_camera_membership() {
        let mut bench = Bench::new(EngineConfig::new("prj"), 1);
        let camera = bench.camera("cam", 1);

        assert!(!bench.handle.add_camera(camera.clone()));
        assert_eq!(bench.handle.cameras(), vec![DeviceId::from("cam")]);
        assert!(bench.handle.remove_camera(&DeviceId::from("cam")));
        assert!(!bench.handle.remove_camera(&DeviceId::from("cam")));
        assert!(bench.handle.cameras().is_empty());
    }

    #[test]
    fn test_terminate_stops_thread() {
        let bench = Bench::new(EngineConfig::new("prj"), 2);
        bench.prepare();
        assert!(bench.handle.is_running());

        bench.handle.terminate();
        assert!(!bench.handle.is_running());
    }
}
