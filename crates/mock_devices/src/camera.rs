//! Mock camera
//!
//! Each camera owns an acquisition thread. A trigger resets the ready signal;
//! the thread sleeps for exposure plus readout, records the capture against
//! the matching frame record and sets ready again.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use contracts::{CameraConfig, CameraLink, DeviceId, FrameRecord};
use event_bus::{Signal, SignalHub, WaitOutcome};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

/// Mock camera configuration
#[derive(Debug, Clone)]
pub struct MockCameraConfig {
    pub id: DeviceId,
    pub exposure: Duration,
    /// Sensor readout after exposure
    pub readout: Duration,
    /// Never confirm batch end (simulates a hung camera)
    pub silent_on_batch_end: bool,
    /// Capture but never raise ready again (simulates a stuck readout)
    pub stall_after_trigger: bool,
}

impl MockCameraConfig {
    pub fn new(id: impl Into<DeviceId>, exposure: Duration) -> Self {
        Self {
            id: id.into(),
            exposure,
            readout: Duration::ZERO,
            silent_on_batch_end: false,
            stall_after_trigger: false,
        }
    }

    pub fn from_config(camera: &CameraConfig) -> Self {
        Self {
            id: DeviceId::from(camera.id.as_str()),
            exposure: Duration::from_secs_f64(camera.exposure_ms / 1000.0),
            readout: Duration::from_secs_f64(camera.readout_ms / 1000.0),
            silent_on_batch_end: false,
            stall_after_trigger: false,
        }
    }

    pub fn with_readout(mut self, readout: Duration) -> Self {
        self.readout = readout;
        self
    }

    pub fn silent_on_batch_end(mut self) -> Self {
        self.silent_on_batch_end = true;
        self
    }

    pub fn stall_after_trigger(mut self) -> Self {
        self.stall_after_trigger = true;
        self
    }
}

/// One completed exposure
#[derive(Debug, Clone)]
pub struct Capture {
    pub key: u64,
    /// When the trigger was accepted
    pub triggered_at: Instant,
    /// Record of the frame captured, `None` if no record was delivered
    pub record: Option<FrameRecord>,
}

struct CameraState {
    triggers: VecDeque<(u64, Instant)>,
    records: VecDeque<FrameRecord>,
    template: Option<FrameRecord>,
    captures: Vec<Capture>,
    rejected: u64,
}

struct CameraInner {
    config: MockCameraConfig,
    ready: Signal,
    prepare_ack: Signal,
    batch_end_ack: Signal,
    trigger: Signal,
    prepare: Signal,
    batch_end: Signal,
    shutdown: Signal,
    captured: AtomicU64,
    state: Mutex<CameraState>,
}

/// Simulated camera with its own acquisition thread
pub struct MockCamera {
    inner: Arc<CameraInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for MockCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCamera")
            .field("id", &self.inner.config.id)
            .field("captured", &self.captured_count())
            .finish()
    }
}

impl MockCamera {
    /// Spawn the acquisition thread
    pub fn spawn(config: MockCameraConfig, hub: &Arc<SignalHub>) -> std::io::Result<Arc<Self>> {
        let id = config.id.clone();
        let named = |name: &str| hub.signal(format!("{id}/{name}"));
        let inner = Arc::new(CameraInner {
            ready: named("ready"),
            prepare_ack: named("prepare-ack"),
            batch_end_ack: named("batch-end-ack"),
            trigger: named("trigger"),
            prepare: named("prepare"),
            batch_end: named("batch-end"),
            shutdown: named("shutdown"),
            captured: AtomicU64::new(0),
            state: Mutex::new(CameraState {
                triggers: VecDeque::new(),
                records: VecDeque::new(),
                template: None,
                captures: Vec::new(),
                rejected: 0,
            }),
            config,
        });

        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name(format!("camera-{id}"))
            .spawn(move || acquisition_loop(&worker_inner))?;

        debug!(camera = %id, "mock camera started");
        Ok(Arc::new(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// Captures of the current batch, in completion order
    pub fn captures(&self) -> Vec<Capture> {
        self.inner.state.lock().captures.clone()
    }

    pub fn captured_keys(&self) -> Vec<u64> {
        self.inner
            .state
            .lock()
            .captures
            .iter()
            .map(|c| c.key)
            .collect()
    }

    /// Triggers refused because the camera was not ready
    pub fn rejected_triggers(&self) -> u64 {
        self.inner.state.lock().rejected
    }

    /// Frame records delivered but not yet consumed by a capture
    pub fn pending_records(&self) -> usize {
        self.inner.state.lock().records.len()
    }

    pub fn template(&self) -> Option<FrameRecord> {
        self.inner.state.lock().template.clone()
    }

    /// Stop the acquisition thread
    pub fn shutdown(&self) {
        self.inner.shutdown.set();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!(camera = %self.inner.config.id, "camera thread panicked");
            }
        }
    }
}

impl Drop for MockCamera {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn acquisition_loop(inner: &CameraInner) {
    let hub = Arc::clone(inner.shutdown.hub());
    loop {
        let outcome = hub.wait_any(
            &[
                &inner.shutdown,
                &inner.prepare,
                &inner.trigger,
                &inner.batch_end,
            ],
            None,
        );
        match outcome {
            WaitOutcome::Signaled(0) => break,
            WaitOutcome::Signaled(1) => {
                inner.prepare.reset();
                {
                    let mut state = inner.state.lock();
                    state.triggers.clear();
                    state.records.clear();
                    state.template = None;
                }
                inner.batch_end.reset();
                inner.prepare_ack.set();
                trace!(camera = %inner.config.id, "prepare acknowledged");
            }
            WaitOutcome::Signaled(2) => {
                inner.trigger.reset();
                expose_pending(inner);
            }
            WaitOutcome::Signaled(3) => {
                inner.batch_end.reset();
                expose_pending(inner);
                if inner.config.silent_on_batch_end {
                    debug!(camera = %inner.config.id, "ignoring batch end");
                } else {
                    inner.batch_end_ack.set();
                }
            }
            _ => {}
        }
    }
    debug!(camera = %inner.config.id, "mock camera stopped");
}

/// Run every queued exposure
fn expose_pending(inner: &CameraInner) {
    loop {
        let Some((key, triggered_at)) = inner.state.lock().triggers.pop_front() else {
            return;
        };
        thread::sleep(inner.config.exposure + inner.config.readout);

        let mut state = inner.state.lock();
        let record = match state.template.as_ref() {
            Some(template) => Some(template.rekeyed(key)),
            None => {
                while state.records.front().is_some_and(|r| r.key < key) {
                    state.records.pop_front();
                }
                if state.records.front().is_some_and(|r| r.key == key) {
                    state.records.pop_front()
                } else {
                    None
                }
            }
        };
        state.captures.push(Capture {
            key,
            triggered_at,
            record,
        });
        drop(state);

        inner.captured.fetch_add(1, Ordering::AcqRel);
        trace!(camera = %inner.config.id, key, "captured");
        if inner.config.stall_after_trigger {
            debug!(camera = %inner.config.id, key, "stalled after capture");
        } else {
            inner.ready.set();
        }
    }
}

impl CameraLink for MockCamera {
    fn id(&self) -> DeviceId {
        self.inner.config.id.clone()
    }

    fn exposure(&self) -> Duration {
        self.inner.config.exposure
    }

    fn ready_signal(&self) -> Signal {
        self.inner.ready.clone()
    }

    fn prepare_ack_signal(&self) -> Signal {
        self.inner.prepare_ack.clone()
    }

    fn batch_end_ack_signal(&self) -> Signal {
        self.inner.batch_end_ack.clone()
    }

    fn request_prepare(&self) {
        self.inner.prepare_ack.reset();
        self.inner.prepare.set();
    }

    fn drain_pending(&self) {
        self.inner.state.lock().records.clear();
    }

    fn arm_batch(&self) {
        {
            let mut state = self.inner.state.lock();
            state.captures.clear();
            state.template = None;
            state.rejected = 0;
        }
        self.inner.captured.store(0, Ordering::Release);
        self.inner.batch_end_ack.reset();
        self.inner.ready.set();
    }

    fn fire_trigger(&self, frame_key: u64) -> bool {
        if !self.inner.ready.is_set() {
            self.inner.state.lock().rejected += 1;
            return false;
        }
        self.inner.ready.reset();
        self.inner
            .state
            .lock()
            .triggers
            .push_back((frame_key, Instant::now()));
        self.inner.trigger.set();
        true
    }

    fn push_frame_record(&self, record: FrameRecord) {
        self.inner.state.lock().records.push_back(record);
    }

    fn store_template(&self, record: FrameRecord) {
        self.inner.state.lock().template = Some(record);
    }

    fn signal_batch_end(&self) {
        self.inner.batch_end.set();
    }

    fn captured_count(&self) -> u64 {
        self.inner.captured.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(hub: &Arc<SignalHub>) -> Arc<MockCamera> {
        MockCamera::spawn(MockCameraConfig::new("cam", Duration::from_millis(2)), hub).unwrap()
    }

    #[test]
    fn test_trigger_resets_ready_until_captured() {
        let hub = SignalHub::new();
        let cam = camera(&hub);
        cam.arm_batch();
        cam.push_frame_record(FrameRecord::new(0, "prj".into()));

        assert!(cam.fire_trigger(0));
        assert!(cam.ready_signal().wait(Some(Duration::from_secs(1))));

        assert_eq!(cam.captured_count(), 1);
        let captures = cam.captures();
        assert_eq!(captures[0].key, 0);
        assert_eq!(captures[0].record.as_ref().map(|r| r.key), Some(0));
    }

    #[test]
    fn test_refuses_trigger_while_exposing() {
        let hub = SignalHub::new();
        let cam = MockCamera::spawn(
            MockCameraConfig::new("cam", Duration::from_millis(20)),
            &hub,
        )
        .unwrap();
        cam.arm_batch();

        assert!(cam.fire_trigger(0));
        assert!(!cam.fire_trigger(1));
        assert_eq!(cam.rejected_triggers(), 1);
    }

    #[test]
    fn test_template_rekeys_captures() {
        let hub = SignalHub::new();
        let cam = camera(&hub);
        cam.arm_batch();
        let mut template = FrameRecord::new(0, "prj".into());
        template.flags.is_fixed_pattern = true;
        cam.store_template(template);

        for key in 0..3 {
            assert!(cam.ready_signal().wait(Some(Duration::from_secs(1))));
            assert!(cam.fire_trigger(key));
        }
        assert!(cam.ready_signal().wait(Some(Duration::from_secs(1))));
        let records: Vec<_> = cam
            .captures()
            .into_iter()
            .filter_map(|c| c.record)
            .map(|r| (r.key, r.flags.is_fixed_pattern))
            .collect();
        assert_eq!(records, vec![(0, true), (1, true), (2, true)]);
    }

    #[test]
    fn test_prepare_and_batch_end_acks() {
        let hub = SignalHub::new();
        let cam = camera(&hub);

        cam.request_prepare();
        assert!(cam.prepare_ack_signal().wait(Some(Duration::from_secs(1))));

        cam.arm_batch();
        cam.signal_batch_end();
        assert!(cam.batch_end_ack_signal().wait(Some(Duration::from_secs(1))));
    }

    #[test]
    fn test_silent_camera_never_confirms() {
        let hub = SignalHub::new();
        let cam = MockCamera::spawn(
            MockCameraConfig::new("cam", Duration::ZERO).silent_on_batch_end(),
            &hub,
        )
        .unwrap();
        cam.arm_batch();
        cam.signal_batch_end();
        assert!(!cam
            .batch_end_ack_signal()
            .wait(Some(Duration::from_millis(50))));
    }

    #[test]
    fn test_stalled_camera_stays_busy() {
        let hub = SignalHub::new();
        let cam = MockCamera::spawn(
            MockCameraConfig::new("cam", Duration::ZERO).stall_after_trigger(),
            &hub,
        )
        .unwrap();
        cam.arm_batch();

        assert!(cam.fire_trigger(0));
        assert!(!cam.ready_signal().wait(Some(Duration::from_millis(50))));
        assert_eq!(cam.captured_count(), 1);
        assert!(!cam.fire_trigger(1));

        cam.arm_batch();
        assert!(cam.ready_signal().is_set());
        assert_eq!(cam.rejected_triggers(), 0);
    }
}
