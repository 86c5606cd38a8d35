//! Projector state machine.
//!
//! One thread per projector. The loop polls its control signals, then runs
//! self-raised events from an ordered local queue, and only blocks when both
//! are empty: on capture completion of the attached cameras, or on control
//! signals alone.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{
    AcquisitionMode, CameraLink, FrameRecord, FrameSource, FrameTiming, PatternDescriptor,
    SyncFault, Ticks,
};
use event_bus::{Signal, WaitOutcome};
use observability::metrics as obs;
use tracing::{debug, info, instrument, trace, warn};

use crate::barrier::{BarrierPoint, CrossOutcome};
use crate::clock::{duration_to_ticks, now_ticks, sleep_until_tick, ticks_to_duration, SPIN_MARGIN};
use crate::diagnostics::EventTrace;
use crate::schedule::{open_entry, TriggerQueue, TriggerWindow};
use crate::state::{EngineSettings, ProjectorShared};
use crate::timing::TimingBudget;
use crate::transition::{self, AfterCapture, Context, EngineEvent, Step};

/// An early trigger window closer than this is waited for instead of
/// deferred to the next pass
pub const EARLY_TRIGGER_SPIN: Duration = Duration::from_millis(2);

/// Outcome of one handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    /// A wait was cancelled by terminate or prepare
    Abort,
}

/// Frame held between render and trigger
#[derive(Debug, Clone)]
struct PendingFrame {
    record: FrameRecord,
    is_last: bool,
}

/// Result of a wait that also watches the control signals
enum Waited {
    Target,
    Control,
}

pub(crate) struct ProjectorEngine {
    shared: Arc<ProjectorShared>,
    source: Arc<dyn FrameSource>,
    batch_end_timeout: Duration,

    settings: EngineSettings,
    budget: Option<TimingBudget>,
    queue: TriggerQueue,
    local: VecDeque<EngineEvent>,
    awaiting: Option<AfterCapture>,

    in_batch: bool,
    preview: bool,
    next_key: u64,
    render_counter: u64,
    rendered: Option<PendingFrame>,
    presented: Option<PendingFrame>,
    /// Last frame of the batch has been presented (non-blocking)
    last_presented: bool,
    intervals_remaining: u32,
    captures_done: u32,
    last_present_tick: Option<Ticks>,
}

impl ProjectorEngine {
    pub(crate) fn new(
        shared: Arc<ProjectorShared>,
        source: Arc<dyn FrameSource>,
        batch_end_timeout: Duration,
    ) -> Self {
        let settings = *shared.settings.lock();
        Self {
            shared,
            source,
            batch_end_timeout,
            settings,
            budget: None,
            queue: TriggerQueue::new(),
            local: VecDeque::new(),
            awaiting: None,
            in_batch: false,
            preview: false,
            next_key: 0,
            render_counter: 0,
            rendered: None,
            presented: None,
            last_presented: false,
            intervals_remaining: 0,
            captures_done: 0,
            last_present_tick: None,
        }
    }

    #[inline]
    fn mode(&self) -> AcquisitionMode {
        self.settings.mode
    }

    fn id(&self) -> contracts::DeviceId {
        self.shared.id()
    }

    fn context(&self, is_last_frame: bool) -> Context {
        Context {
            mode: self.mode(),
            in_batch: self.in_batch,
            cameras_attached: !self.shared.cameras.read().is_empty(),
            is_last_frame,
            intervals_remaining: self.intervals_remaining,
            presented_pending: self.presented.is_some(),
            captures_remaining: self
                .settings
                .fixed_captures
                .saturating_sub(self.captures_done),
        }
    }

    /// Run until terminate
    pub(crate) fn run(mut self) {
        self.shared.running.store(true, Ordering::Release);
        info!(projector = %self.id(), "projector loop started");

        loop {
            if self.shared.signals.terminate.is_set() {
                break;
            }
            if let Some(event) = self.next_control_event() {
                self.dispatch(event);
                continue;
            }
            if let Some(event) = self.local.pop_front() {
                self.dispatch(event);
                continue;
            }
            self.wait_for_next();
        }

        self.dispatch(EngineEvent::Terminate);
        self.shared.running.store(false, Ordering::Release);
        info!(projector = %self.id(), "projector loop stopped");
    }

    /// Consume the highest-priority pending control signal
    fn next_control_event(&mut self) -> Option<EngineEvent> {
        let signals = &self.shared.signals;
        if signals.prepare.take() {
            return Some(EngineEvent::PrepareReconfigure);
        }
        if signals.change_identity.take() {
            return Some(EngineEvent::ChangeIdentity);
        }
        if signals.begin_batch.take() {
            return Some(EngineEvent::BeginBatch);
        }
        if signals.resume.take() {
            if self.in_batch {
                warn!(projector = %self.id(), "resume ignored while a batch is running");
            } else {
                self.start_preview();
            }
        }
        None
    }

    /// Block until capture completes or a control signal arrives
    fn wait_for_next(&mut self) {
        let control: Vec<Signal> = self
            .shared
            .signals
            .control_set()
            .into_iter()
            .cloned()
            .collect();

        let Some(after) = self.awaiting else {
            let refs: Vec<&Signal> = control.iter().collect();
            self.shared.hub.wait_any(&refs, None);
            return;
        };

        let ready: Vec<Signal> = self
            .shared
            .cameras()
            .iter()
            .map(|camera| camera.ready_signal())
            .collect();
        let captured = self
            .shared
            .hub
            .wait_until(None, || {
                if control.iter().any(Signal::is_set) {
                    return Some(false);
                }
                ready.iter().all(Signal::is_set).then_some(true)
            })
            .unwrap_or(false);

        if captured {
            self.awaiting = None;
            trace!(projector = %self.id(), ?after, "capture complete");
            match after {
                AfterCapture::Raise(event) => self.local.push_back(event),
                AfterCapture::EndBatch => {
                    if self.end_batch() == Flow::Abort {
                        self.local.clear();
                    }
                }
            }
        }
    }

    /// Handle one event and record its trace
    fn dispatch(&mut self, event: EngineEvent) {
        let started = now_ticks();
        let clock = Instant::now();

        let flow = match event {
            EngineEvent::Terminate => {
                self.queue.clear();
                self.local.clear();
                Flow::Continue
            }
            EngineEvent::PrepareReconfigure => self.prepare_reconfigure(),
            EngineEvent::BeginBatch => self.begin_batch(),
            EngineEvent::RenderNext => self.render_next(),
            EngineEvent::PresentReady => self.present_ready(),
            EngineEvent::WaitRefresh => self.wait_refresh(),
            EngineEvent::SyncTriggers => self.sync_triggers(),
            EngineEvent::ChangeIdentity => {
                self.change_identity();
                Flow::Continue
            }
        };

        if flow == Flow::Abort {
            debug!(projector = %self.id(), event = event.name(), "event aborted");
            self.local.clear();
            self.awaiting = None;
        }

        self.shared.diagnostics.lock().push_event(EventTrace {
            event,
            duration: clock.elapsed(),
            started,
            finished: now_ticks(),
        });
    }

    fn apply_step(&mut self, step: Step) -> Flow {
        match step {
            Step::Idle => Flow::Continue,
            Step::Raise(event) => {
                self.local.push_back(event);
                Flow::Continue
            }
            Step::RunTriggers => self.sync_triggers(),
            Step::AwaitCapture(after) => {
                self.awaiting = Some(after);
                Flow::Continue
            }
            Step::RaiseThenAwait(event, after) => {
                self.local.push_back(event);
                self.awaiting = Some(after);
                Flow::Continue
            }
            Step::EndBatch => self.end_batch(),
        }
    }

    fn fault(&self, fault: SyncFault) {
        warn!(projector = %self.id(), kind = fault.kind(), error = %fault, "sync fault");
        self.count_fault(&fault);
    }

    fn count_fault(&self, fault: &SyncFault) {
        obs::record_sync_fault(self.id().as_str(), fault);
        self.shared.statistics.lock().faults += 1;
    }

    /// Copy the controller's settings and recompute the timing budget
    fn apply_settings(&mut self) {
        self.settings = *self.shared.settings.lock();
        let surface = &self.shared.surface;
        match TimingBudget::compute(
            surface.current_refresh_rate(),
            surface.fallback_refresh_rate(),
            self.settings.display,
            self.shared.max_exposure(),
        ) {
            Ok(budget) => {
                debug!(
                    projector = %self.id(),
                    refresh_ticks = budget.refresh_ticks,
                    delay_whole_intervals = budget.delay_whole_intervals,
                    delay_fraction_ticks = budget.delay_fraction_ticks,
                    "timing recomputed"
                );
                self.budget = Some(budget);
            }
            Err(fault) => self.fault(fault),
        }
    }

    fn blank_display(&self) {
        if let Err(err) = self.shared.surface.blank() {
            warn!(projector = %self.id(), error = %err, "blanking the display failed");
        }
    }

    fn clear_cycle(&mut self) {
        self.local.clear();
        self.awaiting = None;
        self.rendered = None;
        self.presented = None;
        let drained = self.queue.clear();
        if drained > 0 {
            debug!(projector = %self.id(), drained, "trigger schedule drained");
        }
    }

    #[instrument(level = "debug", name = "prepare_reconfigure", skip(self), fields(projector = %self.id()))]
    fn prepare_reconfigure(&mut self) -> Flow {
        let signals = self.shared.signals.clone();
        signals.ready.reset();
        self.clear_cycle();
        self.in_batch = false;
        self.preview = false;

        let cameras = self.shared.cameras();
        for camera in &cameras {
            camera.request_prepare();
        }
        self.source.set_cycle(false);
        self.source.drain();
        for camera in &cameras {
            camera.drain_pending();
        }
        self.shared.statistics.lock().reset();

        let acks: Vec<Signal> = cameras.iter().map(|c| c.prepare_ack_signal()).collect();
        let ack_refs: Vec<&Signal> = acks.iter().collect();
        if let WaitOutcome::Cancelled(_) =
            self.shared
                .hub
                .wait_all(&ack_refs, &[&signals.terminate], None)
        {
            info!("prepare aborted by terminate");
            return Flow::Abort;
        }

        for camera in &cameras {
            camera.arm_batch();
        }
        self.source.rewind();
        self.source.prime();
        self.apply_settings();
        self.queue.clear();
        self.blank_display();

        info!(cameras = cameras.len(), mode = self.mode().label(), "projector ready");
        signals.ready.set();
        Flow::Continue
    }

    #[instrument(level = "debug", name = "begin_batch", skip(self), fields(projector = %self.id()))]
    fn begin_batch(&mut self) -> Flow {
        self.apply_settings();
        self.clear_cycle();
        self.in_batch = true;
        self.preview = false;
        self.next_key = 0;
        self.intervals_remaining = 0;
        self.captures_done = 0;
        self.last_presented = false;
        self.last_present_tick = None;
        self.shared.surface.counters().reset();
        self.shared.frames_projected.store(0, Ordering::Release);
        self.shared.signals.batch_finished.reset();
        self.source.set_cycle(false);

        for camera in self.shared.cameras() {
            camera.ready_signal().set();
        }

        let ctx = self.context(false);
        self.local.extend(transition::on_begin_batch(&ctx));
        info!(mode = self.mode().label(), "batch started");
        Flow::Continue
    }

    fn start_preview(&mut self) {
        self.clear_cycle();
        self.in_batch = false;
        self.preview = true;
        self.source.set_cycle(true);
        self.source.rewind();
        self.source.prime();
        self.local.push_back(EngineEvent::RenderNext);
        info!(projector = %self.id(), "preview started");
    }

    fn render_next(&mut self) -> Flow {
        let id = self.id();
        let mode = self.mode();
        let frame = self.source.fetch_next(self.in_batch);

        if !self.in_batch && frame.is_none() {
            // Preview keeps the current image when the decoder lags
            let step = transition::after_render(&self.context(false));
            return self.apply_step(step);
        }

        let is_last = self.in_batch && (mode.is_fixed() || !self.source.has_next());
        let key = if self.in_batch {
            let key = self.next_key;
            self.next_key += 1;
            key
        } else {
            0
        };

        self.render_counter += 1;
        let mut record = FrameRecord::new(key, id.clone());
        record.render_counter = self.render_counter;
        record.pattern = frame.as_ref().map(PatternDescriptor::from);
        record.flags.is_batch = self.in_batch;
        record.flags.is_blocking_mode = mode.is_blocking();
        record.flags.is_fixed_pattern = mode.is_fixed();
        record.flags.is_last_frame = is_last;
        record.flags.skip_acquisition = frame.is_none();

        match self.shared.surface.render(frame.as_ref()) {
            Ok(duration) => {
                obs::record_render_duration(id.as_str(), duration);
                self.shared.statistics.lock().push_render(duration);
            }
            Err(source) => {
                record.flags.skip_acquisition = true;
                self.fault(SyncFault::RenderFailed { key, source });
            }
        }
        trace!(projector = %id, key, is_last, "frame rendered");

        self.rendered = Some(PendingFrame { record, is_last });
        let ctx = self.context(is_last);
        let step = transition::after_render(&ctx);
        if transition::should_also_run_sync_triggers(
            EngineEvent::RenderNext,
            &ctx,
            !self.queue.is_empty(),
        ) && self.scheduled_triggers() == Flow::Abort
        {
            return Flow::Abort;
        }
        self.apply_step(step)
    }

    fn cross_barrier(&self, point: BarrierPoint) -> Flow {
        if !self.in_batch {
            return Flow::Continue;
        }
        let Some(membership) = self.shared.sync.read().clone() else {
            return Flow::Continue;
        };
        let id = self.id();
        let cancel = self.shared.signals.cancel_set();
        match membership.group.cross(
            point,
            membership.slot,
            &id,
            self.shared.surface.counters().snapshot(),
            &cancel,
        ) {
            CrossOutcome::Released { mismatches, stall } => {
                if let Some(fault) = stall {
                    self.count_fault(&fault);
                }
                if !mismatches.is_empty() {
                    debug!(projector = %id, point = point.name(), count = mismatches.len(), "peer counter mismatch");
                }
                Flow::Continue
            }
            CrossOutcome::Aborted(_) => {
                info!(projector = %id, point = point.name(), "barrier wait aborted");
                Flow::Abort
            }
        }
    }

    fn present_ready(&mut self) -> Flow {
        let id = self.id();
        let Some(mut pending) = self.rendered.take() else {
            if self.in_batch {
                warn!(projector = %id, "present requested without a rendered frame");
                return Flow::Continue;
            }
            // Preview with nothing new decoded: refresh the current image
            if let Err(err) = self.shared.surface.present() {
                debug!(projector = %id, error = %err, "preview present failed");
            }
            if let Err(err) = self.shared.surface.wait_for_refresh() {
                debug!(projector = %id, error = %err, "preview refresh wait failed");
            }
            let step = transition::after_present(&self.context(false));
            return self.apply_step(step);
        };
        let key = pending.record.key;

        if self.cross_barrier(BarrierPoint::Present) == Flow::Abort {
            return Flow::Abort;
        }
        let previous_tick = self.last_present_tick;
        let present = match self.shared.surface.present() {
            Ok(step) => {
                pending.record.present_counter = step.counter;
                obs::record_frame_presented(id.as_str(), step.duration);
                let since_previous = previous_tick.map(|prev| ticks_to_duration(step.tick - prev));
                self.shared
                    .statistics
                    .lock()
                    .push_present(step.duration, since_previous);
                if self.in_batch {
                    self.shared.frames_projected.fetch_add(1, Ordering::AcqRel);
                }
                Some(step)
            }
            Err(source) => {
                pending.record.timing.clear();
                pending.record.flags.skip_acquisition = true;
                self.fault(SyncFault::PresentFailed { key, source });
                None
            }
        };

        if self.cross_barrier(BarrierPoint::RefreshWait) == Flow::Abort {
            return Flow::Abort;
        }
        let refresh = match self.shared.surface.wait_for_refresh() {
            Ok(step) => {
                pending.record.refresh_counter = step.counter;
                obs::record_refresh_wait(id.as_str(), step.duration);
                self.shared.statistics.lock().push_refresh_wait(step.duration);
                Some(step)
            }
            Err(source) => {
                self.fault(SyncFault::RefreshWaitFailed { source });
                None
            }
        };
        if present.is_none() {
            pending.record.refresh_counter = self.shared.surface.counters().snapshot().refresh_counter;
        }

        // The frame is on screen from the pulse following the present
        let presented_tick = present.map(|p| refresh.map_or(p.tick, |r| r.tick));
        self.last_present_tick = presented_tick;

        if !self.in_batch {
            let step = transition::after_present(&self.context(false));
            return self.apply_step(step);
        }

        let mode = self.mode();
        if mode == AcquisitionMode::NonBlocking {
            self.intervals_remaining = match self.budget {
                Some(budget) => budget.intervals_after_present(pending.is_last),
                None if pending.is_last => 1,
                None => self.settings.display.present_intervals.saturating_sub(1),
            };
            self.last_presented = pending.is_last;
        }

        if let (Some(tick), Some(budget)) = (presented_tick, self.budget) {
            pending.record.timing = FrameTiming {
                presented: Some(tick),
                earliest_trigger: Some(tick + budget.delay_ticks),
                latest_trigger: Some(tick + budget.latest_offset),
                next_scheduled: Some(tick + budget.present_ticks),
            };
        }

        let cameras = self.shared.cameras();
        if mode == AcquisitionMode::NonBlocking && !cameras.is_empty() {
            match (presented_tick, self.budget) {
                (Some(tick), Some(budget)) => {
                    let entry = open_entry(
                        key,
                        pending.record.present_counter,
                        pending.record.refresh_counter,
                        tick,
                        &budget,
                    );
                    if let Err(err) = self.queue.push(entry, &budget) {
                        warn!(projector = %id, error = %err, "trigger schedule entry rejected");
                    }
                }
                _ => debug!(projector = %id, key, "no trigger window for frame"),
            }
        }

        for camera in &cameras {
            if mode.is_fixed() {
                camera.store_template(pending.record.clone());
            } else {
                camera.push_frame_record(pending.record.clone());
            }
        }
        trace!(projector = %id, key, present = pending.record.present_counter, "frame presented");

        let is_last = pending.is_last;
        if mode.is_blocking() && !cameras.is_empty() {
            self.presented = Some(pending);
        }
        let step = transition::after_present(&self.context(is_last));
        self.apply_step(step)
    }

    fn wait_refresh(&mut self) -> Flow {
        if self.mode().is_blocking() {
            if self.sleep_delay() == Flow::Abort {
                return Flow::Abort;
            }
            let is_last = self.presented.as_ref().is_some_and(|p| p.is_last);
            let step = transition::after_wait_refresh(&self.context(is_last));
            return self.apply_step(step);
        }

        match self.shared.surface.wait_for_refresh() {
            Ok(step) => {
                self.shared.statistics.lock().push_refresh_wait(step.duration);
            }
            Err(source) => self.fault(SyncFault::RefreshWaitFailed { source }),
        }
        self.intervals_remaining = self.intervals_remaining.saturating_sub(1);

        let ctx = self.context(self.last_presented);
        let step = transition::after_wait_refresh(&ctx);
        if transition::should_also_run_sync_triggers(
            EngineEvent::WaitRefresh,
            &ctx,
            !self.queue.is_empty(),
        ) && self.scheduled_triggers() == Flow::Abort
        {
            return Flow::Abort;
        }
        self.apply_step(step)
    }

    /// Sleep until the presentation delay has elapsed since the last present.
    ///
    /// The coarse part is cancellable; the last [`SPIN_MARGIN`] is spun.
    fn sleep_delay(&self) -> Flow {
        let delay = self
            .budget
            .map(|b| b.delay_ticks)
            .unwrap_or_else(|| (self.settings.display.delay_ms * 1e6) as Ticks);
        let base = self.last_present_tick.unwrap_or_else(now_ticks);
        let deadline = base + delay;

        let coarse = deadline - now_ticks() - duration_to_ticks(SPIN_MARGIN);
        if coarse > 0 {
            let cancel = self.shared.signals.cancel_set();
            let cancelled = self
                .shared
                .hub
                .wait_until(Some(ticks_to_duration(coarse)), || {
                    cancel.iter().any(|s| s.is_set()).then_some(())
                })
                .is_some();
            if cancelled {
                return Flow::Abort;
            }
        }
        sleep_until_tick(deadline);
        Flow::Continue
    }

    fn sync_triggers(&mut self) -> Flow {
        if self.mode().is_blocking() {
            self.blocking_triggers()
        } else {
            self.scheduled_triggers()
        }
    }

    fn fire_all(&self, cameras: &[Arc<dyn CameraLink>], key: u64) -> usize {
        let id = self.id();
        let mut fired = 0;
        for camera in cameras {
            let before = now_ticks();
            let accepted = camera.fire_trigger(key);
            let after = now_ticks();
            let camera_id = camera.id();
            obs::record_trigger_fired(id.as_str(), camera_id.as_str(), accepted);
            trace!(projector = %id, camera = %camera_id, key, before, after, accepted, "trigger");
            if accepted {
                fired += 1;
            } else {
                self.fault(SyncFault::TriggerFailed {
                    key,
                    camera: camera_id,
                });
            }
        }
        self.shared.statistics.lock().triggers_fired += fired as u64;
        fired
    }

    /// One trigger per camera for the presented frame, once every camera is
    /// ready
    #[instrument(level = "trace", name = "blocking_triggers", skip(self), fields(projector = %self.id()))]
    fn blocking_triggers(&mut self) -> Flow {
        let cameras = self.shared.cameras();
        if cameras.is_empty() {
            return Flow::Continue;
        }
        let Some(key) = self.presented.as_ref().map(|p| p.record.key) else {
            warn!("no presented frame awaiting triggers");
            return Flow::Continue;
        };

        let ready: Vec<Signal> = cameras.iter().map(|c| c.ready_signal()).collect();
        let ready_refs: Vec<&Signal> = ready.iter().collect();
        let cancel = self.shared.signals.cancel_set();
        if let WaitOutcome::Cancelled(_) = self.shared.hub.wait_all(&ready_refs, &cancel, None) {
            info!(key, "trigger wait aborted");
            return Flow::Abort;
        }
        if self.cross_barrier(BarrierPoint::Trigger) == Flow::Abort {
            return Flow::Abort;
        }

        let is_last;
        if self.mode().is_fixed() {
            let capture_key = u64::from(self.captures_done);
            self.fire_all(&cameras, capture_key);
            self.captures_done += 1;
            is_last = true;
        } else {
            self.fire_all(&cameras, key);
            is_last = self.presented.take().is_some_and(|p| p.is_last);
        }

        let step = transition::after_triggers(&self.context(is_last));
        self.apply_step(step)
    }

    /// Fire the head of the trigger schedule if its window is open
    fn scheduled_triggers(&mut self) -> Flow {
        let id = self.id();
        let cameras = self.shared.cameras();
        if cameras.is_empty() {
            self.queue.clear();
            return Flow::Continue;
        }

        let snapshot = self.shared.surface.counters().snapshot();
        self.drop_expired(now_ticks(), snapshot);
        obs::record_schedule_depth(id.as_str(), self.queue.len());

        let Some(head) = self.queue.peek().copied() else {
            return Flow::Continue;
        };

        let mut now = now_ticks();
        let mut window = TriggerWindow::classify(&head, now);
        if window == TriggerWindow::Early
            && head.recommended_trigger - now <= duration_to_ticks(EARLY_TRIGGER_SPIN)
        {
            now = sleep_until_tick(head.recommended_trigger);
            window = TriggerWindow::classify(&head, now);
        }

        match window {
            TriggerWindow::Early => {
                trace!(projector = %id, key = head.key, "trigger window not open yet");
            }
            TriggerWindow::Expired => {
                self.drop_expired(now, snapshot);
            }
            TriggerWindow::Open => {
                if cameras.iter().all(|c| c.ready_signal().is_set()) {
                    self.queue.pop();
                    self.fire_all(&cameras, head.key);
                } else {
                    warn!(
                        projector = %id,
                        key = head.key,
                        "trigger window open but cameras not ready, unexpected delay"
                    );
                }
            }
        }
        Flow::Continue
    }

    fn drop_expired(&mut self, now: Ticks, snapshot: crate::surface::SurfaceSnapshot) {
        let dropped = self.queue.remove_expired(now, snapshot);
        if dropped.is_empty() {
            return;
        }
        let id = self.id();
        let mut statistics = self.shared.statistics.lock();
        for fault in &dropped {
            obs::record_trigger_dropped(id.as_str());
            obs::record_sync_fault(id.as_str(), fault);
            statistics.triggers_dropped += 1;
            statistics.faults += 1;
        }
    }

    /// Batch termination: confirm with cameras, blank, report, await resume
    #[instrument(level = "debug", name = "end_batch", skip(self), fields(projector = %self.id()))]
    fn end_batch(&mut self) -> Flow {
        let signals = self.shared.signals.clone();
        let cameras = self.shared.cameras();

        if self.mode() == AcquisitionMode::NonBlocking && !self.queue.is_empty() {
            let _ = self.scheduled_triggers();
        }

        for camera in &cameras {
            camera.signal_batch_end();
        }
        let acks: Vec<Signal> = cameras.iter().map(|c| c.batch_end_ack_signal()).collect();
        let ack_refs: Vec<&Signal> = acks.iter().collect();
        let started = Instant::now();
        let confirmed = match self.shared.hub.wait_all(
            &ack_refs,
            &signals.cancel_set(),
            Some(self.batch_end_timeout),
        ) {
            WaitOutcome::Cancelled(_) => {
                info!("batch end confirmation aborted");
                return Flow::Abort;
            }
            WaitOutcome::TimedOut => {
                let missing = cameras
                    .iter()
                    .zip(&acks)
                    .filter(|(_, ack)| !ack.is_set())
                    .map(|(camera, _)| camera.id())
                    .collect();
                self.fault(SyncFault::BatchEndTimeout {
                    missing,
                    waited_ms: started.elapsed().as_millis() as u64,
                });
                false
            }
            _ => true,
        };

        let undelivered = self.queue.len();
        if undelivered > 0 {
            warn!(undelivered, "trigger schedule entries left at batch end");
        }
        self.clear_cycle();
        self.blank_display();
        self.in_batch = false;

        let frames = self.shared.frames_projected();
        obs::record_batch_completed(self.id().as_str(), frames, confirmed);
        info!(
            frames,
            captured = self.shared.captured_count(),
            confirmed,
            "batch finished"
        );
        signals.batch_finished.set();

        match self.wait_for(&signals.resume) {
            Waited::Target => {
                self.shared.settings.lock().mode = AcquisitionMode::default();
                self.settings.mode = AcquisitionMode::default();
                self.start_preview();
            }
            Waited::Control => {}
        }
        Flow::Continue
    }

    /// Block for `target`, servicing identity changes, until terminate or
    /// prepare
    fn wait_for(&mut self, target: &Signal) -> Waited {
        let signals = self.shared.signals.clone();
        loop {
            match self.shared.hub.wait_any(
                &[
                    &signals.terminate,
                    &signals.prepare,
                    &signals.change_identity,
                    target,
                ],
                None,
            ) {
                WaitOutcome::Signaled(2) => {
                    signals.change_identity.reset();
                    self.dispatch(EngineEvent::ChangeIdentity);
                }
                WaitOutcome::Signaled(3) => {
                    target.reset();
                    return Waited::Target;
                }
                _ => return Waited::Control,
            }
        }
    }

    fn change_identity(&mut self) {
        let Some((projector_id, decoder_id)) = self.shared.pending_identity.lock().take() else {
            return;
        };
        let old = std::mem::replace(&mut *self.shared.id.write(), projector_id.clone());
        self.source.set_id(decoder_id.clone());

        for pending in [self.rendered.as_mut(), self.presented.as_mut()].into_iter().flatten() {
            pending.record.projector_id = projector_id.clone();
        }
        if let Some(membership) = self.shared.sync.read().as_ref() {
            membership.group.rename(&old, projector_id.clone());
        }

        info!(old = %old, new = %projector_id, decoder = %decoder_id, "identity changed");
        self.shared.signals.identity_ack.set();
    }
}
