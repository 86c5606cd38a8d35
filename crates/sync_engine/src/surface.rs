//! Render surface wrapper.
//!
//! Owns the shared present/refresh counters and the two critical sections
//! (render/present, refresh wait) of one projector surface. The UI thread may
//! request a reconfiguration at any time; if either critical section is busy
//! the request is deferred and applied by the projector thread as soon as the
//! section is left.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{
    Frame, PresentError, RationalRate, RefreshError, RenderError, RenderSurface,
    SurfaceReconfigure, Ticks,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::clock::now_ticks;

const NO_TICK: Ticks = Ticks::MIN;

/// Point-in-time copy of [`SurfaceCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SurfaceSnapshot {
    pub present_counter: u64,
    pub refresh_counter: u64,
    pub last_present_tick: Option<Ticks>,
    pub last_refresh_tick: Option<Ticks>,
}

/// Present and refresh counters of one surface.
///
/// Counters only move forward between resets; timestamps may be cleared to
/// "unknown" after a failed present.
#[derive(Debug)]
pub struct SurfaceCounters {
    present: AtomicU64,
    refresh: AtomicU64,
    last_present: AtomicI64,
    last_refresh: AtomicI64,
}

impl Default for SurfaceCounters {
    fn default() -> Self {
        Self {
            present: AtomicU64::new(0),
            refresh: AtomicU64::new(0),
            last_present: AtomicI64::new(NO_TICK),
            last_refresh: AtomicI64::new(NO_TICK),
        }
    }
}

fn tick_option(raw: Ticks) -> Option<Ticks> {
    (raw != NO_TICK).then_some(raw)
}

impl SurfaceCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a successful present, returning the new present counter
    pub fn record_present(&self, tick: Ticks) -> u64 {
        self.last_present.store(tick, Ordering::Release);
        self.present.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Count a refresh pulse, returning the new refresh counter
    pub fn record_refresh(&self, tick: Ticks) -> u64 {
        self.last_refresh.store(tick, Ordering::Release);
        self.refresh.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Forget cached timestamps, counters untouched
    pub fn clear_timestamps(&self) {
        self.last_present.store(NO_TICK, Ordering::Release);
        self.last_refresh.store(NO_TICK, Ordering::Release);
    }

    /// Back to "no frame yet" (batch begin)
    pub fn reset(&self) {
        self.present.store(0, Ordering::Release);
        self.refresh.store(0, Ordering::Release);
        self.clear_timestamps();
    }

    pub fn snapshot(&self) -> SurfaceSnapshot {
        SurfaceSnapshot {
            present_counter: self.present.load(Ordering::Acquire),
            refresh_counter: self.refresh.load(Ordering::Acquire),
            last_present_tick: tick_option(self.last_present.load(Ordering::Acquire)),
            last_refresh_tick: tick_option(self.last_refresh.load(Ordering::Acquire)),
        }
    }
}

/// Result of a UI reconfiguration request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconfigureOutcome {
    Applied,
    /// A critical section was busy; the request runs when it ends
    Deferred,
    Failed,
}

/// Timed result of a successful present or refresh wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceStep {
    pub counter: u64,
    pub tick: Ticks,
    pub duration: Duration,
}

/// Shared handle to a projector's render surface
pub struct SharedSurface {
    surface: Arc<dyn RenderSurface>,
    counters: Arc<SurfaceCounters>,
    render_lock: Mutex<()>,
    refresh_lock: Mutex<()>,
    deferred: Mutex<Vec<SurfaceReconfigure>>,
}

impl std::fmt::Debug for SharedSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSurface")
            .field("counters", &self.counters.snapshot())
            .field("deferred", &self.deferred.lock().len())
            .finish()
    }
}

impl SharedSurface {
    pub fn new(surface: Arc<dyn RenderSurface>) -> Self {
        Self {
            surface,
            counters: Arc::new(SurfaceCounters::new()),
            render_lock: Mutex::new(()),
            refresh_lock: Mutex::new(()),
            deferred: Mutex::new(Vec::new()),
        }
    }

    pub fn counters(&self) -> &Arc<SurfaceCounters> {
        &self.counters
    }

    pub fn current_refresh_rate(&self) -> Option<RationalRate> {
        self.surface.current_refresh_rate()
    }

    pub fn fallback_refresh_rate(&self) -> Option<RationalRate> {
        self.surface.fallback_refresh_rate()
    }

    /// Render `frame`, recreating the render target once on a recoverable
    /// failure.
    pub fn render(&self, frame: Option<&Frame>) -> Result<Duration, RenderError> {
        let started = Instant::now();
        let result = {
            let _guard = self.render_lock.lock();
            match self.surface.render(frame) {
                Err(err) if err.is_recoverable() => {
                    debug!(error = %err, "render target lost, recreating");
                    self.surface
                        .recreate_render_target()
                        .and_then(|()| self.surface.render(frame))
                }
                other => other,
            }
        };
        self.apply_deferred();
        result.map(|()| started.elapsed())
    }

    /// Present the back buffer and count it
    pub fn present(&self) -> Result<SurfaceStep, PresentError> {
        let started = Instant::now();
        let result = {
            let _guard = self.render_lock.lock();
            self.surface.present()
        };
        self.apply_deferred();

        match result {
            Ok(()) => {
                let tick = now_ticks();
                let counter = self.counters.record_present(tick);
                Ok(SurfaceStep {
                    counter,
                    tick,
                    duration: started.elapsed(),
                })
            }
            Err(err) => {
                self.counters.clear_timestamps();
                Err(err)
            }
        }
    }

    /// Block for the next refresh pulse and count it
    pub fn wait_for_refresh(&self) -> Result<SurfaceStep, RefreshError> {
        let started = Instant::now();
        let result = {
            let _guard = self.refresh_lock.lock();
            self.surface.wait_for_refresh_pulse()
        };
        self.apply_deferred();

        result.map(|()| {
            let tick = now_ticks();
            SurfaceStep {
                counter: self.counters.record_refresh(tick),
                tick,
                duration: started.elapsed(),
            }
        })
    }

    /// Render and present a blank frame (not counted)
    pub fn blank(&self) -> Result<(), RenderError> {
        let result = {
            let _guard = self.render_lock.lock();
            self.surface.blank()
        };
        self.apply_deferred();
        result
    }

    /// Apply `request` now if no critical section is busy, otherwise defer it
    pub fn request_reconfigure(&self, request: SurfaceReconfigure) -> ReconfigureOutcome {
        if let Some(outcome) = self.try_reconfigure(Some(request)) {
            return outcome;
        }
        self.deferred.lock().push(request);
        // The busy section may have exited before the push
        self.try_reconfigure(None).unwrap_or(ReconfigureOutcome::Deferred)
    }

    /// Without blocking, apply every deferred request and then `request`.
    /// `None` if a critical section is busy; otherwise the outcome of the
    /// last request applied.
    fn try_reconfigure(&self, request: Option<SurfaceReconfigure>) -> Option<ReconfigureOutcome> {
        let _render = self.render_lock.try_lock()?;
        let _refresh = self.refresh_lock.try_lock()?;
        let pending = std::mem::take(&mut *self.deferred.lock());

        let mut outcome = ReconfigureOutcome::Applied;
        for request in pending.into_iter().chain(request) {
            outcome = match self.surface.reconfigure(request) {
                Ok(()) => ReconfigureOutcome::Applied,
                Err(err) => {
                    warn!(?request, error = %err, "surface reconfiguration failed");
                    ReconfigureOutcome::Failed
                }
            };
        }
        Some(outcome)
    }

    /// Requests still waiting for both critical sections
    pub fn deferred_requests(&self) -> usize {
        self.deferred.lock().len()
    }

    /// Run deferred requests. Called by the projector thread after leaving a
    /// critical section.
    pub fn apply_deferred(&self) -> usize {
        let pending = std::mem::take(&mut *self.deferred.lock());
        if pending.is_empty() {
            return 0;
        }
        let _render = self.render_lock.lock();
        let _refresh = self.refresh_lock.lock();
        for request in &pending {
            if let Err(err) = self.surface.reconfigure(*request) {
                warn!(?request, error = %err, "deferred surface reconfiguration failed");
            }
        }
        debug!(count = pending.len(), "applied deferred surface reconfiguration");
        pending.len()
    }
}
