//! Mock render surface
//!
//! Simulates a full-screen output whose refresh pulses fall on a fixed grid
//! derived from the configured refresh rate. Presents never block; the pulse
//! wait sleeps until the next grid point.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use contracts::{
    Frame, PresentError, ProjectorConfig, RationalRate, RefreshError, RenderError, RenderSurface,
    SurfaceReconfigure,
};
use parking_lot::Mutex;
use tracing::{debug, trace};

/// Mock surface configuration
#[derive(Debug, Clone)]
pub struct MockSurfaceConfig {
    /// Pulse grid rate
    pub refresh_rate: RationalRate,
    /// Report the rate through `current_refresh_rate`; when false only the
    /// fallback reports it
    pub report_current_rate: bool,
    /// Present calls (1-based) that fail
    pub failing_presents: HashSet<u64>,
    /// Render calls (1-based) that lose the render target
    pub lost_targets: HashSet<u64>,
}

impl Default for MockSurfaceConfig {
    fn default() -> Self {
        Self {
            refresh_rate: RationalRate::from_hz(120),
            report_current_rate: true,
            failing_presents: HashSet::new(),
            lost_targets: HashSet::new(),
        }
    }
}

impl MockSurfaceConfig {
    pub fn with_rate(refresh_rate: RationalRate) -> Self {
        Self {
            refresh_rate,
            ..Default::default()
        }
    }

    pub fn from_projector(projector: &ProjectorConfig) -> Self {
        Self::with_rate(projector.refresh_rate())
    }
}

/// Calls observed by a [`MockSurface`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SurfaceCalls {
    pub renders: u64,
    pub presents: u64,
    pub refresh_waits: u64,
    pub blanks: u64,
    pub recreated_targets: u64,
    pub reconfigures: u64,
}

/// Simulated projector output
pub struct MockSurface {
    config: MockSurfaceConfig,
    interval: Duration,
    epoch: Instant,
    renders: AtomicU64,
    presents: AtomicU64,
    refresh_waits: AtomicU64,
    blanks: AtomicU64,
    recreated_targets: AtomicU64,
    reconfigures: AtomicU64,
    /// Pattern index of the frame in the back buffer
    back_buffer: Mutex<Option<u64>>,
    /// Pattern index of the frame on screen
    on_screen: Mutex<Option<u64>>,
    size: Mutex<(u32, u32)>,
}

impl std::fmt::Debug for MockSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSurface")
            .field("interval", &self.interval)
            .field("calls", &self.calls())
            .finish()
    }
}

impl MockSurface {
    pub fn new(config: MockSurfaceConfig) -> Self {
        let interval = config
            .refresh_rate
            .interval_seconds()
            .map(Duration::from_secs_f64)
            .unwrap_or(Duration::from_millis(16));
        Self {
            config,
            interval,
            epoch: Instant::now(),
            renders: AtomicU64::new(0),
            presents: AtomicU64::new(0),
            refresh_waits: AtomicU64::new(0),
            blanks: AtomicU64::new(0),
            recreated_targets: AtomicU64::new(0),
            reconfigures: AtomicU64::new(0),
            back_buffer: Mutex::new(None),
            on_screen: Mutex::new(None),
            size: Mutex::new((1920, 1080)),
        }
    }

    /// Surface pulsing at `hz`
    pub fn with_hz(hz: u32) -> Self {
        Self::new(MockSurfaceConfig::with_rate(RationalRate::from_hz(hz)))
    }

    /// Duration of one refresh interval
    pub fn refresh_interval(&self) -> Duration {
        self.interval
    }

    pub fn calls(&self) -> SurfaceCalls {
        SurfaceCalls {
            renders: self.renders.load(Ordering::Relaxed),
            presents: self.presents.load(Ordering::Relaxed),
            refresh_waits: self.refresh_waits.load(Ordering::Relaxed),
            blanks: self.blanks.load(Ordering::Relaxed),
            recreated_targets: self.recreated_targets.load(Ordering::Relaxed),
            reconfigures: self.reconfigures.load(Ordering::Relaxed),
        }
    }

    /// Pattern index currently on screen, `None` when blank
    pub fn on_screen(&self) -> Option<u64> {
        *self.on_screen.lock()
    }

    pub fn size(&self) -> (u32, u32) {
        *self.size.lock()
    }

    /// Next pulse strictly after `now`
    fn next_pulse(&self, now: Instant) -> Instant {
        let elapsed = now.saturating_duration_since(self.epoch).as_secs_f64();
        let interval = self.interval.as_secs_f64();
        let pulses = (elapsed / interval).floor() + 1.0;
        self.epoch + Duration::from_secs_f64(pulses * interval)
    }
}

impl RenderSurface for MockSurface {
    fn render(&self, frame: Option<&Frame>) -> Result<(), RenderError> {
        let call = self.renders.fetch_add(1, Ordering::Relaxed) + 1;
        if self.config.lost_targets.contains(&call) {
            debug!(call, "injected render target loss");
            return Err(RenderError::TargetLost);
        }
        *self.back_buffer.lock() = frame.map(|f| f.index);
        Ok(())
    }

    fn recreate_render_target(&self) -> Result<(), RenderError> {
        self.recreated_targets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn present(&self) -> Result<(), PresentError> {
        let call = self.presents.fetch_add(1, Ordering::Relaxed) + 1;
        if self.config.failing_presents.contains(&call) {
            debug!(call, "injected present failure");
            return Err(PresentError::Failed(format!("injected failure on present {call}")));
        }
        let frame = *self.back_buffer.lock();
        *self.on_screen.lock() = frame;
        trace!(call, ?frame, "presented");
        Ok(())
    }

    fn wait_for_refresh_pulse(&self) -> Result<(), RefreshError> {
        let pulse = self.next_pulse(Instant::now());
        thread::sleep(pulse.saturating_duration_since(Instant::now()));
        self.refresh_waits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn current_refresh_rate(&self) -> Option<RationalRate> {
        self.config
            .report_current_rate
            .then_some(self.config.refresh_rate)
    }

    fn fallback_refresh_rate(&self) -> Option<RationalRate> {
        Some(self.config.refresh_rate)
    }

    fn blank(&self) -> Result<(), RenderError> {
        self.blanks.fetch_add(1, Ordering::Relaxed);
        *self.back_buffer.lock() = None;
        *self.on_screen.lock() = None;
        Ok(())
    }

    fn reconfigure(&self, request: SurfaceReconfigure) -> Result<(), RenderError> {
        self.reconfigures.fetch_add(1, Ordering::Relaxed);
        match request {
            SurfaceReconfigure::Resize { width, height } => {
                if width == 0 || height == 0 {
                    return Err(RenderError::Failed(format!("invalid size {width}x{height}")));
                }
                *self.size.lock() = (width, height);
            }
            SurfaceReconfigure::ToggleFullscreen => {}
        }
        Ok(())
    }
}
