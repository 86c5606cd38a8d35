//! Device traits - the render surface, camera and frame source collaborators
//! consumed by the projector engine.
//!
//! Real implementations wrap a graphics API, a vendor camera SDK and an image
//! list decoder. The engine only ever talks to these traits.

use std::time::Duration;

use event_bus::Signal;
use serde::{Deserialize, Serialize};

use crate::{DeviceId, Frame, FrameRecord, PresentError, RefreshError, RenderError};

/// Refresh rate as reported by display APIs (numerator / denominator Hz)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RationalRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl RationalRate {
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Integer rate in Hz
    pub const fn from_hz(hz: u32) -> Self {
        Self::new(hz, 1)
    }

    /// Rate in Hz, `None` when either term is zero
    pub fn hz(&self) -> Option<f64> {
        if self.numerator == 0 || self.denominator == 0 {
            return None;
        }
        Some(self.numerator as f64 / self.denominator as f64)
    }

    /// Duration of one refresh interval in seconds
    pub fn interval_seconds(&self) -> Option<f64> {
        self.hz().map(|hz| 1.0 / hz)
    }
}

/// Surface change requested by the UI thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceReconfigure {
    Resize { width: u32, height: u32 },
    ToggleFullscreen,
}

/// Full-screen output surface of one projector
pub trait RenderSurface: Send + Sync {
    /// Draw `frame` into the back buffer; `None` draws a blank frame
    fn render(&self, frame: Option<&Frame>) -> Result<(), RenderError>;

    /// Recreate the render target after `RenderError::TargetLost`
    fn recreate_render_target(&self) -> Result<(), RenderError>;

    /// Submit the back buffer for the next refresh pulse
    fn present(&self) -> Result<(), PresentError>;

    /// Block until the next refresh pulse (VBLANK)
    fn wait_for_refresh_pulse(&self) -> Result<(), RefreshError>;

    /// Refresh rate reported by the output
    fn current_refresh_rate(&self) -> Option<RationalRate>;

    /// Refresh rate reported by the OS for the monitor
    fn fallback_refresh_rate(&self) -> Option<RationalRate> {
        None
    }

    /// Render and present a blank frame
    fn blank(&self) -> Result<(), RenderError>;

    /// Apply a UI-requested change (resize, fullscreen toggle)
    fn reconfigure(&self, request: SurfaceReconfigure) -> Result<(), RenderError>;
}

/// Acquisition thread of one camera attached to a projector
pub trait CameraLink: Send + Sync {
    fn id(&self) -> DeviceId;

    /// Exposure time used to size trigger windows
    fn exposure(&self) -> Duration;

    /// Set while the camera can accept a trigger; reset when triggered
    fn ready_signal(&self) -> Signal;

    /// Set once the camera has drained its state after `request_prepare`
    fn prepare_ack_signal(&self) -> Signal;

    /// Set once the camera has finished the batch after `signal_batch_end`
    fn batch_end_ack_signal(&self) -> Signal;

    /// Ask the camera to drain its own signals and queues
    fn request_prepare(&self);

    /// Discard pending frame records
    fn drain_pending(&self);

    /// Reset per-batch counters and arm the ready signal
    fn arm_batch(&self);

    /// Trigger an exposure for `frame_key`. `false` if the camera refused.
    fn fire_trigger(&self, frame_key: u64) -> bool;

    /// Queue the metadata of a presented frame
    fn push_frame_record(&self, record: FrameRecord);

    /// Store the single template record of a fixed-pattern batch
    fn store_template(&self, record: FrameRecord);

    /// Tell the camera the batch is over
    fn signal_batch_end(&self);

    /// Frames captured in the current batch
    fn captured_count(&self) -> u64;
}

/// Decoder thread producing pattern frames
pub trait FrameSource: Send + Sync {
    fn id(&self) -> DeviceId;

    fn set_id(&self, id: DeviceId);

    /// Whether another frame remains in the current pass
    fn has_next(&self) -> bool;

    /// Next decoded frame. With `blocking`, waits for the decoder instead of
    /// returning `None` while a frame is still being decoded.
    fn fetch_next(&self, blocking: bool) -> Option<Frame>;

    /// Restart from the first pattern
    fn rewind(&self);

    /// Wrap around at the end instead of running dry
    fn set_cycle(&self, cycle: bool);

    /// Drop every decoded, unconsumed frame
    fn drain(&self);

    /// Start decoding ahead so the first fetch does not stall
    fn prime(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rational_rate_interval() {
        let rate = RationalRate::new(60_000, 1_001);
        let interval = rate.interval_seconds().unwrap();
        assert!((interval - 0.016_683).abs() < 1e-6);
    }

    #[test]
    fn test_rational_rate_zero_is_none() {
        assert!(RationalRate::new(0, 1).hz().is_none());
        assert!(RationalRate::new(60, 0).interval_seconds().is_none());
    }
}
