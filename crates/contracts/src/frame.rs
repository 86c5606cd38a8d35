//! Frame - decoded pattern images and the per-frame metadata record handed to
//! camera threads.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::DeviceId;

/// Monotonic clock tick
pub type Ticks = i64;

/// Ticks per second of the monotonic clock
pub const TICKS_PER_SECOND: i64 = 1_000_000_000;

/// Ticks per microsecond of the monotonic clock
pub const TICKS_PER_MICROSECOND: i64 = TICKS_PER_SECOND / 1_000_000;

/// Pixel layout of a pattern image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    #[default]
    Gray8,
    Rgb8,
    Bgra8,
}

impl PixelFormat {
    /// Bytes per pixel
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Bgra8 => 4,
        }
    }
}

/// Decoded pattern image produced by the frame source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Position in the pattern list
    pub index: u64,

    /// Image width in pixels
    pub width: u32,

    /// Image height in pixels
    pub height: u32,

    /// Pixel layout
    pub format: PixelFormat,

    /// Pixel data (zero-copy)
    pub data: Bytes,

    /// Source name, e.g. the pattern file name
    #[serde(default)]
    pub label: Option<String>,
}

/// Payload description copied from a rendered frame into its record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternDescriptor {
    pub index: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub payload: Bytes,
    pub label: Option<String>,
}

impl From<&Frame> for PatternDescriptor {
    fn from(frame: &Frame) -> Self {
        Self {
            index: frame.index,
            width: frame.width,
            height: frame.height,
            format: frame.format,
            payload: frame.data.clone(),
            label: frame.label.clone(),
        }
    }
}

/// Acquisition flags carried by every record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFlags {
    /// Frame belongs to a batch (false while previewing)
    pub is_batch: bool,
    /// Blocking acquisition: one full cycle per frame
    pub is_blocking_mode: bool,
    /// Fixed pattern: the same frame is captured repeatedly
    pub is_fixed_pattern: bool,
    /// Last frame of the batch
    pub is_last_frame: bool,
    /// Nothing was rendered, cameras should not acquire this frame
    pub skip_acquisition: bool,
}

/// Scheduled and achieved timestamps of one presentation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameTiming {
    /// Tick at which the present completed
    pub presented: Option<Ticks>,
    /// Earliest tick at which cameras may be triggered
    pub earliest_trigger: Option<Ticks>,
    /// Latest tick at which a trigger still captures this frame
    pub latest_trigger: Option<Ticks>,
    /// Tick at which the next frame is scheduled to present
    pub next_scheduled: Option<Ticks>,
}

impl FrameTiming {
    /// Reset every timestamp to "unknown"
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Metadata of one rendered/presented frame.
///
/// Every attached camera receives its own clone; the pattern payload is a
/// reference-counted `Bytes`, so cloning does not copy pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// Sequence key, strictly increasing within a batch
    pub key: u64,

    /// Projector that presented the frame
    pub projector_id: DeviceId,

    /// Render counter at time of render
    pub render_counter: u64,

    /// Present counter after presentation
    pub present_counter: u64,

    /// Refresh counter after presentation
    pub refresh_counter: u64,

    /// Scheduling timestamps
    pub timing: FrameTiming,

    /// Rendered pattern, `None` for blank frames
    pub pattern: Option<PatternDescriptor>,

    /// Acquisition flags
    pub flags: FrameFlags,
}

impl FrameRecord {
    /// Create an empty record for `key`
    pub fn new(key: u64, projector_id: DeviceId) -> Self {
        Self {
            key,
            projector_id,
            render_counter: 0,
            present_counter: 0,
            refresh_counter: 0,
            timing: FrameTiming::default(),
            pattern: None,
            flags: FrameFlags::default(),
        }
    }

    /// Copy of this record under a different key (fixed-pattern captures)
    pub fn rekeyed(&self, key: u64) -> Self {
        Self {
            key,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> Frame {
        Frame {
            index: 7,
            width: 4,
            height: 2,
            format: PixelFormat::Gray8,
            data: Bytes::from(vec![255u8; 8]),
            label: Some("gray_code_07.png".into()),
        }
    }

    #[test]
    fn test_descriptor_shares_payload() {
        let frame = sample_frame();
        let descriptor = PatternDescriptor::from(&frame);
        assert_eq!(descriptor.index, 7);
        assert_eq!(descriptor.payload.as_ptr(), frame.data.as_ptr());
    }

    #[test]
    fn test_rekeyed_keeps_payload_and_flags() {
        let mut record = FrameRecord::new(1, "prj".into());
        record.pattern = Some(PatternDescriptor::from(&sample_frame()));
        record.flags.is_fixed_pattern = true;

        let copy = record.rekeyed(5);
        assert_eq!(copy.key, 5);
        assert!(copy.flags.is_fixed_pattern);
        assert_eq!(copy.pattern, record.pattern);
    }

    #[test]
    fn test_timing_clear() {
        let mut timing = FrameTiming {
            presented: Some(10),
            earliest_trigger: Some(20),
            latest_trigger: Some(30),
            next_scheduled: Some(40),
        };
        timing.clear();
        assert_eq!(timing, FrameTiming::default());
    }

    #[test]
    fn test_pixel_format_size() {
        assert_eq!(PixelFormat::Bgra8.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::Gray8.bytes_per_pixel(), 1);
    }
}
