//! In-memory pattern source
//!
//! Generates binary stripe patterns (one bit plane per index) instead of
//! decoding image files.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use contracts::{DeviceId, Frame, FrameSource, PatternSetConfig, PixelFormat};
use parking_lot::Mutex;
use tracing::{debug, trace};

/// Pattern set produced by [`MockFrameSource`]
#[derive(Debug, Clone)]
pub struct PatternSet {
    pub count: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Simulated decode time of one blocking fetch
    pub decode_time: Duration,
}

impl PatternSet {
    pub fn new(count: u64, width: u32, height: u32) -> Self {
        Self {
            count,
            width,
            height,
            format: PixelFormat::Gray8,
            decode_time: Duration::ZERO,
        }
    }

    pub fn from_config(config: &PatternSetConfig) -> Self {
        Self {
            count: u64::from(config.count),
            width: config.width,
            height: config.height,
            format: config.format,
            decode_time: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
struct Cursor {
    next: u64,
    cycle: bool,
}

pub struct MockFrameSource {
    id: Mutex<DeviceId>,
    patterns: PatternSet,
    cursor: Mutex<Cursor>,
    fetched: AtomicU64,
    drained: AtomicU64,
}

impl std::fmt::Debug for MockFrameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockFrameSource")
            .field("id", &*self.id.lock())
            .field("patterns", &self.patterns.count)
            .field("cursor", &*self.cursor.lock())
            .finish()
    }
}

impl MockFrameSource {
    pub fn new(id: impl Into<DeviceId>, patterns: PatternSet) -> Self {
        Self {
            id: Mutex::new(id.into()),
            patterns,
            cursor: Mutex::new(Cursor {
                next: 0,
                cycle: false,
            }),
            fetched: AtomicU64::new(0),
            drained: AtomicU64::new(0),
        }
    }

    /// Frames handed out since creation
    pub fn fetched(&self) -> u64 {
        self.fetched.load(Ordering::Relaxed)
    }

    /// Number of drain requests
    pub fn drained(&self) -> u64 {
        self.drained.load(Ordering::Relaxed)
    }

    pub fn pattern_count(&self) -> u64 {
        self.patterns.count
    }

    fn generate(&self, index: u64) -> Frame {
        let PatternSet {
            width,
            height,
            format,
            ..
        } = self.patterns;
        let bpp = format.bytes_per_pixel();
        let bit = (index % 16) as u32;

        let mut row = Vec::with_capacity(width as usize * bpp);
        for x in 0..width {
            let value = if (x >> bit) & 1 == 1 { 255u8 } else { 0 };
            match format {
                PixelFormat::Bgra8 => row.extend_from_slice(&[value, value, value, 255]),
                _ => row.extend(std::iter::repeat(value).take(bpp)),
            }
        }
        let data = row.repeat(height as usize);

        Frame {
            index,
            width,
            height,
            format,
            data: Bytes::from(data),
            label: Some(format!("stripes_{index:03}")),
        }
    }
}

impl FrameSource for MockFrameSource {
    fn id(&self) -> DeviceId {
        self.id.lock().clone()
    }

    fn set_id(&self, id: DeviceId) {
        *self.id.lock() = id;
    }

    fn has_next(&self) -> bool {
        let cursor = self.cursor.lock();
        self.patterns.count > 0 && (cursor.cycle || cursor.next < self.patterns.count)
    }

    fn fetch_next(&self, blocking: bool) -> Option<Frame> {
        let index = {
            let mut cursor = self.cursor.lock();
            if cursor.next >= self.patterns.count {
                if !cursor.cycle || self.patterns.count == 0 {
                    return None;
                }
                cursor.next = 0;
            }
            let index = cursor.next;
            cursor.next += 1;
            index
        };
        if blocking && !self.patterns.decode_time.is_zero() {
            thread::sleep(self.patterns.decode_time);
        }
        self.fetched.fetch_add(1, Ordering::Relaxed);
        trace!(index, "pattern fetched");
        Some(self.generate(index))
    }

    fn rewind(&self) {
        self.cursor.lock().next = 0;
    }

    fn set_cycle(&self, cycle: bool) {
        self.cursor.lock().cycle = cycle;
    }

    fn drain(&self) {
        self.drained.fetch_add(1, Ordering::Relaxed);
    }

    fn prime(&self) {
        debug!(source = %self.id(), patterns = self.patterns.count, "pattern source primed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_dry_without_cycle() {
        let source = MockFrameSource::new("dec", PatternSet::new(2, 4, 1));
        assert!(source.has_next());
        assert_eq!(source.fetch_next(true).map(|f| f.index), Some(0));
        assert_eq!(source.fetch_next(true).map(|f| f.index), Some(1));
        assert!(!source.has_next());
        assert!(source.fetch_next(true).is_none());

        source.rewind();
        assert_eq!(source.fetch_next(false).map(|f| f.index), Some(0));
    }

    #[test]
    fn test_cycle_wraps() {
        let source = MockFrameSource::new("dec", PatternSet::new(2, 4, 1));
        source.set_cycle(true);
        let indices: Vec<_> = (0..5)
            .filter_map(|_| source.fetch_next(false))
            .map(|f| f.index)
            .collect();
        assert_eq!(indices, vec![0, 1, 0, 1, 0]);
        assert!(source.has_next());
    }

    #[test]
    fn test_stripe_pattern() {
        let source = MockFrameSource::new("dec", PatternSet::new(2, 4, 2));
        let first = source.fetch_next(true).unwrap();
        assert_eq!(&first.data[..], &[0, 255, 0, 255, 0, 255, 0, 255]);
        let second = source.fetch_next(true).unwrap();
        assert_eq!(&second.data[..4], &[0, 0, 255, 255]);
    }

    #[test]
    fn test_set_id() {
        let source = MockFrameSource::new("dec", PatternSet::new(1, 1, 1));
        source.set_id("dec-2".into());
        assert_eq!(source.id().as_str(), "dec-2");
    }
}
