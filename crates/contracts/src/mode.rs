//! Acquisition mode of a projector.

use serde::{Deserialize, Serialize};

/// How presentation and camera triggering interleave.
///
/// Replaces the independent blocking / fixed / concurrent-delay flags so that
/// combinations without meaning cannot be expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AcquisitionMode {
    /// Each frame completes render, present, delay, trigger and capture before
    /// the next frame is presented.
    Blocking {
        /// Run the presentation delay while the next frame is pre-rendered
        #[serde(default)]
        concurrent_delay: bool,
    },
    /// Frames present back-to-back; triggers are fired opportunistically from
    /// the trigger schedule and may be dropped.
    NonBlocking,
    /// One frame is presented once and captured repeatedly.
    Fixed,
}

impl Default for AcquisitionMode {
    fn default() -> Self {
        AcquisitionMode::Blocking {
            concurrent_delay: false,
        }
    }
}

impl AcquisitionMode {
    /// Triggers follow a full per-frame cycle (blocking or fixed)
    #[inline]
    pub fn is_blocking(self) -> bool {
        !matches!(self, AcquisitionMode::NonBlocking)
    }

    #[inline]
    pub fn is_fixed(self) -> bool {
        matches!(self, AcquisitionMode::Fixed)
    }

    #[inline]
    pub fn concurrent_delay(self) -> bool {
        matches!(
            self,
            AcquisitionMode::Blocking {
                concurrent_delay: true
            }
        )
    }

    /// Short label for logs and metrics
    pub fn label(self) -> &'static str {
        match self {
            AcquisitionMode::Blocking {
                concurrent_delay: false,
            } => "blocking",
            AcquisitionMode::Blocking {
                concurrent_delay: true,
            } => "blocking_concurrent",
            AcquisitionMode::NonBlocking => "non_blocking",
            AcquisitionMode::Fixed => "fixed",
        }
    }
}
