//! TriggerScheduleEntry - per-presentation trigger window used in
//! non-blocking acquisition.

use serde::{Deserialize, Serialize};

use crate::Ticks;

/// A presentation of the following frame (expected or achieved)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextPresentation {
    /// Refresh counter at which the next frame presents
    pub refresh_counter: u64,
    /// Tick at which the next frame presents
    pub tick: Ticks,
}

/// Trigger window of one presented frame.
///
/// Opened when the frame is presented; closed when the following frame is
/// presented and `next_presented` is back-patched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerScheduleEntry {
    /// Frame key
    pub key: u64,

    /// Present counter at presentation
    pub present_counter: u64,

    /// Refresh counter at presentation
    pub refresh_counter: u64,

    /// Achieved present tick
    pub present_tick: Ticks,

    /// Earliest expected presentation of the next frame
    pub expected_next: NextPresentation,

    /// Achieved presentation of the next frame (None while open)
    pub next_presented: Option<NextPresentation>,

    /// Earliest tick at which the presentation delay is satisfied
    pub earliest_trigger: Ticks,

    /// Tick from which a trigger is recommended
    pub recommended_trigger: Ticks,

    /// Last tick at which a trigger still captures this frame
    pub latest_trigger: Ticks,
}

impl TriggerScheduleEntry {
    /// Whether the following presentation has been recorded
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.next_presented.is_some()
    }
}
