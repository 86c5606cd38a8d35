//! Timing calculator.
//!
//! Converts display/delay settings into tick budgets for one refresh rate.
//! Pure: identical inputs always produce a bit-identical [`TimingBudget`].

use std::time::Duration;

use contracts::{RationalRate, SyncFault, Ticks, TICKS_PER_SECOND};

use crate::clock::duration_to_ticks;

/// Display and delay settings requested by the controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplaySettings {
    /// Refresh intervals each frame stays on screen (>= 1)
    pub present_intervals: u32,
    /// Presentation-to-trigger delay (ms)
    pub delay_ms: f64,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            present_intervals: 1,
            delay_ms: 0.0,
        }
    }
}

/// Tick budgets derived from [`DisplaySettings`] at one refresh rate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingBudget {
    /// Refresh rate the budget was computed for
    pub refresh_rate: RationalRate,
    /// Ticks per refresh interval (fractional)
    pub refresh_ticks: f64,
    pub present_intervals: u32,
    /// Ticks a frame stays on screen
    pub present_ticks: Ticks,
    /// Requested delay in ticks
    pub delay_ticks: Ticks,
    /// Whole refresh intervals contained in the delay
    pub delay_whole_intervals: u32,
    /// Delay remainder after the whole intervals
    pub delay_fraction_ticks: Ticks,
    /// Longest camera exposure in ticks
    pub exposure_ticks: Ticks,
    /// Present tick to recommended trigger tick
    pub recommended_offset: Ticks,
    /// Present tick to latest trigger tick (before the next present is known)
    pub latest_offset: Ticks,
}

impl TimingBudget {
    /// Pick the refresh rate and compute the budget.
    ///
    /// `current` is the rate reported by the output, `fallback` the OS monitor
    /// rate used when the former is missing or zero.
    pub fn compute(
        current: Option<RationalRate>,
        fallback: Option<RationalRate>,
        settings: DisplaySettings,
        exposure: Duration,
    ) -> Result<Self, SyncFault> {
        let rate = [current, fallback]
            .into_iter()
            .flatten()
            .find(|rate| rate.hz().is_some())
            .ok_or_else(|| SyncFault::timing_unavailable("no usable refresh rate reported"))?;
        Self::for_rate(rate, settings, exposure)
    }

    /// Compute the budget for a known refresh rate
    pub fn for_rate(
        rate: RationalRate,
        settings: DisplaySettings,
        exposure: Duration,
    ) -> Result<Self, SyncFault> {
        let interval_s = rate.interval_seconds().ok_or_else(|| {
            SyncFault::timing_unavailable(format!(
                "refresh rate {}/{} has no interval",
                rate.numerator, rate.denominator
            ))
        })?;
        if !interval_s.is_finite() || interval_s <= 0.0 {
            return Err(SyncFault::timing_unavailable(format!(
                "refresh interval {interval_s} s is not usable"
            )));
        }
        if !settings.delay_ms.is_finite() || settings.delay_ms < 0.0 {
            return Err(SyncFault::timing_unavailable(format!(
                "delay {} ms is not usable",
                settings.delay_ms
            )));
        }

        let refresh_ticks = interval_s * TICKS_PER_SECOND as f64;
        let present_intervals = settings.present_intervals.max(1);
        let present_ticks = (f64::from(present_intervals) * refresh_ticks).round() as Ticks;
        let delay_ticks = (settings.delay_ms * 1e6).round() as Ticks;

        let delay_whole_intervals = (delay_ticks as f64 / refresh_ticks).floor() as u32;
        let whole_ticks = (f64::from(delay_whole_intervals) * refresh_ticks).round() as Ticks;
        let delay_fraction_ticks = delay_ticks - whole_ticks;

        let exposure_ticks = duration_to_ticks(exposure);
        let recommended_offset = whole_ticks;
        let latest_offset = recommended_offset + (present_ticks - exposure_ticks).max(0) / 2;

        Ok(Self {
            refresh_rate: rate,
            refresh_ticks,
            present_intervals,
            present_ticks,
            delay_ticks,
            delay_whole_intervals,
            delay_fraction_ticks,
            exposure_ticks,
            recommended_offset,
            latest_offset,
        })
    }

    /// Refresh intervals to wait after a present.
    ///
    /// Non-final frames stay up for the rest of their present duration; the
    /// last frame waits long enough for its pending triggers to drain.
    pub fn intervals_after_present(&self, is_last_frame: bool) -> u32 {
        if is_last_frame {
            self.delay_whole_intervals + 1
        } else {
            self.present_intervals - 1
        }
    }

    /// Refresh interval rounded to whole ticks
    #[inline]
    pub fn refresh_interval_ticks(&self) -> Ticks {
        self.refresh_ticks.round() as Ticks
    }

    /// Latest trigger tick once the next present tick is known
    #[inline]
    pub fn closed_latest(&self, next_present_tick: Ticks) -> Ticks {
        next_present_tick + self.recommended_offset - self.exposure_ticks
    }
}
