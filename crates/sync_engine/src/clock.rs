//! Process-wide monotonic tick clock.
//!
//! Ticks are nanoseconds since the first call into this module. Every thread
//! of the rig (projectors, cameras, simulated surfaces) shares the same epoch.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use contracts::{Ticks, TICKS_PER_SECOND};

/// Residual left to spinning after a coarse sleep
pub const SPIN_MARGIN: Duration = Duration::from_micros(500);

static EPOCH: OnceLock<Instant> = OnceLock::new();

#[inline]
fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Current tick
#[inline]
pub fn now_ticks() -> Ticks {
    instant_to_ticks(Instant::now())
}

/// Tick of an instant (instants before the epoch map to 0)
pub fn instant_to_ticks(instant: Instant) -> Ticks {
    duration_to_ticks(instant.saturating_duration_since(epoch()))
}

/// Instant of a tick
pub fn ticks_to_instant(ticks: Ticks) -> Instant {
    epoch() + ticks_to_duration(ticks)
}

pub fn duration_to_ticks(duration: Duration) -> Ticks {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

/// Negative tick spans clamp to zero
pub fn ticks_to_duration(ticks: Ticks) -> Duration {
    Duration::from_nanos(ticks.max(0) as u64)
}

/// Signed tick span in microseconds
#[inline]
pub fn ticks_to_micros(ticks: Ticks) -> i64 {
    ticks * 1_000_000 / TICKS_PER_SECOND
}

/// Block until `deadline` has passed.
///
/// Sleeps coarsely until [`SPIN_MARGIN`] before the deadline, then spins on
/// the monotonic clock. The spin is bounded by the margin plus scheduler
/// overshoot of the last sleep. Returns the tick at which it woke.
pub fn sleep_until_tick(deadline: Ticks) -> Ticks {
    let margin = duration_to_ticks(SPIN_MARGIN);
    loop {
        let now = now_ticks();
        let remaining = deadline - now;
        if remaining <= 0 {
            return now;
        }
        if remaining > margin {
            std::thread::sleep(ticks_to_duration(remaining - margin));
        } else {
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_are_monotonic() {
        let a = now_ticks();
        let b = now_ticks();
        assert!(b >= a);
    }

    #[test]
    fn test_duration_round_trip() {
        let d = Duration::from_micros(8_333);
        assert_eq!(ticks_to_duration(duration_to_ticks(d)), d);
        assert_eq!(ticks_to_duration(-5), Duration::ZERO);
        assert_eq!(ticks_to_micros(3_500), 3);
    }

    #[test]
    fn test_sleep_until_meets_floor() {
        let deadline = now_ticks() + duration_to_ticks(Duration::from_millis(3));
        let woke = sleep_until_tick(deadline);
        assert!(woke >= deadline);
        assert!(now_ticks() >= deadline);
    }

    #[test]
    fn test_sleep_until_past_deadline_returns_immediately() {
        let now = now_ticks();
        assert!(sleep_until_tick(now - 1_000) >= now);
    }

    #[test]
    fn test_instant_mapping() {
        let tick = now_ticks() + 1_000_000;
        let instant = ticks_to_instant(tick);
        assert_eq!(instant_to_ticks(instant), tick);
    }
}
