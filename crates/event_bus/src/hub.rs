//! Shared wake-up point for signals and barriers.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::{CountingBarrier, Signal};

/// Result of a blocking wait on the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The signal at this index was set (wait-any)
    Signaled(usize),
    /// Every awaited signal was set (wait-all)
    All,
    /// The cancel signal at this index was set before the wait completed
    Cancelled(usize),
    /// The timeout elapsed
    TimedOut,
}

/// Condition variable shared by every signal created from it.
///
/// State changes (`Signal::set`, barrier arrival) are published first and the
/// hub is notified afterwards, so a waiter that evaluated its predicate under
/// the hub lock can never miss a wake-up.
pub struct SignalHub {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl fmt::Debug for SignalHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalHub")
            .field("generation", &*self.generation.lock())
            .finish()
    }
}

impl SignalHub {
    /// Create a new hub
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            generation: Mutex::new(0),
            cond: Condvar::new(),
        })
    }

    /// Create a manual-reset signal bound to this hub
    pub fn signal(self: &Arc<Self>, name: impl Into<String>) -> Signal {
        Signal::new(Arc::clone(self), name.into())
    }

    /// Create a counting barrier for `parties` participants
    pub fn barrier(self: &Arc<Self>, name: impl Into<String>, parties: usize) -> CountingBarrier {
        CountingBarrier::new(Arc::clone(self), name.into(), parties)
    }

    /// Wake every thread blocked on this hub
    pub(crate) fn notify(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Block until `check` yields a value or `timeout` elapses.
    ///
    /// `check` runs with the hub lock held; it must only read signal or
    /// barrier state and never set a signal itself.
    pub fn wait_until<T>(
        &self,
        timeout: Option<Duration>,
        mut check: impl FnMut() -> Option<T>,
    ) -> Option<T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.generation.lock();
        loop {
            if let Some(value) = check() {
                return Some(value);
            }
            match deadline {
                None => self.cond.wait(&mut guard),
                Some(deadline) => {
                    if self.cond.wait_until(&mut guard, deadline).timed_out() {
                        return check();
                    }
                }
            }
        }
    }

    /// Wait for the first of `signals` to be set.
    ///
    /// Earlier entries win when several are set. Signals are not reset.
    pub fn wait_any(&self, signals: &[&Signal], timeout: Option<Duration>) -> WaitOutcome {
        self.wait_until(timeout, || {
            signals
                .iter()
                .position(|s| s.is_set())
                .map(WaitOutcome::Signaled)
        })
        .unwrap_or(WaitOutcome::TimedOut)
    }

    /// Wait for every one of `signals`, aborting as soon as any of `cancel`
    /// is set. Cancellation is checked first.
    pub fn wait_all(
        &self,
        signals: &[&Signal],
        cancel: &[&Signal],
        timeout: Option<Duration>,
    ) -> WaitOutcome {
        self.wait_until(timeout, || {
            if let Some(index) = cancel.iter().position(|s| s.is_set()) {
                return Some(WaitOutcome::Cancelled(index));
            }
            signals
                .iter()
                .all(|s| s.is_set())
                .then_some(WaitOutcome::All)
        })
        .unwrap_or(WaitOutcome::TimedOut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wait_any_prefers_first_index() {
        let hub = SignalHub::new();
        let a = hub.signal("a");
        let b = hub.signal("b");
        a.set();
        b.set();
        assert_eq!(hub.wait_any(&[&a, &b], None), WaitOutcome::Signaled(0));
    }

    #[test]
    fn test_wait_any_times_out() {
        let hub = SignalHub::new();
        let a = hub.signal("a");
        let outcome = hub.wait_any(&[&a], Some(Duration::from_millis(5)));
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[test]
    fn test_wait_all_across_threads() {
        let hub = SignalHub::new();
        let signals: Vec<Signal> = (0..3).map(|i| hub.signal(format!("s{i}"))).collect();
        let cancel = hub.signal("cancel");

        let setters: Vec<_> = signals
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, s)| {
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(2 * i as u64));
                    s.set();
                })
            })
            .collect();

        let refs: Vec<&Signal> = signals.iter().collect();
        let outcome = hub.wait_all(&refs, &[&cancel], Some(Duration::from_secs(2)));
        assert_eq!(outcome, WaitOutcome::All);

        for handle in setters {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_wait_all_cancelled() {
        let hub = SignalHub::new();
        let never = hub.signal("never");
        let cancel = hub.signal("cancel");

        let canceller = {
            let cancel = cancel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(5));
                cancel.set();
            })
        };

        let outcome = hub.wait_all(&[&never], &[&cancel], None);
        assert_eq!(outcome, WaitOutcome::Cancelled(0));
        canceller.join().unwrap();
    }
}
