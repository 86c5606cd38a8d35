//! Manual-reset signal.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::SignalHub;

struct SignalInner {
    name: String,
    state: AtomicBool,
    hub: Arc<SignalHub>,
}

/// Named manual-reset signal.
///
/// Cloning is cheap and every clone refers to the same underlying state.
#[derive(Clone)]
pub struct Signal {
    inner: Arc<SignalInner>,
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.inner.name)
            .field("set", &self.is_set())
            .finish()
    }
}

impl Signal {
    pub(crate) fn new(hub: Arc<SignalHub>, name: String) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                name,
                state: AtomicBool::new(false),
                hub,
            }),
        }
    }

    /// Signal name (diagnostics only)
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Hub this signal notifies
    pub fn hub(&self) -> &Arc<SignalHub> {
        &self.inner.hub
    }

    /// Set the signal and wake waiters
    pub fn set(&self) {
        self.inner.state.store(true, Ordering::SeqCst);
        self.inner.hub.notify();
    }

    /// Clear the signal
    pub fn reset(&self) {
        self.inner.state.store(false, Ordering::SeqCst);
    }

    /// Check the signal without consuming it
    #[inline]
    pub fn is_set(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst)
    }

    /// Consume the signal, returning whether it was set
    #[inline]
    pub fn take(&self) -> bool {
        self.inner.state.swap(false, Ordering::SeqCst)
    }

    /// Block until this signal is set. Returns `false` on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        self.inner
            .hub
            .wait_until(timeout, || self.is_set().then_some(()))
            .is_some()
    }

    /// Whether both handles refer to the same signal
    pub fn same_as(&self, other: &Signal) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_set_take_reset() {
        let hub = SignalHub::new();
        let s = hub.signal("render-next");
        assert!(!s.is_set());

        s.set();
        assert!(s.is_set());
        assert!(s.take());
        assert!(!s.take());

        s.set();
        s.reset();
        assert!(!s.is_set());
    }

    #[test]
    fn test_clone_shares_state() {
        let hub = SignalHub::new();
        let a = hub.signal("shared");
        let b = a.clone();
        a.set();
        assert!(b.is_set());
        assert!(a.same_as(&b));
    }

    #[test]
    fn test_wait_wakes_on_set() {
        let hub = SignalHub::new();
        let s = hub.signal("present-ready");
        let setter = {
            let s = s.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(5));
                s.set();
            })
        };
        assert!(s.wait(Some(Duration::from_secs(2))));
        setter.join().unwrap();
    }
}
