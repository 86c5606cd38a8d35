//! Counting barrier.
//!
//! A barrier round completes once `parties` distinct participants have
//! arrived. The released round stays "set" until every participant of that
//! round has observed it, after which it resets on its own.
//!
//! Rounds are numbered, so a fast participant may arrive for the next round
//! while slower peers are still observing the previous one.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::SignalHub;

#[derive(Debug, Default)]
struct BarrierState {
    parties: usize,
    arrived: BTreeSet<usize>,
    generation: u64,
    unobserved: BTreeSet<usize>,
}

struct BarrierInner {
    name: String,
    hub: Arc<SignalHub>,
    state: Mutex<BarrierState>,
}

/// Proof of arrival for one barrier round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierTicket {
    participant: usize,
    generation: u64,
}

impl BarrierTicket {
    /// Participant slot that arrived
    pub fn participant(&self) -> usize {
        self.participant
    }

    /// Round this ticket waits for
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Signal that only becomes set once N participants have conditionally set it
#[derive(Clone)]
pub struct CountingBarrier {
    inner: Arc<BarrierInner>,
}

impl fmt::Debug for CountingBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("CountingBarrier")
            .field("name", &self.inner.name)
            .field("parties", &state.parties)
            .field("arrived", &state.arrived.len())
            .field("generation", &state.generation)
            .finish()
    }
}

impl CountingBarrier {
    pub(crate) fn new(hub: Arc<SignalHub>, name: String, parties: usize) -> Self {
        Self {
            inner: Arc::new(BarrierInner {
                name,
                hub,
                state: Mutex::new(BarrierState {
                    parties: parties.max(1),
                    ..Default::default()
                }),
            }),
        }
    }

    /// Barrier name (diagnostics only)
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of participants required to release a round
    pub fn parties(&self) -> usize {
        self.inner.state.lock().parties
    }

    /// Number of participants that arrived for the pending round
    pub fn arrived(&self) -> usize {
        self.inner.state.lock().arrived.len()
    }

    /// Conditionally set the barrier on behalf of `participant`.
    ///
    /// Arriving twice for the same round counts once.
    pub fn arrive(&self, participant: usize) -> BarrierTicket {
        let (ticket, released) = {
            let mut state = self.inner.state.lock();
            let target = state.generation + 1;
            state.arrived.insert(participant);
            let released = state.arrived.len() >= state.parties;
            if released {
                state.generation = target;
                state.unobserved = std::mem::take(&mut state.arrived);
            }
            (
                BarrierTicket {
                    participant,
                    generation: target,
                },
                released,
            )
        };

        if released {
            trace!(barrier = %self.inner.name, generation = ticket.generation, "barrier released");
            self.inner.hub.notify();
        }
        ticket
    }

    /// Whether the round behind `ticket` has been released
    #[inline]
    pub fn is_released(&self, ticket: &BarrierTicket) -> bool {
        self.inner.state.lock().generation >= ticket.generation
    }

    /// Whether a released round is still waiting to be observed
    #[inline]
    pub fn is_set(&self) -> bool {
        !self.inner.state.lock().unobserved.is_empty()
    }

    /// Clear this participant's contribution after observing the release
    pub fn observe(&self, ticket: &BarrierTicket) {
        let drained = {
            let mut state = self.inner.state.lock();
            if state.generation != ticket.generation {
                return;
            }
            state.unobserved.remove(&ticket.participant) && state.unobserved.is_empty()
        };
        if drained {
            self.inner.hub.notify();
        }
    }

    /// Take back an arrival for a round that has not been released yet.
    ///
    /// Returns `false` (and observes instead) when the round already released.
    pub fn withdraw(&self, ticket: &BarrierTicket) -> bool {
        {
            let mut state = self.inner.state.lock();
            if state.generation < ticket.generation {
                state.arrived.remove(&ticket.participant);
                return true;
            }
        }
        self.observe(ticket);
        false
    }

    /// Drop all arrivals and pending observations, resizing to `parties`
    pub fn reset(&self, parties: usize) {
        {
            let mut state = self.inner.state.lock();
            state.parties = parties.max(1);
            state.arrived.clear();
            state.unobserved.clear();
        }
        self.inner.hub.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_releases_on_last_arrival() {
        let hub = SignalHub::new();
        let barrier = hub.barrier("present", 2);

        let a = barrier.arrive(0);
        assert!(!barrier.is_released(&a));
        assert!(!barrier.is_set());

        let b = barrier.arrive(1);
        assert!(barrier.is_released(&a));
        assert!(barrier.is_released(&b));
        assert!(barrier.is_set());

        barrier.observe(&a);
        assert!(barrier.is_set());
        barrier.observe(&b);
        assert!(!barrier.is_set());
    }

    #[test]
    fn test_duplicate_arrival_counts_once() {
        let hub = SignalHub::new();
        let barrier = hub.barrier("dup", 2);
        let first = barrier.arrive(0);
        barrier.arrive(0);
        assert!(!barrier.is_released(&first));
        assert_eq!(barrier.arrived(), 1);
    }

    #[test]
    fn test_next_round_while_previous_unobserved() {
        let hub = SignalHub::new();
        let barrier = hub.barrier("refresh", 2);
        let a1 = barrier.arrive(0);
        let b1 = barrier.arrive(1);
        barrier.observe(&a1);

        let a2 = barrier.arrive(0);
        assert!(!barrier.is_released(&a2));
        assert!(barrier.is_set());

        barrier.observe(&b1);
        let b2 = barrier.arrive(1);
        assert!(barrier.is_released(&a2));
        assert!(barrier.is_released(&b2));
    }

    #[test]
    fn test_withdraw_before_release() {
        let hub = SignalHub::new();
        let barrier = hub.barrier("trigger", 2);
        let a = barrier.arrive(0);
        assert!(barrier.withdraw(&a));
        assert_eq!(barrier.arrived(), 0);
    }

    #[test]
    fn test_threads_rendezvous() {
        let hub = SignalHub::new();
        let barrier = hub.barrier("sync", 3);

        let workers: Vec<_> = (0..3)
            .map(|slot| {
                let barrier = barrier.clone();
                let hub = Arc::clone(&hub);
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(slot as u64 * 3));
                    let ticket = barrier.arrive(slot);
                    let released = hub
                        .wait_until(Some(Duration::from_secs(2)), || {
                            barrier.is_released(&ticket).then_some(())
                        })
                        .is_some();
                    barrier.observe(&ticket);
                    released
                })
            })
            .collect();

        for worker in workers {
            assert!(worker.join().unwrap());
        }
        assert!(!barrier.is_set());
    }
}
