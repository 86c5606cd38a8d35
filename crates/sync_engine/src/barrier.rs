//! Multi-projector barrier coordinator.
//!
//! Projectors of one sync group meet at three points per frame. Each
//! crossing:
//! 1. polls until the previous round of the point has been observed by every
//!    member (logging one `BarrierStall` and backing off 1 ms per retry),
//! 2. arrives at the counting barrier, publishing its surface counters,
//! 3. blocks until the round releases, or aborts on terminate/prepare,
//! 4. on release observes the round and compares its counters with every
//!    peer's published counters, logging each mismatch.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use contracts::{DeviceId, SyncFault};
use event_bus::{CountingBarrier, Signal, SignalHub};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::surface::SurfaceSnapshot;

/// Backoff between polls while the previous round is still being observed
pub const STALL_BACKOFF: Duration = Duration::from_millis(1);

/// Barrier point within one frame cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierPoint {
    /// Before presenting
    Present,
    /// Before the post-present refresh wait
    RefreshWait,
    /// Before triggering cameras (blocking and fixed modes)
    Trigger,
}

impl BarrierPoint {
    pub const ALL: [BarrierPoint; 3] = [
        BarrierPoint::Present,
        BarrierPoint::RefreshWait,
        BarrierPoint::Trigger,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BarrierPoint::Present => "present",
            BarrierPoint::RefreshWait => "refresh_wait",
            BarrierPoint::Trigger => "trigger",
        }
    }

    fn index(self) -> usize {
        match self {
            BarrierPoint::Present => 0,
            BarrierPoint::RefreshWait => 1,
            BarrierPoint::Trigger => 2,
        }
    }
}

/// Result of one barrier crossing
#[derive(Debug, Clone, PartialEq)]
pub enum CrossOutcome {
    /// Every member arrived
    Released {
        /// Peers whose counters differed from ours
        mismatches: Vec<DeviceId>,
        /// Stall logged while waiting for the previous round
        stall: Option<SyncFault>,
    },
    /// Cancel signal at this index was set
    Aborted(usize),
}

#[derive(Debug, Clone)]
struct Member {
    id: DeviceId,
    slot: usize,
}

/// Group of projectors presenting in lock-step
pub struct SyncGroup {
    name: String,
    hub: Arc<SignalHub>,
    barriers: [CountingBarrier; 3],
    members: RwLock<Vec<Member>>,
    /// Counters published at arrival, per point and slot
    published: Mutex<[Vec<Option<SurfaceSnapshot>>; 3]>,
    next_slot: Mutex<usize>,
}

impl fmt::Debug for SyncGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncGroup")
            .field("name", &self.name)
            .field("members", &self.member_ids())
            .finish()
    }
}

impl SyncGroup {
    pub fn new(hub: &Arc<SignalHub>, name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        let barriers = BarrierPoint::ALL.map(|point| hub.barrier(format!("{name}/{}", point.name()), 1));
        Arc::new(Self {
            name,
            hub: Arc::clone(hub),
            barriers,
            members: RwLock::new(Vec::new()),
            published: Mutex::new([Vec::new(), Vec::new(), Vec::new()]),
            next_slot: Mutex::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    pub fn member_ids(&self) -> Vec<DeviceId> {
        self.members.read().iter().map(|m| m.id.clone()).collect()
    }

    /// Slot of `id`, if it is a member
    pub fn slot_of(&self, id: &DeviceId) -> Option<usize> {
        self.members
            .read()
            .iter()
            .find(|m| &m.id == id)
            .map(|m| m.slot)
    }

    /// Add a member and resize every barrier. Returns the member's slot.
    ///
    /// Membership changes must happen while no member is inside a crossing.
    pub fn join(&self, id: DeviceId) -> usize {
        if let Some(slot) = self.slot_of(&id) {
            return slot;
        }
        let slot = {
            let mut next = self.next_slot.lock();
            let slot = *next;
            *next += 1;
            slot
        };
        let parties = {
            let mut members = self.members.write();
            members.push(Member { id, slot });
            members.len()
        };
        self.resize(parties);
        slot
    }

    /// Remove a member. Returns the remaining member count.
    pub fn leave(&self, id: &DeviceId) -> usize {
        let parties = {
            let mut members = self.members.write();
            members.retain(|m| &m.id != id);
            members.len()
        };
        self.resize(parties);
        parties
    }

    /// Rename a member after an identity change
    pub fn rename(&self, old: &DeviceId, new: DeviceId) {
        if let Some(member) = self.members.write().iter_mut().find(|m| &m.id == old) {
            member.id = new;
        }
    }

    fn resize(&self, parties: usize) {
        for barrier in &self.barriers {
            barrier.reset(parties);
        }
        let mut published = self.published.lock();
        for slots in published.iter_mut() {
            slots.clear();
        }
    }

    /// Cross `point` as member `slot`.
    ///
    /// `cancel` aborts the crossing as soon as any of its signals is set.
    pub fn cross(
        &self,
        point: BarrierPoint,
        slot: usize,
        me: &DeviceId,
        counters: SurfaceSnapshot,
        cancel: &[&Signal],
    ) -> CrossOutcome {
        let barrier = &self.barriers[point.index()];

        let mut stall = None;
        loop {
            if let Some(index) = cancel.iter().position(|s| s.is_set()) {
                debug!(group = %self.name, point = point.name(), "barrier crossing aborted before arrival");
                return CrossOutcome::Aborted(index);
            }
            if !barrier.is_set() {
                break;
            }
            if stall.is_none() {
                let fault = SyncFault::BarrierStall {
                    point: point.name(),
                    projector: me.clone(),
                };
                warn!(group = %self.name, error = %fault, "previous barrier round not yet observed");
                stall = Some(fault);
            }
            std::thread::sleep(STALL_BACKOFF);
        }

        self.publish(point, slot, counters);
        let ticket = barrier.arrive(slot);

        let outcome = self.hub.wait_until(None, || {
            if let Some(index) = cancel.iter().position(|s| s.is_set()) {
                return Some(Err(index));
            }
            barrier.is_released(&ticket).then_some(Ok(()))
        });

        match outcome {
            Some(Ok(())) => {
                let mismatches = self.compare(point, slot, me, counters);
                barrier.observe(&ticket);
                CrossOutcome::Released { mismatches, stall }
            }
            Some(Err(index)) => {
                if !barrier.withdraw(&ticket) {
                    debug!(group = %self.name, point = point.name(), "barrier released while aborting");
                }
                debug!(group = %self.name, point = point.name(), "barrier crossing aborted");
                CrossOutcome::Aborted(index)
            }
            None => CrossOutcome::Aborted(cancel.len()),
        }
    }

    fn publish(&self, point: BarrierPoint, slot: usize, counters: SurfaceSnapshot) {
        let mut published = self.published.lock();
        let slots = &mut published[point.index()];
        if slots.len() <= slot {
            slots.resize(slot + 1, None);
        }
        slots[slot] = Some(counters);
    }

    fn compare(
        &self,
        point: BarrierPoint,
        slot: usize,
        me: &DeviceId,
        mine: SurfaceSnapshot,
    ) -> Vec<DeviceId> {
        let members = self.members.read().clone();
        let published = self.published.lock();
        let slots = &published[point.index()];

        let mut mismatches = Vec::new();
        for peer in members.iter().filter(|m| m.slot != slot) {
            let Some(theirs) = slots.get(peer.slot).copied().flatten() else {
                continue;
            };
            if theirs.present_counter != mine.present_counter
                || theirs.refresh_counter != mine.refresh_counter
            {
                warn!(
                    group = %self.name,
                    point = point.name(),
                    projector = %me,
                    peer = %peer.id,
                    present = mine.present_counter,
                    peer_present = theirs.present_counter,
                    refresh = mine.refresh_counter,
                    peer_refresh = theirs.refresh_counter,
                    "sync peer counters diverge"
                );
                mismatches.push(peer.id.clone());
            }
        }
        mismatches
    }
}
