//! Trigger schedule queue.
//!
//! One entry per frame presented in non-blocking mode. The tail is the only
//! open entry; pushing the next presentation closes it by back-patching the
//! achieved next-present fields and tightening its latest deadline.

use std::collections::VecDeque;

use contracts::{NextPresentation, SyncFault, Ticks, TriggerScheduleEntry};
use thiserror::Error;
use tracing::warn;

use crate::clock::ticks_to_micros;
use crate::surface::SurfaceSnapshot;
use crate::timing::TimingBudget;

/// Where `now` falls relative to an entry's trigger window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerWindow {
    /// Before the recommended tick
    Early,
    /// `recommended <= now < latest`
    Open,
    /// At or after the latest tick
    Expired,
}

impl TriggerWindow {
    /// Classify `now` against `entry`
    pub fn classify(entry: &TriggerScheduleEntry, now: Ticks) -> Self {
        if now >= entry.latest_trigger {
            TriggerWindow::Expired
        } else if now >= entry.recommended_trigger {
            TriggerWindow::Open
        } else {
            TriggerWindow::Early
        }
    }
}

/// Rejected push
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("entry {key} (present {present_counter}) does not follow tail {tail_key} (present {tail_present_counter})")]
    OutOfOrder {
        key: u64,
        present_counter: u64,
        tail_key: u64,
        tail_present_counter: u64,
    },
}

/// Open a schedule entry for a frame presented at `present_tick`
pub fn open_entry(
    key: u64,
    present_counter: u64,
    refresh_counter: u64,
    present_tick: Ticks,
    budget: &TimingBudget,
) -> TriggerScheduleEntry {
    TriggerScheduleEntry {
        key,
        present_counter,
        refresh_counter,
        present_tick,
        expected_next: NextPresentation {
            refresh_counter: refresh_counter + u64::from(budget.present_intervals),
            tick: present_tick + budget.present_ticks,
        },
        next_presented: None,
        earliest_trigger: present_tick + budget.delay_ticks,
        recommended_trigger: present_tick + budget.recommended_offset,
        latest_trigger: present_tick + budget.latest_offset,
    }
}

/// Ordered queue of trigger windows
#[derive(Debug, Default)]
pub struct TriggerQueue {
    entries: VecDeque<TriggerScheduleEntry>,
}

impl TriggerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entry`, closing the current tail.
    ///
    /// Keys and present counters must strictly increase; the refresh counter
    /// must not go backwards.
    pub fn push(
        &mut self,
        entry: TriggerScheduleEntry,
        budget: &TimingBudget,
    ) -> Result<(), ScheduleError> {
        if let Some(tail) = self.entries.back_mut() {
            if entry.key <= tail.key
                || entry.present_counter <= tail.present_counter
                || entry.refresh_counter < tail.refresh_counter
            {
                return Err(ScheduleError::OutOfOrder {
                    key: entry.key,
                    present_counter: entry.present_counter,
                    tail_key: tail.key,
                    tail_present_counter: tail.present_counter,
                });
            }
            tail.next_presented = Some(NextPresentation {
                refresh_counter: entry.refresh_counter,
                tick: entry.present_tick,
            });
            tail.latest_trigger = tail
                .latest_trigger
                .min(budget.closed_latest(entry.present_tick));
        }
        self.entries.push_back(entry);
        Ok(())
    }

    pub fn peek(&self) -> Option<&TriggerScheduleEntry> {
        self.entries.front()
    }

    pub fn pop(&mut self) -> Option<TriggerScheduleEntry> {
        self.entries.pop_front()
    }

    /// Drop every head entry whose latest deadline lies before `now`.
    ///
    /// Afterwards the head (if any) satisfies `latest_trigger >= now`.
    pub fn remove_expired(&mut self, now: Ticks, surface: SurfaceSnapshot) -> Vec<SyncFault> {
        let mut dropped = Vec::new();
        while let Some(head) = self.entries.front() {
            if head.latest_trigger >= now {
                break;
            }
            let late_by_us = ticks_to_micros(now - head.latest_trigger);
            warn!(
                key = head.key,
                late_by_us,
                present_counter = head.present_counter,
                surface_present = surface.present_counter,
                surface_refresh = surface.refresh_counter,
                "trigger window expired, entry dropped"
            );
            dropped.push(SyncFault::TriggerDropped {
                key: head.key,
                late_by_us,
            });
            self.entries.pop_front();
        }
        dropped
    }

    /// Drain every entry without firing
    pub fn clear(&mut self) -> usize {
        let drained = self.entries.len();
        self.entries.clear();
        drained
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TriggerScheduleEntry> {
        self.entries.iter()
    }
}
