//! Diagnostic ring buffers.
//!
//! Bounded traces of the most recent handled events and control messages.
//! Oldest records are overwritten; nothing in the engine reads them back.

use std::time::Duration;

use contracts::Ticks;
use ringbuf::{traits::*, HeapRb};
use serde::Serialize;

use crate::transition::EngineEvent;

/// Default capacity of each ring
pub const DEFAULT_TRACE_CAPACITY: usize = 256;

/// One handled event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventTrace {
    pub event: EngineEvent,
    pub duration: Duration,
    pub started: Ticks,
    pub finished: Ticks,
}

/// Control command codes recorded in [`MessageTrace`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u32)]
pub enum ControlMessage {
    StartBatch = 1,
    PrepareReconfigure = 2,
    ResumePreview = 3,
    AddCamera = 4,
    RemoveCamera = 5,
    AddSyncPeers = 6,
    RemoveSyncPeers = 7,
    SetDisplayAndDelay = 8,
    SetAcquisitionMode = 9,
    ChangeIdentity = 10,
    SurfaceReconfigure = 11,
    Terminate = 12,
}

/// One control message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MessageTrace {
    pub message_id: u32,
    pub wparam: u64,
    pub lparam: i64,
}

impl MessageTrace {
    pub fn new(message: ControlMessage, wparam: u64, lparam: i64) -> Self {
        Self {
            message_id: message as u32,
            wparam,
            lparam,
        }
    }
}

/// Copy of both rings, oldest first
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosticsSnapshot {
    pub events: Vec<EventTrace>,
    pub messages: Vec<MessageTrace>,
}

pub struct Diagnostics {
    events: HeapRb<EventTrace>,
    messages: HeapRb<MessageTrace>,
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("events", &self.events.occupied_len())
            .field("messages", &self.messages.occupied_len())
            .finish()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_CAPACITY)
    }
}

impl Diagnostics {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: HeapRb::new(capacity),
            messages: HeapRb::new(capacity),
        }
    }

    pub fn push_event(&mut self, trace: EventTrace) {
        self.events.push_overwrite(trace);
    }

    pub fn push_message(&mut self, trace: MessageTrace) {
        self.messages.push_overwrite(trace);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            events: self.events.iter().copied().collect(),
            messages: self.messages.iter().copied().collect(),
        }
    }
}
