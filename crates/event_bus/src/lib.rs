//! # Event Bus
//!
//! Named synchronization signals shared by the projector, camera and decoder
//! threads of a scanning rig.
//!
//! Every [`Signal`] and [`CountingBarrier`] is created from a [`SignalHub`].
//! The hub owns a single condition variable, so a thread can block on any
//! combination of signals and barriers created from the same hub:
//!
//! - [`SignalHub::wait_any`] - first of a set
//! - [`SignalHub::wait_all`] - every member of a set, cancellable by another set
//! - [`SignalHub::wait_until`] - arbitrary predicate over hub-owned state
//!
//! ## Example
//!
//! ```
//! use event_bus::{SignalHub, WaitOutcome};
//! use std::time::Duration;
//!
//! let hub = SignalHub::new();
//! let ready = hub.signal("camera-ready");
//! let terminate = hub.signal("terminate");
//!
//! ready.set();
//! let outcome = hub.wait_any(&[&terminate, &ready], Some(Duration::from_millis(10)));
//! assert_eq!(outcome, WaitOutcome::Signaled(1));
//! ```

mod barrier;
mod hub;
mod signal;

pub use barrier::{BarrierTicket, CountingBarrier};
pub use hub::{SignalHub, WaitOutcome};
pub use signal::Signal;
