//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the rig: value types
//! exchanged between projector and camera threads, the narrow traits behind
//! which the render surface, camera SDKs and pattern decoder live, and the
//! rig configuration blueprint.
//!
//! ## Time Model
//! - All scheduling timestamps are [`Ticks`] of the monotonic clock
//!   (nanoseconds, [`TICKS_PER_SECOND`])
//! - `None` timestamps mean "unknown" (e.g. after a failed present)

mod blueprint;
mod device;
mod device_id;
mod error;
mod frame;
mod mode;
mod schedule;

pub use blueprint::*;
pub use device::*;
pub use device_id::DeviceId;
pub use error::*;
pub use frame::*;
pub use mode::AcquisitionMode;
pub use schedule::*;
