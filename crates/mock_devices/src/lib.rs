//! # Mock Devices
//!
//! Simulated collaborators of the projector engine: a render surface with a
//! refresh pulse clock, cameras with their own acquisition threads and an
//! in-memory pattern source. Used by the `scanrig run` command and the
//! end-to-end tests in place of graphics, camera SDK and decoder bindings.

mod camera;
mod source;
mod surface;

pub use camera::{Capture, MockCamera, MockCameraConfig};
pub use source::{MockFrameSource, PatternSet};
pub use surface::{MockSurface, MockSurfaceConfig, SurfaceCalls};
