//! Simulated rig orchestration.

mod orchestrator;
mod stats;

pub use orchestrator::{Rig, RigConfig};
pub use stats::RunStats;
