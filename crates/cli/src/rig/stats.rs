//! Run statistics.

use std::time::Duration;

use observability::AcquisitionSummary;
use serde::Serialize;

/// Outcome of one batch on one projector
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch: u32,
    pub projector: String,
    /// Frames presented during the batch
    pub projected: u32,
    /// Frames captured by every attached camera
    pub captured: u32,
    pub duration: Duration,
    /// Presented keys missing from the worst camera
    pub dropped_keys: usize,
}

/// Statistics from a rig run
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub batches: Vec<BatchReport>,

    /// Per-projector frame statistics since its last prepare
    pub summaries: Vec<(String, AcquisitionSummary)>,

    /// Presents issued on every surface, preview included
    pub surface_presents: u64,

    /// Total duration of the run
    pub duration: Duration,
}

impl RunStats {
    pub fn frames_projected(&self) -> u64 {
        self.batches.iter().map(|b| u64::from(b.projected)).sum()
    }

    pub fn frames_captured(&self) -> u64 {
        self.batches.iter().map(|b| u64::from(b.captured)).sum()
    }

    /// Percentage of projected frames that were not captured
    pub fn drop_rate(&self) -> f64 {
        let projected = self.frames_projected();
        if projected == 0 {
            return 0.0;
        }
        let dropped: usize = self.batches.iter().map(|b| b.dropped_keys).sum();
        dropped as f64 / projected as f64 * 100.0
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Acquisition Statistics ===\n");
        println!("Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Batches: {}", self.batches.len());
        println!("   ├─ Frames projected: {}", self.frames_projected());
        println!("   ├─ Frames captured: {}", self.frames_captured());
        println!("   ├─ Surface presents: {}", self.surface_presents);
        println!("   └─ Drop rate: {:.2}%", self.drop_rate());

        println!("\nBatches");
        for (i, report) in self.batches.iter().enumerate() {
            let prefix = if i + 1 == self.batches.len() { "└─" } else { "├─" };
            println!(
                "   {} #{} {}: {} projected, {} captured, {} dropped in {:.2}s",
                prefix,
                report.batch,
                report.projector,
                report.projected,
                report.captured,
                report.dropped_keys,
                report.duration.as_secs_f64()
            );
        }

        for (projector, summary) in &self.summaries {
            println!("\nProjector {projector}");
            println!("{summary}");
        }
        println!();
    }
}
