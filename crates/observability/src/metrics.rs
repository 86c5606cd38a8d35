//! Projector metrics
//!
//! Recording helpers called by the projector loop, plus an in-memory
//! aggregator for per-batch statistics.

use std::time::Duration;

use contracts::SyncFault;
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};

/// Register units and help text with the installed recorder
pub fn describe() {
    describe_counter!("scanrig_frames_presented_total", "Patterns presented during batches");
    describe_histogram!(
        "scanrig_present_duration_us",
        Unit::Microseconds,
        "Time spent in the present call"
    );
    describe_histogram!(
        "scanrig_render_duration_us",
        Unit::Microseconds,
        "Time spent drawing a pattern into the back buffer"
    );
    describe_histogram!(
        "scanrig_refresh_wait_us",
        Unit::Microseconds,
        "Time blocked on the refresh pulse"
    );
    describe_counter!("scanrig_triggers_fired_total", "Camera triggers by outcome");
    describe_counter!(
        "scanrig_triggers_dropped_total",
        "Scheduled triggers whose window closed unfired"
    );
    describe_counter!("scanrig_sync_faults_total", "Absorbed engine faults by kind");
    describe_counter!("scanrig_barrier_stalls_total", "Sync group barriers that timed out");
    describe_gauge!("scanrig_trigger_schedule_depth", "Pending trigger schedule entries");
    describe_counter!("scanrig_batches_total", "Finished batches by confirmation status");
    describe_gauge!("scanrig_batch_frames", "Patterns projected in the last batch");
}

/// Record a successful present
///
/// # Example
///
/// ```ignore
/// use observability::metrics::record_frame_presented;
///
/// record_frame_presented("prj_left", present_duration);
/// ```
pub fn record_frame_presented(projector: &str, duration: Duration) {
    counter!(
        "scanrig_frames_presented_total",
        "projector" => projector.to_string()
    )
    .increment(1);
    histogram!(
        "scanrig_present_duration_us",
        "projector" => projector.to_string()
    )
    .record(duration.as_secs_f64() * 1e6);
}

/// Record render duration
pub fn record_render_duration(projector: &str, duration: Duration) {
    histogram!(
        "scanrig_render_duration_us",
        "projector" => projector.to_string()
    )
    .record(duration.as_secs_f64() * 1e6);
}

/// Record how long the refresh-pulse wait blocked
pub fn record_refresh_wait(projector: &str, duration: Duration) {
    histogram!(
        "scanrig_refresh_wait_us",
        "projector" => projector.to_string()
    )
    .record(duration.as_secs_f64() * 1e6);
}

/// Record one trigger sent to a camera
pub fn record_trigger_fired(projector: &str, camera: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "scanrig_triggers_fired_total",
        "projector" => projector.to_string(),
        "camera" => camera.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record a trigger-schedule entry that expired unfired
pub fn record_trigger_dropped(projector: &str) {
    counter!(
        "scanrig_triggers_dropped_total",
        "projector" => projector.to_string()
    )
    .increment(1);
}

/// Record an absorbed engine fault
pub fn record_sync_fault(projector: &str, fault: &SyncFault) {
    counter!(
        "scanrig_sync_faults_total",
        "projector" => projector.to_string(),
        "kind" => fault.kind()
    )
    .increment(1);

    if matches!(fault, SyncFault::BarrierStall { .. }) {
        counter!(
            "scanrig_barrier_stalls_total",
            "projector" => projector.to_string()
        )
        .increment(1);
    }
}

/// Record trigger-queue depth after an expiry pass
pub fn record_schedule_depth(projector: &str, depth: usize) {
    gauge!(
        "scanrig_trigger_schedule_depth",
        "projector" => projector.to_string()
    )
    .set(depth as f64);
}

/// Record the end of a batch
pub fn record_batch_completed(projector: &str, frames: u64, confirmed: bool) {
    let status = if confirmed { "confirmed" } else { "timeout" };
    counter!(
        "scanrig_batches_total",
        "projector" => projector.to_string(),
        "status" => status
    )
    .increment(1);
    gauge!(
        "scanrig_batch_frames",
        "projector" => projector.to_string()
    )
    .set(frames as f64);
}

/// Per-batch acquisition statistics
///
/// Durations are aggregated in microseconds, present frequency in Hz.
#[derive(Debug, Clone, Default)]
pub struct AcquisitionAggregator {
    /// Frames presented
    pub frames_presented: u64,

    /// Triggers fired (all cameras)
    pub triggers_fired: u64,

    /// Trigger-schedule entries dropped
    pub triggers_dropped: u64,

    /// Faults absorbed
    pub faults: u64,

    pub render_stats: RunningStats,
    pub present_stats: RunningStats,
    pub refresh_wait_stats: RunningStats,

    /// Frequency derived from consecutive present ticks
    pub present_frequency: RunningStats,
}

impl AcquisitionAggregator {
    /// Create new aggregator
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_render(&mut self, duration: Duration) {
        self.render_stats.push(duration.as_secs_f64() * 1e6);
    }

    /// Record a present; `since_previous` is the gap to the previous present
    pub fn push_present(&mut self, duration: Duration, since_previous: Option<Duration>) {
        self.frames_presented += 1;
        self.present_stats.push(duration.as_secs_f64() * 1e6);
        if let Some(gap) = since_previous.filter(|gap| !gap.is_zero()) {
            self.present_frequency.push(1.0 / gap.as_secs_f64());
        }
    }

    pub fn push_refresh_wait(&mut self, duration: Duration) {
        self.refresh_wait_stats.push(duration.as_secs_f64() * 1e6);
    }

    /// Generate summary report
    pub fn summary(&self) -> AcquisitionSummary {
        AcquisitionSummary {
            frames_presented: self.frames_presented,
            triggers_fired: self.triggers_fired,
            triggers_dropped: self.triggers_dropped,
            faults: self.faults,
            render_us: StatsSummary::from(&self.render_stats),
            present_us: StatsSummary::from(&self.present_stats),
            refresh_wait_us: StatsSummary::from(&self.refresh_wait_stats),
            present_hz: StatsSummary::from(&self.present_frequency),
        }
    }

    /// Reset statistics
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Acquisition summary
#[derive(Debug, Clone, Default)]
pub struct AcquisitionSummary {
    pub frames_presented: u64,
    pub triggers_fired: u64,
    pub triggers_dropped: u64,
    pub faults: u64,
    pub render_us: StatsSummary,
    pub present_us: StatsSummary,
    pub refresh_wait_us: StatsSummary,
    pub present_hz: StatsSummary,
}

impl std::fmt::Display for AcquisitionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Frames presented: {}", self.frames_presented)?;
        writeln!(f, "Triggers fired: {}", self.triggers_fired)?;
        writeln!(f, "Triggers dropped: {}", self.triggers_dropped)?;
        writeln!(f, "Faults: {}", self.faults)?;
        writeln!(f, "Render (us): {}", self.render_us)?;
        writeln!(f, "Present (us): {}", self.present_us)?;
        writeln!(f, "Refresh wait (us): {}", self.refresh_wait_us)?;
        write!(f, "Present rate (Hz): {}", self.present_hz)
    }
}

/// Statistics summary
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online statistics (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// Add a sample
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();

        for value in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(value);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_present_frequency() {
        let mut aggregator = AcquisitionAggregator::new();
        aggregator.push_present(Duration::from_micros(200), None);
        aggregator.push_present(Duration::from_micros(300), Some(Duration::from_millis(10)));
        aggregator.push_present(Duration::from_micros(250), Some(Duration::ZERO));

        let summary = aggregator.summary();
        assert_eq!(summary.frames_presented, 3);
        assert_eq!(summary.present_hz.count, 1);
        assert!((summary.present_hz.mean - 100.0).abs() < 1e-9);
        assert!((summary.present_us.mean - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregator_reset() {
        let mut aggregator = AcquisitionAggregator::new();
        aggregator.triggers_fired = 4;
        aggregator.push_render(Duration::from_micros(50));
        aggregator.reset();
        assert_eq!(aggregator.summary().triggers_fired, 0);
        assert_eq!(aggregator.render_stats.count(), 0);
    }

    #[test]
    fn test_summary_display() {
        let summary = AcquisitionAggregator::new().summary();
        let text = summary.to_string();
        assert!(text.contains("Frames presented: 0"));
        assert!(text.contains("N/A"));
    }
}
