//! Pipeline counters and rolling per-stage timing statistics.
//!
//! The recorder is owned by the orchestrator and mutated only from the
//! processing loop; hosts read it through cloned `PipelineMetrics`
//! snapshots, never a live reference. Counters are monotonic for the life
//! of the process. Timings are rolling statistics over a bounded window of
//! recent samples so a long-running pipeline reflects current behavior.

use std::collections::VecDeque;
use std::time::Duration;

/// Number of recent samples kept per stage for mean/p95/max.
const TIMING_WINDOW: usize = 256;

/// Processing stages with recorded timings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Motion,
    Detect,
    Describe,
    Persist,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Motion => "motion",
            Stage::Detect => "detect",
            Stage::Describe => "describe",
            Stage::Persist => "persist",
        }
    }
}

/// Read-only snapshot of the pipeline counters, safe to hold while the
/// pipeline keeps running.
#[derive(Clone, Debug, Default)]
pub struct PipelineMetrics {
    pub frames_captured: u64,
    pub frames_with_motion: u64,
    pub frames_sampled: u64,
    pub events_created: u64,
    pub events_suppressed: u64,
    pub stage_failures: u64,
    /// Frames evicted from the queue under overflow (capture side).
    pub frames_dropped: u64,
    /// Reconnection attempts made by the capture loop (capture side).
    pub reconnect_attempts: u64,
    pub detector_resets: u64,
    /// Sequence-number gaps observed by the processing loop.
    pub sequence_gaps: u64,
    pub stage_timings: StageTimings,
}

#[derive(Clone, Debug, Default)]
pub struct StageTimings {
    pub motion: StageTiming,
    pub detect: StageTiming,
    pub describe: StageTiming,
    pub persist: StageTiming,
}

impl StageTimings {
    pub fn for_stage(&self, stage: Stage) -> &StageTiming {
        match stage {
            Stage::Motion => &self.motion,
            Stage::Detect => &self.detect,
            Stage::Describe => &self.describe,
            Stage::Persist => &self.persist,
        }
    }
}

/// Rolling timing statistics for one stage.
#[derive(Clone, Debug, Default)]
pub struct StageTiming {
    /// Total samples recorded since start (not just the window).
    pub samples: u64,
    pub mean: Duration,
    pub p95: Duration,
    pub max: Duration,
}

/// Mutable recorder behind the orchestrator's metrics lock.
#[derive(Default)]
pub(crate) struct MetricsRecorder {
    pub frames_captured: u64,
    pub frames_with_motion: u64,
    pub frames_sampled: u64,
    pub events_created: u64,
    pub events_suppressed: u64,
    pub stage_failures: u64,
    pub detector_resets: u64,
    pub sequence_gaps: u64,
    motion: StageWindow,
    detect: StageWindow,
    describe: StageWindow,
    persist: StageWindow,
}

impl MetricsRecorder {
    pub fn record_stage(&mut self, stage: Stage, elapsed: Duration) {
        self.window_mut(stage).record(elapsed);
    }

    fn window_mut(&mut self, stage: Stage) -> &mut StageWindow {
        match stage {
            Stage::Motion => &mut self.motion,
            Stage::Detect => &mut self.detect,
            Stage::Describe => &mut self.describe,
            Stage::Persist => &mut self.persist,
        }
    }

    /// Build a snapshot, merging in the capture-side counters.
    pub fn snapshot(&self, frames_dropped: u64, reconnect_attempts: u64) -> PipelineMetrics {
        PipelineMetrics {
            frames_captured: self.frames_captured,
            frames_with_motion: self.frames_with_motion,
            frames_sampled: self.frames_sampled,
            events_created: self.events_created,
            events_suppressed: self.events_suppressed,
            stage_failures: self.stage_failures,
            frames_dropped,
            reconnect_attempts,
            detector_resets: self.detector_resets,
            sequence_gaps: self.sequence_gaps,
            stage_timings: StageTimings {
                motion: self.motion.snapshot(),
                detect: self.detect.snapshot(),
                describe: self.describe.snapshot(),
                persist: self.persist.snapshot(),
            },
        }
    }
}

#[derive(Default)]
struct StageWindow {
    samples: u64,
    window: VecDeque<Duration>,
}

impl StageWindow {
    fn record(&mut self, elapsed: Duration) {
        self.samples += 1;
        if self.window.len() == TIMING_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(elapsed);
    }

    fn snapshot(&self) -> StageTiming {
        if self.window.is_empty() {
            return StageTiming {
                samples: self.samples,
                ..StageTiming::default()
            };
        }
        let mut sorted: Vec<Duration> = self.window.iter().copied().collect();
        sorted.sort_unstable();
        let total: Duration = sorted.iter().sum();
        let p95_index = (sorted.len() - 1) * 95 / 100;
        StageTiming {
            samples: self.samples,
            mean: total / sorted.len() as u32,
            p95: sorted[p95_index],
            max: *sorted.last().expect("window is non-empty"),
        }
    }
}
