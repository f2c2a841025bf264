//! Pipeline orchestrator.
//!
//! The orchestrator owns the pull-process-decide loop and the metrics. It
//! moves through four states:
//!
//! ```text
//! Starting -> Running -> Draining -> Stopped
//! ```
//!
//! `Starting` validates configuration and spawns the capture and
//! processing threads; the transition to `Running` happens when the frame
//! source reports its first successful connect. `Running` repeats: pop a
//! frame, run motion detection, sample, hand to the detection and
//! description collaborators, de-duplicate, persist. Every per-frame stage
//! error is caught, counted, and logged in aggregate; the loop continues
//! with the next frame. Fatal conditions (queue closed, source permanently
//! dead, stop signal) transition to `Draining`: the in-flight frame is
//! finished, metrics are flushed once, and the state becomes `Stopped`.
//!
//! Shared-state policy: the dedup cache and metrics recorder are mutated
//! only from the processing thread. Capture-side counters are atomics
//! merged at snapshot time. Adding worker-pool parallelism to the
//! detection stage would require putting the cache and recorder behind
//! their own locks; the current design deliberately avoids that.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::cancel::{CancelToken, Latch};
use crate::config::PipelineConfig;
use crate::dedup::{DedupDecision, EventDeduplicator};
use crate::describe::Describer;
use crate::detect::{primary_detection, ObjectDetector};
use crate::frame::Frame;
use crate::metrics::{MetricsRecorder, PipelineMetrics, Stage};
use crate::motion::MotionDetector;
use crate::queue::FrameQueue;
use crate::sampler::FrameSampler;
use crate::source::{run_capture_loop, Backoff, FrameStream, SourceStats};
use crate::store::{Event, EventSink};

/// Log an aggregated repeat summary every this many identical failures.
const AGGREGATE_LOG_EVERY: u64 = 25;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl PipelineState {
    fn from_u8(value: u8) -> PipelineState {
        match value {
            0 => PipelineState::Starting,
            1 => PipelineState::Running,
            2 => PipelineState::Draining,
            _ => PipelineState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PipelineState::Starting => 0,
            PipelineState::Running => 1,
            PipelineState::Draining => 2,
            PipelineState::Stopped => 3,
        }
    }
}

/// Forward-only state cell. Transitions never move backwards, which makes
/// duplicate signals naturally idempotent.
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(PipelineState::Starting.as_u8()))
    }

    pub fn load(&self) -> PipelineState {
        PipelineState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Advance to `target` if it is ahead of the current state. Returns
    /// true when this call performed the transition.
    pub fn advance_to(&self, target: PipelineState) -> bool {
        let mut current = self.0.load(Ordering::SeqCst);
        loop {
            if current >= target.as_u8() {
                return false;
            }
            match self.0.compare_exchange(
                current,
                target.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

/// External collaborators consumed by the processing loop.
pub struct Collaborators {
    pub detector: Box<dyn ObjectDetector>,
    pub describer: Option<Box<dyn Describer>>,
    pub sink: Box<dyn EventSink>,
}

/// Hot-reloadable settings shared with the processing loop.
struct Tunables {
    generation: u64,
    motion_area_fraction: f32,
    sampling_rate: u32,
    suppression_window: Duration,
}

/// Aggregates repeated identical stage failures so a flapping collaborator
/// does not flood the log with one line per frame.
#[derive(Default)]
struct ErrorAggregator {
    entries: HashMap<&'static str, AggregatedFailure>,
}

struct AggregatedFailure {
    message: String,
    count: u64,
}

impl ErrorAggregator {
    fn record(&mut self, stage: &'static str, message: String) {
        use std::collections::hash_map::Entry;
        match self.entries.entry(stage) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.message == message {
                    entry.count += 1;
                    if entry.count % AGGREGATE_LOG_EVERY == 0 {
                        log::warn!(
                            "{} stage failure repeated {} times: {}",
                            stage,
                            entry.count,
                            entry.message
                        );
                    }
                } else {
                    if entry.count > 1 {
                        log::warn!(
                            "{} stage failure repeated {} times before changing: {}",
                            stage,
                            entry.count,
                            entry.message
                        );
                    }
                    log::warn!("{} stage failed: {}", stage, message);
                    entry.message = message;
                    entry.count = 1;
                }
            }
            Entry::Vacant(vacant) => {
                log::warn!("{} stage failed: {}", stage, message);
                vacant.insert(AggregatedFailure { message, count: 1 });
            }
        }
    }

    fn flush(&mut self) {
        for (stage, entry) in self.entries.drain() {
            if entry.count > 1 {
                log::warn!(
                    "{} stage failed {} times in total: {}",
                    stage,
                    entry.count,
                    entry.message
                );
            }
        }
    }

    #[cfg(test)]
    fn count(&self, stage: &'static str) -> u64 {
        self.entries.get(stage).map_or(0, |entry| entry.count)
    }
}

/// Cloneable stop signal. Safe to trigger from a signal handler thread.
#[derive(Clone)]
pub struct StopHandle {
    cancel: CancelToken,
    queue: Arc<FrameQueue>,
    state: Arc<StateCell>,
}

impl StopHandle {
    /// Request shutdown. Returns true when this call initiated the drain;
    /// duplicate signals are a logged no-op.
    pub fn stop(&self) -> bool {
        if self.cancel.cancel() {
            log::info!("stop requested, draining pipeline");
            self.state.advance_to(PipelineState::Draining);
            self.queue.close();
            true
        } else {
            log::debug!("stop already in progress, ignoring duplicate signal");
            false
        }
    }
}

/// The running pipeline: two threads joined by the bounded queue.
pub struct Pipeline {
    state: Arc<StateCell>,
    cancel: CancelToken,
    queue: Arc<FrameQueue>,
    metrics: Arc<Mutex<MetricsRecorder>>,
    source_stats: Arc<SourceStats>,
    tunables: Arc<Mutex<Tunables>>,
    config: Mutex<PipelineConfig>,
    stopped: Latch,
    capture_handle: Option<JoinHandle<()>>,
    process_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Validate the configuration and start the capture and processing
    /// threads. Configuration violations are rejected here, before any
    /// thread exists.
    pub fn start(
        config: PipelineConfig,
        stream: Box<dyn FrameStream>,
        mut collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;

        if let Err(err) = collaborators.detector.warm_up() {
            log::warn!(
                "detector {} warm-up failed: {}",
                collaborators.detector.name(),
                err
            );
        }

        let state = Arc::new(StateCell::new());
        let cancel = CancelToken::new();
        let queue = Arc::new(FrameQueue::new(config.queue_capacity));
        let metrics = Arc::new(Mutex::new(MetricsRecorder::default()));
        let source_stats = Arc::new(SourceStats::default());
        let stopped = Latch::new();
        let tunables = Arc::new(Mutex::new(Tunables {
            generation: 0,
            motion_area_fraction: config.motion_area_fraction(),
            sampling_rate: config.frame_sampling_rate,
            suppression_window: config.suppression_window(),
        }));

        let capture_handle = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            let stats = Arc::clone(&source_stats);
            let ready_state = Arc::clone(&state);
            let max_attempts = config.max_reconnect_attempts;
            std::thread::Builder::new()
                .name("sentinel-capture".to_string())
                .spawn(move || {
                    let on_ready = move || {
                        if ready_state.advance_to(PipelineState::Running) {
                            log::info!("frame source ready, pipeline running");
                        }
                    };
                    run_capture_loop(
                        stream,
                        &queue,
                        &cancel,
                        &stats,
                        Backoff::new(),
                        max_attempts,
                        &on_ready,
                    );
                })?
        };

        let process_handle = {
            let worker = ProcessWorker {
                queue: Arc::clone(&queue),
                cancel: cancel.clone(),
                state: Arc::clone(&state),
                metrics: Arc::clone(&metrics),
                source_stats: Arc::clone(&source_stats),
                tunables: Arc::clone(&tunables),
                stopped: stopped.clone(),
                motion: MotionDetector::new(config.motion_settings()),
                sampler: FrameSampler::new(config.frame_sampling_rate),
                dedup: EventDeduplicator::new(config.suppression_window()),
                detector: collaborators.detector,
                describer: collaborators.describer,
                sink: collaborators.sink,
                aggregator: ErrorAggregator::default(),
                describe_timeout: config.describe_timeout(),
                scene_change_fraction: config.scene_change_fraction,
                scene_change_frames: config.scene_change_frames,
            };
            std::thread::Builder::new()
                .name("sentinel-process".to_string())
                .spawn(move || worker.run())?
        };

        Ok(Self {
            state,
            cancel,
            queue,
            metrics,
            source_stats,
            tunables,
            config: Mutex::new(config),
            stopped,
            capture_handle: Some(capture_handle),
            process_handle: Some(process_handle),
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state.load()
    }

    /// Snapshot of the counters. Safe to call concurrently with the
    /// running loop; the caller gets a copy, never a live reference.
    pub fn metrics(&self) -> PipelineMetrics {
        self.metrics
            .lock()
            .expect("metrics lock poisoned")
            .snapshot(
                self.source_stats.frames_dropped(),
                self.source_stats.reconnect_attempts(),
            )
    }

    /// Current queue depth, for status reporting.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            cancel: self.cancel.clone(),
            queue: Arc::clone(&self.queue),
            state: Arc::clone(&self.state),
        }
    }

    /// Request shutdown. Idempotent; see `StopHandle::stop`.
    pub fn stop(&self) -> bool {
        self.stop_handle().stop()
    }

    /// Revalidate and apply a new configuration to the running pipeline.
    ///
    /// Only the hot tunables (motion threshold, sampling rate, suppression
    /// window) take effect; structural settings keep their current values
    /// and are reported at warn level.
    pub fn reload(&self, new_config: &PipelineConfig) -> Result<()> {
        new_config.validate()?;

        let mut current = self.config.lock().expect("config lock poisoned");
        if new_config.queue_capacity != current.queue_capacity {
            log::warn!("reload: queue_capacity change requires restart, keeping current value");
        }
        if new_config.background_learning_frames != current.background_learning_frames {
            log::warn!(
                "reload: background_learning_frames change requires restart, keeping current value"
            );
        }
        if new_config.max_reconnect_attempts != current.max_reconnect_attempts {
            log::warn!(
                "reload: max_reconnect_attempts change requires restart, keeping current value"
            );
        }

        current.motion_threshold = new_config.motion_threshold;
        current.frame_sampling_rate = new_config.frame_sampling_rate;
        current.suppression_window_secs = new_config.suppression_window_secs;

        let mut tunables = self.tunables.lock().expect("tunables lock poisoned");
        tunables.generation += 1;
        tunables.motion_area_fraction = new_config.motion_area_fraction();
        tunables.sampling_rate = new_config.frame_sampling_rate;
        tunables.suppression_window = new_config.suppression_window();
        log::info!(
            "reload applied: motion_threshold={} sampling_rate={} suppression_window={:?}",
            new_config.motion_threshold,
            new_config.frame_sampling_rate,
            tunables.suppression_window
        );
        Ok(())
    }

    /// Stop and wait for the drain, honoring the configured shutdown
    /// deadline. Past the deadline, in-flight work is abandoned rather
    /// than awaited.
    pub fn shutdown(mut self) -> PipelineMetrics {
        self.stop();
        let deadline = self
            .config
            .lock()
            .expect("config lock poisoned")
            .shutdown_deadline();

        if self.stopped.wait_timeout(deadline) {
            if let Some(handle) = self.process_handle.take() {
                let _ = handle.join();
            }
            if let Some(handle) = self.capture_handle.take() {
                if handle.is_finished() {
                    let _ = handle.join();
                } else {
                    log::debug!("capture thread still closing its stream, detaching");
                }
            }
        } else {
            log::warn!(
                "shutdown deadline {:?} exceeded, abandoning in-flight work",
                deadline
            );
            self.process_handle.take();
            self.capture_handle.take();
        }
        self.metrics()
    }

    /// Block until the pipeline reaches `Stopped` on its own (source
    /// exhausted or fatal) or the timeout passes. Returns true if stopped.
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        self.stopped.wait_timeout(timeout)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // A dropped pipeline must not leave detached threads spinning.
        self.stop_handle().stop();
    }
}

// ----------------------------------------------------------------------------
// Processing loop
// ----------------------------------------------------------------------------

struct ProcessWorker {
    queue: Arc<FrameQueue>,
    cancel: CancelToken,
    state: Arc<StateCell>,
    metrics: Arc<Mutex<MetricsRecorder>>,
    source_stats: Arc<SourceStats>,
    tunables: Arc<Mutex<Tunables>>,
    stopped: Latch,
    motion: MotionDetector,
    sampler: FrameSampler,
    dedup: EventDeduplicator,
    detector: Box<dyn ObjectDetector>,
    describer: Option<Box<dyn Describer>>,
    sink: Box<dyn EventSink>,
    aggregator: ErrorAggregator,
    describe_timeout: Duration,
    scene_change_fraction: f32,
    scene_change_frames: u32,
}

impl ProcessWorker {
    fn run(mut self) {
        let mut expected_seq = 1u64;
        let mut scene_saturated = 0u32;
        let mut tunables_generation = 0u64;

        loop {
            let Some(frame) = self.queue.pop() else {
                // Queue closed: stop signal or the source is gone.
                break;
            };
            if self.cancel.is_cancelled() {
                log::debug!("draining, discarding frame seq={}", frame.seq);
                break;
            }
            self.apply_reload(&mut tunables_generation);
            self.process_frame(frame, &mut expected_seq, &mut scene_saturated);
        }

        self.state.advance_to(PipelineState::Draining);
        self.finish();
    }

    fn apply_reload(&mut self, local_generation: &mut u64) {
        let (generation, fraction, rate, window) = {
            let tunables = self.tunables.lock().expect("tunables lock poisoned");
            (
                tunables.generation,
                tunables.motion_area_fraction,
                tunables.sampling_rate,
                tunables.suppression_window,
            )
        };
        if generation != *local_generation {
            self.motion.set_area_fraction(fraction);
            self.sampler.set_rate(rate);
            self.dedup.set_window(window);
            *local_generation = generation;
        }
    }

    fn process_frame(&mut self, frame: Frame, expected_seq: &mut u64, scene_saturated: &mut u32) {
        {
            let mut metrics = self.metrics.lock().expect("metrics lock poisoned");
            metrics.frames_captured += 1;
            if frame.seq > *expected_seq {
                metrics.sequence_gaps += 1;
                log::debug!(
                    "sequence gap: expected {}, got {} ({} frames dropped upstream)",
                    *expected_seq,
                    frame.seq,
                    frame.seq - *expected_seq
                );
            }
        }
        *expected_seq = frame.seq + 1;

        let motion_started = Instant::now();
        let motion = self.motion.detect(&frame);
        self.record_stage(Stage::Motion, motion_started.elapsed());

        // A sustained near-global change means the scene itself moved
        // (lighting flip, camera nudge); relearn instead of streaming
        // false positives.
        if motion.confidence >= self.scene_change_fraction {
            *scene_saturated += 1;
            if *scene_saturated >= self.scene_change_frames {
                log::warn!(
                    "scene change detected ({} saturated frames), relearning background",
                    scene_saturated
                );
                self.motion.reset();
                *scene_saturated = 0;
                let mut metrics = self.metrics.lock().expect("metrics lock poisoned");
                metrics.detector_resets += 1;
                return;
            }
        } else {
            *scene_saturated = 0;
        }

        if !motion.has_motion {
            return;
        }
        self.metrics
            .lock()
            .expect("metrics lock poisoned")
            .frames_with_motion += 1;

        // Sampling counts all captured frames via the sequence number, and
        // is only consulted for frames that already passed motion.
        if !self.sampler.should_process(frame.seq) {
            return;
        }
        self.metrics
            .lock()
            .expect("metrics lock poisoned")
            .frames_sampled += 1;

        let detect_started = Instant::now();
        let detections = match self.detector.detect(&frame) {
            Ok(detections) => {
                self.record_stage(Stage::Detect, detect_started.elapsed());
                detections
            }
            Err(err) => {
                self.record_stage(Stage::Detect, detect_started.elapsed());
                self.stage_failure("detect", &err);
                return;
            }
        };

        // De-duplication only sees non-empty detection sets.
        if detections.is_empty() {
            return;
        }

        match self.dedup.should_create_event(&detections, Instant::now()) {
            DedupDecision::Suppressed => {
                self.metrics
                    .lock()
                    .expect("metrics lock poisoned")
                    .events_suppressed += 1;
                return;
            }
            DedupDecision::Create => {}
        }

        let description = self.describe(&frame, &detections);

        let Some(primary) = primary_detection(&detections) else {
            return;
        };
        let event = Event {
            frame_seq: frame.seq,
            label: primary.label.clone(),
            confidence: primary.confidence,
            detections: detections.clone(),
            description,
            created_at_epoch_s: Event::epoch_seconds(frame.captured_at),
        };
        self.metrics
            .lock()
            .expect("metrics lock poisoned")
            .events_created += 1;

        let persist_started = Instant::now();
        let persisted = self.sink.persist(&event);
        self.record_stage(Stage::Persist, persist_started.elapsed());
        if let Err(err) = persisted {
            // Best-effort persistence: the event is lost, the loop is not.
            self.stage_failure("persist", &err);
        }
    }

    fn describe(&mut self, frame: &Frame, detections: &[crate::detect::Detection]) -> Option<String> {
        let describer = self.describer.as_mut()?;
        let started = Instant::now();
        let result = describer.describe(frame, detections, self.describe_timeout);
        let elapsed = started.elapsed();
        self.metrics
            .lock()
            .expect("metrics lock poisoned")
            .record_stage(Stage::Describe, elapsed);
        match result {
            Ok(text) => Some(text),
            Err(err) => {
                self.aggregator.record("describe", err.to_string());
                self.metrics
                    .lock()
                    .expect("metrics lock poisoned")
                    .stage_failures += 1;
                None
            }
        }
    }

    fn record_stage(&self, stage: Stage, elapsed: Duration) {
        self.metrics
            .lock()
            .expect("metrics lock poisoned")
            .record_stage(stage, elapsed);
    }

    fn stage_failure(&mut self, stage: &'static str, err: &anyhow::Error) {
        self.metrics
            .lock()
            .expect("metrics lock poisoned")
            .stage_failures += 1;
        self.aggregator.record(stage, err.to_string());
    }

    /// Final metrics flush, performed exactly once by the loop thread.
    fn finish(mut self) {
        self.aggregator.flush();
        let snapshot = self
            .metrics
            .lock()
            .expect("metrics lock poisoned")
            .snapshot(
                self.source_stats.frames_dropped(),
                self.source_stats.reconnect_attempts(),
            );
        log::info!(
            "pipeline drained: {} frames, {} with motion, {} sampled, {} events ({} suppressed), {} dropped",
            snapshot.frames_captured,
            snapshot.frames_with_motion,
            snapshot.frames_sampled,
            snapshot.events_created,
            snapshot.events_suppressed,
            snapshot.frames_dropped
        );
        self.state.advance_to(PipelineState::Stopped);
        self.stopped.set();
    }
}
