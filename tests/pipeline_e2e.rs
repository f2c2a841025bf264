//! End-to-end pipeline tests driving the real capture thread, queue, and
//! orchestrator loop with scripted sources.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;

use sentinel_core::{
    Collaborators, ConfigError, Describer, Detection, Event, EventSink, Frame, Pipeline,
    PipelineConfig, PipelineState, RawImage, ScriptedRead, ScriptedStream, SourceSettings,
    StubDescriber, StubDetector, SyntheticStream,
};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;

/// Flat scene, optionally with an 80x60 bright rectangle (6.25% of the
/// frame area, well above the default 2% threshold).
fn scene(with_rectangle: bool) -> RawImage {
    let mut data = vec![40u8; (WIDTH * HEIGHT) as usize * 3];
    if with_rectangle {
        for y in 40..100usize {
            for x in 40..120usize {
                let offset = (y * WIDTH as usize + x) * 3;
                data[offset..offset + 3].copy_from_slice(&[220; 3]);
            }
        }
    }
    RawImage::new(data, WIDTH, HEIGHT)
}

#[derive(Clone, Default)]
struct RecordingSink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventSink for RecordingSink {
    fn persist(&mut self, event: &Event) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct FailingSink;

impl EventSink for FailingSink {
    fn persist(&mut self, _event: &Event) -> Result<()> {
        anyhow::bail!("database is gone")
    }
}

/// Stands in for a description collaborator that always times out.
struct TimingOutDescriber;

impl Describer for TimingOutDescriber {
    fn name(&self) -> &'static str {
        "timing-out"
    }

    fn describe(
        &mut self,
        _frame: &Frame,
        _detections: &[Detection],
        timeout: Duration,
    ) -> Result<String> {
        anyhow::bail!("description timed out after {:?}", timeout)
    }
}

#[test]
fn thousand_frame_scenario_produces_one_event() {
    // Frames 200-250 contain a moving-object stand-in; everything else is
    // a static scene. The learning phase covers the first 100 frames.
    let reads: Vec<ScriptedRead> = (1..=1000u64)
        .map(|seq| ScriptedRead::Frame(scene((200..=250).contains(&seq))))
        .collect();

    let config = PipelineConfig {
        frame_sampling_rate: 10,
        // Hold the whole scripted run so nothing is dropped under the
        // producer's burst rate.
        queue_capacity: 2000,
        suppression_window_secs: 300.0,
        ..PipelineConfig::default()
    };

    let sink = RecordingSink::default();
    let events = Arc::clone(&sink.events);
    let collaborators = Collaborators {
        detector: Box::new(StubDetector::with_label("person", 0.9)),
        describer: Some(Box::new(StubDescriber)),
        sink: Box::new(sink),
    };

    let pipeline = Pipeline::start(
        config,
        Box::new(ScriptedStream::new(reads)),
        collaborators,
    )
    .unwrap();

    // The source ends after 1000 frames; the pipeline drains on its own.
    assert!(pipeline.wait_stopped(Duration::from_secs(60)));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    let metrics = pipeline.shutdown();

    assert_eq!(metrics.frames_captured, 1000);
    assert_eq!(metrics.frames_dropped, 0);
    assert_eq!(metrics.sequence_gaps, 0);
    assert_eq!(metrics.frames_with_motion, 51);
    // Sampling by total-frame counter: multiples of 10 within 200..=250.
    assert_eq!(metrics.frames_sampled, 6);
    // One continuous occurrence, collapsed by de-duplication.
    assert_eq!(metrics.events_created, 1);
    assert_eq!(metrics.events_suppressed, 5);
    assert_eq!(metrics.stage_failures, 0);

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].label, "person");
    assert_eq!(events[0].frame_seq, 200);
    assert_eq!(events[0].description.as_deref(), Some("observed: person"));
    assert!(metrics.stage_timings.motion.samples >= 1000);
}

#[test]
fn stop_is_idempotent() {
    let settings = SourceSettings {
        url: "stub://camera".into(),
        target_fps: 200,
        width: 64,
        height: 48,
    };
    let collaborators = Collaborators {
        detector: Box::new(StubDetector::empty()),
        describer: None,
        sink: Box::new(RecordingSink::default()),
    };
    let pipeline = Pipeline::start(
        PipelineConfig::default(),
        Box::new(SyntheticStream::new(settings)),
        collaborators,
    )
    .unwrap();

    std::thread::sleep(Duration::from_millis(100));

    let stop = pipeline.stop_handle();
    // First signal initiates the drain, the second is observably a no-op.
    assert!(stop.stop());
    assert!(!stop.stop());

    assert!(pipeline.wait_stopped(Duration::from_secs(10)));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    let metrics = pipeline.shutdown();
    assert!(metrics.frames_captured > 0);
}

#[test]
fn failing_sink_does_not_stop_the_loop() {
    // Short learning phase, then every frame is a fresh occurrence.
    let mut reads: Vec<ScriptedRead> = (0..10).map(|_| ScriptedRead::Frame(scene(false))).collect();
    reads.extend((0..20).map(|_| ScriptedRead::Frame(scene(true))));

    let config = PipelineConfig {
        background_learning_frames: 5,
        frame_sampling_rate: 1,
        suppression_window_secs: 0.000_001,
        queue_capacity: 64,
        ..PipelineConfig::default()
    };
    let collaborators = Collaborators {
        detector: Box::new(StubDetector::with_label("person", 0.9)),
        describer: None,
        sink: Box::new(FailingSink),
    };

    let pipeline = Pipeline::start(
        config,
        Box::new(ScriptedStream::new(reads)),
        collaborators,
    )
    .unwrap();

    assert!(pipeline.wait_stopped(Duration::from_secs(30)));
    let metrics = pipeline.shutdown();

    // Every frame reached processing despite the sink failing throughout.
    assert_eq!(metrics.frames_captured, 30);
    assert!(metrics.events_created >= 2);
    assert_eq!(metrics.stage_failures, metrics.events_created);
}

#[test]
fn sustained_global_change_relearns_the_background() {
    // A lighting flip saturates the whole frame; instead of a motion
    // storm, the orchestrator resets the detector into a new learning
    // phase after the configured number of saturated frames.
    let mut reads: Vec<ScriptedRead> = Vec::new();
    for _ in 0..5 {
        reads.push(ScriptedRead::Frame(scene(false)));
    }
    for _ in 0..30 {
        let bright = RawImage::new(vec![220u8; (WIDTH * HEIGHT) as usize * 3], WIDTH, HEIGHT);
        reads.push(ScriptedRead::Frame(bright));
    }

    let config = PipelineConfig {
        background_learning_frames: 5,
        queue_capacity: 64,
        ..PipelineConfig::default()
    };
    let collaborators = Collaborators {
        detector: Box::new(StubDetector::empty()),
        describer: None,
        sink: Box::new(RecordingSink::default()),
    };

    let pipeline = Pipeline::start(
        config,
        Box::new(ScriptedStream::new(reads)),
        collaborators,
    )
    .unwrap();

    assert!(pipeline.wait_stopped(Duration::from_secs(30)));
    let metrics = pipeline.shutdown();

    assert_eq!(metrics.frames_captured, 35);
    assert_eq!(metrics.detector_resets, 1);
    // Saturated frames before the reset counted as motion; after the
    // reset the bright scene is the new background and stays quiet.
    assert_eq!(metrics.frames_with_motion, 14);
}

#[test]
fn failing_describer_still_creates_events() {
    let mut reads: Vec<ScriptedRead> = (0..10).map(|_| ScriptedRead::Frame(scene(false))).collect();
    reads.extend((0..15).map(|_| ScriptedRead::Frame(scene(true))));

    let config = PipelineConfig {
        background_learning_frames: 5,
        frame_sampling_rate: 1,
        queue_capacity: 64,
        ..PipelineConfig::default()
    };
    let sink = RecordingSink::default();
    let events = Arc::clone(&sink.events);
    let collaborators = Collaborators {
        detector: Box::new(StubDetector::with_label("person", 0.9)),
        describer: Some(Box::new(TimingOutDescriber)),
        sink: Box::new(sink),
    };

    let pipeline = Pipeline::start(
        config,
        Box::new(ScriptedStream::new(reads)),
        collaborators,
    )
    .unwrap();

    assert!(pipeline.wait_stopped(Duration::from_secs(30)));
    let metrics = pipeline.shutdown();

    // The event survives without its description.
    assert_eq!(metrics.events_created, 1);
    assert!(metrics.stage_failures >= 1);
    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0].description.is_none());
}

#[test]
fn invalid_config_is_rejected_before_start() {
    let config = PipelineConfig {
        frame_sampling_rate: 0,
        ..PipelineConfig::default()
    };
    let collaborators = Collaborators {
        detector: Box::new(StubDetector::empty()),
        describer: None,
        sink: Box::new(RecordingSink::default()),
    };
    let err = Pipeline::start(
        config,
        Box::new(ScriptedStream::new(Vec::new())),
        collaborators,
    )
    .unwrap_err();
    let config_err = err.downcast_ref::<ConfigError>().expect("typed error");
    assert_eq!(config_err.field, "frame_sampling_rate");
}

#[test]
fn reload_applies_tunables_and_rejects_invalid() {
    let settings = SourceSettings {
        url: "stub://camera".into(),
        target_fps: 200,
        width: 64,
        height: 48,
    };
    let collaborators = Collaborators {
        detector: Box::new(StubDetector::empty()),
        describer: None,
        sink: Box::new(RecordingSink::default()),
    };
    let pipeline = Pipeline::start(
        PipelineConfig::default(),
        Box::new(SyntheticStream::new(settings)),
        collaborators,
    )
    .unwrap();

    let bad = PipelineConfig {
        suppression_window_secs: 0.0,
        ..PipelineConfig::default()
    };
    let err = pipeline.reload(&bad).unwrap_err();
    assert_eq!(
        err.downcast_ref::<ConfigError>().unwrap().field,
        "suppression_window_secs"
    );

    let good = PipelineConfig {
        motion_threshold: 30,
        frame_sampling_rate: 3,
        ..PipelineConfig::default()
    };
    pipeline.reload(&good).unwrap();

    pipeline.stop();
    assert!(pipeline.wait_stopped(Duration::from_secs(10)));
    pipeline.shutdown();
}
