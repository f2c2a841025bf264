//! Object detection collaborator boundary.
//!
//! The pipeline consumes detection results; it does not ship a real model.
//! Backends implement `ObjectDetector` and are handed sampled motion frames
//! by the orchestrator. Implementations must treat the pixel data as
//! read-only and return within a bounded time; a slow or failing backend
//! costs individual frames, never the pipeline.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

/// One detected entity in a frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    /// Confidence within [0.0, 1.0].
    pub confidence: f32,
    /// Normalized [x, y, w, h] relative to frame dimensions.
    pub bounding_box: [f32; 4],
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bounding_box: [f32; 4]) -> Self {
        Self {
            label: label.into(),
            confidence,
            bounding_box,
        }
    }
}

/// The highest-confidence detection, or `None` for an empty set. Ties keep
/// the earliest entry.
pub fn primary_detection(detections: &[Detection]) -> Option<&Detection> {
    detections.iter().reduce(|best, candidate| {
        if candidate.confidence > best.confidence {
            candidate
        } else {
            best
        }
    })
}

/// Detector backend trait.
///
/// Implementations run with full process privileges; they are trusted to
/// not retain the pixel slice beyond the call.
pub trait ObjectDetector: Send {
    /// Backend identifier for logs.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, called once before the loop starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Stub backend returning a fixed detection set. Used by tests and by
/// `sentineld` when no real backend is wired in.
pub struct StubDetector {
    detections: Vec<Detection>,
}

impl StubDetector {
    /// A stub that never detects anything.
    pub fn empty() -> Self {
        Self {
            detections: Vec::new(),
        }
    }

    /// A stub reporting one full-frame detection with the given label.
    pub fn with_label(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            detections: vec![Detection::new(label, confidence, [0.0, 0.0, 1.0, 1.0])],
        }
    }
}

impl ObjectDetector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        Ok(self.detections.clone())
    }
}
