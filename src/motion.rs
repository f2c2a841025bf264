//! Background-model motion detection.
//!
//! The detector keeps a running per-pixel luma model of the empty scene.
//! Each frame is classified against it:
//!
//! - During the learning phase (first `learning_frames` frames after
//!   creation or reset) the model is a cumulative mean and `has_motion` is
//!   always false, whatever the measured change.
//! - Afterwards the model keeps adapting on every frame so gradual lighting
//!   drift is absorbed, but frames classified as motion contribute at the
//!   much smaller `motion_adapt_rate` so a moving object is not learned
//!   into the background.
//!
//! Confidence is the fraction of pixels whose luma deviates from the model
//! by more than `pixel_delta`; `has_motion` is exactly `confidence >
//! area_fraction`. A single `detect` call is one pass over the frame plus
//! the model update and completes in bounded time.

use crate::frame::Frame;

/// Tuning for the background model. Constructed from `PipelineConfig`.
#[derive(Clone, Copy, Debug)]
pub struct MotionSettings {
    /// Fraction of frame area that must change for `has_motion`.
    pub area_fraction: f32,
    /// Per-pixel luma delta classifying a pixel as changed (0-255 scale).
    pub pixel_delta: u8,
    /// Frames spent establishing the model after creation or reset.
    pub learning_frames: u32,
    /// Model update weight for frames without motion.
    pub adapt_rate: f32,
    /// Model update weight for frames classified as motion.
    pub motion_adapt_rate: f32,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            area_fraction: 5.0 / 255.0,
            pixel_delta: 25,
            learning_frames: 100,
            adapt_rate: 0.05,
            motion_adapt_rate: 0.001,
        }
    }
}

/// Per-frame classification result. Transient; not persisted.
#[derive(Debug)]
pub struct MotionResult {
    pub has_motion: bool,
    /// Changed-pixel fraction, always within [0.0, 1.0].
    pub confidence: f32,
    /// Binary change mask, one byte per pixel, 0 or 255.
    pub mask: Vec<u8>,
}

impl MotionResult {
    fn still(pixel_count: usize) -> Self {
        Self {
            has_motion: false,
            confidence: 0.0,
            mask: vec![0; pixel_count],
        }
    }
}

pub struct MotionDetector {
    settings: MotionSettings,
    /// Per-pixel luma model. Empty until the first frame arrives.
    background: Vec<f32>,
    width: u32,
    height: u32,
    /// Frames folded into the model since creation or reset.
    frames_seen: u32,
}

impl MotionDetector {
    pub fn new(settings: MotionSettings) -> Self {
        Self {
            settings,
            background: Vec::new(),
            width: 0,
            height: 0,
            frames_seen: 0,
        }
    }

    /// Classify a frame against the background model and fold it in.
    pub fn detect(&mut self, frame: &Frame) -> MotionResult {
        let luma = frame_luma(frame);

        if self.background.is_empty() || self.width != frame.width || self.height != frame.height
        {
            if !self.background.is_empty() {
                log::warn!(
                    "frame geometry changed to {}x{}, relearning background",
                    frame.width,
                    frame.height
                );
            }
            self.background = luma;
            self.width = frame.width;
            self.height = frame.height;
            self.frames_seen = 1;
            return MotionResult::still(frame.pixel_count());
        }

        let mut mask = vec![0u8; luma.len()];
        let mut changed = 0usize;
        let delta = f32::from(self.settings.pixel_delta);
        for (index, (&current, &modeled)) in luma.iter().zip(self.background.iter()).enumerate() {
            if (current - modeled).abs() > delta {
                mask[index] = 255;
                changed += 1;
            }
        }
        let confidence = (changed as f32 / luma.len() as f32).clamp(0.0, 1.0);

        let learning = self.frames_seen < self.settings.learning_frames;
        let has_motion = !learning && confidence > self.settings.area_fraction;

        self.update_model(&luma, learning, has_motion);

        MotionResult {
            has_motion,
            confidence,
            mask,
        }
    }

    fn update_model(&mut self, luma: &[f32], learning: bool, has_motion: bool) {
        let alpha = if learning {
            // Cumulative mean while the model is being established.
            1.0 / (self.frames_seen as f32 + 1.0)
        } else if has_motion {
            self.settings.motion_adapt_rate
        } else {
            self.settings.adapt_rate
        };
        for (modeled, &current) in self.background.iter_mut().zip(luma.iter()) {
            *modeled += alpha * (current - *modeled);
        }
        self.frames_seen = self.frames_seen.saturating_add(1);
    }

    /// Discard the model and re-enter the learning phase.
    pub fn reset(&mut self) {
        self.background.clear();
        self.frames_seen = 0;
    }

    pub fn is_learning(&self) -> bool {
        self.frames_seen < self.settings.learning_frames
    }

    /// Apply a reloaded motion threshold without disturbing the model.
    pub fn set_area_fraction(&mut self, area_fraction: f32) {
        self.settings.area_fraction = area_fraction;
    }
}

/// ITU-R BT.601 integer luma for each RGB24 pixel.
fn frame_luma(frame: &Frame) -> Vec<f32> {
    frame
        .pixels()
        .chunks_exact(3)
        .map(|rgb| {
            let weighted =
                77 * u32::from(rgb[0]) + 150 * u32::from(rgb[1]) + 29 * u32::from(rgb[2]);
            (weighted >> 8) as f32
        })
        .collect()
}
