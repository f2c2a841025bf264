//! Synthetic frame sources.
//!
//! `SyntheticStream` backs `stub://` URLs: a paced generator producing a
//! static scene with periodic motion episodes, used for demos and soak
//! runs without a camera. `ScriptedStream` is the deterministic test
//! double: it replays a fixed list of reads and scripted failures.

use std::collections::VecDeque;
use std::time::Duration;

use rand::Rng;

use crate::config::SourceSettings;
use crate::error::StreamError;
use crate::frame::{RawImage, BYTES_PER_PIXEL};
use crate::source::FrameStream;

/// Frames per motion cycle and the slice of the cycle that contains the
/// moving block.
const MOTION_CYCLE: u64 = 300;
const MOTION_SPAN: u64 = 50;

/// Paced synthetic source for `stub://` URLs.
pub struct SyntheticStream {
    settings: SourceSettings,
    frame_count: u64,
    connected: bool,
}

impl SyntheticStream {
    pub fn new(settings: SourceSettings) -> Self {
        Self {
            settings,
            frame_count: 0,
            connected: false,
        }
    }

    fn frame_interval(&self) -> Duration {
        let fps = self.settings.target_fps.max(1);
        Duration::from_millis(u64::from(1000 / fps).max(1))
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let width = self.settings.width as usize;
        let height = self.settings.height as usize;

        // Static checker background with a little global flicker, so the
        // scene looks alive without tripping the pixel delta.
        let flicker: i16 = rand::thread_rng().gen_range(-2..=2);
        let mut pixels = vec![0u8; width * height * BYTES_PER_PIXEL];
        for y in 0..height {
            for x in 0..width {
                let base: i16 = if (x / 16 + y / 16) % 2 == 0 { 44 } else { 56 };
                let value = (base + flicker).clamp(0, 255) as u8;
                let offset = (y * width + x) * BYTES_PER_PIXEL;
                pixels[offset..offset + 3].copy_from_slice(&[value; 3]);
            }
        }

        // Periodic motion episode: a bright block sweeping left to right.
        let phase = self.frame_count % MOTION_CYCLE;
        if phase < MOTION_SPAN {
            let block_w = width / 8;
            let block_h = height / 8;
            let travel = width.saturating_sub(block_w).max(1);
            let x0 = (phase as usize * travel) / MOTION_SPAN as usize;
            let y0 = height / 3;
            for y in y0..(y0 + block_h).min(height) {
                for x in x0..(x0 + block_w).min(width) {
                    let offset = (y * width + x) * BYTES_PER_PIXEL;
                    pixels[offset..offset + 3].copy_from_slice(&[220; 3]);
                }
            }
        }

        pixels
    }
}

impl FrameStream for SyntheticStream {
    fn connect(&mut self) -> Result<(), StreamError> {
        self.connected = true;
        log::info!("synthetic source connected ({})", self.settings.url);
        Ok(())
    }

    fn read(&mut self) -> Result<RawImage, StreamError> {
        if !self.connected {
            return Err(StreamError::Transport("read before connect".into()));
        }
        std::thread::sleep(self.frame_interval());
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Ok(RawImage::new(
            pixels,
            self.settings.width,
            self.settings.height,
        ))
    }

    fn close(&mut self) {
        self.connected = false;
    }
}

/// One scripted read outcome.
#[derive(Debug)]
pub enum ScriptedRead {
    Frame(RawImage),
    /// The stream fails with this error; the next read resumes the script.
    Interrupt(StreamError),
}

/// Deterministic test double replaying scripted connects and reads.
///
/// Once the script is exhausted, reads return `StreamError::Closed`.
pub struct ScriptedStream {
    connect_failures: VecDeque<StreamError>,
    reads: VecDeque<ScriptedRead>,
    connected: bool,
}

impl ScriptedStream {
    pub fn new(reads: Vec<ScriptedRead>) -> Self {
        Self {
            connect_failures: VecDeque::new(),
            reads: reads.into(),
            connected: false,
        }
    }

    /// Queue a connect failure ahead of the next successful connect.
    pub fn push_connect_failure(&mut self, err: StreamError) {
        self.connect_failures.push_back(err);
    }
}

impl FrameStream for ScriptedStream {
    fn connect(&mut self) -> Result<(), StreamError> {
        if let Some(err) = self.connect_failures.pop_front() {
            return Err(err);
        }
        self.connected = true;
        Ok(())
    }

    fn read(&mut self) -> Result<RawImage, StreamError> {
        if !self.connected {
            return Err(StreamError::Transport("read before connect".into()));
        }
        match self.reads.pop_front() {
            Some(ScriptedRead::Frame(image)) => Ok(image),
            Some(ScriptedRead::Interrupt(err)) => {
                self.connected = false;
                Err(err)
            }
            None => Err(StreamError::Closed),
        }
    }

    fn close(&mut self) {
        self.connected = false;
    }
}
