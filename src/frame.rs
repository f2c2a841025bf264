//! Frame types shared between the capture and processing threads.
//!
//! - `RawImage`: what a stream transport hands back, pixels plus dimensions.
//! - `Frame`: a `RawImage` stamped with a sequence number and capture time
//!   by the capture loop.
//!
//! A `Frame` is owned by the queue from push until pop and is immutable once
//! enqueued. Sequence numbers are strictly increasing; a gap means frames
//! were dropped at the queue under overflow.

use std::time::SystemTime;

/// Bytes per pixel for the RGB24 buffers produced by every source backend.
pub const BYTES_PER_PIXEL: usize = 3;

/// Raw image buffer as read from a stream transport.
#[derive(Debug)]
pub struct RawImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RawImage {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize * BYTES_PER_PIXEL);
        Self {
            data,
            width,
            height,
        }
    }
}

/// A single captured frame flowing through the pipeline.
#[derive(Debug)]
pub struct Frame {
    /// RGB24 pixel data, row-major, no padding.
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic sequence number assigned by the capture loop, starting at 1.
    pub seq: u64,
    pub captured_at: SystemTime,
}

impl Frame {
    /// Stamp a raw image with its pipeline identity. Called only by the
    /// capture loop.
    pub fn from_raw(raw: RawImage, seq: u64, captured_at: SystemTime) -> Self {
        Self {
            data: raw.data,
            width: raw.width,
            height: raw.height,
            seq,
            captured_at,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}
