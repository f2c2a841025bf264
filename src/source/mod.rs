//! Frame sources and the capture loop.
//!
//! This module provides the producer side of the pipeline:
//! - `FrameStream`: the transport contract (RTSP, synthetic, test doubles)
//! - `run_capture_loop`: the dedicated capture thread body
//! - `SourceStats`: capture-side counters read by metrics snapshots
//!
//! The capture loop never blocks the rest of the pipeline on a transient
//! network failure: reads feed the bounded queue with a non-blocking push,
//! and interruptions go through exponential reconnect backoff (1s doubling
//! to a 60s cap, reset after a successful connect). The loop exits on
//! cancellation, on a non-retryable stream error, on clean end of stream,
//! or when a configured reconnect-attempt cap is exhausted; it always
//! closes the stream handle and then the queue on the way out.

mod backoff;
#[cfg(feature = "rtsp-gstreamer")]
mod rtsp;
mod synthetic;

pub use backoff::Backoff;
#[cfg(feature = "rtsp-gstreamer")]
pub use rtsp::RtspStream;
pub use synthetic::{ScriptedRead, ScriptedStream, SyntheticStream};

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use anyhow::Result;

use crate::cancel::CancelToken;
use crate::config::SourceSettings;
use crate::error::StreamError;
use crate::frame::{Frame, RawImage};
use crate::queue::{FrameQueue, PushOutcome};

/// Transport contract for a stream of raw images.
///
/// Any transport works as long as it supports connect/read/close and
/// reports failures with distinguishable `StreamError` kinds.
pub trait FrameStream: Send {
    /// Establish the stream. Called again after interruptions.
    fn connect(&mut self) -> Result<(), StreamError>;

    /// Block until the next image is available.
    fn read(&mut self) -> Result<RawImage, StreamError>;

    /// Release the transport. Must be safe to call in any state.
    fn close(&mut self);
}

/// Capture-side counters. Updated by the capture thread with relaxed
/// atomics and merged into metrics snapshots.
#[derive(Default)]
pub struct SourceStats {
    frames_read: AtomicU64,
    frames_dropped: AtomicU64,
    reconnect_attempts: AtomicU64,
}

impl SourceStats {
    pub fn frames_read(&self) -> u64 {
        self.frames_read.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }
}

/// Build a stream for the configured source URL.
///
/// - `stub://...` yields the synthetic source
/// - `rtsp://...` yields the GStreamer backend (feature `rtsp-gstreamer`)
pub fn open_stream(settings: &SourceSettings) -> Result<Box<dyn FrameStream>> {
    let parsed = url::Url::parse(&settings.url)
        .map_err(|err| anyhow::anyhow!("malformed source url {}: {}", settings.url, err))?;
    match parsed.scheme() {
        "stub" => Ok(Box::new(SyntheticStream::new(settings.clone()))),
        "rtsp" => {
            #[cfg(feature = "rtsp-gstreamer")]
            {
                Ok(Box::new(RtspStream::new(settings.clone())?))
            }
            #[cfg(not(feature = "rtsp-gstreamer"))]
            {
                anyhow::bail!("rtsp sources require the rtsp-gstreamer feature")
            }
        }
        other => anyhow::bail!("unsupported source scheme: {}", other),
    }
}

/// Capture thread body. Wraps each raw image with a sequence number and
/// capture timestamp and hands it to the queue without blocking.
pub(crate) fn run_capture_loop(
    mut stream: Box<dyn FrameStream>,
    queue: &FrameQueue,
    cancel: &CancelToken,
    stats: &SourceStats,
    mut backoff: Backoff,
    max_reconnect_attempts: Option<u32>,
    on_ready: &(dyn Fn() + Send + Sync),
) {
    let mut seq = 0u64;
    let mut failed_attempts = 0u32;

    'outer: while !cancel.is_cancelled() {
        match stream.connect() {
            Ok(()) => {
                log::info!("frame source connected");
                backoff.reset();
                failed_attempts = 0;
                on_ready();
            }
            Err(err) if err.is_retryable() => {
                failed_attempts += 1;
                stats.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
                if let Some(cap) = max_reconnect_attempts {
                    if failed_attempts >= cap {
                        log::error!(
                            "frame source unreachable after {} attempts, giving up: {}",
                            failed_attempts,
                            err
                        );
                        break 'outer;
                    }
                }
                let delay = backoff.next_delay();
                log::warn!("frame source connect failed ({}), retrying in {:?}", err, delay);
                if cancel.sleep(delay) {
                    break 'outer;
                }
                continue 'outer;
            }
            Err(err) => {
                log::error!("frame source connect failed permanently: {}", err);
                break 'outer;
            }
        }

        loop {
            if cancel.is_cancelled() {
                break 'outer;
            }
            match stream.read() {
                Ok(raw) => {
                    seq += 1;
                    let frame = Frame::from_raw(raw, seq, SystemTime::now());
                    stats.frames_read.fetch_add(1, Ordering::Relaxed);
                    match queue.push(frame) {
                        PushOutcome::Stored => {}
                        PushOutcome::Displaced(old) => {
                            stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                            log::debug!("queue full, dropped frame seq={}", old.seq);
                        }
                        PushOutcome::Rejected(_) => break 'outer,
                    }
                }
                Err(StreamError::Closed) => {
                    log::info!("frame source reached end of stream");
                    break 'outer;
                }
                Err(err) if err.is_retryable() => {
                    stats.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
                    stream.close();
                    let delay = backoff.next_delay();
                    log::warn!("frame stream interrupted ({}), reconnecting in {:?}", err, delay);
                    if cancel.sleep(delay) {
                        break 'outer;
                    }
                    break;
                }
                Err(err) => {
                    log::error!("frame stream failed permanently: {}", err);
                    break 'outer;
                }
            }
        }
    }

    stream.close();
    queue.close();
    log::info!("capture loop exited after {} frames", seq);
}
