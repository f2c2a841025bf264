//! GStreamer-backed RTSP stream (feature `rtsp-gstreamer`).
//!
//! Pipeline: `rtspsrc ! decodebin ! videoconvert ! appsink` configured for
//! RGB output with a single-buffer sink so stale frames are dropped at the
//! transport. Bus errors are folded into `StreamError` kinds so the capture
//! loop can tell auth failures from transient transport faults.

use anyhow::{Context, Result};
use std::time::Duration;

use gstreamer::prelude::*;

use crate::config::SourceSettings;
use crate::error::StreamError;
use crate::frame::RawImage;
use crate::source::FrameStream;

pub struct RtspStream {
    settings: SourceSettings,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
}

impl RtspStream {
    pub fn new(settings: SourceSettings) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            settings.url
        );
        let pipeline = gstreamer::parse_launch(&description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        Ok(Self {
            settings,
            pipeline,
            appsink,
        })
    }

    fn frame_timeout(&self) -> Duration {
        let base_ms = if self.settings.target_fps == 0 {
            500
        } else {
            (1000 / self.settings.target_fps).saturating_mul(4)
        };
        Duration::from_millis(u64::from(base_ms.max(500)))
    }

    /// Drain pending bus messages, returning the first error as a stream
    /// error with the auth case distinguished.
    fn check_bus(&self) -> Result<(), StreamError> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    let text = err.error().to_string();
                    let lowered = text.to_lowercase();
                    if lowered.contains("unauthorized")
                        || lowered.contains("not authorized")
                        || lowered.contains("401")
                    {
                        return Err(StreamError::AuthFailed(text));
                    }
                    return Err(StreamError::Transport(text));
                }
                MessageView::Eos(..) => {
                    return Err(StreamError::Transport("stream reached EOS".into()));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl FrameStream for RtspStream {
    fn connect(&mut self) -> Result<(), StreamError> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|err| StreamError::Transport(format!("set pipeline to Playing: {}", err)))?;
        log::info!("rtsp source connected to {}", self.settings.url);
        Ok(())
    }

    fn read(&mut self) -> Result<RawImage, StreamError> {
        self.check_bus()?;

        let timeout = self.frame_timeout();
        let sample = self
            .appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(
                timeout.as_millis() as u64
            ))
            .ok_or(StreamError::Timeout(timeout))?;

        sample_to_image(&sample).map_err(|err| StreamError::Transport(err.to_string()))
    }

    fn close(&mut self) {
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("failed to stop RTSP pipeline: {}", err);
        }
    }
}

fn sample_to_image(sample: &gstreamer::Sample) -> Result<RawImage> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok(RawImage::new(data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok(RawImage::new(pixels, width, height))
}
