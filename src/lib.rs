//! Sentinel pipeline core.
//!
//! This crate implements the motion-triggered frame processing pipeline at
//! the heart of a local video-recognition system: frames are captured from
//! a stream, gated by an adaptive background-model motion detector,
//! rate-limited by a deterministic sampler, handed to external detection
//! and description collaborators, and collapsed into de-duplicated events.
//!
//! # Architecture
//!
//! Two threads communicate exclusively through a bounded drop-oldest
//! queue plus a cooperative cancellation token:
//!
//! ```text
//! FrameStream -> capture loop -> FrameQueue -> orchestrator loop
//!                                               |- MotionDetector
//!                                               |- FrameSampler
//!                                               |- ObjectDetector (external)
//!                                               |- Describer (external)
//!                                               |- EventDeduplicator
//!                                               `- EventSink
//! ```
//!
//! The orchestrator owns all processing-side state (dedup cache, metrics)
//! so no locking is needed beyond the queue and the snapshot accessor.
//! Per-frame stage failures are counted and skipped; only a closed queue,
//! a permanently dead source, or the stop signal end the loop.
//!
//! # Module Structure
//!
//! - `source`: frame streams, reconnect backoff, the capture loop
//! - `queue`: bounded drop-oldest handoff between the threads
//! - `motion`: background-model motion detection
//! - `sampler` / `dedup`: post-motion rate limiting and event suppression
//! - `pipeline`: the orchestrator state machine and metrics ownership
//! - `detect` / `describe` / `store`: collaborator boundaries

pub mod cancel;
pub mod config;
pub mod dedup;
pub mod describe;
pub mod detect;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod motion;
pub mod pipeline;
pub mod queue;
pub mod sampler;
pub mod source;
pub mod store;

pub use cancel::CancelToken;
pub use config::{DaemonConfig, PipelineConfig, SourceSettings, StoreSettings};
pub use dedup::{DedupDecision, EventDeduplicator};
pub use describe::{Describer, StubDescriber};
#[cfg(feature = "describe-ollama")]
pub use describe::OllamaDescriber;
pub use detect::{primary_detection, Detection, ObjectDetector, StubDetector};
pub use error::{ConfigError, StreamError};
pub use frame::{Frame, RawImage};
pub use metrics::{PipelineMetrics, Stage, StageTiming, StageTimings};
pub use motion::{MotionDetector, MotionResult, MotionSettings};
pub use pipeline::{Collaborators, Pipeline, PipelineState, StopHandle};
pub use queue::{FrameQueue, PushOutcome};
pub use sampler::FrameSampler;
pub use source::{open_stream, Backoff, FrameStream, ScriptedRead, ScriptedStream, SourceStats, SyntheticStream};
#[cfg(feature = "rtsp-gstreamer")]
pub use source::RtspStream;
pub use store::{Event, EventSink, LogSink, SqliteEventStore};
