//! sentineld - motion-triggered recognition daemon
//!
//! This daemon:
//! 1. Loads configuration (TOML file via SENTINEL_CONFIG, env overrides)
//! 2. Opens the configured frame source (stub:// or rtsp://)
//! 3. Runs the capture + processing pipeline
//! 4. Persists de-duplicated events to the SQLite store
//! 5. Logs health and metrics periodically, drains on SIGINT

use std::time::Duration;

use anyhow::Result;

use sentinel_core::{
    open_stream, Collaborators, DaemonConfig, Pipeline, SqliteEventStore, StubDescriber,
    StubDetector,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = DaemonConfig::load()?;
    log::info!("sentineld starting, source={}", cfg.source.url);
    log::info!(
        "motion_threshold={} sampling_rate={} suppression_window={}s queue_capacity={}",
        cfg.pipeline.motion_threshold,
        cfg.pipeline.frame_sampling_rate,
        cfg.pipeline.suppression_window_secs,
        cfg.pipeline.queue_capacity
    );

    let stream = open_stream(&cfg.source)?;
    let store = SqliteEventStore::open(&cfg.store.db_path)?;
    log::info!("event store open at {}", cfg.store.db_path);

    // No real detection model is wired in yet; the stub reports a single
    // full-frame "object" so motion episodes become visible events.
    let collaborators = Collaborators {
        detector: Box::new(StubDetector::with_label("object", 0.9)),
        describer: Some(Box::new(StubDescriber)),
        sink: Box::new(store),
    };

    let pipeline = Pipeline::start(cfg.pipeline.clone(), stream, collaborators)?;

    let stop = pipeline.stop_handle();
    ctrlc::set_handler(move || {
        stop.stop();
    })?;

    while !pipeline.wait_stopped(HEALTH_LOG_INTERVAL) {
        let metrics = pipeline.metrics();
        log::info!(
            "state={:?} queue={} frames={} motion={} sampled={} events={} suppressed={} dropped={} reconnects={}",
            pipeline.state(),
            pipeline.queue_len(),
            metrics.frames_captured,
            metrics.frames_with_motion,
            metrics.frames_sampled,
            metrics.events_created,
            metrics.events_suppressed,
            metrics.frames_dropped,
            metrics.reconnect_attempts
        );
    }

    let final_metrics = pipeline.shutdown();
    log::info!(
        "sentineld stopped: {} frames processed, {} events created",
        final_metrics.frames_captured,
        final_metrics.events_created
    );
    Ok(())
}
