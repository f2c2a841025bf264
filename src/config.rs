use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::motion::MotionSettings;

const DEFAULT_MOTION_THRESHOLD: u8 = 5;
const DEFAULT_PIXEL_DELTA: u8 = 25;
const DEFAULT_SAMPLING_RATE: u32 = 10;
const DEFAULT_SUPPRESSION_WINDOW_SECS: f64 = 30.0;
const DEFAULT_QUEUE_CAPACITY: usize = 100;
const DEFAULT_LEARNING_FRAMES: u32 = 100;
const DEFAULT_ADAPT_RATE: f32 = 0.05;
const DEFAULT_MOTION_ADAPT_RATE: f32 = 0.001;
const DEFAULT_SCENE_CHANGE_FRACTION: f32 = 0.7;
const DEFAULT_SCENE_CHANGE_FRAMES: u32 = 15;
const DEFAULT_DESCRIBE_TIMEOUT_SECS: f64 = 10.0;
const DEFAULT_SHUTDOWN_DEADLINE_SECS: f64 = 10.0;
const DEFAULT_SOURCE_URL: &str = "stub://camera";
const DEFAULT_SOURCE_FPS: u32 = 10;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_DB_PATH: &str = "sentinel.db";

#[derive(Debug, Deserialize, Default)]
struct DaemonConfigFile {
    pipeline: Option<PipelineConfigFile>,
    source: Option<SourceConfigFile>,
    store: Option<StoreConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    motion_threshold: Option<u8>,
    pixel_delta: Option<u8>,
    frame_sampling_rate: Option<u32>,
    suppression_window_secs: Option<f64>,
    queue_capacity: Option<usize>,
    background_learning_frames: Option<u32>,
    adapt_rate: Option<f32>,
    motion_adapt_rate: Option<f32>,
    scene_change_fraction: Option<f32>,
    scene_change_frames: Option<u32>,
    describe_timeout_secs: Option<f64>,
    max_reconnect_attempts: Option<u32>,
    shutdown_deadline_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct StoreConfigFile {
    db_path: Option<String>,
}

/// Configuration surface consumed by the pipeline core. Validated before
/// any thread starts; the pipeline never runs in an invalid state.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Motion threshold on the 0-255 scale, mapped to a frame-area
    /// fraction by `motion_area_fraction`.
    pub motion_threshold: u8,
    /// Per-pixel luma delta classifying a pixel as changed.
    pub pixel_delta: u8,
    pub frame_sampling_rate: u32,
    pub suppression_window_secs: f64,
    pub queue_capacity: usize,
    pub background_learning_frames: u32,
    pub adapt_rate: f32,
    pub motion_adapt_rate: f32,
    /// Confidence above which a frame counts toward scene-change reset.
    pub scene_change_fraction: f32,
    /// Consecutive saturated frames that trigger a background reset.
    pub scene_change_frames: u32,
    pub describe_timeout_secs: f64,
    /// Consecutive failed connection attempts before the source is
    /// declared permanently dead. `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    pub shutdown_deadline_secs: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            motion_threshold: DEFAULT_MOTION_THRESHOLD,
            pixel_delta: DEFAULT_PIXEL_DELTA,
            frame_sampling_rate: DEFAULT_SAMPLING_RATE,
            suppression_window_secs: DEFAULT_SUPPRESSION_WINDOW_SECS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            background_learning_frames: DEFAULT_LEARNING_FRAMES,
            adapt_rate: DEFAULT_ADAPT_RATE,
            motion_adapt_rate: DEFAULT_MOTION_ADAPT_RATE,
            scene_change_fraction: DEFAULT_SCENE_CHANGE_FRACTION,
            scene_change_frames: DEFAULT_SCENE_CHANGE_FRAMES,
            describe_timeout_secs: DEFAULT_DESCRIBE_TIMEOUT_SECS,
            max_reconnect_attempts: None,
            shutdown_deadline_secs: DEFAULT_SHUTDOWN_DEADLINE_SECS,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_sampling_rate < 1 {
            return Err(ConfigError::new("frame_sampling_rate", "must be at least 1"));
        }
        if self.queue_capacity < 1 {
            return Err(ConfigError::new("queue_capacity", "must be at least 1"));
        }
        if !self.suppression_window_secs.is_finite() || self.suppression_window_secs <= 0.0 {
            return Err(ConfigError::new(
                "suppression_window_secs",
                "must be a positive number",
            ));
        }
        if self.background_learning_frames < 1 {
            return Err(ConfigError::new(
                "background_learning_frames",
                "must be at least 1",
            ));
        }
        for (field, rate) in [
            ("adapt_rate", self.adapt_rate),
            ("motion_adapt_rate", self.motion_adapt_rate),
        ] {
            if !(rate > 0.0 && rate <= 1.0) {
                return Err(ConfigError::new(field, "must be within (0, 1]"));
            }
        }
        if self.motion_adapt_rate > self.adapt_rate {
            return Err(ConfigError::new(
                "motion_adapt_rate",
                "must not exceed adapt_rate",
            ));
        }
        if !(self.scene_change_fraction > 0.0 && self.scene_change_fraction <= 1.0) {
            return Err(ConfigError::new(
                "scene_change_fraction",
                "must be within (0, 1]",
            ));
        }
        if self.scene_change_frames < 1 {
            return Err(ConfigError::new("scene_change_frames", "must be at least 1"));
        }
        if !self.describe_timeout_secs.is_finite() || self.describe_timeout_secs <= 0.0 {
            return Err(ConfigError::new(
                "describe_timeout_secs",
                "must be a positive number",
            ));
        }
        if !self.shutdown_deadline_secs.is_finite() || self.shutdown_deadline_secs <= 0.0 {
            return Err(ConfigError::new(
                "shutdown_deadline_secs",
                "must be a positive number",
            ));
        }
        Ok(())
    }

    /// The 0-255 threshold mapped to a frame-area fraction.
    pub fn motion_area_fraction(&self) -> f32 {
        f32::from(self.motion_threshold) / 255.0
    }

    pub fn suppression_window(&self) -> Duration {
        Duration::from_secs_f64(self.suppression_window_secs)
    }

    pub fn describe_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.describe_timeout_secs)
    }

    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_secs_f64(self.shutdown_deadline_secs)
    }

    pub fn motion_settings(&self) -> MotionSettings {
        MotionSettings {
            area_fraction: self.motion_area_fraction(),
            pixel_delta: self.pixel_delta,
            learning_frames: self.background_learning_frames,
            adapt_rate: self.adapt_rate,
            motion_adapt_rate: self.motion_adapt_rate,
        }
    }
}

/// Stream source settings consumed by `source::open_stream`.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
            target_fps: DEFAULT_SOURCE_FPS,
            width: DEFAULT_SOURCE_WIDTH,
            height: DEFAULT_SOURCE_HEIGHT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub db_path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
        }
    }
}

/// Full sentineld configuration: TOML file (path from `SENTINEL_CONFIG`)
/// layered under environment overrides, then validated.
#[derive(Debug, Clone, Default)]
pub struct DaemonConfig {
    pub pipeline: PipelineConfig,
    pub source: SourceSettings,
    pub store: StoreSettings,
}

impl DaemonConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => read_config_file(Path::new(path))?,
            None => DaemonConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.pipeline.validate()?;
        if cfg.source.url.trim().is_empty() {
            return Err(anyhow!("source url must not be empty"));
        }
        Ok(cfg)
    }

    fn from_file(file: DaemonConfigFile) -> Self {
        let defaults = PipelineConfig::default();
        let p = file.pipeline.unwrap_or_default();
        let pipeline = PipelineConfig {
            motion_threshold: p.motion_threshold.unwrap_or(defaults.motion_threshold),
            pixel_delta: p.pixel_delta.unwrap_or(defaults.pixel_delta),
            frame_sampling_rate: p
                .frame_sampling_rate
                .unwrap_or(defaults.frame_sampling_rate),
            suppression_window_secs: p
                .suppression_window_secs
                .unwrap_or(defaults.suppression_window_secs),
            queue_capacity: p.queue_capacity.unwrap_or(defaults.queue_capacity),
            background_learning_frames: p
                .background_learning_frames
                .unwrap_or(defaults.background_learning_frames),
            adapt_rate: p.adapt_rate.unwrap_or(defaults.adapt_rate),
            motion_adapt_rate: p.motion_adapt_rate.unwrap_or(defaults.motion_adapt_rate),
            scene_change_fraction: p
                .scene_change_fraction
                .unwrap_or(defaults.scene_change_fraction),
            scene_change_frames: p
                .scene_change_frames
                .unwrap_or(defaults.scene_change_frames),
            describe_timeout_secs: p
                .describe_timeout_secs
                .unwrap_or(defaults.describe_timeout_secs),
            max_reconnect_attempts: p.max_reconnect_attempts,
            shutdown_deadline_secs: p
                .shutdown_deadline_secs
                .unwrap_or(defaults.shutdown_deadline_secs),
        };
        let s = file.source.unwrap_or_default();
        let source_defaults = SourceSettings::default();
        let source = SourceSettings {
            url: s.url.unwrap_or(source_defaults.url),
            target_fps: s.target_fps.unwrap_or(source_defaults.target_fps),
            width: s.width.unwrap_or(source_defaults.width),
            height: s.height.unwrap_or(source_defaults.height),
        };
        let store = StoreSettings {
            db_path: file
                .store
                .and_then(|store| store.db_path)
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
        };
        Self {
            pipeline,
            source,
            store,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("SENTINEL_SOURCE_URL") {
            if !value.trim().is_empty() {
                self.source.url = value;
            }
        }
        if let Ok(value) = std::env::var("SENTINEL_DB_PATH") {
            if !value.trim().is_empty() {
                self.store.db_path = value;
            }
        }
        if let Ok(value) = std::env::var("SENTINEL_MOTION_THRESHOLD") {
            self.pipeline.motion_threshold = value
                .parse()
                .map_err(|_| anyhow!("SENTINEL_MOTION_THRESHOLD must be an integer in 0..=255"))?;
        }
        if let Ok(value) = std::env::var("SENTINEL_SAMPLING_RATE") {
            self.pipeline.frame_sampling_rate = value
                .parse()
                .map_err(|_| anyhow!("SENTINEL_SAMPLING_RATE must be a positive integer"))?;
        }
        if let Ok(value) = std::env::var("SENTINEL_SUPPRESSION_WINDOW_SECS") {
            self.pipeline.suppression_window_secs = value.parse().map_err(|_| {
                anyhow!("SENTINEL_SUPPRESSION_WINDOW_SECS must be a number of seconds")
            })?;
        }
        if let Ok(value) = std::env::var("SENTINEL_QUEUE_CAPACITY") {
            self.pipeline.queue_capacity = value
                .parse()
                .map_err(|_| anyhow!("SENTINEL_QUEUE_CAPACITY must be a positive integer"))?;
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<DaemonConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
