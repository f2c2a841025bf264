use std::sync::Mutex;

use tempfile::NamedTempFile;

use sentinel_core::DaemonConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SENTINEL_CONFIG",
        "SENTINEL_SOURCE_URL",
        "SENTINEL_DB_PATH",
        "SENTINEL_MOTION_THRESHOLD",
        "SENTINEL_SAMPLING_RATE",
        "SENTINEL_SUPPRESSION_WINDOW_SECS",
        "SENTINEL_QUEUE_CAPACITY",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        [pipeline]
        motion_threshold = 12
        frame_sampling_rate = 5
        suppression_window_secs = 45.0
        queue_capacity = 64
        background_learning_frames = 50

        [source]
        url = "rtsp://camera-1/stream"
        target_fps = 12
        width = 800
        height = 600

        [store]
        db_path = "sentinel_prod.db"
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    std::env::set_var("SENTINEL_CONFIG", file.path());
    std::env::set_var("SENTINEL_QUEUE_CAPACITY", "128");
    std::env::set_var("SENTINEL_SOURCE_URL", "stub://bench");

    let cfg = DaemonConfig::load().expect("load config");

    assert_eq!(cfg.pipeline.motion_threshold, 12);
    assert_eq!(cfg.pipeline.frame_sampling_rate, 5);
    assert_eq!(cfg.pipeline.suppression_window_secs, 45.0);
    assert_eq!(cfg.pipeline.queue_capacity, 128);
    assert_eq!(cfg.pipeline.background_learning_frames, 50);
    assert_eq!(cfg.source.url, "stub://bench");
    assert_eq!(cfg.source.target_fps, 12);
    assert_eq!(cfg.source.width, 800);
    assert_eq!(cfg.source.height, 600);
    assert_eq!(cfg.store.db_path, "sentinel_prod.db");

    clear_env();
}

#[test]
fn defaults_apply_without_a_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = DaemonConfig::load().expect("load defaults");

    assert_eq!(cfg.pipeline.motion_threshold, 5);
    assert_eq!(cfg.pipeline.frame_sampling_rate, 10);
    assert_eq!(cfg.pipeline.queue_capacity, 100);
    assert_eq!(cfg.pipeline.background_learning_frames, 100);
    assert_eq!(cfg.pipeline.max_reconnect_attempts, None);
    assert_eq!(cfg.source.url, "stub://camera");
    assert_eq!(cfg.store.db_path, "sentinel.db");

    clear_env();
}

#[test]
fn invalid_pipeline_values_are_rejected_at_load() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SENTINEL_SAMPLING_RATE", "0");
    let err = DaemonConfig::load().unwrap_err();
    assert!(err.to_string().contains("frame_sampling_rate"));

    clear_env();
}

#[test]
fn non_numeric_env_override_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SENTINEL_QUEUE_CAPACITY", "lots");
    let err = DaemonConfig::load().unwrap_err();
    assert!(err.to_string().contains("SENTINEL_QUEUE_CAPACITY"));

    clear_env();
}
