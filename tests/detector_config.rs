use std::io::Write;
use std::sync::Mutex;

use tempfile::{Builder, NamedTempFile};

use bot_detector::config::DetectorConfig;
use bot_detector::RuleKind;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "BOT_DETECTOR_CONFIG",
        "BOT_DETECTOR_WIDTH",
        "BOT_DETECTOR_HEIGHT",
        "BOT_DETECTOR_BG_SAMPLE",
        "BOT_DETECTOR_HALF_WIDTH",
        "BOT_DETECTOR_VERBOSE",
        "BOT_DETECTOR_RULE",
        "BOT_DETECTOR_SOURCE_URL",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "verbose": false,
        "camera": { "width": 1296, "height": 972 },
        "background": { "bg_sample": 500, "quantile": 0.5 },
        "detection": { "rule": "sum_band", "half_width": 100000 },
        "stats": { "interval_passes": 50 },
        "reload": { "interval_secs": 5.0 },
        "source": { "url": "/srv/frames", "target_fps": 15 }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("BOT_DETECTOR_CONFIG", file.path());
    std::env::set_var("BOT_DETECTOR_BG_SAMPLE", "20");
    std::env::set_var("BOT_DETECTOR_VERBOSE", "on");

    let cfg = DetectorConfig::load().expect("load config");

    assert_eq!((cfg.width, cfg.height), (1296, 972));
    assert_eq!(cfg.bg_sample, 20);
    assert!(cfg.verbose);
    assert_eq!(cfg.rule, RuleKind::SumBand);
    assert_eq!(cfg.effective_half_width(), 100_000);
    assert_eq!(cfg.stats_interval, 50);
    assert_eq!(cfg.reload_interval.as_secs(), 5);
    assert_eq!(cfg.source.url, "/srv/frames");
    assert_eq!(cfg.source.target_fps, 15);

    let settings = cfg.pipeline_settings();
    assert_eq!(settings.bg_sample, 20);
    assert_eq!(settings.rule.half_width, 100_000);
    assert!(cfg.reload_settings().verbose);

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
verbose = true

[camera]
width = 64
height = 48

[detection]
rule = "pixel_delta"
pixel_tolerance = 30
changed_fraction = 0.1
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = DetectorConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!((cfg.width, cfg.height), (64, 48));
    assert_eq!(cfg.rule, RuleKind::PixelDelta);
    assert_eq!(cfg.pixel_tolerance, 30);
    assert_eq!(cfg.bg_sample, 1000);
    assert_eq!(cfg.effective_half_width(), 64 * 48 * 3 / 2);

    clear_env();
}

#[test]
fn env_only_config_requires_geometry() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let err = DetectorConfig::load().expect_err("geometry is required");
    assert!(err.to_string().contains("camera.width"));

    std::env::set_var("BOT_DETECTOR_WIDTH", "320");
    std::env::set_var("BOT_DETECTOR_HEIGHT", "240");
    std::env::set_var("BOT_DETECTOR_RULE", "pixel");
    let cfg = DetectorConfig::load().expect("env config");
    assert_eq!((cfg.width, cfg.height), (320, 240));
    assert_eq!(cfg.rule, RuleKind::PixelDelta);
    assert_eq!(cfg.source.url, "stub://camera_tower");

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BOT_DETECTOR_WIDTH", "8");
    std::env::set_var("BOT_DETECTOR_HEIGHT", "8");

    std::env::set_var("BOT_DETECTOR_BG_SAMPLE", "0");
    assert!(DetectorConfig::load().is_err());
    std::env::set_var("BOT_DETECTOR_BG_SAMPLE", "many");
    assert!(DetectorConfig::load().is_err());
    std::env::remove_var("BOT_DETECTOR_BG_SAMPLE");

    std::env::set_var("BOT_DETECTOR_VERBOSE", "sometimes");
    assert!(DetectorConfig::load().is_err());
    std::env::remove_var("BOT_DETECTOR_VERBOSE");

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "background": { "quantile": 1.5 } }"#)
        .expect("write config");
    assert!(DetectorConfig::load_from(Some(file.path())).is_err());

    let missing = std::path::Path::new("/nonexistent/bot_detector.json");
    let err = DetectorConfig::load_from(Some(missing)).expect_err("missing file");
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}

#[test]
fn unrepresentable_reload_interval_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut json = NamedTempFile::new().expect("temp config");
    json.write_all(br#"{ "camera": { "width": 2, "height": 1 }, "reload": { "interval_secs": 1e30 } }"#)
        .expect("write config");
    let err = DetectorConfig::load_from(Some(json.path())).expect_err("interval too large");
    assert!(err.to_string().contains("reload.interval_secs"));

    let mut toml = Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    toml.write_all(b"[camera]\nwidth = 2\nheight = 1\n\n[reload]\ninterval_secs = inf\n")
        .expect("write config");
    let err = DetectorConfig::load_from(Some(toml.path())).expect_err("infinite interval");
    assert!(err.to_string().contains("reload.interval_secs"));

    let mut negative = NamedTempFile::new().expect("temp config");
    negative
        .write_all(br#"{ "camera": { "width": 2, "height": 1 }, "reload": { "interval_secs": -1.0 } }"#)
        .expect("write config");
    assert!(DetectorConfig::load_from(Some(negative.path())).is_err());

    clear_env();
}
