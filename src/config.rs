use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::detect::{rules::default_half_width, RuleKind, RuleSettings, DEFAULT_QUANTILE};
use crate::pipeline::{PipelineSettings, ReloadSettings};

pub const CONFIG_ENV: &str = "BOT_DETECTOR_CONFIG";

const DEFAULT_BG_SAMPLE: usize = 1000;
const DEFAULT_PIXEL_TOLERANCE: u8 = 25;
const DEFAULT_CHANGED_FRACTION: f64 = 0.02;
const DEFAULT_STATS_INTERVAL: u64 = 100;
const DEFAULT_RELOAD_SECS: f64 = 2.0;
const DEFAULT_SOURCE_URL: &str = "stub://camera_tower";
const DEFAULT_TARGET_FPS: u32 = 30;

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    verbose: Option<bool>,
    camera: Option<CameraConfigFile>,
    background: Option<BackgroundConfigFile>,
    detection: Option<DetectionConfigFile>,
    stats: Option<StatsConfigFile>,
    reload: Option<ReloadConfigFile>,
    source: Option<SourceConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct BackgroundConfigFile {
    bg_sample: Option<usize>,
    quantile: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    rule: Option<String>,
    half_width: Option<u64>,
    pixel_tolerance: Option<u8>,
    changed_fraction: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct StatsConfigFile {
    interval_passes: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ReloadConfigFile {
    interval_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub verbose: bool,
    /// Expected frame width. Required; 0 means "not configured".
    pub width: u32,
    /// Expected frame height. Required; 0 means "not configured".
    pub height: u32,
    /// Warm-up sample count (`BG_SAMPLE`). Warm-up holds `width * height * 3 * bg_sample`
    /// bytes of samples.
    pub bg_sample: usize,
    pub quantile: f64,
    pub rule: RuleKind,
    /// Band half-width; `None` derives it from the frame geometry.
    pub half_width: Option<u64>,
    pub pixel_tolerance: u8,
    pub changed_fraction: f64,
    pub stats_interval: u64,
    pub reload_interval: Duration,
    pub source: SourceSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    pub url: String,
    pub target_fps: u32,
}

impl DetectorConfig {
    /// Load from the file named by `BOT_DETECTOR_CONFIG` (if any), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Same as `load`, with an explicit config file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => DetectorConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DetectorConfigFile) -> Result<Self> {
        let camera = file.camera.unwrap_or_default();
        let background = file.background.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let rule = match detection.rule.as_deref() {
            Some(name) => name.parse()?,
            None => RuleKind::default(),
        };
        let source = file.source.unwrap_or_default();
        let reload_secs = file
            .reload
            .and_then(|reload| reload.interval_secs)
            .unwrap_or(DEFAULT_RELOAD_SECS);
        let reload_interval = Duration::try_from_secs_f64(reload_secs).map_err(|_| {
            anyhow!(
                "reload.interval_secs must be a finite, non-negative number of seconds, got {}",
                reload_secs
            )
        })?;
        Ok(Self {
            verbose: file.verbose.unwrap_or(true),
            width: camera.width.unwrap_or(0),
            height: camera.height.unwrap_or(0),
            bg_sample: background.bg_sample.unwrap_or(DEFAULT_BG_SAMPLE),
            quantile: background.quantile.unwrap_or(DEFAULT_QUANTILE),
            rule,
            half_width: detection.half_width,
            pixel_tolerance: detection
                .pixel_tolerance
                .unwrap_or(DEFAULT_PIXEL_TOLERANCE),
            changed_fraction: detection
                .changed_fraction
                .unwrap_or(DEFAULT_CHANGED_FRACTION),
            stats_interval: file
                .stats
                .and_then(|stats| stats.interval_passes)
                .unwrap_or(DEFAULT_STATS_INTERVAL),
            reload_interval,
            source: SourceSettings {
                url: source
                    .url
                    .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                target_fps: source.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(width) = env_parse::<u32>("BOT_DETECTOR_WIDTH")? {
            self.width = width;
        }
        if let Some(height) = env_parse::<u32>("BOT_DETECTOR_HEIGHT")? {
            self.height = height;
        }
        if let Some(bg_sample) = env_parse::<usize>("BOT_DETECTOR_BG_SAMPLE")? {
            self.bg_sample = bg_sample;
        }
        if let Some(half_width) = env_parse::<u64>("BOT_DETECTOR_HALF_WIDTH")? {
            self.half_width = Some(half_width);
        }
        if let Ok(verbose) = std::env::var("BOT_DETECTOR_VERBOSE") {
            self.verbose = parse_bool(&verbose)
                .ok_or_else(|| anyhow!("BOT_DETECTOR_VERBOSE must be true or false"))?;
        }
        if let Ok(rule) = std::env::var("BOT_DETECTOR_RULE") {
            if !rule.trim().is_empty() {
                self.rule = rule.parse()?;
            }
        }
        if let Ok(url) = std::env::var("BOT_DETECTOR_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.width == 0 {
            return Err(anyhow!(
                "camera.width is required (config file or BOT_DETECTOR_WIDTH)"
            ));
        }
        if self.height == 0 {
            return Err(anyhow!(
                "camera.height is required (config file or BOT_DETECTOR_HEIGHT)"
            ));
        }
        if self.bg_sample == 0 {
            return Err(anyhow!("background.bg_sample must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.quantile) {
            return Err(anyhow!("background.quantile must be within 0.0..=1.0"));
        }
        if !(0.0..1.0).contains(&self.changed_fraction) {
            return Err(anyhow!("detection.changed_fraction must be within 0.0..1.0"));
        }
        if self.reload_interval.is_zero() {
            return Err(anyhow!("reload.interval_secs must be greater than zero"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source.target_fps must be greater than zero"));
        }
        Ok(())
    }

    /// Band half-width actually used: configured, or derived from the geometry.
    pub fn effective_half_width(&self) -> u64 {
        self.half_width
            .unwrap_or_else(|| default_half_width(self.width, self.height))
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            width: self.width,
            height: self.height,
            bg_sample: self.bg_sample,
            quantile: self.quantile,
            rule: RuleSettings {
                kind: self.rule,
                half_width: self.effective_half_width(),
                pixel_tolerance: self.pixel_tolerance,
                changed_fraction: self.changed_fraction,
            },
            stats_interval: self.stats_interval,
        }
    }

    pub fn reload_settings(&self) -> ReloadSettings {
        ReloadSettings {
            verbose: self.verbose,
        }
    }
}

fn read_config_file(path: &Path) -> Result<DetectorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a non-negative integer", key)),
        _ => Ok(None),
    }
}

/// Accepts the usual spellings of a boolean flag.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
