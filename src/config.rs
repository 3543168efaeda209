use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    None,
    Motion,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub capture: CaptureConfig,
    pub stream: StreamConfig,
    pub detection: DetectionConfig,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
    pub snapshot_dir: PathBuf,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct CaptureConfig {
    pub frame_interval_ms: u64,
    pub open_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    pub jpeg_quality: i32,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct StreamConfig {
    pub poll_interval_ms: u64,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct DetectionConfig {
    pub kind: DetectorKind,
    pub min_area: f64,
    pub label: String,
    pub draw_rectangles: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            capture: CaptureConfig::default(),
            stream: StreamConfig::default(),
            detection: DetectionConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://database.db?mode=rwc".to_string(),
            snapshot_dir: PathBuf::from("detections"),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 33,
            open_timeout_ms: 5000,
            read_timeout_ms: 5000,
            stop_timeout_ms: 2000,
            jpeg_quality: 80,
        }
    }
}

impl CaptureConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 33,
        }
    }
}

impl StreamConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            kind: DetectorKind::None,
            min_area: 500.0,
            label: "motion".to_string(),
            draw_rectangles: true,
        }
    }
}

/// Reads the TOML config at `path`. A missing file is not an error;
/// callers fall back to `Config::default()`.
pub fn load_config(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Error while reading config {}", path.display()))?;
    parse_config(&raw).map(Some)
}

pub fn parse_config(raw: &str) -> Result<Config> {
    toml::from_str(raw).context("Invalid config")
}
