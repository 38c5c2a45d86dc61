use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub camera: CameraConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The external recognition service.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub base_url: String,
    /// Per-request timeout. `0` disables it.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra headers sent with every request (e.g. tunnel bypass headers).
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraMode {
    Mjpeg,
    Polling,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub url: String,
    #[serde(default = "default_mode")]
    pub mode: CameraMode,
    #[serde(default = "default_fps")]
    pub fps: f64,
    /// JPEG quality used when re-encoding a captured frame.
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default = "default_metadata_timeout")]
    pub metadata_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_reset_delay_ms")]
    pub reset_delay_ms: u64,
    #[serde(default = "default_true")]
    pub freeze_on_verify: bool,
    #[serde(default = "default_verify_frames")]
    pub verify_frames: usize,
    #[serde(default = "default_verify_frame_interval_ms")]
    pub verify_frame_interval_ms: u64,
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UiConfig {
    #[serde(default = "default_true")]
    pub color: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reset_delay_ms: default_reset_delay_ms(),
            freeze_on_verify: true,
            verify_frames: default_verify_frames(),
            verify_frame_interval_ms: default_verify_frame_interval_ms(),
            snapshot_path: None,
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self { color: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

const MIN_FPS: f64 = 0.01;
const MAX_FPS: f64 = 1000.0;

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if config.service.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("service.base_url must not be empty".into()));
        }
        if config.session.verify_frames == 0 {
            return Err(ConfigError::Invalid("session.verify_frames must be at least 1".into()));
        }
        if !(MIN_FPS..=MAX_FPS).contains(&config.camera.fps) {
            return Err(ConfigError::Invalid(format!(
                "camera.fps must be between {MIN_FPS} and {MAX_FPS}"
            )));
        }
        Ok(config)
    }
}

impl ServiceConfig {
    /// `{base_url}/{path}` with exactly one slash in between.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl CameraConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }
}

impl SessionConfig {
    pub fn reset_delay(&self) -> Duration {
        Duration::from_millis(self.reset_delay_ms)
    }

    pub fn verify_frame_interval(&self) -> Duration {
        Duration::from_millis(self.verify_frame_interval_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_timeout_secs() -> u64 {
    30
}
fn default_mode() -> CameraMode {
    CameraMode::Mjpeg
}
fn default_fps() -> f64 {
    10.0
}
fn default_quality() -> u8 {
    80
}
fn default_metadata_timeout() -> u64 {
    10
}
fn default_reset_delay_ms() -> u64 {
    4000
}
fn default_true() -> bool {
    true
}
fn default_verify_frames() -> usize {
    1
}
fn default_verify_frame_interval_ms() -> u64 {
    200
}
fn default_log_level() -> String {
    "info".into()
}
