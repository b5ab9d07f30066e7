//! Application configuration: a JSON file in the platform config directory,
//! overridden by `ANNOTATE_*` environment variables (a `.env` file is read
//! at startup).
//!
//! - Linux: `~/.config/annotate-studio/config.json`
//! - macOS: `~/Library/Application Support/annotate-studio/config.json`
//! - Windows: `%APPDATA%\annotate-studio\config.json`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::frames::SampleMethod;

const APP_DIR: &str = "annotate-studio";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the HTTP API.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// WebSocket URL of the push channel.
    #[serde(default = "default_socket_url")]
    pub socket_url: String,

    /// Where uploaded media bytes are cached.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Frames per second to sample from uploaded videos.
    #[serde(default = "default_sample_fps")]
    pub sample_fps: f64,

    /// Fixed number of frames per video. Takes precedence over
    /// `sample_fps` when set.
    #[serde(default)]
    pub sample_frames: Option<usize>,

    /// Width the canvas stage is fitted to, in points.
    #[serde(default = "default_display_width")]
    pub display_width: f32,
}

fn default_api_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_socket_url() -> String {
    "ws://localhost:5000/ws".to_string()
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|p| p.join(APP_DIR).join("media"))
        .unwrap_or_else(|| PathBuf::from("media-cache"))
}

fn default_sample_fps() -> f64 {
    1.0
}

fn default_display_width() -> f32 {
    1000.0
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            socket_url: default_socket_url(),
            cache_dir: default_cache_dir(),
            sample_fps: default_sample_fps(),
            sample_frames: None,
            display_width: default_display_width(),
        }
    }
}

/// Path to the config file.
pub fn config_file() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join(APP_DIR).join("config.json"))
        .unwrap_or_else(|| PathBuf::from("config.json"))
}

/// Directory for debug-build log files.
pub fn logs_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join(APP_DIR).join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

impl AppConfig {
    /// Read `path`. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config at {}; using defaults", path.display());
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply `ANNOTATE_*` overrides. `var` looks a variable up, so tests
    /// can supply their own environment.
    pub fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(url) = var("ANNOTATE_API_URL") {
            self.api_url = url;
        }
        if let Some(url) = var("ANNOTATE_SOCKET_URL") {
            self.socket_url = url;
        }
        if let Some(dir) = var("ANNOTATE_CACHE_DIR") {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(value) = var("ANNOTATE_SAMPLE_FPS") {
            self.sample_fps = value
                .parse::<f64>()
                .ok()
                .filter(|fps| fps.is_finite() && *fps > 0.0)
                .ok_or(ConfigError::InvalidEnv {
                    var: "ANNOTATE_SAMPLE_FPS",
                    value,
                })?;
        }
        if let Some(value) = var("ANNOTATE_SAMPLE_FRAMES") {
            let frames = value.parse::<usize>().ok().filter(|n| *n > 0).ok_or(ConfigError::InvalidEnv {
                var: "ANNOTATE_SAMPLE_FRAMES",
                value,
            })?;
            self.sample_frames = Some(frames);
        }
        Ok(self)
    }

    /// File plus process environment. Errors fall back to defaults with a
    /// warning rather than refusing to start.
    pub fn load() -> Self {
        let path = config_file();
        let config = AppConfig::from_file(&path).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Config unusable; using defaults");
            AppConfig::default()
        });
        match config.clone().with_overrides(|name| std::env::var(name).ok()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring environment overrides");
                config
            }
        }
    }

    pub fn sample_method(&self) -> SampleMethod {
        match self.sample_frames {
            Some(frames) => SampleMethod::Total(frames),
            None => SampleMethod::PerSecond(self.sample_fps),
        }
    }
}
