//! Configuration management for CrabStream
//!
//! Camera, session timing and server settings, loaded from TOML with an
//! optional environment overlay (`CRABSTREAM_<SECTION>__<KEY>`).

use crate::errors::CameraError;
use crate::session::SessionSettings;
use crate::types::{BackendKind, Resolution};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest accepted width or height, in pixels.
pub const MAX_DIMENSION: u32 = 16_384;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CrabStreamConfig {
    pub camera: CameraConfig,
    pub session: SessionConfig,
    pub server: ServerConfig,
}

/// Capture device settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Adapter variant backing the session
    pub backend: BackendKind,
    /// Device index (`/dev/videoN` on Linux)
    pub device_index: u32,
    pub video_resolution: Resolution,
    pub still_resolution: Resolution,
    /// JPEG quality for software-encoded frames (1-100)
    pub jpeg_quality: u8,
    /// Upper bound on the acquisition frame rate
    pub max_fps: u32,
}

/// Acquisition loop timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How often a waiting viewer re-checks that the loop is alive
    pub reconnect_delay_ms: u64,
    /// Deadline for one video frame at the HTTP boundary
    pub frame_timeout_ms: u64,
    /// Deadline for one still at the HTTP boundary
    pub still_timeout_ms: u64,
}

/// HTTP front end settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Pacing of each MJPEG viewer
    pub stream_fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Synthetic,
            device_index: 0,
            video_resolution: Resolution::video_default(),
            still_resolution: Resolution::still_default(),
            jpeg_quality: crate::encode::DEFAULT_JPEG_QUALITY,
            max_fps: 30,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 1000,
            frame_timeout_ms: 5000,
            still_timeout_ms: 10_000,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            stream_fps: 30,
        }
    }
}

impl SessionConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn still_timeout(&self) -> Duration {
        Duration::from_millis(self.still_timeout_ms)
    }
}

impl CrabStreamConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            CameraError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        let config: CrabStreamConfig = toml::from_str(&contents).map_err(|e| {
            CameraError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CameraError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CameraError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = self.to_toml()?;
        fs::write(path, toml_string).map_err(|e| {
            CameraError::ConfigError(format!("Failed to write config file: {}", e))
        })?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, CameraError> {
        toml::to_string_pretty(self)
            .map_err(|e| CameraError::ConfigError(format!("Failed to serialize config: {}", e)))
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabstream.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Defaults, then the TOML file at `path` if present, then
    /// `CRABSTREAM_<SECTION>__<KEY>` environment variables. The result is
    /// validated.
    pub fn load_layered<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let path = path.as_ref();
        let defaults = config::Config::try_from(&Self::default()).map_err(layer_error)?;

        let config: CrabStreamConfig = config::Config::builder()
            .add_source(defaults)
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("CRABSTREAM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|layered| layered.try_deserialize())
            .map_err(layer_error)?;

        config.validate().map_err(CameraError::ConfigError)?;
        log::debug!("Layered configuration resolved from {:?}", path);
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        let oversized = |r: Resolution| r.width > MAX_DIMENSION || r.height > MAX_DIMENSION;
        if self.camera.video_resolution.is_empty() || oversized(self.camera.video_resolution) {
            return Err(format!(
                "Invalid video resolution (each side must be 1-{})",
                MAX_DIMENSION
            ));
        }
        if self.camera.still_resolution.is_empty() || oversized(self.camera.still_resolution) {
            return Err(format!(
                "Invalid still resolution (each side must be 1-{})",
                MAX_DIMENSION
            ));
        }
        if self.camera.jpeg_quality == 0 || self.camera.jpeg_quality > 100 {
            return Err("JPEG quality must be between 1 and 100".to_string());
        }
        if self.camera.max_fps == 0 || self.camera.max_fps > 240 {
            return Err("Invalid max FPS (must be 1-240)".to_string());
        }

        if self.session.reconnect_delay_ms == 0 {
            return Err("Reconnect delay must be positive".to_string());
        }
        if self.session.frame_timeout_ms == 0 || self.session.still_timeout_ms == 0 {
            return Err("Timeouts must be positive".to_string());
        }

        if self.server.stream_fps == 0 || self.server.stream_fps > 240 {
            return Err("Invalid stream FPS (must be 1-240)".to_string());
        }
        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", self.server.bind));
        }

        Ok(())
    }

    /// Settings the acquisition session is constructed with.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            video_resolution: self.camera.video_resolution,
            still_resolution: self.camera.still_resolution,
            reconnect_delay: self.session.reconnect_delay(),
        }
    }
}

fn layer_error(e: config::ConfigError) -> CameraError {
    CameraError::ConfigError(format!("Failed to load layered config: {}", e))
}
