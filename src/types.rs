use crate::errors::CameraError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Default continuous-stream size
    pub const fn video_default() -> Self {
        Self::new(320, 240)
    }

    /// Default still-capture size
    pub const fn still_default() -> Self {
        Self::new(1024, 768)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Size of a packed RGB24 buffer at this resolution
    pub fn rgb_len(&self) -> usize {
        (self.pixel_count() * 3) as usize
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| CameraError::ConfigError(format!("resolution should be WxH: {s}")))?;
        let width = w
            .trim()
            .parse()
            .map_err(|_| CameraError::ConfigError(format!("invalid width in {s}")))?;
        let height = h
            .trim()
            .parse()
            .map_err(|_| CameraError::ConfigError(format!("invalid height in {s}")))?;
        Ok(Self::new(width, height))
    }
}

/// Which capture adapter backs the session, chosen by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Generated frames, no hardware
    #[default]
    Synthetic,
    /// Software webcam adapter (nokhwa)
    Webcam,
    /// Device-side MJPEG encoder (V4L2 `MJPG`)
    MjpegEncoder,
    /// Legacy frame-by-frame capture with software encoding (V4L2 `YUYV`)
    FrameByFrame,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Synthetic => "synthetic",
            BackendKind::Webcam => "webcam",
            BackendKind::MjpegEncoder => "mjpeg-encoder",
            BackendKind::FrameByFrame => "frame-by-frame",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synthetic" => Ok(BackendKind::Synthetic),
            "webcam" => Ok(BackendKind::Webcam),
            "mjpeg-encoder" => Ok(BackendKind::MjpegEncoder),
            "frame-by-frame" => Ok(BackendKind::FrameByFrame),
            other => Err(CameraError::ConfigError(format!("unknown backend: {other}"))),
        }
    }
}

/// Lifecycle of the acquisition loop. Termination returns to `NotStarted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NotStarted,
    Running,
}

/// Point-in-time view of a session, served by `/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub backend: String,
    pub state: SessionState,
    pub launches: u64,
    pub frames_published: u64,
    pub stills_served: u64,
    pub video_resolution: Resolution,
    pub still_resolution: Resolution,
    pub last_error: Option<String>,
}
