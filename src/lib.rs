//! CrabStream: share one camera between an MJPEG video stream and on-demand
//! high-resolution stills
//!
//! A single acquisition loop owns the capture device. Video frames fan out to
//! any number of viewers through a latest-frame-wins broadcast slot, and still
//! requests are handed to the loop one at a time through a rendezvous, so
//! viewers and still requesters never touch the device themselves.
//!
//! # Features
//! - Lazily started, restartable acquisition loop (`CameraSession`)
//! - Latest-frame-wins broadcast with per-viewer cursors
//! - Strictly serialized still capture with optional deadlines
//! - Interchangeable capture backends selected by configuration:
//!   synthetic, nokhwa webcam (`webcam`), V4L2 MJPEG encoder and V4L2
//!   frame-by-frame (`v4l2`)
//! - Async MJPEG helpers for HTTP front ends, and an axum server binary
//!   (`server`)
//!
//! # Usage
//! ```rust,no_run
//! use crabstream::{CameraSession, CrabStreamConfig};
//!
//! # fn main() -> Result<(), crabstream::CameraError> {
//! crabstream::init_logging();
//! let config = CrabStreamConfig::load_or_default();
//! let session = CameraSession::from_config(&config)?;
//!
//! let frame = session.get_video_frame()?;
//! let still = session.get_still_image()?;
//! println!("video {} bytes, still {} bytes", frame.len(), still.len());
//! # Ok(())
//! # }
//! ```
pub mod backend;
pub mod broadcast;
pub mod config;
pub mod encode;
pub mod errors;
pub mod invariant_ppt;
pub mod rendezvous;
pub mod session;
pub mod timing;
pub mod transport;
pub mod types;

// Testing utilities - scripted backend and synthetic frames
pub mod testing;

mod sync;

// Re-exports for convenience
pub use backend::{CaptureBackend, CaptureDevice, CaptureOptions, FrameSink};
pub use broadcast::FrameBroadcastChannel;
pub use config::CrabStreamConfig;
pub use errors::CameraError;
pub use rendezvous::{StillCaptureRendezvous, StillRequest};
pub use session::{CameraSession, SessionSettings};
pub use transport::AsyncCamera;
pub use types::{BackendKind, Resolution, SessionState, SessionStatus};

/// Initialize logging for the streaming system
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabstream=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        backends: compiled_backends(),
    }
}

/// Backends available in this build
pub fn compiled_backends() -> Vec<BackendKind> {
    let mut backends = vec![BackendKind::Synthetic];
    if cfg!(feature = "webcam") {
        backends.push(BackendKind::Webcam);
    }
    if cfg!(all(feature = "v4l2", target_os = "linux")) {
        backends.push(BackendKind::MjpegEncoder);
        backends.push(BackendKind::FrameByFrame);
    }
    backends
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub backends: Vec<BackendKind>,
}
