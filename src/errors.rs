use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("Transient capture failure: {0}")]
    TransientCaptureFailure(String),
    #[error("Encoding error: {0}")]
    EncodingError(String),
    #[error("Protocol misuse: {0}")]
    ProtocolMisuse(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl CameraError {
    /// Fatal errors end the acquisition loop; everything else only costs
    /// one frame or one still.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CameraError::DeviceUnavailable(_))
    }
}

impl From<std::io::Error> for CameraError {
    fn from(e: std::io::Error) -> Self {
        CameraError::DeviceUnavailable(e.to_string())
    }
}

impl From<image::ImageError> for CameraError {
    fn from(e: image::ImageError) -> Self {
        CameraError::EncodingError(e.to_string())
    }
}
