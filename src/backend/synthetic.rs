//! Hardware-free backend producing generated gradient frames.
//!
//! Behaves like a real device thread: frames are paced at `max_fps`, stills
//! are rendered at the requested resolution and stall video while they run.

use super::{CaptureBackend, CaptureDevice, CaptureOptions, DeviceThread, FrameSource};
use crate::errors::CameraError;
use crate::testing::synthetic_jpeg_frame;
use crate::types::Resolution;
use bytes::Bytes;

pub struct SyntheticBackend {
    options: CaptureOptions,
}

impl SyntheticBackend {
    pub fn new(options: CaptureOptions) -> Self {
        Self { options }
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new(CaptureOptions::default())
    }
}

impl CaptureBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn open(&self) -> Result<Box<dyn CaptureDevice>, CameraError> {
        let quality = self.options.jpeg_quality;
        let device = DeviceThread::spawn("synthetic", self.options.max_fps, move || {
            Ok(SyntheticSource {
                quality,
                frame_number: 0,
            })
        })?;
        Ok(Box::new(device))
    }
}

struct SyntheticSource {
    quality: u8,
    frame_number: u64,
}

impl FrameSource for SyntheticSource {
    fn video_frame(&mut self, resolution: Resolution) -> Result<Bytes, CameraError> {
        self.frame_number += 1;
        synthetic_jpeg_frame(self.frame_number, resolution, self.quality)
    }

    fn still(&mut self, resolution: Resolution) -> Result<Bytes, CameraError> {
        synthetic_jpeg_frame(self.frame_number, resolution, self.quality)
    }
}
