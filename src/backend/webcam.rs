//! Software webcam adapter built on nokhwa.
//!
//! The camera is opened once at its highest resolution. Video frames and
//! stills are both scaled from that native frame and JPEG-encoded in
//! software, so stills do not reconfigure the device.

use super::{CaptureBackend, CaptureDevice, CaptureOptions, DeviceThread, FrameSource};
use crate::encode::{encode_rgb_jpeg, is_jpeg};
use crate::errors::CameraError;
use crate::types::Resolution;
use bytes::Bytes;
use nokhwa::{
    pixel_format::RgbFormat,
    utils::{CameraIndex, RequestedFormat, RequestedFormatType},
    Buffer, Camera,
};

/// Frames discarded after opening while exposure settles.
const WARM_UP_FRAMES: usize = 3;

pub struct WebcamBackend {
    options: CaptureOptions,
}

impl WebcamBackend {
    pub fn new(options: CaptureOptions) -> Self {
        Self { options }
    }
}

impl CaptureBackend for WebcamBackend {
    fn name(&self) -> &str {
        "webcam"
    }

    fn open(&self) -> Result<Box<dyn CaptureDevice>, CameraError> {
        let index = self.options.device_index;
        let quality = self.options.jpeg_quality;
        let device = DeviceThread::spawn("webcam", self.options.max_fps, move || {
            WebcamSource::open(index, quality)
        })?;
        Ok(Box::new(device))
    }
}

struct WebcamSource {
    camera: Camera,
    quality: u8,
}

impl WebcamSource {
    fn open(index: u32, quality: u8) -> Result<Self, CameraError> {
        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);
        let mut camera = Camera::new(CameraIndex::Index(index), requested).map_err(|e| {
            CameraError::DeviceUnavailable(format!("Failed to open camera {}: {}", index, e))
        })?;
        camera.open_stream().map_err(|e| {
            CameraError::DeviceUnavailable(format!("Failed to start camera stream: {}", e))
        })?;

        let mut source = Self { camera, quality };
        for _ in 0..WARM_UP_FRAMES {
            if let Err(e) = source.grab_rgb() {
                log::debug!("Warm-up frame failed: {}", e);
            }
        }
        Ok(source)
    }

    /// Capture one frame as packed RGB24 at the native resolution.
    fn grab_rgb(&mut self) -> Result<(Vec<u8>, Resolution), CameraError> {
        let frame = self
            .camera
            .frame()
            .map_err(|e| CameraError::TransientCaptureFailure(format!("Failed to capture frame: {}", e)))?;

        decode_rgb(&frame)
    }

    fn encode(&mut self, resolution: Resolution) -> Result<Bytes, CameraError> {
        let (rgb, native) = self.grab_rgb()?;
        encode_rgb_jpeg(rgb, native, resolution, self.quality)
    }
}

/// Convert one nokhwa frame to packed RGB24 at its native resolution.
///
/// Drivers may deliver MJPEG, YUYV, NV12 or GRAY regardless of the requested
/// format.
fn decode_rgb(frame: &Buffer) -> Result<(Vec<u8>, Resolution), CameraError> {
    let raw = frame.buffer();
    if is_jpeg(raw) {
        let decoded = image::load_from_memory(raw).map_err(|e| {
            CameraError::TransientCaptureFailure(format!("Failed to decode MJPEG: {}", e))
        })?;
        let native = Resolution::new(decoded.width(), decoded.height());
        return Ok((decoded.to_rgb8().into_raw(), native));
    }

    let decoded = frame.decode_image::<RgbFormat>().map_err(|e| {
        CameraError::TransientCaptureFailure(format!(
            "Failed to decode {} frame: {}",
            frame.source_frame_format(),
            e
        ))
    })?;
    let native = Resolution::new(decoded.width(), decoded.height());
    Ok((decoded.into_raw(), native))
}

impl FrameSource for WebcamSource {
    fn video_frame(&mut self, resolution: Resolution) -> Result<Bytes, CameraError> {
        self.encode(resolution)
    }

    fn still(&mut self, resolution: Resolution) -> Result<Bytes, CameraError> {
        self.encode(resolution)
    }
}

impl Drop for WebcamSource {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            log::warn!("Failed to stop camera stream: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_jpeg_frame;
    use nokhwa::utils::{FrameFormat, Resolution as NokhwaResolution};

    #[test]
    fn test_decode_yuyv_frame() {
        // Mid-grey YUYV: every luma and chroma byte at 128
        let yuyv = vec![128u8; 8 * 4 * 2];
        let frame = Buffer::new(NokhwaResolution::new(8, 4), &yuyv, FrameFormat::YUYV);

        let (rgb, native) = decode_rgb(&frame).unwrap();
        assert_eq!(native, Resolution::new(8, 4));
        assert_eq!(rgb.len(), native.rgb_len());
    }

    #[test]
    fn test_decode_mjpeg_frame() {
        let resolution = Resolution::new(16, 8);
        let jpeg = synthetic_jpeg_frame(1, resolution, 80).unwrap();
        let frame = Buffer::new(NokhwaResolution::new(16, 8), &jpeg, FrameFormat::MJPEG);

        let (rgb, native) = decode_rgb(&frame).unwrap();
        assert_eq!(native, resolution);
        assert_eq!(rgb.len(), resolution.rgb_len());
    }
}
