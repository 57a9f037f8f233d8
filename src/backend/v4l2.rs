//! V4L2 adapters for Linux capture devices.
//!
//! Two variants share one mmap capture wrapper:
//!
//! * [`MjpegEncoderBackend`] asks the device for `MJPG` and forwards the
//!   encoded frames untouched. A still reconfigures the device to the still
//!   resolution, grabs once, and the next video frame switches back.
//! * [`FrameByFrameBackend`] captures raw `YUYV` at the largest resolution
//!   requested so far and encodes every frame in software, scaling down for
//!   video. Slower, but works on devices without a hardware encoder and
//!   reconfigures at most once, on the first still.

use super::{CaptureBackend, CaptureDevice, CaptureOptions, DeviceThread, FrameSource};
use crate::encode::{encode_rgb_jpeg, is_jpeg, yuyv_to_rgb};
use crate::errors::CameraError;
use crate::types::Resolution;
use bytes::Bytes;
use std::io;
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

const BUFFER_COUNT: u32 = 4;

/// Frames dropped after a format change while auto-exposure settles.
const SETTLE_FRAMES: usize = 2;

fn io_error(context: &str, e: io::Error) -> CameraError {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => {
            CameraError::TransientCaptureFailure(format!("{}: {}", context, e))
        }
        _ => CameraError::DeviceUnavailable(format!("{}: {}", context, e)),
    }
}

/// One V4L2 device with an mmap stream in a fixed pixel format.
struct V4l2Capture {
    device: Device,
    index: u32,
    fourcc: FourCC,
    /// Resolution last configured, with its live stream.
    active: Option<(Resolution, MmapStream<'static>)>,
}

impl V4l2Capture {
    fn open(index: u32, fourcc: FourCC) -> Result<Self, CameraError> {
        let device = Device::new(index as usize).map_err(|e| {
            CameraError::DeviceUnavailable(format!("Failed to open /dev/video{}: {}", index, e))
        })?;
        Ok(Self {
            device,
            index,
            fourcc,
            active: None,
        })
    }

    fn active_resolution(&self) -> Option<Resolution> {
        self.active.as_ref().map(|(resolution, _)| *resolution)
    }

    /// Switch the device to `requested`. No-op when already there.
    fn configure(&mut self, requested: Resolution) -> Result<Resolution, CameraError> {
        if let Some((current, _)) = &self.active {
            if *current == requested {
                return Ok(*current);
            }
        }

        // Buffers must be released before the format can change
        self.active = None;

        let format = Format::new(requested.width, requested.height, self.fourcc);
        let granted = Capture::set_format(&self.device, &format)
            .map_err(|e| io_error("Failed to set capture format", e))?;
        if granted.fourcc != self.fourcc {
            return Err(CameraError::DeviceUnavailable(format!(
                "/dev/video{} does not support {}",
                self.index, self.fourcc
            )));
        }

        let resolution = Resolution::new(granted.width, granted.height);
        if resolution != requested {
            log::warn!(
                "/dev/video{} granted {} instead of {}",
                self.index,
                resolution,
                requested
            );
        }

        let stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| io_error("Failed to create capture stream", e))?;
        self.active = Some((requested, stream));
        log::debug!("/dev/video{} streaming {} at {}", self.index, self.fourcc, resolution);

        for _ in 0..SETTLE_FRAMES {
            self.grab()?;
        }
        Ok(resolution)
    }

    /// Dequeue one buffer, trimmed to the bytes the driver filled.
    fn grab(&mut self) -> Result<Vec<u8>, CameraError> {
        let (_, stream) = self.active.as_mut().ok_or_else(|| {
            CameraError::ProtocolMisuse("capture stream is not configured".to_string())
        })?;
        let (buffer, meta) = stream
            .next()
            .map_err(|e| io_error("Failed to dequeue frame", e))?;
        let used = (meta.bytesused as usize).min(buffer.len());
        if used == 0 {
            return Err(CameraError::TransientCaptureFailure(
                "driver returned an empty buffer".to_string(),
            ));
        }
        Ok(buffer[..used].to_vec())
    }
}

/// Device-side MJPEG encoder variant.
pub struct MjpegEncoderBackend {
    options: CaptureOptions,
}

impl MjpegEncoderBackend {
    pub fn new(options: CaptureOptions) -> Self {
        Self { options }
    }
}

impl CaptureBackend for MjpegEncoderBackend {
    fn name(&self) -> &str {
        "mjpeg-encoder"
    }

    fn open(&self) -> Result<Box<dyn CaptureDevice>, CameraError> {
        let index = self.options.device_index;
        let device = DeviceThread::spawn("mjpeg-encoder", self.options.max_fps, move || {
            V4l2Capture::open(index, FourCC::new(b"MJPG")).map(MjpegEncoderSource)
        })?;
        Ok(Box::new(device))
    }
}

struct MjpegEncoderSource(V4l2Capture);

impl MjpegEncoderSource {
    fn grab_jpeg(&mut self) -> Result<Bytes, CameraError> {
        let frame = self.0.grab()?;
        if !is_jpeg(&frame) {
            return Err(CameraError::TransientCaptureFailure(
                "device returned a frame without a JPEG header".to_string(),
            ));
        }
        Ok(Bytes::from(frame))
    }
}

impl FrameSource for MjpegEncoderSource {
    fn video_frame(&mut self, resolution: Resolution) -> Result<Bytes, CameraError> {
        self.0.configure(resolution)?;
        self.grab_jpeg()
    }

    fn still(&mut self, resolution: Resolution) -> Result<Bytes, CameraError> {
        // The next video frame switches the format back
        self.0.configure(resolution)?;
        self.grab_jpeg()
    }
}

/// Legacy frame-by-frame variant with software JPEG encoding.
pub struct FrameByFrameBackend {
    options: CaptureOptions,
}

impl FrameByFrameBackend {
    pub fn new(options: CaptureOptions) -> Self {
        Self { options }
    }
}

impl CaptureBackend for FrameByFrameBackend {
    fn name(&self) -> &str {
        "frame-by-frame"
    }

    fn open(&self) -> Result<Box<dyn CaptureDevice>, CameraError> {
        let index = self.options.device_index;
        let quality = self.options.jpeg_quality;
        let device = DeviceThread::spawn("frame-by-frame", self.options.max_fps, move || {
            Ok(FrameByFrameSource {
                capture: V4l2Capture::open(index, FourCC::new(b"YUYV"))?,
                native: None,
                quality,
            })
        })?;
        Ok(Box::new(device))
    }
}

struct FrameByFrameSource {
    capture: V4l2Capture,
    /// Size the driver granted for the largest resolution seen so far.
    native: Option<Resolution>,
    quality: u8,
}

impl FrameByFrameSource {
    /// Capture at the largest size requested so far and scale to `target`.
    fn encode(&mut self, target: Resolution) -> Result<Bytes, CameraError> {
        let wanted = match self.capture.active_resolution() {
            Some(current) if current.pixel_count() >= target.pixel_count() => current,
            _ => target,
        };
        if self.capture.active_resolution() != Some(wanted) || self.native.is_none() {
            self.native = Some(self.capture.configure(wanted)?);
        }
        let native = self.native.unwrap_or(wanted);

        let yuyv = self.capture.grab()?;
        let rgb = yuyv_to_rgb(&yuyv, native)?;
        encode_rgb_jpeg(rgb, native, target, self.quality)
    }
}

impl FrameSource for FrameByFrameSource {
    fn video_frame(&mut self, resolution: Resolution) -> Result<Bytes, CameraError> {
        self.encode(resolution)
    }

    fn still(&mut self, resolution: Resolution) -> Result<Bytes, CameraError> {
        self.encode(resolution)
    }
}
