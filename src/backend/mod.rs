//! Capture backend capability set.
//!
//! A [`CaptureBackend`] is a factory for opened [`CaptureDevice`]s. An opened
//! device pushes encoded video frames into a [`FrameSink`] from its own
//! thread and serves one-shot stills on demand. Dropping or closing the
//! device releases the hardware.
//!
//! Every adapter in this crate runs its device on a dedicated
//! [`DeviceThread`]: the thread owns the hardware handle, interleaves still
//! requests with the video cadence, and is joined on close. Still capture
//! therefore stalls video for its duration on every variant.

use crate::config::CameraConfig;
use crate::errors::CameraError;
use crate::timing::FramePacer;
use crate::types::{BackendKind, Resolution};
use bytes::Bytes;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub mod synthetic;
#[cfg(all(feature = "v4l2", target_os = "linux"))]
pub mod v4l2;
#[cfg(feature = "webcam")]
pub mod webcam;

pub use synthetic::SyntheticBackend;
#[cfg(all(feature = "v4l2", target_os = "linux"))]
pub use v4l2::{FrameByFrameBackend, MjpegEncoderBackend};
#[cfg(feature = "webcam")]
pub use webcam::WebcamBackend;

/// Consecutive transient frame failures tolerated before the device is
/// considered gone.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 30;

/// Receiver of continuously captured frames.
pub trait FrameSink: Send + Sync {
    /// Hand over one encoded video frame.
    fn publish(&self, frame: Bytes);

    /// Report a device-level failure. Continuous capture has stopped.
    fn fault(&self, error: CameraError);
}

/// An opened capture device.
pub trait CaptureDevice: Send {
    /// Begin pushing frames at `resolution` into `sink` from the device's own
    /// thread. Per-frame failures are skipped; device failures go to
    /// [`FrameSink::fault`].
    fn start_continuous_capture(
        &mut self,
        sink: Arc<dyn FrameSink>,
        resolution: Resolution,
    ) -> Result<(), CameraError>;

    /// Capture and encode one still at `resolution`.
    fn capture_still(&mut self, resolution: Resolution) -> Result<Bytes, CameraError>;

    /// Stop capture and release the hardware. Idempotent.
    fn close(&mut self) -> Result<(), CameraError>;
}

/// Factory for capture devices; one per configured backend variant.
pub trait CaptureBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Acquire the device. Fails with `DeviceUnavailable` when it cannot be
    /// opened.
    fn open(&self) -> Result<Box<dyn CaptureDevice>, CameraError>;
}

/// Adapter settings shared by every backend variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOptions {
    pub device_index: u32,
    pub jpeg_quality: u8,
    pub max_fps: u32,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            device_index: 0,
            jpeg_quality: crate::encode::DEFAULT_JPEG_QUALITY,
            max_fps: 30,
        }
    }
}

impl From<&CameraConfig> for CaptureOptions {
    fn from(config: &CameraConfig) -> Self {
        Self {
            device_index: config.device_index,
            jpeg_quality: config.jpeg_quality,
            max_fps: config.max_fps,
        }
    }
}

/// Build the backend selected by configuration.
pub fn from_config(config: &CameraConfig) -> Result<Arc<dyn CaptureBackend>, CameraError> {
    let options = CaptureOptions::from(config);
    log::info!("Selecting {} capture backend", config.backend);

    match config.backend {
        BackendKind::Synthetic => Ok(Arc::new(SyntheticBackend::new(options))),
        #[cfg(feature = "webcam")]
        BackendKind::Webcam => Ok(Arc::new(WebcamBackend::new(options))),
        #[cfg(all(feature = "v4l2", target_os = "linux"))]
        BackendKind::MjpegEncoder => Ok(Arc::new(MjpegEncoderBackend::new(options))),
        #[cfg(all(feature = "v4l2", target_os = "linux"))]
        BackendKind::FrameByFrame => Ok(Arc::new(FrameByFrameBackend::new(options))),
        #[allow(unreachable_patterns)]
        other => Err(CameraError::ConfigError(format!(
            "backend '{}' is not compiled in (enable the matching cargo feature)",
            other
        ))),
    }
}

/// Capture primitive driven by a [`DeviceThread`].
///
/// Implementations are created on the device thread and never leave it, so
/// they need not be `Send`.
pub(crate) trait FrameSource: 'static {
    fn video_frame(&mut self, resolution: Resolution) -> Result<Bytes, CameraError>;
    fn still(&mut self, resolution: Resolution) -> Result<Bytes, CameraError>;
}

enum Command {
    Stream {
        sink: Arc<dyn FrameSink>,
        resolution: Resolution,
    },
    Still {
        resolution: Resolution,
        reply: Sender<Result<Bytes, CameraError>>,
    },
    Close,
}

/// Thread that exclusively owns one opened device.
pub(crate) struct DeviceThread {
    name: String,
    commands: Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl DeviceThread {
    /// Spawn the thread and run `open` on it. Returns once the device is
    /// open, or with the error `open` produced.
    pub(crate) fn spawn<S, F>(name: &str, max_fps: u32, open: F) -> Result<Self, CameraError>
    where
        S: FrameSource,
        F: FnOnce() -> Result<S, CameraError> + Send + 'static,
    {
        let (commands, inbox) = mpsc::channel();
        let (opened_tx, opened_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name(format!("crabstream-{}", name))
            .spawn(move || {
                let source = match open() {
                    Ok(source) => {
                        let _ = opened_tx.send(Ok(()));
                        source
                    }
                    Err(e) => {
                        let _ = opened_tx.send(Err(e));
                        return;
                    }
                };
                run_device(source, inbox, max_fps);
            })
            .map_err(|e| CameraError::DeviceUnavailable(format!("failed to spawn device thread: {e}")))?;

        match opened_rx.recv() {
            Ok(Ok(())) => {
                log::info!("Opened {} device", name);
                Ok(Self {
                    name: name.to_string(),
                    commands,
                    handle: Some(handle),
                })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(CameraError::DeviceUnavailable(format!(
                    "{} device thread exited while opening",
                    name
                )))
            }
        }
    }

    fn send(&self, command: Command) -> Result<(), CameraError> {
        self.commands.send(command).map_err(|_| {
            CameraError::DeviceUnavailable(format!("{} device thread has exited", self.name))
        })
    }
}

impl CaptureDevice for DeviceThread {
    fn start_continuous_capture(
        &mut self,
        sink: Arc<dyn FrameSink>,
        resolution: Resolution,
    ) -> Result<(), CameraError> {
        self.send(Command::Stream { sink, resolution })
    }

    fn capture_still(&mut self, resolution: Resolution) -> Result<Bytes, CameraError> {
        let (reply, response) = mpsc::channel();
        self.send(Command::Still { resolution, reply })?;
        response.recv().map_err(|_| {
            CameraError::DeviceUnavailable(format!("{} device thread dropped a still request", self.name))
        })?
    }

    fn close(&mut self) -> Result<(), CameraError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let _ = self.commands.send(Command::Close);
        handle.join().map_err(|_| {
            CameraError::DeviceUnavailable(format!("{} device thread panicked", self.name))
        })?;
        log::info!("Closed {} device", self.name);
        Ok(())
    }
}

impl Drop for DeviceThread {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Error closing device in drop: {}", e);
        }
    }
}

fn run_device<S: FrameSource>(mut source: S, inbox: Receiver<Command>, max_fps: u32) {
    let mut streaming: Option<(Arc<dyn FrameSink>, Resolution)> = None;
    let mut pacer = FramePacer::new(max_fps);
    let mut failures = 0u32;

    loop {
        let command = if streaming.is_some() {
            match inbox.try_recv() {
                Ok(command) => Some(command),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        } else {
            match inbox.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            }
        };

        match command {
            Some(Command::Stream { sink, resolution }) => {
                log::info!("Continuous capture started at {}", resolution);
                streaming = Some((sink, resolution));
                continue;
            }
            Some(Command::Still { resolution, reply }) => {
                let _ = reply.send(source.still(resolution));
                continue;
            }
            Some(Command::Close) => break,
            None => {}
        }

        let Some((sink, resolution)) = &streaming else {
            continue;
        };

        pacer.wait();
        match source.video_frame(*resolution) {
            Ok(frame) => {
                failures = 0;
                sink.publish(frame);
            }
            Err(e) if e.is_fatal() => {
                log::error!("Continuous capture stopped: {}", e);
                sink.fault(e);
                streaming = None;
            }
            Err(e) => {
                failures += 1;
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    log::error!("Giving up after {} failed frames: {}", failures, e);
                    sink.fault(CameraError::DeviceUnavailable(format!(
                        "{} consecutive frame failures, last: {}",
                        failures, e
                    )));
                    streaming = None;
                } else {
                    log::warn!("Skipping frame: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct CollectingSink {
        frames: Mutex<Vec<Bytes>>,
        faults: Mutex<Vec<CameraError>>,
    }

    impl FrameSink for CollectingSink {
        fn publish(&self, frame: Bytes) {
            self.frames.lock().unwrap().push(frame);
        }

        fn fault(&self, error: CameraError) {
            self.faults.lock().unwrap().push(error);
        }
    }

    /// Fails every frame with the configured error.
    struct FailingSource(CameraError);

    impl FrameSource for FailingSource {
        fn video_frame(&mut self, _: Resolution) -> Result<Bytes, CameraError> {
            Err(self.0.clone())
        }

        fn still(&mut self, _: Resolution) -> Result<Bytes, CameraError> {
            Ok(Bytes::from_static(b"still"))
        }
    }

    fn wait_for_fault(sink: &CollectingSink) -> Option<CameraError> {
        for _ in 0..200 {
            if let Some(fault) = sink.faults.lock().unwrap().first() {
                return Some(fault.clone());
            }
            thread::sleep(Duration::from_millis(10));
        }
        None
    }

    #[test]
    fn test_open_error_is_returned() {
        let result = DeviceThread::spawn("broken", 30, || -> Result<FailingSource, CameraError> {
            Err(CameraError::DeviceUnavailable("no such device".into()))
        });
        assert!(matches!(result, Err(CameraError::DeviceUnavailable(_))));
    }

    #[test]
    fn test_fatal_frame_error_faults_sink() {
        let mut device = DeviceThread::spawn("fatal", 240, || {
            Ok(FailingSource(CameraError::DeviceUnavailable("unplugged".into())))
        })
        .unwrap();
        let sink = Arc::new(CollectingSink::default());
        device
            .start_continuous_capture(sink.clone(), Resolution::new(4, 4))
            .unwrap();

        let fault = wait_for_fault(&sink).expect("fault reported");
        assert!(fault.is_fatal());
        // Stills are still served after video stopped
        assert_eq!(device.capture_still(Resolution::new(4, 4)).unwrap(), "still");
        device.close().unwrap();
    }

    #[test]
    fn test_transient_failures_escalate() {
        let mut device = DeviceThread::spawn("flaky", 240, || {
            Ok(FailingSource(CameraError::TransientCaptureFailure("blip".into())))
        })
        .unwrap();
        let sink = Arc::new(CollectingSink::default());
        device
            .start_continuous_capture(sink.clone(), Resolution::new(4, 4))
            .unwrap();

        let fault = wait_for_fault(&sink).expect("escalated fault");
        assert!(matches!(fault, CameraError::DeviceUnavailable(ref m) if m.contains("consecutive")));
        device.close().unwrap();
    }

    /// Numbered video frames, and stills tagged with the frame they followed.
    #[derive(Default)]
    struct CountingSource {
        frames: u64,
    }

    impl FrameSource for CountingSource {
        fn video_frame(&mut self, _: Resolution) -> Result<Bytes, CameraError> {
            self.frames += 1;
            Ok(Bytes::from(format!("frame-{}", self.frames)))
        }

        fn still(&mut self, _: Resolution) -> Result<Bytes, CameraError> {
            Ok(Bytes::from(format!("still-after-{}", self.frames)))
        }
    }

    fn wait_for_frames(sink: &CollectingSink, count: usize) -> bool {
        for _ in 0..500 {
            if sink.frames.lock().unwrap().len() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_video_resumes_after_still() {
        let mut device =
            DeviceThread::spawn("counting", 240, || Ok(CountingSource::default())).unwrap();
        let sink = Arc::new(CollectingSink::default());
        device
            .start_continuous_capture(sink.clone(), Resolution::new(4, 4))
            .unwrap();
        assert!(wait_for_frames(&sink, 2));

        let still = device.capture_still(Resolution::new(8, 8)).unwrap();
        assert!(still.starts_with(b"still-after-"));
        let seen = sink.frames.lock().unwrap().len();

        assert!(wait_for_frames(&sink, seen + 2));
        assert!(sink.faults.lock().unwrap().is_empty());
        device.close().unwrap();
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut device = DeviceThread::spawn("idle", 30, || {
            Ok(FailingSource(CameraError::TransientCaptureFailure("unused".into())))
        })
        .unwrap();
        device.close().unwrap();
        device.close().unwrap();
        assert!(device.capture_still(Resolution::new(4, 4)).is_err());
    }

    #[test]
    fn test_unavailable_backend_is_config_error() {
        let config = CameraConfig {
            backend: BackendKind::Webcam,
            ..CameraConfig::default()
        };
        if cfg!(not(feature = "webcam")) {
            assert!(matches!(from_config(&config), Err(CameraError::ConfigError(_))));
        }
    }
}
