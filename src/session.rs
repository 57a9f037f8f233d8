//! Camera session: owns the single acquisition loop and wires a capture
//! backend into the frame broadcast and the still rendezvous.
//!
//! The loop is started lazily by whichever entry point is called first and
//! at most one loop runs at a time. When the backend fails the loop releases
//! the device, fails any in-flight still request and returns the session to
//! [`SessionState::NotStarted`]; the next access starts it again.
//!
//! Lock order: `lifecycle` may be held while taking the rendezvous or
//! broadcast locks, never the other way round.

use crate::backend::{self, CaptureBackend, CaptureDevice, FrameSink};
use crate::broadcast::FrameBroadcastChannel;
use crate::config::CrabStreamConfig;
use crate::errors::CameraError;
use crate::rendezvous::StillCaptureRendezvous;
use crate::sync::lock;
use crate::types::{Resolution, SessionState, SessionStatus};
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Construction-time settings of a [`CameraSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub video_resolution: Resolution,
    pub still_resolution: Resolution,
    /// How often a waiting viewer re-checks that the loop is alive.
    pub reconnect_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            video_resolution: Resolution::video_default(),
            still_resolution: Resolution::still_default(),
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

struct Lifecycle {
    state: SessionState,
    launches: u64,
    task: Option<JoinHandle<()>>,
    /// Thread running the current loop, for reentrancy checks.
    loop_thread: Option<ThreadId>,
    last_error: Option<CameraError>,
    /// Bumped by every `shutdown`; viewers waiting across one give up.
    shutdowns: u64,
}

struct Inner {
    backend: Arc<dyn CaptureBackend>,
    settings: SessionSettings,
    frames: FrameBroadcastChannel,
    stills: StillCaptureRendezvous,
    lifecycle: Mutex<Lifecycle>,
}

/// Shared handle to one camera session. Clones refer to the same session.
#[derive(Clone)]
pub struct CameraSession {
    inner: Arc<Inner>,
}

impl CameraSession {
    pub fn new(backend: Arc<dyn CaptureBackend>, settings: SessionSettings) -> Self {
        log::info!(
            "Camera session on {} backend: video {}, stills {}",
            backend.name(),
            settings.video_resolution,
            settings.still_resolution
        );
        Self {
            inner: Arc::new(Inner {
                backend,
                settings,
                frames: FrameBroadcastChannel::new(),
                stills: StillCaptureRendezvous::new(),
                lifecycle: Mutex::new(Lifecycle {
                    state: SessionState::NotStarted,
                    launches: 0,
                    task: None,
                    loop_thread: None,
                    last_error: None,
                    shutdowns: 0,
                }),
            }),
        }
    }

    /// Build the configured backend and a session around it.
    pub fn from_config(config: &CrabStreamConfig) -> Result<Self, CameraError> {
        config.validate().map_err(CameraError::ConfigError)?;
        let backend = backend::from_config(&config.camera)?;
        Ok(Self::new(backend, config.session_settings()))
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    pub fn backend_name(&self) -> &str {
        self.inner.backend.name()
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner.lifecycle).state
    }

    /// Number of acquisition loops launched so far.
    pub fn launch_count(&self) -> u64 {
        lock(&self.inner.lifecycle).launches
    }

    pub fn status(&self) -> SessionStatus {
        let lifecycle = lock(&self.inner.lifecycle);
        SessionStatus {
            backend: self.inner.backend.name().to_string(),
            state: lifecycle.state,
            launches: lifecycle.launches,
            frames_published: self.inner.frames.sequence(),
            stills_served: self.inner.stills.served(),
            video_resolution: self.inner.settings.video_resolution,
            still_resolution: self.inner.settings.still_resolution,
            last_error: lifecycle.last_error.as_ref().map(ToString::to_string),
        }
    }

    /// Launch the acquisition loop unless one is already running.
    ///
    /// Concurrent callers launch exactly one loop. Device errors surface
    /// asynchronously: the loop ends and the session returns to
    /// `NotStarted`.
    pub fn ensure_started(&self) -> Result<(), CameraError> {
        let mut lifecycle = lock(&self.inner.lifecycle);
        self.launch(&mut lifecycle)
    }

    fn launch(&self, lifecycle: &mut Lifecycle) -> Result<(), CameraError> {
        check_reentrancy(lifecycle)?;
        if lifecycle.state == SessionState::Running {
            return Ok(());
        }

        // The previous loop has already reset the state; reap its thread.
        if let Some(previous) = lifecycle.task.take() {
            if previous.join().is_err() {
                log::warn!("Previous acquisition thread panicked");
            }
        }

        self.inner.stills.attach();
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("crabstream-acquisition".to_string())
            .spawn(move || acquisition_main(inner));

        match spawned {
            Ok(handle) => {
                lifecycle.loop_thread = Some(handle.thread().id());
                lifecycle.task = Some(handle);
                lifecycle.state = SessionState::Running;
                lifecycle.launches += 1;
                log::info!("Acquisition loop launched (launch {})", lifecycle.launches);
                Ok(())
            }
            Err(e) => {
                let error =
                    CameraError::DeviceUnavailable(format!("failed to spawn acquisition loop: {e}"));
                self.inner.stills.detach(error.clone());
                lifecycle.last_error = Some(error.clone());
                Err(error)
            }
        }
    }

    /// Block until a video frame newer than the call is published.
    ///
    /// A loop that dies while waiting is restarted every `reconnect_delay`.
    pub fn get_video_frame(&self) -> Result<Bytes, CameraError> {
        let cursor = self.inner.frames.sequence();
        self.wait_for_frame(cursor, None).map(|(_, frame)| frame)
    }

    pub fn get_video_frame_timeout(&self, timeout: Duration) -> Result<Bytes, CameraError> {
        let cursor = self.inner.frames.sequence();
        self.wait_for_frame(cursor, Some(timeout))
            .map(|(_, frame)| frame)
    }

    /// Cursor-based variant for viewers streaming continuously: returns the
    /// newest frame whose sequence is greater than `cursor`, with its
    /// sequence to pass back next time.
    pub fn get_video_frame_after(
        &self,
        cursor: u64,
        timeout: Option<Duration>,
    ) -> Result<(u64, Bytes), CameraError> {
        self.wait_for_frame(cursor, timeout)
    }

    /// Sequence of the newest published frame.
    pub fn frame_cursor(&self) -> u64 {
        self.inner.frames.sequence()
    }

    /// Capture one still at the still resolution, starting the loop first
    /// if needed. Concurrent callers are served one at a time.
    pub fn get_still_image(&self) -> Result<Bytes, CameraError> {
        self.ensure_started()?;
        self.inner.stills.request_and_wait()
    }

    pub fn get_still_image_timeout(&self, timeout: Duration) -> Result<Bytes, CameraError> {
        self.ensure_started()?;
        self.inner.stills.request_and_wait_timeout(timeout)
    }

    /// Stop the running loop and release the device, waiting at most
    /// `join_timeout` for the acquisition thread.
    ///
    /// Viewers blocked in `get_video_frame*` fail with `DeviceUnavailable`
    /// instead of relaunching the loop. A call made after this returns
    /// starts a fresh loop.
    pub fn shutdown(&self, join_timeout: Duration) -> Result<(), CameraError> {
        let handle = {
            let mut lifecycle = lock(&self.inner.lifecycle);
            check_reentrancy(&lifecycle)?;
            lifecycle.shutdowns += 1;
            self.inner.frames.interrupt();
            let Some(handle) = lifecycle.task.take() else {
                return Ok(());
            };
            self.inner
                .stills
                .raise_fault(CameraError::DeviceUnavailable("session shut down".to_string()));
            handle
        };

        let deadline = Instant::now() + join_timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                let mut lifecycle = lock(&self.inner.lifecycle);
                if lifecycle.task.is_none() {
                    lifecycle.task = Some(handle);
                }
                return Err(CameraError::Timeout(
                    "acquisition loop did not stop in time".to_string(),
                ));
            }
            thread::sleep(Duration::from_millis(5));
        }

        if handle.join().is_err() {
            log::warn!("Acquisition thread panicked during shutdown");
        }
        log::info!("Camera session shut down");
        Ok(())
    }

    fn wait_for_frame(
        &self,
        cursor: u64,
        timeout: Option<Duration>,
    ) -> Result<(u64, Bytes), CameraError> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let recheck = self.inner.settings.reconnect_delay.max(Duration::from_millis(1));
        let mut shutdowns = None;

        loop {
            {
                let mut lifecycle = lock(&self.inner.lifecycle);
                let seen = *shutdowns.get_or_insert(lifecycle.shutdowns);
                if lifecycle.shutdowns != seen {
                    return Err(CameraError::DeviceUnavailable(
                        "session shut down while waiting for a video frame".to_string(),
                    ));
                }
                self.launch(&mut lifecycle)?;
            }

            let chunk = match deadline {
                Some(deadline) => recheck.min(deadline.saturating_duration_since(Instant::now())),
                None => recheck,
            };
            if let Some(frame) = self.inner.frames.await_newer(cursor, Some(chunk)) {
                return Ok(frame);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(CameraError::Timeout(
                    "no video frame arrived in time".to_string(),
                ));
            }
        }
    }
}

/// Entry points block on the loop, so calling them from it would deadlock.
fn check_reentrancy(lifecycle: &Lifecycle) -> Result<(), CameraError> {
    if lifecycle.loop_thread == Some(thread::current().id()) {
        return Err(CameraError::ProtocolMisuse(
            "session entry point called from the acquisition loop".to_string(),
        ));
    }
    Ok(())
}

/// Routes backend frames into the broadcast and device faults into the
/// rendezvous so the loop wakes up.
struct LoopSink {
    inner: Arc<Inner>,
}

impl FrameSink for LoopSink {
    fn publish(&self, frame: Bytes) {
        self.inner.frames.publish(frame);
    }

    fn fault(&self, error: CameraError) {
        log::warn!("Backend reported device failure: {}", error);
        self.inner.stills.raise_fault(error);
    }
}

/// Closes the device on every exit path, including unwinding.
struct DeviceGuard(Box<dyn CaptureDevice>);

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        if let Err(e) = self.0.close() {
            log::warn!("Error closing capture device: {}", e);
        }
    }
}

/// Returns the session to `NotStarted` when the loop ends, including by
/// panic, and fails whoever is waiting for a still.
struct LoopExit {
    inner: Arc<Inner>,
    reason: Option<CameraError>,
}

impl Drop for LoopExit {
    fn drop(&mut self) {
        let reason = self.reason.take().unwrap_or_else(|| {
            CameraError::DeviceUnavailable("acquisition loop panicked".to_string())
        });
        let mut lifecycle = lock(&self.inner.lifecycle);
        self.inner.stills.detach(reason.clone());
        lifecycle.state = SessionState::NotStarted;
        lifecycle.loop_thread = None;
        lifecycle.last_error = Some(reason);
    }
}

fn acquisition_main(inner: Arc<Inner>) {
    let mut exit = LoopExit {
        inner: Arc::clone(&inner),
        reason: None,
    };
    let reason = run_acquisition(inner);
    log::warn!("Acquisition loop ended: {}", reason);
    exit.reason = Some(reason);
}

/// Loop body. Only returns on a device-level failure, which it returns.
fn run_acquisition(inner: Arc<Inner>) -> CameraError {
    let mut device = match inner.backend.open() {
        Ok(device) => DeviceGuard(device),
        Err(e) => return e,
    };

    let sink = Arc::new(LoopSink {
        inner: Arc::clone(&inner),
    });
    if let Err(e) = device
        .0
        .start_continuous_capture(sink, inner.settings.video_resolution)
    {
        return e;
    }

    loop {
        let request = match inner.stills.await_request() {
            Ok(request) => request,
            Err(e) => return e,
        };

        let result = device.0.capture_still(inner.settings.still_resolution);
        let fatal = match &result {
            Err(e) if e.is_fatal() => Some(e.clone()),
            Err(e) => {
                log::warn!("Still capture failed: {}", e);
                None
            }
            Ok(_) => None,
        };
        if !inner.stills.fulfill(request, result) {
            log::debug!("Still finished after its requester gave up");
        }
        if let Some(e) = fatal {
            return e;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SyntheticBackend;
    use crate::encode::jpeg_resolution;
    use crate::testing::ScriptedBackend;

    fn synthetic_session() -> CameraSession {
        CameraSession::new(
            Arc::new(SyntheticBackend::default()),
            SessionSettings {
                video_resolution: Resolution::new(32, 24),
                still_resolution: Resolution::new(64, 48),
                reconnect_delay: Duration::from_millis(50),
            },
        )
    }

    #[test]
    fn test_new_session_is_not_started() {
        let session = synthetic_session();
        assert_eq!(session.state(), SessionState::NotStarted);
        assert_eq!(session.launch_count(), 0);
    }

    #[test]
    fn test_video_frame_starts_loop() {
        let session = synthetic_session();
        let frame = session.get_video_frame_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(jpeg_resolution(&frame).unwrap(), Resolution::new(32, 24));
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(session.launch_count(), 1);
        session.shutdown(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_still_uses_still_resolution() {
        let session = synthetic_session();
        let still = session.get_still_image_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(jpeg_resolution(&still).unwrap(), Resolution::new(64, 48));
        assert_eq!(session.status().stills_served, 1);
        session.shutdown(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_shutdown_returns_to_not_started() {
        let session = synthetic_session();
        session.ensure_started().unwrap();
        session.shutdown(Duration::from_secs(5)).unwrap();
        assert_eq!(session.state(), SessionState::NotStarted);
        assert!(session.status().last_error.is_some());

        // Shutting down an idle session is a no-op
        session.shutdown(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_shutdown_fails_blocked_viewer_without_relaunch() {
        let backend = ScriptedBackend::new();
        let session = CameraSession::new(
            Arc::new(backend.clone()),
            SessionSettings {
                reconnect_delay: Duration::from_millis(10),
                ..SessionSettings::default()
            },
        );
        session.ensure_started().unwrap();
        assert!(backend.wait_for_sink(Duration::from_secs(5)));

        // The scripted backend never publishes, so the viewer keeps waiting
        let viewer = {
            let session = session.clone();
            thread::spawn(move || session.get_video_frame_timeout(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(50));
        session.shutdown(Duration::from_secs(5)).unwrap();

        let started = Instant::now();
        let result = viewer.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(matches!(result, Err(CameraError::DeviceUnavailable(_))));
        assert_eq!(session.state(), SessionState::NotStarted);
        assert_eq!(session.launch_count(), 1);
        assert_eq!(backend.open_count(), 1);

        // A fresh call after shutdown starts a new loop
        session.ensure_started().unwrap();
        assert_eq!(session.launch_count(), 2);
        session.shutdown(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_video_keeps_flowing_after_still() {
        let session = synthetic_session();
        session.get_video_frame_timeout(Duration::from_secs(5)).unwrap();
        session.get_still_image_timeout(Duration::from_secs(5)).unwrap();

        let cursor = session.frame_cursor();
        let (sequence, frame) = session
            .get_video_frame_after(cursor, Some(Duration::from_secs(5)))
            .unwrap();
        assert!(sequence > cursor);
        assert_eq!(jpeg_resolution(&frame).unwrap(), Resolution::new(32, 24));
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(session.launch_count(), 1);
        session.shutdown(Duration::from_secs(5)).unwrap();
    }
}
