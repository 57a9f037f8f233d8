//! A capture backend driven entirely by the test.
//!
//! Frames are pushed by the test rather than a device thread, stills are
//! taken from a queue, and every open/close/still call is counted so tests
//! can assert on resource behaviour.

use crate::backend::{CaptureBackend, CaptureDevice, FrameSink};
use crate::errors::CameraError;
use crate::types::Resolution;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Script {
    opens: u64,
    closes: u64,
    stills: u64,
    failing_opens: u32,
    still_results: VecDeque<Result<Bytes, CameraError>>,
    still_delay: Option<Duration>,
    sink: Option<Arc<dyn FrameSink>>,
    video_resolution: Option<Resolution>,
    still_resolutions: Vec<Resolution>,
}

#[derive(Default)]
struct Shared {
    script: Mutex<Script>,
    changed: Condvar,
}

impl Shared {
    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Deterministic [`CaptureBackend`] for tests. Clones share one script.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    shared: Arc<Shared>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` opens fail with `DeviceUnavailable`.
    pub fn fail_next_opens(&self, count: u32) {
        self.shared.script().failing_opens = count;
    }

    /// Queue the result of a future still capture. Without queued results
    /// stills return `still-N`.
    pub fn queue_still(&self, result: Result<Bytes, CameraError>) {
        self.shared.script().still_results.push_back(result);
    }

    /// Hold every still capture for `delay` before answering.
    pub fn set_still_delay(&self, delay: Duration) {
        self.shared.script().still_delay = Some(delay);
    }

    /// Publish a frame through the running device. Returns `false` when no
    /// device is streaming.
    pub fn push_frame(&self, frame: impl Into<Bytes>) -> bool {
        let sink = self.shared.script().sink.clone();
        match sink {
            Some(sink) => {
                sink.publish(frame.into());
                true
            }
            None => false,
        }
    }

    /// Report a device-level failure as a push thread would.
    pub fn inject_fault(&self, error: CameraError) -> bool {
        let sink = self.shared.script().sink.clone();
        match sink {
            Some(sink) => {
                sink.fault(error);
                true
            }
            None => false,
        }
    }

    /// Wait until a device is streaming.
    pub fn wait_for_sink(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut script = self.shared.script();
        while script.sink.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            script = self
                .shared
                .changed
                .wait_timeout(script, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Wait until `count` devices have been closed.
    pub fn wait_for_closes(&self, count: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut script = self.shared.script();
        while script.closes < count {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            script = self
                .shared
                .changed
                .wait_timeout(script, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    pub fn open_count(&self) -> u64 {
        self.shared.script().opens
    }

    pub fn close_count(&self) -> u64 {
        self.shared.script().closes
    }

    pub fn still_count(&self) -> u64 {
        self.shared.script().stills
    }

    /// Resolution continuous capture was started with, if streaming.
    pub fn video_resolution(&self) -> Option<Resolution> {
        self.shared.script().video_resolution
    }

    /// Resolutions of every still captured so far.
    pub fn still_resolutions(&self) -> Vec<Resolution> {
        self.shared.script().still_resolutions.clone()
    }
}

impl CaptureBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn open(&self) -> Result<Box<dyn CaptureDevice>, CameraError> {
        let mut script = self.shared.script();
        script.opens += 1;
        if script.failing_opens > 0 {
            script.failing_opens -= 1;
            return Err(CameraError::DeviceUnavailable(
                "scripted open failure".to_string(),
            ));
        }
        Ok(Box::new(ScriptedDevice {
            shared: Arc::clone(&self.shared),
            closed: false,
        }))
    }
}

struct ScriptedDevice {
    shared: Arc<Shared>,
    closed: bool,
}

impl CaptureDevice for ScriptedDevice {
    fn start_continuous_capture(
        &mut self,
        sink: Arc<dyn FrameSink>,
        resolution: Resolution,
    ) -> Result<(), CameraError> {
        {
            let mut script = self.shared.script();
            script.sink = Some(sink);
            script.video_resolution = Some(resolution);
        }
        self.shared.changed.notify_all();
        Ok(())
    }

    fn capture_still(&mut self, resolution: Resolution) -> Result<Bytes, CameraError> {
        let (result, delay) = {
            let mut script = self.shared.script();
            script.stills += 1;
            script.still_resolutions.push(resolution);
            let n = script.stills;
            let result = script
                .still_results
                .pop_front()
                .unwrap_or_else(|| Ok(Bytes::from(format!("still-{n}"))));
            (result, script.still_delay)
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        result
    }

    fn close(&mut self) -> Result<(), CameraError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        {
            let mut script = self.shared.script();
            script.sink = None;
            script.video_resolution = None;
            script.closes += 1;
        }
        self.shared.changed.notify_all();
        Ok(())
    }
}

impl Drop for ScriptedDevice {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
