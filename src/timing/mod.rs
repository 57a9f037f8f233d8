//! Frame-rate pacing
//!
//! Deadline-based pacing for capture loops and viewer streams.

use std::time::{Duration, Instant};

/// Paces a loop to at most `fps` iterations per second.
///
/// Slots are scheduled from the previous deadline rather than from "now",
/// so short jitter does not accumulate drift. A loop that falls more than
/// one interval behind restarts the schedule instead of bursting to catch up.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    next: Option<Instant>,
}

impl FramePacer {
    pub fn new(fps: u32) -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / f64::from(fps.max(1))),
            next: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Claim the next slot and return how long to sleep before it.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let slot = self.next.unwrap_or(now);
        let following = if now > slot + self.interval {
            now + self.interval
        } else {
            slot + self.interval
        };
        self.next = Some(following);
        slot.saturating_duration_since(now)
    }

    /// Block the current thread until the next slot. The first call returns
    /// immediately.
    pub fn wait(&mut self) {
        let delay = self.reserve();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }

    /// Async equivalent of [`wait`](Self::wait) for tokio tasks.
    pub async fn tick(&mut self) {
        let delay = self.reserve();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
