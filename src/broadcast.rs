//! Latest-frame-wins broadcast slot.
//!
//! The acquisition side overwrites a single slot; any number of viewers block
//! until the next overwrite and read whatever is newest when they wake. Slow
//! viewers skip frames. Nothing is queued per viewer.

use crate::assert_invariant;
use crate::sync::{deadline_after, lock, wait_until};
use bytes::Bytes;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Slot {
    frame: Option<Bytes>,
    /// Number of publishes so far; the frame in the slot carries this number.
    sequence: u64,
    /// Bumped by [`FrameBroadcastChannel::interrupt`].
    interrupts: u64,
}

/// Single-slot frame broadcast shared by one producer and N viewers.
#[derive(Default)]
pub struct FrameBroadcastChannel {
    slot: Mutex<Slot>,
    published: Condvar,
}

impl FrameBroadcastChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored frame and wake every blocked viewer.
    pub fn publish(&self, frame: Bytes) {
        {
            let mut slot = lock(&self.slot);
            let next = slot.sequence.checked_add(1);
            assert_invariant!(
                next.is_some(),
                "Publish sequence never wraps",
                "FrameBroadcastChannel::publish"
            );
            slot.sequence = next.unwrap_or(u64::MAX);
            slot.frame = Some(frame);
        }
        self.published.notify_all();
    }

    /// Block until a frame is published after this call began and return the
    /// newest frame at wake-up.
    ///
    /// Before the first publish this waits indefinitely.
    pub fn await_next(&self) -> Bytes {
        let after = self.sequence();
        loop {
            // Without a deadline the wait only ends on a newer frame.
            if let Some((_, frame)) = self.await_newer(after, None) {
                return frame;
            }
        }
    }

    /// Like [`await_next`](Self::await_next) but gives up after `timeout`.
    pub fn await_next_timeout(&self, timeout: Duration) -> Option<Bytes> {
        let after = self.sequence();
        self.await_newer(after, Some(timeout)).map(|(_, frame)| frame)
    }

    /// Return the newest frame whose sequence is greater than `after`,
    /// blocking until one is published if necessary.
    ///
    /// A viewer that keeps the returned sequence as its cursor never sees the
    /// same frame twice and never waits when a newer frame is already stored.
    /// Returns `None` on timeout or when [`interrupt`](Self::interrupt) is
    /// called while waiting.
    pub fn await_newer(&self, after: u64, timeout: Option<Duration>) -> Option<(u64, Bytes)> {
        let deadline = deadline_after(timeout);
        let mut slot = lock(&self.slot);
        let entered_at = slot.sequence;
        let interrupts = slot.interrupts;
        loop {
            if slot.sequence > after {
                if let Some(frame) = &slot.frame {
                    assert_invariant!(
                        slot.sequence >= entered_at,
                        "Viewer never receives a frame older than the slot held on entry",
                        "FrameBroadcastChannel::await_newer"
                    );
                    return Some((slot.sequence, frame.clone()));
                }
            }
            if slot.interrupts != interrupts {
                return None;
            }
            let (guard, timed_out) = wait_until(&self.published, slot, deadline);
            slot = guard;
            if timed_out && slot.sequence <= after {
                return None;
            }
        }
    }

    /// Wake every blocked viewer without publishing. Waits in progress return
    /// `None` unless a newer frame is already stored.
    pub fn interrupt(&self) {
        lock(&self.slot).interrupts += 1;
        self.published.notify_all();
    }

    /// Most recent frame without blocking.
    pub fn latest(&self) -> Option<Bytes> {
        lock(&self.slot).frame.clone()
    }

    /// Number of frames published so far.
    pub fn sequence(&self) -> u64 {
        lock(&self.slot).sequence
    }
}
