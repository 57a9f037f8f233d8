//! Single-in-flight still-capture handshake between viewers and the
//! acquisition loop.
//!
//! A requester takes the one request slot, marks it pending and blocks on
//! `ready`. The producer blocks on `requested`, accepts the pending request
//! as a [`StillRequest`] token, captures, and fulfills through that token.
//! Concurrent requesters queue on `ready` until the slot is released, so
//! request N's result is consumed before request N+1 is published.
//!
//! Lock order: there is one mutex. Both condition variables wait on it, and
//! no other lock is ever taken while it is held.

use crate::assert_invariant;
use crate::errors::CameraError;
use crate::sync::{deadline_after, lock, wait_until};
use bytes::Bytes;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct StillState {
    /// A producer loop is running and will service requests.
    attached: bool,
    detach_reason: Option<CameraError>,
    /// Device-level failure waiting to be picked up by the producer.
    fault: Option<CameraError>,
    next_ticket: u64,
    /// Ticket of the requester currently owning the slot.
    holder: Option<u64>,
    /// The holder's request has not been accepted by the producer yet.
    pending: bool,
    result: Option<Result<Bytes, CameraError>>,
    served: u64,
}

/// Two-phase still-capture handshake.
#[derive(Default)]
pub struct StillCaptureRendezvous {
    state: Mutex<StillState>,
    requested: Condvar,
    ready: Condvar,
}

/// A still request accepted by the producer.
///
/// Fulfilling consumes the token. Dropping it unfulfilled fails the waiting
/// requester, so a loop that dies mid-capture never strands it.
#[must_use = "dropping a StillRequest fails the waiting requester"]
pub struct StillRequest<'a> {
    rendezvous: &'a StillCaptureRendezvous,
    ticket: u64,
    fulfilled: bool,
}

impl StillRequest<'_> {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    /// Hand the capture result to the requester. Returns `false` when the
    /// requester already gave up and the result was discarded.
    pub fn fulfill(mut self, result: Result<Bytes, CameraError>) -> bool {
        self.fulfilled = true;
        self.rendezvous.deliver(self.ticket, result)
    }
}

impl Drop for StillRequest<'_> {
    fn drop(&mut self) {
        if !self.fulfilled {
            self.rendezvous.deliver(
                self.ticket,
                Err(CameraError::DeviceUnavailable(
                    "still request abandoned by the acquisition loop".to_string(),
                )),
            );
        }
    }
}

impl StillCaptureRendezvous {
    /// Create a detached rendezvous; requests fail until [`attach`](Self::attach).
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a producer loop as running. Clears any stale fault.
    pub fn attach(&self) {
        let mut state = lock(&self.state);
        state.attached = true;
        state.detach_reason = None;
        state.fault = None;
    }

    /// Mark the producer loop as gone. The in-flight request, if any, fails
    /// with `reason`; queued and future requesters fail fast until the next
    /// [`attach`](Self::attach).
    pub fn detach(&self, reason: CameraError) {
        {
            let mut state = lock(&self.state);
            state.attached = false;
            state.fault = None;
            state.pending = false;
            if state.holder.is_some() && state.result.is_none() {
                state.result = Some(Err(reason.clone()));
            }
            state.detach_reason = Some(reason);
        }
        self.ready.notify_all();
        self.requested.notify_all();
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.state).attached
    }

    /// Wake the producer out of [`await_request`](Self::await_request) with
    /// an error. The first fault wins until the producer picks it up.
    pub fn raise_fault(&self, error: CameraError) {
        {
            let mut state = lock(&self.state);
            if !state.attached {
                log::debug!("Ignoring fault with no acquisition loop attached: {}", error);
                return;
            }
            if state.fault.is_none() {
                state.fault = Some(error);
            }
        }
        self.requested.notify_all();
    }

    /// Request one still and block until its result arrives.
    pub fn request_and_wait(&self) -> Result<Bytes, CameraError> {
        self.request(None)
    }

    /// Request one still, giving up after `timeout`. A result produced for a
    /// withdrawn request is discarded.
    pub fn request_and_wait_timeout(&self, timeout: Duration) -> Result<Bytes, CameraError> {
        self.request(deadline_after(Some(timeout)))
    }

    fn request(&self, deadline: Option<Instant>) -> Result<Bytes, CameraError> {
        let mut state = lock(&self.state);

        // Queue behind the current holder.
        loop {
            if !state.attached {
                return Err(detached_error(&state));
            }
            if state.holder.is_none() {
                break;
            }
            let (guard, timed_out) = wait_until(&self.ready, state, deadline);
            state = guard;
            if timed_out && state.holder.is_some() {
                return Err(CameraError::Timeout(
                    "still request queued behind an earlier request".to_string(),
                ));
            }
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.holder = Some(ticket);
        state.pending = true;
        state.result = None;
        self.requested.notify_all();
        log::debug!("Still request {} published", ticket);

        loop {
            if let Some(result) = state.result.take() {
                assert_invariant!(
                    state.holder == Some(ticket),
                    "Still result is consumed only by the slot holder",
                    "StillCaptureRendezvous::request"
                );
                state.holder = None;
                if result.is_ok() {
                    state.served += 1;
                }
                self.ready.notify_all();
                return result;
            }
            let (guard, timed_out) = wait_until(&self.ready, state, deadline);
            state = guard;
            if timed_out && state.result.is_none() {
                state.holder = None;
                state.pending = false;
                self.ready.notify_all();
                log::debug!("Still request {} withdrawn after timeout", ticket);
                return Err(CameraError::Timeout(
                    "still capture did not complete in time".to_string(),
                ));
            }
        }
    }

    /// Block until a still request is pending and accept it, or return the
    /// fault raised since the last call.
    pub fn await_request(&self) -> Result<StillRequest<'_>, CameraError> {
        let mut state = lock(&self.state);
        loop {
            if let Some(fault) = state.fault.take() {
                return Err(fault);
            }
            if state.pending {
                state.pending = false;
                if let Some(ticket) = state.holder {
                    return Ok(StillRequest {
                        rendezvous: self,
                        ticket,
                        fulfilled: false,
                    });
                }
            }
            let (guard, _) = wait_until(&self.requested, state, None);
            state = guard;
        }
    }

    /// Producer-side convenience for `request.fulfill(result)`.
    pub fn fulfill(&self, request: StillRequest<'_>, result: Result<Bytes, CameraError>) -> bool {
        assert_invariant!(
            std::ptr::eq(request.rendezvous, self),
            "Still request is fulfilled on the rendezvous that issued it",
            "StillCaptureRendezvous::fulfill"
        );
        request.fulfill(result)
    }

    /// Number of stills successfully handed to requesters.
    pub fn served(&self) -> u64 {
        lock(&self.state).served
    }

    fn deliver(&self, ticket: u64, result: Result<Bytes, CameraError>) -> bool {
        {
            let mut state = lock(&self.state);
            if state.holder != Some(ticket) || state.result.is_some() {
                log::debug!("Discarding still result for withdrawn request {}", ticket);
                return false;
            }
            assert_invariant!(
                !state.pending,
                "Still result only answers a request the producer accepted",
                "StillCaptureRendezvous::deliver"
            );
            state.result = Some(result);
        }
        self.ready.notify_all();
        true
    }
}

fn detached_error(state: &StillState) -> CameraError {
    state.detach_reason.clone().unwrap_or_else(|| {
        CameraError::DeviceUnavailable("acquisition loop is not running".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_request_fails_fast_when_detached() {
        let rendezvous = StillCaptureRendezvous::new();
        let result = rendezvous.request_and_wait();
        assert!(matches!(result, Err(CameraError::DeviceUnavailable(_))));
    }

    #[test]
    fn test_detach_reason_is_reported() {
        let rendezvous = StillCaptureRendezvous::new();
        rendezvous.attach();
        rendezvous.detach(CameraError::DeviceUnavailable("unplugged".into()));
        let err = rendezvous.request_and_wait().unwrap_err();
        assert_eq!(err, CameraError::DeviceUnavailable("unplugged".into()));
    }

    #[test]
    fn test_fault_wakes_producer() {
        let rendezvous = Arc::new(StillCaptureRendezvous::new());
        rendezvous.attach();
        let producer = {
            let rendezvous = Arc::clone(&rendezvous);
            thread::spawn(move || rendezvous.await_request().map(|r| r.ticket()))
        };
        rendezvous.raise_fault(CameraError::DeviceUnavailable("stream closed".into()));
        let result = producer.join().unwrap();
        assert!(matches!(result, Err(CameraError::DeviceUnavailable(_))));
    }

    #[test]
    fn test_round_trip_with_producer_thread() {
        let rendezvous = Arc::new(StillCaptureRendezvous::new());
        rendezvous.attach();
        let producer = {
            let rendezvous = Arc::clone(&rendezvous);
            thread::spawn(move || {
                let request = rendezvous.await_request().unwrap();
                request.fulfill(Ok(Bytes::from_static(b"still")))
            })
        };
        let image = rendezvous.request_and_wait().unwrap();
        assert_eq!(image, Bytes::from_static(b"still"));
        assert!(producer.join().unwrap());
        assert_eq!(rendezvous.served(), 1);
    }

    #[test]
    fn test_timeout_withdraws_request() {
        let rendezvous = StillCaptureRendezvous::new();
        rendezvous.attach();
        let err = rendezvous
            .request_and_wait_timeout(Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, CameraError::Timeout(_)));

        // The withdrawn request is no longer pending for the producer.
        rendezvous.raise_fault(CameraError::DeviceUnavailable("stop".into()));
        assert!(rendezvous.await_request().is_err());
    }

    #[test]
    fn test_dropped_request_fails_requester() {
        let rendezvous = Arc::new(StillCaptureRendezvous::new());
        rendezvous.attach();
        let producer = {
            let rendezvous = Arc::clone(&rendezvous);
            thread::spawn(move || {
                let request = rendezvous.await_request().unwrap();
                drop(request);
            })
        };
        let err = rendezvous.request_and_wait().unwrap_err();
        assert!(matches!(err, CameraError::DeviceUnavailable(_)));
        producer.join().unwrap();
    }
}
