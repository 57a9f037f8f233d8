//! Integration tests for the latest-frame-wins broadcast slot.

use bytes::Bytes;
use crabstream::FrameBroadcastChannel;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// Publish until every waiter has returned.
fn publish_until_done(channel: &FrameBroadcastChannel, waiters: &[thread::JoinHandle<Bytes>], frame: &'static [u8]) {
    let started = Instant::now();
    while waiters.iter().any(|w| !w.is_finished()) && started.elapsed() < Duration::from_secs(5) {
        channel.publish(Bytes::from_static(frame));
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_every_viewer_wakes_on_publish() {
    let channel = Arc::new(FrameBroadcastChannel::new());
    let barrier = Arc::new(Barrier::new(5));

    let viewers: Vec<_> = (0..4)
        .map(|_| {
            let channel = Arc::clone(&channel);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                channel.await_next()
            })
        })
        .collect();

    barrier.wait();
    publish_until_done(&channel, &viewers, b"shared");

    for viewer in viewers {
        assert_eq!(viewer.join().unwrap(), Bytes::from_static(b"shared"));
    }
}

#[test]
fn test_staggered_viewers_never_see_older_frames() {
    let channel = Arc::new(FrameBroadcastChannel::new());
    let frames = [b"A".as_slice(), b"B".as_slice(), b"C".as_slice()];

    // Each viewer records the sequence current at its call, then waits.
    let mut viewers = Vec::new();
    for frame in frames {
        let start = channel.sequence();
        let waiter = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || channel.await_newer(start, Some(Duration::from_secs(5))))
        };
        thread::sleep(Duration::from_millis(20));
        channel.publish(Bytes::copy_from_slice(frame));
        viewers.push((start, waiter));
    }

    let mut saw_c = false;
    for (start, viewer) in viewers {
        let (sequence, frame) = viewer.join().unwrap().expect("frame delivered");
        assert!(sequence > start);
        saw_c |= frame == Bytes::from_static(b"C");
    }
    assert!(saw_c);
    assert_eq!(channel.latest().unwrap(), Bytes::from_static(b"C"));
}

#[test]
fn test_slow_viewer_skips_to_latest() {
    let channel = FrameBroadcastChannel::new();
    let cursor = channel.sequence();
    for frame in [b"1", b"2", b"3"] {
        channel.publish(Bytes::copy_from_slice(frame));
    }
    let (sequence, frame) = channel.await_newer(cursor, Some(Duration::ZERO)).unwrap();
    assert_eq!(sequence, 3);
    assert_eq!(frame, Bytes::from_static(b"3"));
}

#[test]
fn test_wait_before_first_publish_times_out() {
    let channel = FrameBroadcastChannel::new();
    let started = Instant::now();
    assert!(channel.await_next_timeout(Duration::from_millis(50)).is_none());
    assert!(started.elapsed() >= Duration::from_millis(50));
}
