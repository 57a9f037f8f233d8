//! Property-Based Tests for the broadcast slot, rendezvous and helpers
//!
//! These tests verify invariants of the synchronization primitives using
//! proptest for input generation and shrinking.

use bytes::Bytes;
use crabstream::encode::yuyv_to_rgb;
use crabstream::{FrameBroadcastChannel, Resolution, StillCaptureRendezvous};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

proptest! {
    /// INVARIANT: a cursor only ever moves forward and always lands on the
    /// newest frame
    #[test]
    fn cursor_reads_newest_frame(batches in prop::collection::vec(1usize..6, 1..12)) {
        let channel = FrameBroadcastChannel::new();
        let mut cursor = 0u64;
        let mut published = 0u64;

        for batch in batches {
            for _ in 0..batch {
                published += 1;
                channel.publish(Bytes::from(published.to_string()));
            }
            let (sequence, frame) = channel
                .await_newer(cursor, Some(Duration::ZERO))
                .expect("a newer frame is stored");
            prop_assert!(sequence > cursor);
            prop_assert_eq!(sequence, published);
            prop_assert_eq!(frame, Bytes::from(published.to_string()));
            cursor = sequence;
        }

        prop_assert!(channel.await_newer(cursor, Some(Duration::ZERO)).is_none());
    }

    /// INVARIANT: each fulfilled result reaches exactly one requester
    #[test]
    fn every_result_delivered_once(requesters in 1usize..6) {
        let rendezvous = Arc::new(StillCaptureRendezvous::new());
        rendezvous.attach();

        let producer = {
            let rendezvous = Arc::clone(&rendezvous);
            thread::spawn(move || {
                for _ in 0..requesters {
                    let request = rendezvous.await_request().unwrap();
                    let ticket = request.ticket();
                    request.fulfill(Ok(Bytes::from(ticket.to_string())));
                }
            })
        };

        let handles: Vec<_> = (0..requesters)
            .map(|_| {
                let rendezvous = Arc::clone(&rendezvous);
                thread::spawn(move || rendezvous.request_and_wait().unwrap())
            })
            .collect();

        let mut results: Vec<Bytes> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        producer.join().unwrap();

        results.sort();
        results.dedup();
        prop_assert_eq!(results.len(), requesters);
        prop_assert_eq!(rendezvous.served(), requesters as u64);
    }

    /// INVARIANT: YUYV conversion yields three bytes per pixel for any even
    /// width
    #[test]
    fn yuyv_output_is_rgb24(half_width in 1u32..32, height in 1u32..32, fill in any::<u8>()) {
        let resolution = Resolution::new(half_width * 2, height);
        let yuyv = vec![fill; (resolution.pixel_count() * 2) as usize];
        let rgb = yuyv_to_rgb(&yuyv, resolution).unwrap();
        prop_assert_eq!(rgb.len(), resolution.rgb_len());
    }

    /// INVARIANT: resolutions survive a display/parse cycle
    #[test]
    fn resolution_display_parses_back(width in 1u32..8192, height in 1u32..8192) {
        let resolution = Resolution::new(width, height);
        let parsed: Resolution = resolution.to_string().parse().unwrap();
        prop_assert_eq!(parsed, resolution);
    }
}
