/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use encoding_rs::{UTF_8, UTF_16BE, UTF_16LE};
use streamer::source_stream::{SourceStream, detect_bom};
use streamer_traits::ScriptSource;

use crate::MockResource;

fn drain(mut source: impl ScriptSource) -> Vec<u8> {
    let mut seen = Vec::new();
    while let Some(chunk) = source.more_data() {
        seen.extend_from_slice(&chunk);
    }
    seen
}

#[test]
fn copies_only_the_delta_past_the_tail_cursor() {
    let mut resource = MockResource::new();
    let mut stream = SourceStream::new();
    let consumer = stream.streamed_source();

    resource.deliver(b"hello ");
    stream.on_data_received(&resource);
    // Overlapping availability: no new bytes, nothing must be re-queued.
    stream.on_data_received(&resource);
    assert_eq!(stream.queued_bytes(), 6);

    resource.deliver(b"world");
    stream.on_data_received(&resource);
    assert_eq!(stream.queued_bytes(), 11);

    stream.on_load_finished();
    assert_eq!(drain(consumer), b"hello world");
}

#[test]
fn consumer_reconstructs_all_bytes_in_order() {
    let mut resource = MockResource::new();
    let mut stream = SourceStream::new();
    let consumer = stream.streamed_source();

    let (done_sender, done) = unbounded();
    thread::spawn(move || {
        done_sender.send(drain(consumer)).unwrap();
    });

    let mut expected = Vec::new();
    for index in 0u8..25 {
        let chunk = vec![index; 240];
        expected.extend_from_slice(&chunk);
        resource.deliver(&chunk);
        stream.on_data_received(&resource);
    }
    stream.on_load_finished();

    let seen = done
        .recv_timeout(Duration::from_secs(5))
        .expect("consumer never finished");
    assert_eq!(seen, expected);
}

#[test]
fn cancel_unblocks_a_waiting_consumer_promptly() {
    let mut resource = MockResource::new();
    let mut stream = SourceStream::new();
    let mut consumer = stream.streamed_source();

    resource.deliver(b"only chunk");
    stream.on_data_received(&resource);

    let (done_sender, done) = unbounded();
    thread::spawn(move || {
        // First pull gets the buffered chunk, the second blocks on the
        // starving queue.
        assert!(consumer.more_data().is_some());
        let started = Instant::now();
        let next = consumer.more_data();
        done_sender.send((next, started.elapsed())).unwrap();
    });

    // Give the consumer time to park on the empty queue.
    thread::sleep(Duration::from_millis(50));
    stream.cancel();

    let (next, waited) = done
        .recv_timeout(Duration::from_secs(5))
        .expect("consumer still blocked after cancel");
    assert_eq!(next, None);
    // Bounded by one wake cycle, not by network activity.
    assert!(waited < Duration::from_secs(1));
}

#[test]
fn cancellation_wins_over_buffered_chunks() {
    let mut resource = MockResource::new();
    let mut stream = SourceStream::new();
    let mut consumer = stream.streamed_source();

    resource.deliver(b"buffered");
    stream.on_data_received(&resource);
    stream.cancel();

    assert_eq!(consumer.more_data(), None);
    assert!(stream.is_cancelled());
}

#[test]
fn no_chunks_are_produced_after_cancel() {
    let mut resource = MockResource::new();
    let mut stream = SourceStream::new();
    let consumer = stream.streamed_source();

    stream.cancel();
    resource.deliver(b"late arrival");
    stream.on_data_received(&resource);

    assert_eq!(drain(consumer), b"");
}

#[test]
fn bom_detection() {
    assert_eq!(detect_bom(b"\xef\xbb\xbfvar x;"), Some(UTF_8));
    assert_eq!(detect_bom(b"\xff\xfe\x00\x00"), Some(UTF_16LE));
    assert_eq!(detect_bom(b"\xfe\xff\x00\x00"), Some(UTF_16BE));
    assert_eq!(detect_bom(b"var x;"), None);
    // Not enough bytes yet to carry a full mark.
    assert_eq!(detect_bom(b"\xef"), None);
    assert_eq!(detect_bom(b""), None);
}
