/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Bridge between the push-style producer (the loader delivering resource
//! bytes on the main thread) and the pull-style consumer (the engine's
//! background parser requesting chunks, blocking).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use encoding_rs::Encoding;
use streamer_traits::{ScriptResource, ScriptSource};

use crate::chunk_queue::ChunkQueue;

/// Producer half, owned by the streaming session for its lifetime. Copies
/// not-yet-queued resource bytes into owned chunks as the loader reports
/// them, tracked via a monotonic tail cursor.
#[derive(Default)]
pub struct SourceStream {
    queue: Arc<ChunkQueue>,
    cancelled: Arc<AtomicBool>,
    /// Number of resource bytes already copied into the queue.
    queue_tail: usize,
    load_finished: bool,
}

impl SourceStream {
    pub fn new() -> SourceStream {
        SourceStream::default()
    }

    /// Copies the not-yet-queued suffix of the resource buffer into a fresh
    /// owned chunk. Tolerates being invoked repeatedly with overlapping
    /// availability: only the delta past the tail cursor is queued.
    pub fn on_data_received(&mut self, resource: &dyn ScriptResource) {
        if self.load_finished || self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        let delta = resource.bytes_from(self.queue_tail);
        if delta.is_empty() {
            return;
        }
        // The resource buffer is not safe to share with the worker thread;
        // hand over an owned copy.
        self.queue_tail += delta.len();
        self.queue.produce(Bytes::copy_from_slice(delta));
    }

    /// Marks the queue finished; the consumer drains whatever is buffered
    /// and then observes the end of the stream.
    pub fn on_load_finished(&mut self) {
        self.load_finished = true;
        self.queue.finish();
    }

    /// Cooperative cancellation: sets the flag and forces the queue to
    /// finish, so a blocked pull wakes within one wake cycle instead of
    /// waiting on network activity. Safe to call with a pull in flight; after
    /// this returns no further chunks are produced.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.queue.finish();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Total bytes copied into the queue so far.
    pub fn queued_bytes(&self) -> usize {
        self.queue_tail
    }

    /// Vends the consumer half that is moved into the engine's streaming
    /// task.
    pub fn streamed_source(&self) -> StreamedSource {
        StreamedSource {
            queue: Arc::clone(&self.queue),
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}

/// Consumer half: the blocking pull interface the background parser drives.
pub struct StreamedSource {
    queue: Arc<ChunkQueue>,
    cancelled: Arc<AtomicBool>,
}

impl ScriptSource for StreamedSource {
    fn more_data(&mut self) -> Option<Bytes> {
        // The flag is checked on both sides of the blocking wait:
        // cancellation must win over any chunk that raced in before it.
        if self.cancelled.load(Ordering::SeqCst) {
            return None;
        }
        let chunk = self.queue.consume();
        if self.cancelled.load(Ordering::SeqCst) {
            return None;
        }
        chunk
    }
}

/// Identifies the byte-order mark at the head of the stream, if the bytes
/// received so far carry one.
pub fn detect_bom(head: &[u8]) -> Option<&'static Encoding> {
    Encoding::for_bom(head).map(|(encoding, _bom_length)| encoding)
}
