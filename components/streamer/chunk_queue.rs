/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Thread-safe handoff of raw byte chunks between the producer (loader)
//! thread and the single consumer on the streaming worker thread.

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct QueueState {
    chunks: VecDeque<Bytes>,
    finished: bool,
}

/// An ordered sequence of owned chunks plus a `finished` flag. Chunks are
/// delivered to the consumer in FIFO order, matching network arrival order.
///
/// This is a deliberately narrow single-producer, single-consumer structure,
/// not a general MPMC queue: the producer side lives on the loader thread and
/// exactly one worker task drains it.
#[derive(Default)]
pub struct ChunkQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl ChunkQueue {
    pub fn new() -> ChunkQueue {
        ChunkQueue::default()
    }

    /// Appends a chunk and wakes a waiting consumer. Producing after
    /// [`finish`](Self::finish) is a programming error.
    pub fn produce(&self, chunk: Bytes) {
        let mut state = self.state.lock();
        assert!(!state.finished, "chunk produced after the queue finished");
        state.chunks.push_back(chunk);
        self.available.notify_one();
    }

    /// Marks the queue as complete: no more chunks will ever be produced.
    /// Wakes all waiters so a blocked consumer can observe the end of the
    /// stream. Idempotent.
    pub fn finish(&self) {
        let mut state = self.state.lock();
        state.finished = true;
        self.available.notify_all();
    }

    /// Blocking pop. Returns the next chunk, or `None` once the queue is
    /// drained and finished; the `None` is repeatable on later calls.
    pub fn consume(&self) -> Option<Bytes> {
        let mut state = self.state.lock();
        loop {
            if let Some(chunk) = state.chunks.pop_front() {
                return Some(chunk);
            }
            if state.finished {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Discards all buffered chunks and resets `finished`, returning the
    /// queue to its initial state for reuse.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.chunks.clear();
        state.finished = false;
    }

    /// Whether [`finish`](Self::finish) has been called.
    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }
}
