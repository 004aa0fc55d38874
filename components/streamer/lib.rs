/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

#![deny(unsafe_code)]

//! Background script streaming and compile-cache management.
//!
//! While the network is still delivering bytes for a script resource, a
//! [`StreamingSession`] hands a parse task to the [`StreamingWorker`] thread,
//! feeding it chunks through a [`SourceStream`] over a [`ChunkQueue`]. Once
//! both the load and the background parse are done the owner is notified
//! exactly once and performs the final synchronous compile itself, with
//! [`compile_cache`] deciding what serialized compile cache to consume or
//! produce.
//!
//! The loader, the compile-cache store, and the script engine are external
//! collaborators reached through the traits in `streamer_traits`.

pub mod chunk_queue;
pub mod compile_cache;
pub mod session;
pub mod source_stream;
pub mod worker;

pub use chunk_queue::ChunkQueue;
pub use compile_cache::{CompileStrategy, compile_with_cache, select_strategy};
pub use session::{NotStreamingReason, StreamingSession};
pub use source_stream::{SourceStream, StreamedSource, detect_bom};
pub use worker::{StreamingJob, StreamingWorker, WorkerBusy};
