/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

#![deny(unsafe_code)]

//! Boundary contracts between the script streaming core and its external
//! collaborators: the resource loader, the per-resource compile-cache store,
//! and the script engine. The core never performs network I/O or parsing
//! itself; it orchestrates when these collaborators are invoked and what
//! cache bytes accompany the final compile.

use std::fmt;

use bytes::Bytes;
use crossbeam_channel::Sender;
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for one script resource being streamed.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct StreamId(pub Uuid);

impl StreamId {
    pub fn new() -> StreamId {
        StreamId(Uuid::new_v4())
    }
}

impl Default for StreamId {
    fn default() -> StreamId {
        StreamId::new()
    }
}

/// The kind of serialized artifact stored in the compile cache.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum CacheKind {
    /// A parser (preparse) cache, kept local to the process.
    Parser = 0,
    /// A full code cache, eligible for durable platform storage.
    Code = 1,
    /// A marker recording when the script was last compiled.
    Timestamp = 2,
}

/// Low bits of a tag reserved for the `CacheKind` discriminant.
const KIND_BITS: u32 = 2;

/// Versioned key for one compile-cache entry.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct CacheTag(pub u32);

impl CacheTag {
    /// Computes the tag for a cache entry. The tag folds in the engine's
    /// serialization format version and the text encoding used to interpret
    /// the bytes: an entry produced under one encoding must never be consumed
    /// under another.
    pub fn compute(kind: CacheKind, version_tag: u32, encoding: &'static Encoding) -> CacheTag {
        let base = version_tag.wrapping_shl(KIND_BITS) | kind as u32;
        CacheTag(base.wrapping_add(crc32fast::hash(encoding.name().as_bytes())))
    }
}

/// How long a stored cache entry should outlive the producing process.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum CachePersistence {
    /// Keep the entry in this process only.
    Local,
    /// Send the entry to durable platform-level storage.
    Durable,
}

/// Cache policy for the final synchronous compile.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum CacheOptions {
    /// Never touch the cache.
    None,
    /// Consume or produce a parser cache, kept local to the process.
    ParserCache,
    /// Consume a code cache when present; produce one only for scripts seen
    /// recently enough to count as hot.
    #[default]
    CodeCache,
    /// Consume or produce a code cache unconditionally.
    CodeCacheAlways,
}

/// Tunables for streaming eligibility and cache behaviour.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct StreamerConfig {
    /// Scripts below this many bytes are never streamed.
    pub small_script_threshold: usize,
    /// Scripts below this many bytes never interact with the compile cache.
    pub min_cacheable_length: usize,
    /// How recently a script must have been compiled to count as hot.
    pub hot_hours: u64,
}

impl Default for StreamerConfig {
    fn default() -> StreamerConfig {
        StreamerConfig {
            small_script_threshold: 30 * 1024,
            min_cacheable_length: 1024,
            hot_hours: 72,
        }
    }
}

/// Completion events posted by the streaming worker thread and drained by the
/// owner's run loop on the main thread.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamerEvent {
    /// The background parse for this stream is done. Deliberately carries no
    /// success/failure payload: the final synchronous compile is the
    /// authority on parse errors.
    ParsingFinished(StreamId),
}

/// Sending half of the completion-event channel handed to the worker.
pub type StreamerEventSender = Sender<StreamerEvent>;

/// Failure of the final synchronous compile.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CompileError {
    /// The script failed to parse.
    Syntax(String),
    /// The engine failed for a reason unrelated to the source text.
    Internal(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CompileError::Syntax(message) => write!(formatter, "syntax error: {}", message),
            CompileError::Internal(message) => {
                write!(formatter, "internal compile error: {}", message)
            },
        }
    }
}

/// The result of a successful synchronous compile.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompileOutput<S> {
    /// The engine's compiled script handle.
    pub script: S,
    /// Serialized cache data, present when production was requested and the
    /// engine could honour it.
    pub produced_cache: Option<Vec<u8>>,
    /// Set when the cached bytes passed in failed validation and were
    /// ignored. The compile itself still succeeded from source.
    pub rejected_cache: bool,
}

/// A script resource being fetched by the external loader. The core observes
/// it from the producer thread only, for the duration of a callback, and
/// never owns it.
pub trait ScriptResource {
    /// Whether the network load has delivered its last byte.
    fn load_finished(&self) -> bool;

    /// The accumulated response body from `offset` to the end of what has
    /// been received so far. Callers track their own cursor; repeated calls
    /// with the same offset may observe a longer suffix as bytes arrive.
    fn bytes_from(&self, offset: usize) -> &[u8];

    /// The compile-cache handler attached to this resource, if any.
    fn cache_handler(&self) -> Option<&dyn CacheHandler>;
}

/// Per-resource key/value store for compile-cache artifacts. Writes are
/// opportunistic: a handler is free to discard them, which only means the
/// next load recompiles from source.
pub trait CacheHandler {
    /// Returns the stored bytes for `tag`, if any.
    fn lookup(&self, tag: CacheTag) -> Option<Vec<u8>>;

    /// Stores `data` under `tag` at the given persistence scope.
    fn store(&mut self, tag: CacheTag, data: &[u8], persistence: CachePersistence);

    /// Drops this resource's entries at the given persistence scope.
    fn clear(&mut self, persistence: CachePersistence);
}

/// Pull interface consumed by the engine's background parser. `more_data` is
/// the only blocking call in the system.
pub trait ScriptSource: Send {
    /// Blocks until another chunk arrives. Returns `None` once the stream is
    /// exhausted or cancelled; safe to call again after that.
    fn more_data(&mut self) -> Option<Bytes>;
}

/// A background parse prepared by the engine over a [`ScriptSource`].
pub trait StreamingTask: Send {
    /// Drives the parse until the source reports no more data. Runs on the
    /// streaming worker thread and may block for the full duration of the
    /// network load.
    fn run(&mut self);
}

/// The engine surface the streaming session needs.
pub trait StreamingBackend: Send + Sync {
    /// Engine-internal serialization format version. Changing it invalidates
    /// persisted cache entries.
    fn version_tag(&self) -> u32;

    /// Whether the engine can stream-parse source text in this encoding.
    fn supports_streaming(&self, encoding: &'static Encoding) -> bool;

    /// Prepares a background parse over `source`, or `None` when the engine
    /// declines to stream this script.
    fn create_streaming_task(
        &self,
        source: Box<dyn ScriptSource>,
        encoding: &'static Encoding,
    ) -> Option<Box<dyn StreamingTask>>;
}

/// The final synchronous compile, performed by the owner once streaming (or
/// its suppression) has run its course.
pub trait CompileBackend {
    /// The engine's compiled script handle.
    type Script;

    /// Engine-internal serialization format version; must agree with
    /// [`StreamingBackend::version_tag`] for engines implementing both.
    fn version_tag(&self) -> u32;

    /// Compiles `source`, optionally consuming previously cached data and
    /// optionally producing a cache artifact of the given kind.
    fn compile(
        &self,
        source: &[u8],
        encoding: &'static Encoding,
        cached: Option<&[u8]>,
        produce: Option<CacheKind>,
    ) -> Result<CompileOutput<Self::Script>, CompileError>;
}
