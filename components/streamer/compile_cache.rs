/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Decides, per compilation, whether to consume, produce, or skip a
//! persisted compile cache, and executes that decision against the engine.
//!
//! Cache interaction is strictly opportunistic: an absent entry, a discarded
//! write, or a rejected stale blob only means the script compiles from
//! source; the sole failure this module surfaces is the compile itself.

use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{ByteOrder, LittleEndian};
use encoding_rs::Encoding;
use log::{debug, warn};
use streamer_traits::{
    CacheHandler, CacheKind, CacheOptions, CachePersistence, CacheTag, CompileBackend,
    CompileError, StreamerConfig,
};

/// The per-compilation decision produced by [`select_strategy`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CompileStrategy {
    /// Plain compile, no cache interaction.
    Plain,
    /// Deserialize the stored parser cache alongside the compile.
    ConsumeParserCache(Vec<u8>),
    /// Compile and store a parser cache, kept local to this process.
    ProduceParserCache,
    /// Deserialize the stored code cache alongside the compile.
    ConsumeCodeCache(Vec<u8>),
    /// Compile and store a code cache in durable storage.
    ProduceCodeCache,
    /// Compile plain and (re)write the timestamp marker: the script has not
    /// been seen recently enough to pay the code-cache overhead yet.
    StampTimestamp,
}

impl CompileStrategy {
    fn describe(&self) -> &'static str {
        match self {
            CompileStrategy::Plain => "plain",
            CompileStrategy::ConsumeParserCache(_) => "consume parser cache",
            CompileStrategy::ProduceParserCache => "produce parser cache",
            CompileStrategy::ConsumeCodeCache(_) => "consume code cache",
            CompileStrategy::ProduceCodeCache => "produce code cache",
            CompileStrategy::StampTimestamp => "stamp timestamp",
        }
    }
}

/// Chooses the compile strategy for one script.
pub fn select_strategy(
    cache: Option<&dyn CacheHandler>,
    script_length: usize,
    encoding: &'static Encoding,
    options: CacheOptions,
    config: &StreamerConfig,
    version_tag: u32,
    now: SystemTime,
) -> CompileStrategy {
    let Some(cache) = cache else {
        return CompileStrategy::Plain;
    };
    if script_length < config.min_cacheable_length {
        return CompileStrategy::Plain;
    }
    match options {
        CacheOptions::None => CompileStrategy::Plain,
        CacheOptions::ParserCache => {
            let tag = CacheTag::compute(CacheKind::Parser, version_tag, encoding);
            match cache.lookup(tag) {
                Some(blob) => CompileStrategy::ConsumeParserCache(blob),
                None => CompileStrategy::ProduceParserCache,
            }
        },
        CacheOptions::CodeCache | CacheOptions::CodeCacheAlways => {
            let tag = CacheTag::compute(CacheKind::Code, version_tag, encoding);
            if let Some(blob) = cache.lookup(tag) {
                return CompileStrategy::ConsumeCodeCache(blob);
            }
            if options == CacheOptions::CodeCacheAlways ||
                is_hot(cache, encoding, config, version_tag, now)
            {
                CompileStrategy::ProduceCodeCache
            } else {
                CompileStrategy::StampTimestamp
            }
        },
    }
}

/// Runs the final synchronous compile under the selected strategy.
pub fn compile_with_cache<B: CompileBackend>(
    backend: &B,
    mut cache: Option<&mut dyn CacheHandler>,
    source: &[u8],
    encoding: &'static Encoding,
    options: CacheOptions,
    config: &StreamerConfig,
    now: SystemTime,
) -> Result<B::Script, CompileError> {
    let version_tag = backend.version_tag();
    let strategy = select_strategy(
        cache.as_deref(),
        source.len(),
        encoding,
        options,
        config,
        version_tag,
        now,
    );
    debug!("compiling {} bytes: {}", source.len(), strategy.describe());
    match strategy {
        CompileStrategy::Plain => {
            let output = backend.compile(source, encoding, None, None)?;
            Ok(output.script)
        },
        CompileStrategy::ConsumeParserCache(blob) => consume_cached(
            backend,
            cache,
            source,
            encoding,
            &blob,
            CachePersistence::Local,
        ),
        CompileStrategy::ProduceParserCache => {
            let output = backend.compile(source, encoding, None, Some(CacheKind::Parser))?;
            if let (Some(cache), Some(blob)) = (cache.as_deref_mut(), output.produced_cache) {
                let tag = CacheTag::compute(CacheKind::Parser, version_tag, encoding);
                cache.store(tag, &blob, CachePersistence::Local);
            }
            Ok(output.script)
        },
        CompileStrategy::ConsumeCodeCache(blob) => consume_cached(
            backend,
            cache,
            source,
            encoding,
            &blob,
            CachePersistence::Durable,
        ),
        CompileStrategy::ProduceCodeCache => {
            let output = backend.compile(source, encoding, None, Some(CacheKind::Code))?;
            if let (Some(cache), Some(blob)) = (cache.as_deref_mut(), output.produced_cache) {
                let tag = CacheTag::compute(CacheKind::Code, version_tag, encoding);
                cache.store(tag, &blob, CachePersistence::Durable);
            }
            Ok(output.script)
        },
        CompileStrategy::StampTimestamp => {
            let output = backend.compile(source, encoding, None, None)?;
            if let Some(cache) = cache.as_deref_mut() {
                let tag = CacheTag::compute(CacheKind::Timestamp, version_tag, encoding);
                cache.store(tag, &timestamp_blob(now), CachePersistence::Durable);
            }
            Ok(output.script)
        },
    }
}

/// Compile with a previously stored blob. When the engine rejects the blob
/// as stale, the entry is cleared and the compile result (from source) is
/// used as-is, exactly as if no cache had existed.
fn consume_cached<B: CompileBackend>(
    backend: &B,
    cache: Option<&mut dyn CacheHandler>,
    source: &[u8],
    encoding: &'static Encoding,
    blob: &[u8],
    persistence: CachePersistence,
) -> Result<B::Script, CompileError> {
    let output = backend.compile(source, encoding, Some(blob), None)?;
    if output.rejected_cache {
        warn!("cached compile data rejected; clearing the stale entry");
        if let Some(cache) = cache {
            cache.clear(persistence);
        }
    }
    Ok(output.script)
}

/// Whether the stored timestamp marker shows a compile within the hot
/// window. Missing, short, or unreadable markers count as cold.
fn is_hot(
    cache: &dyn CacheHandler,
    encoding: &'static Encoding,
    config: &StreamerConfig,
    version_tag: u32,
    now: SystemTime,
) -> bool {
    let tag = CacheTag::compute(CacheKind::Timestamp, version_tag, encoding);
    let Some(blob) = cache.lookup(tag) else {
        return false;
    };
    if blob.len() < 8 {
        return false;
    }
    let stamped = LittleEndian::read_u64(&blob);
    let now_secs = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    now_secs.saturating_sub(stamped) <= config.hot_hours * 3600
}

fn timestamp_blob(now: SystemTime) -> [u8; 8] {
    let mut blob = [0; 8];
    let secs = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    LittleEndian::write_u64(&mut blob, secs);
    blob
}
