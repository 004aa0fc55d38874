/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Per-resource coordination of background streaming: the decision to start,
//! suppression (fallback to ordinary synchronous compilation), the handoff
//! to the worker thread, and the completion notification to the owner once
//! both the network load and the background parse are done.

use std::sync::Arc;

use encoding_rs::Encoding;
use log::debug;
use streamer_traits::{
    CacheKind, CacheTag, ScriptResource, StreamId, StreamerConfig, StreamerEventSender,
    StreamingBackend,
};

use crate::source_stream::{SourceStream, detect_bom};
use crate::worker::{StreamingJob, StreamingWorker};

/// Why a session fell back to ordinary synchronous compilation. None of
/// these are errors: the script still loads and compiles, just without the
/// background parse.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NotStreamingReason {
    /// The script never accumulated enough bytes to be worth streaming.
    ScriptTooSmall,
    /// The detected encoding is not one the engine can stream.
    EncodingNotSupported,
    /// A code-cache entry already exists; deserializing it beats parsing
    /// the source again in the background.
    HaveCodeCache,
    /// The worker already had a streaming task in flight.
    WorkerBusy,
    /// The owning execution context went away before streaming started.
    ContextDestroyed,
    /// The engine declined to produce a streaming task for this script.
    EngineDeclined,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    NotStarted,
    Streaming,
    Suppressed(NotStreamingReason),
    Cancelled,
}

/// State machine for one streamed script resource.
///
/// All methods run on the owner (loader) thread. The worker communicates
/// only through the completion-event channel, which the owner drains on that
/// same thread and turns into [`notify_parsing_finished`] calls; together
/// with the one-shot completion callback this makes the finish notification
/// fire exactly once for every interleaving of the loader-side and
/// worker-side signals.
///
/// [`notify_parsing_finished`]: StreamingSession::notify_parsing_finished
pub struct StreamingSession {
    id: StreamId,
    state: State,
    /// Fallback encoding from the response headers or the owning document;
    /// replaced by the BOM-detected encoding at the handoff decision and
    /// immutable from then on.
    encoding: &'static Encoding,
    config: StreamerConfig,
    backend: Arc<dyn StreamingBackend>,
    worker: Arc<StreamingWorker>,
    events: StreamerEventSender,
    source: SourceStream,
    loading_finished: bool,
    parsing_finished: bool,
    have_enough_data: bool,
    context_valid: bool,
    /// Owner notification, taken when fired (or dropped on cancel) so it can
    /// never run twice.
    on_finished: Option<Box<dyn FnOnce()>>,
}

impl StreamingSession {
    pub fn new(
        id: StreamId,
        fallback_encoding: &'static Encoding,
        config: StreamerConfig,
        backend: Arc<dyn StreamingBackend>,
        worker: Arc<StreamingWorker>,
        events: StreamerEventSender,
        on_finished: Box<dyn FnOnce()>,
    ) -> StreamingSession {
        StreamingSession {
            id,
            state: State::NotStarted,
            encoding: fallback_encoding,
            config,
            backend,
            worker,
            events,
            source: SourceStream::new(),
            loading_finished: false,
            parsing_finished: false,
            have_enough_data: false,
            context_valid: true,
            on_finished: Some(on_finished),
        }
    }

    /// Loader callback: new bytes may be available on the resource. Below
    /// the small-script threshold this only watches the accumulated length;
    /// past it, it attempts the streaming handoff once and thereafter
    /// forwards each delta into the queue.
    pub fn on_data_received(&mut self, resource: &dyn ScriptResource) {
        match self.state {
            State::NotStarted => {
                if resource.bytes_from(0).len() < self.config.small_script_threshold {
                    return;
                }
                self.have_enough_data = true;
                self.try_start_streaming(resource);
            },
            State::Streaming => self.source.on_data_received(resource),
            State::Suppressed(_) | State::Cancelled => {},
        }
    }

    /// Loader callback: no more bytes will ever arrive.
    pub fn on_load_finished(&mut self, resource: &dyn ScriptResource) {
        match self.state {
            State::Cancelled => return,
            State::NotStarted => {
                // Too small (possibly empty) to ever cross the threshold;
                // the worker was never engaged.
                self.suppress(NotStreamingReason::ScriptTooSmall);
            },
            State::Streaming => {
                // The last chunk may arrive together with the finish
                // notification.
                self.source.on_data_received(resource);
                self.source.on_load_finished();
            },
            State::Suppressed(_) => {},
        }
        self.loading_finished = true;
        self.maybe_notify_finished();
    }

    /// Invoked by the owner's run loop when it drains a
    /// [`ParsingFinished`](streamer_traits::StreamerEvent::ParsingFinished)
    /// event for this session. Reports for cancelled sessions are silently
    /// discarded.
    pub fn notify_parsing_finished(&mut self) {
        if self.state == State::Cancelled {
            debug!("{:?}: discarding completion for cancelled session", self.id);
            return;
        }
        self.parsing_finished = true;
        self.maybe_notify_finished();
    }

    /// Detaches the session: the owning script no longer needs the result.
    /// The source is cancelled so a blocked pull on the worker wakes within
    /// one wake cycle, and any completion that arrives later is discarded.
    pub fn cancel(&mut self) {
        if self.state == State::Cancelled {
            return;
        }
        debug!("{:?}: cancelled", self.id);
        self.state = State::Cancelled;
        self.source.cancel();
        self.on_finished = None;
    }

    /// Marks the owning execution context invalid. Checked at the streaming
    /// decision point; a stream already running is unaffected (the owner
    /// cancels outright in that case).
    pub fn notify_context_destroyed(&mut self) {
        self.context_valid = false;
    }

    /// Whether both sides are done: the load finished, and the background
    /// parse either finished or was never going to run.
    pub fn is_finished(&self) -> bool {
        self.loading_finished && (self.parsing_finished || self.is_streaming_suppressed())
    }

    pub fn is_streaming(&self) -> bool {
        self.state == State::Streaming
    }

    pub fn is_streaming_suppressed(&self) -> bool {
        matches!(self.state, State::Suppressed(_))
    }

    pub fn suppress_reason(&self) -> Option<NotStreamingReason> {
        match self.state {
            State::Suppressed(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn have_enough_data(&self) -> bool {
        self.have_enough_data
    }

    /// The encoding the source bytes are interpreted under: the fallback
    /// until the handoff decision, the BOM-detected encoding afterwards.
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Runs the eligibility checks and, when they all pass, hands the
    /// background parse to the worker. Each failed check suppresses
    /// streaming exactly once; no further streaming decisions are made
    /// afterwards.
    fn try_start_streaming(&mut self, resource: &dyn ScriptResource) {
        if !self.context_valid {
            self.suppress(NotStreamingReason::ContextDestroyed);
            return;
        }

        // Finalize the encoding before the handoff: a byte-order mark
        // overrides whatever the headers claimed.
        if let Some(detected) = detect_bom(resource.bytes_from(0)) {
            self.encoding = detected;
        }
        if !self.backend.supports_streaming(self.encoding) {
            self.suppress(NotStreamingReason::EncodingNotSupported);
            return;
        }

        let code_tag =
            CacheTag::compute(CacheKind::Code, self.backend.version_tag(), self.encoding);
        let have_code_cache = resource
            .cache_handler()
            .and_then(|cache| cache.lookup(code_tag))
            .is_some();
        if have_code_cache {
            self.suppress(NotStreamingReason::HaveCodeCache);
            return;
        }

        let source = Box::new(self.source.streamed_source());
        let Some(task) = self.backend.create_streaming_task(source, self.encoding) else {
            self.suppress(NotStreamingReason::EngineDeclined);
            return;
        };
        let job = StreamingJob {
            id: self.id,
            task,
            events: self.events.clone(),
        };
        if self.worker.try_run(job).is_err() {
            self.suppress(NotStreamingReason::WorkerBusy);
            return;
        }

        debug!("{:?}: streaming as {}", self.id, self.encoding.name());
        self.state = State::Streaming;
        // Everything accumulated before the handoff goes into the queue now;
        // later deliveries append only the delta.
        self.source.on_data_received(resource);
    }

    /// Applies suppression at most once; the first reason wins.
    fn suppress(&mut self, reason: NotStreamingReason) {
        if matches!(self.state, State::Suppressed(_) | State::Cancelled) {
            return;
        }
        debug!("{:?}: streaming suppressed: {:?}", self.id, reason);
        self.state = State::Suppressed(reason);
    }

    fn maybe_notify_finished(&mut self) {
        if !self.is_finished() {
            return;
        }
        if let Some(on_finished) = self.on_finished.take() {
            debug!("{:?}: finished, notifying owner", self.id);
            on_finished();
        }
    }
}
