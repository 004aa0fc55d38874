/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The dedicated background thread that runs streaming parse tasks, at most
//! one at a time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, unbounded};
use log::{debug, warn};
use streamer_traits::{StreamId, StreamerEvent, StreamerEventSender, StreamingTask};

/// One unit of background work: the engine's parse task plus where to report
/// completion. The job owns everything it needs; the worker never holds a
/// reference back into the session.
pub struct StreamingJob {
    pub id: StreamId,
    pub task: Box<dyn StreamingTask>,
    pub events: StreamerEventSender,
}

/// Returned by [`StreamingWorker::try_run`] while a previous task is still
/// running; the caller treats it as "compiler busy" and suppresses streaming.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WorkerBusy;

/// A single serialized execution context for streaming parses. Explicitly
/// constructed and owned by the embedder, which hands sessions a shared
/// handle; there is no process-wide singleton.
///
/// Dropping the worker joins its thread, so any still-streaming session must
/// be cancelled first or the in-flight task would block the join until its
/// load finishes.
pub struct StreamingWorker {
    jobs: Option<Sender<StreamingJob>>,
    busy: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl StreamingWorker {
    pub fn new() -> StreamingWorker {
        let (sender, receiver) = unbounded::<StreamingJob>();
        let busy = Arc::new(AtomicBool::new(false));
        let thread_busy = Arc::clone(&busy);
        let thread = thread::Builder::new()
            .name("ScriptStreamer".to_owned())
            .spawn(move || {
                for mut job in receiver.iter() {
                    debug!("streaming task for {:?} starting", job.id);
                    // May block for the whole duration of the network load:
                    // the pull interface inside the task starves until the
                    // loader produces more bytes.
                    job.task.run();
                    let done = StreamerEvent::ParsingFinished(job.id);
                    if job.events.send(done).is_err() {
                        warn!("completion event for {:?} dropped: channel closed", job.id);
                    }
                    thread_busy.store(false, Ordering::SeqCst);
                }
            })
            .expect("Thread spawning failed");
        StreamingWorker {
            jobs: Some(sender),
            busy,
            thread: Some(thread),
        }
    }

    /// Submits a job unless one is already running: at most one streaming
    /// task at a time per worker. A rejected submission surfaces as
    /// streaming suppression in the session.
    pub fn try_run(&self, job: StreamingJob) -> Result<(), WorkerBusy> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(WorkerBusy);
        }
        let jobs = self.jobs.as_ref().expect("job channel taken before drop");
        if jobs.send(job).is_err() {
            self.busy.store(false, Ordering::SeqCst);
            return Err(WorkerBusy);
        }
        Ok(())
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

impl Default for StreamingWorker {
    fn default() -> StreamingWorker {
        StreamingWorker::new()
    }
}

impl Drop for StreamingWorker {
    fn drop(&mut self) {
        // Closing the channel lets the thread finish its current task and
        // exit its receive loop.
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
