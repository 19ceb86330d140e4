// SPDX-FileCopyrightText: 2025 Contributors to the gstbridge project.
// SPDX-License-Identifier: Apache-2.0

//! Shared event loop.
//!
//! Every pipeline's bus messages and sample notifications are multiplexed onto
//! one queue drained by a single thread. Engine threads never call host code
//! directly: they post a [`GraphMessage`] through the pipeline's [`BusSender`]
//! and return immediately. The loop thread then looks up the [`Watch`]
//! registered for that pipeline id and dispatches to it.
//!
//! Messages for ids that are no longer attached are discarded, so nothing is
//! delivered for a pipeline after it has been detached.

use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, LazyLock, Mutex, MutexGuard, OnceLock, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle, ThreadId},
};

use crossbeam::channel::{self, Receiver, Sender};
use futures::executor::ThreadPool;
use tracing::{debug, error, info, trace, warn};

use crate::{Error, GraphMessage, PipelineId, Result};

/// Process-wide loop returned by [`EventLoop::global`].
static GLOBAL: LazyLock<EventLoop> = LazyLock::new(EventLoop::new);

const DEFAULT_OFFLOAD_THREADS: usize = 2;

/// Reaction of one pipeline to its messages. Runs on the loop thread.
pub trait Watch: Send + Sync {
    fn dispatch(&self, message: GraphMessage);
}

enum Task {
    Dispatch {
        pipeline: PipelineId,
        message: GraphMessage,
    },
    Quit,
}

/// Per-pipeline posting endpoint handed to the engine.
///
/// Carries the pipeline id so that engine callbacks, which have no other
/// per-instance context, can be routed back to the right pipeline.
#[derive(Clone)]
pub struct BusSender {
    pipeline: PipelineId,
    sender: Sender<Task>,
}

impl BusSender {
    pub fn pipeline(&self) -> PipelineId {
        self.pipeline
    }

    /// Queues a message for the loop thread. Never blocks.
    pub fn post(&self, message: GraphMessage) -> bool {
        self.sender
            .send(Task::Dispatch {
                pipeline: self.pipeline,
                message,
            })
            .is_ok()
    }
}

impl std::fmt::Debug for BusSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusSender")
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

struct LoopContext {
    sender: Sender<Task>,
    receiver: Receiver<Task>,
    watches: Mutex<HashMap<PipelineId, Arc<dyn Watch>>>,
    owner: Mutex<Option<ThreadId>>,
    offload_threads: AtomicUsize,
    pool: OnceLock<ThreadPool>,
}

/// Clears the owning thread when `run` returns or unwinds.
struct OwnerGuard<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        *lock(self.0) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Single-threaded cooperative dispatcher shared by all pipelines.
///
/// Cheap to clone; clones refer to the same queue.
#[derive(Clone)]
pub struct EventLoop {
    inner: Arc<LoopContext>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        Self::with_offload_threads(DEFAULT_OFFLOAD_THREADS)
    }

    /// Creates a loop whose [`Self::offload`] pool has `threads` workers.
    pub fn with_offload_threads(threads: usize) -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            inner: Arc::new(LoopContext {
                sender,
                receiver,
                watches: Mutex::new(HashMap::new()),
                owner: Mutex::new(None),
                offload_threads: AtomicUsize::new(threads.max(1)),
                pool: OnceLock::new(),
            }),
        }
    }

    /// The process-wide loop.
    pub fn global() -> EventLoop {
        GLOBAL.clone()
    }

    /// Registers `watch` for `pipeline` and returns the sender the engine
    /// should post that pipeline's messages to.
    pub fn attach(&self, pipeline: PipelineId, watch: Arc<dyn Watch>) -> BusSender {
        if lock(&self.inner.watches).insert(pipeline, watch).is_some() {
            warn!("Pipeline {} was already attached, replacing its watch", pipeline);
        }
        debug!("Attached pipeline {} to event loop", pipeline);
        BusSender {
            pipeline,
            sender: self.inner.sender.clone(),
        }
    }

    /// Removes the watch of `pipeline`. Queued messages for it are discarded.
    pub fn detach(&self, pipeline: PipelineId) -> bool {
        let removed = lock(&self.inner.watches).remove(&pipeline).is_some();
        if removed {
            debug!("Detached pipeline {} from event loop", pipeline);
        }
        removed
    }

    pub fn is_attached(&self, pipeline: PipelineId) -> bool {
        lock(&self.inner.watches).contains_key(&pipeline)
    }

    /// Runs the loop on the calling thread until [`Self::quit`] is called.
    ///
    /// # Errors
    ///
    /// [`Error::EventLoopRunning`] if another thread is already running it.
    pub fn run(&self) -> Result<()> {
        {
            let mut owner = lock(&self.inner.owner);
            if owner.is_some() {
                return Err(Error::EventLoopRunning);
            }
            *owner = Some(thread::current().id());
        }
        let _guard = OwnerGuard(&self.inner.owner);
        info!("Event loop running");

        while let Ok(task) = self.inner.receiver.recv() {
            match task {
                Task::Dispatch { pipeline, message } => self.dispatch(pipeline, message),
                Task::Quit => break,
            }
        }

        info!("Event loop stopped");
        Ok(())
    }

    /// Starts [`Self::run`] on a dedicated thread.
    pub fn spawn(&self) -> Result<JoinHandle<()>> {
        let event_loop = self.clone();
        let handle = thread::Builder::new()
            .name("gstbridge-loop".to_owned())
            .spawn(move || {
                if let Err(e) = event_loop.run() {
                    warn!("Event loop thread exiting: {}", e);
                }
            })?;
        Ok(handle)
    }

    /// Asks the running loop to return once the messages queued before this
    /// call have been dispatched.
    pub fn quit(&self) {
        let _ = self.inner.sender.send(Task::Quit);
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.owner).is_some()
    }

    /// True when called from the thread currently running the loop.
    pub fn is_loop_thread(&self) -> bool {
        *lock(&self.inner.owner) == Some(thread::current().id())
    }

    /// Number of tasks waiting to be dispatched.
    pub fn pending(&self) -> usize {
        self.inner.receiver.len()
    }

    /// Resizes the offload pool.
    ///
    /// The pool is created by the first [`Self::offload`] call and keeps its
    /// size from then on; returns false if it already exists with another size.
    pub fn set_offload_threads(&self, threads: usize) -> bool {
        let threads = threads.max(1);
        let current = self.inner.offload_threads.swap(threads, Ordering::SeqCst);
        if self.inner.pool.get().is_some() && current != threads {
            self.inner.offload_threads.store(current, Ordering::SeqCst);
            warn!(
                "Offload pool already running with {} threads, ignoring resize to {}",
                current, threads
            );
            return false;
        }
        true
    }

    /// Number of workers the offload pool has, or will have once created.
    pub fn offload_threads(&self) -> usize {
        self.inner.offload_threads.load(Ordering::SeqCst)
    }

    /// Runs `work` on the offload pool instead of the loop thread.
    ///
    /// Handlers use this for anything that may block; the loop is shared by
    /// every pipeline in the process.
    pub fn offload<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let pool = match self.inner.pool.get() {
            Some(pool) => pool,
            None => {
                let pool = ThreadPool::builder()
                    .pool_size(self.offload_threads())
                    .name_prefix("gstbridge-offload-")
                    .create()?;
                self.inner.pool.get_or_init(|| pool)
            }
        };
        pool.spawn_ok(async move { work() });
        Ok(())
    }

    fn dispatch(&self, pipeline: PipelineId, message: GraphMessage) {
        let watch = lock(&self.inner.watches).get(&pipeline).cloned();
        let Some(watch) = watch else {
            trace!("No pipeline with ID {}, discarding {:?}", pipeline, message);
            return;
        };
        // A panicking handler must not take the shared loop down with it.
        if catch_unwind(AssertUnwindSafe(|| watch.dispatch(message))).is_err() {
            error!("Handler for pipeline {} panicked", pipeline);
        }
    }
}
