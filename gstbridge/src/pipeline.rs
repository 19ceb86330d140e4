// SPDX-FileCopyrightText: 2025 Contributors to the gstbridge project.
// SPDX-License-Identifier: Apache-2.0

//! Pipeline lifecycle manager.
//!
//! ```text
//! create ──► Created ──start──► Playing ──stop──► Stopping
//!                                  │                 │
//!                                  └──engine error───┴──► Faulted
//!
//! destroy: any state ──► Destroyed (handle invalid afterwards)
//! ```
//!
//! Each pipeline has its own lifecycle lock serializing transitions and
//! control operations. Buffer pushes and outbound deliveries do not take it.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use tracing::{debug, error, info, trace, warn};

use crate::{
    BridgeConfig, Element, Engine, Error, EventLoop, Graph, GraphMessage, GraphState,
    NullHandler, PipelineHandler, PropertyValue, Result,
    bridge::{self, PipelineStats, PipelineWriter, Ports, TrafficCounters},
    config::FatalErrorPolicy,
    event_loop::Watch,
};

/// Process-unique pipeline identifier. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(u64);

impl PipelineId {
    /// Wraps a raw id, e.g. one handed back from host code.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id, for logging or passing across an FFI boundary.
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to one pipeline owned by a [`PipelineManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle {
    id: PipelineId,
}

impl PipelineHandle {
    /// The id callbacks for this pipeline are tagged with.
    pub fn id(&self) -> PipelineId {
        self.id
    }
}

/// Lifecycle state of a pipeline, as reported by [`PipelineManager::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Parsed but not processing. `start` is accepted.
    Created,

    /// Attached to the event loop and processing.
    Playing,

    /// End-of-stream requested, waiting for it to reach the outbound element.
    Stopping,

    /// The engine reported a fatal error. Only `destroy` is accepted.
    Faulted,

    /// Released. Only seen by callers racing `destroy`.
    Destroyed,
}

struct Lifecycle {
    state: PipelineState,
    fault: Option<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct PipelineEntry {
    id: PipelineId,
    graph: Box<dyn Graph>,
    lifecycle: Mutex<Lifecycle>,
    ports: Ports,
    handler: Arc<dyn PipelineHandler>,
    fatal_error_policy: FatalErrorPolicy,
    counters: TrafficCounters,
    ended: AtomicBool,
    destroyed: AtomicBool,

    /// Held while a message is being handed to host code.
    dispatch_gate: Mutex<()>,
}

impl PipelineEntry {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        lock(&self.lifecycle)
    }

    fn invalid_state(&self, state: PipelineState, operation: &'static str) -> Error {
        Error::InvalidState {
            pipeline: self.id,
            state,
            operation,
        }
    }

    /// Runs `op` under the lifecycle lock if the pipeline is active.
    fn with_active<T>(
        &self,
        operation: &'static str,
        op: impl FnOnce(&dyn Graph) -> Result<T>,
    ) -> Result<T> {
        let lifecycle = self.lifecycle();
        match lifecycle.state {
            PipelineState::Playing | PipelineState::Stopping => op(self.graph.as_ref()),
            PipelineState::Faulted => Err(Error::EngineFatal {
                pipeline: self.id,
                message: lifecycle.fault.clone().unwrap_or_default(),
            }),
            state => Err(self.invalid_state(state, operation)),
        }
    }

    fn on_sample_ready(&self) {
        // Pull even when discarding so the engine's copy is released.
        let Some(buffer) = self.ports.pull() else {
            trace!("Pipeline {}: sample notification without sample", self.id);
            return;
        };
        let _gate = lock(&self.dispatch_gate);
        if self.destroyed.load(Ordering::SeqCst) || self.ended.load(Ordering::SeqCst) {
            trace!("Pipeline {}: discarding late buffer", self.id);
            return;
        }
        bridge::deliver(self.id, buffer, self.handler.as_ref(), &self.counters);
    }

    fn on_end_of_stream(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        let _gate = lock(&self.dispatch_gate);
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        info!("Pipeline {}: end of stream", self.id);
        self.handler.on_end_of_stream(self.id);
    }

    fn on_error(&self, message: String) {
        {
            let mut lifecycle = self.lifecycle();
            match lifecycle.state {
                PipelineState::Playing | PipelineState::Stopping => {}
                // A failed start already returned the error to its caller.
                state => {
                    warn!(
                        "Pipeline {}: ignoring error in state {:?}: {}",
                        self.id, state, message
                    );
                    return;
                }
            }
            lifecycle.state = PipelineState::Faulted;
            lifecycle.fault = Some(message.clone());
        }
        error!("Pipeline {}: {}", self.id, message);
        {
            let _gate = lock(&self.dispatch_gate);
            if self.destroyed.load(Ordering::SeqCst) {
                return;
            }
            self.handler.on_fatal_error(self.id, &message);
        }
        if self.fatal_error_policy == FatalErrorPolicy::Exit {
            error!("Terminating process after fatal error in pipeline {}", self.id);
            std::process::exit(1);
        }
    }
}

impl Watch for PipelineEntry {
    fn dispatch(&self, message: GraphMessage) {
        match message {
            GraphMessage::SampleReady => self.on_sample_ready(),
            GraphMessage::EndOfStream => self.on_end_of_stream(),
            GraphMessage::Error(message) => self.on_error(message),
        }
    }
}

struct ManagerContext {
    engine: Arc<dyn Engine>,
    event_loop: EventLoop,
    handler: Arc<dyn PipelineHandler>,
    config: BridgeConfig,
    pipelines: RwLock<HashMap<PipelineId, Arc<PipelineEntry>>>,
    next_id: AtomicU64,
}

/// Builder for [`PipelineManager`].
pub struct ManagerBuilder {
    engine: Arc<dyn Engine>,
    event_loop: Option<EventLoop>,
    handler: Arc<dyn PipelineHandler>,
    config: BridgeConfig,
}

impl ManagerBuilder {
    /// Default handler for pipelines created without their own.
    pub fn handler(mut self, handler: Arc<dyn PipelineHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Loop to attach pipelines to. Defaults to [`EventLoop::global`].
    pub fn event_loop(mut self, event_loop: EventLoop) -> Self {
        self.event_loop = Some(event_loop);
        self
    }

    /// Element names, property names, error policy and offload pool size.
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Sizes the loop's offload pool from the configuration, unless the pool
    /// is already running.
    pub fn build(self) -> PipelineManager {
        let event_loop = self.event_loop.unwrap_or_else(EventLoop::global);
        event_loop.set_offload_threads(self.config.offload_threads);
        PipelineManager {
            inner: Arc::new(ManagerContext {
                engine: self.engine,
                event_loop,
                handler: self.handler,
                config: self.config,
                pipelines: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }
}

/// Creates, drives and destroys pipelines.
///
/// Cheap to clone and callable from any thread.
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # use gstbridge::{Engine, EventLoop, NullHandler, PipelineManager};
/// # fn example(engine: Arc<dyn Engine>) -> gstbridge::Result<()> {
/// let event_loop = EventLoop::global();
/// event_loop.spawn()?;
///
/// let manager = PipelineManager::builder(engine)
///     .handler(Arc::new(NullHandler))
///     .build();
/// let pipeline = manager.create("appsrc name=src ! fakesink")?;
/// manager.start(pipeline)?;
/// manager.push_buffer(pipeline, &[0u8; 188])?;
/// manager.stop(pipeline)?;
/// manager.destroy(pipeline)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PipelineManager {
    inner: Arc<ManagerContext>,
}

impl PipelineManager {
    /// Starts building a manager that parses descriptions with `engine`.
    pub fn builder(engine: Arc<dyn Engine>) -> ManagerBuilder {
        ManagerBuilder {
            engine,
            event_loop: None,
            handler: Arc::new(NullHandler),
            config: BridgeConfig::default(),
        }
    }

    /// The loop this manager's pipelines are attached to.
    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.event_loop
    }

    /// The configuration the manager was built with.
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Parses `description` into a new pipeline in [`PipelineState::Created`].
    ///
    /// # Errors
    ///
    /// [`Error::GraphParse`] if the engine rejects the description; no
    /// pipeline exists afterwards.
    pub fn create(&self, description: &str) -> Result<PipelineHandle> {
        self.create_with_handler(description, self.inner.handler.clone())
    }

    /// Like [`Self::create`], delivering this pipeline's callbacks to `handler`.
    pub fn create_with_handler(
        &self,
        description: &str,
        handler: Arc<dyn PipelineHandler>,
    ) -> Result<PipelineHandle> {
        let graph = self.inner.engine.parse(description)?;
        let id = PipelineId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let inbound = graph.find_element(&self.inner.config.elements.inbound);
        let entry = Arc::new(PipelineEntry {
            id,
            graph,
            lifecycle: Mutex::new(Lifecycle {
                state: PipelineState::Created,
                fault: None,
            }),
            ports: Ports::new(inbound),
            handler,
            fatal_error_policy: self.inner.config.fatal_error_policy,
            counters: TrafficCounters::default(),
            ended: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            dispatch_gate: Mutex::new(()),
        });
        debug!(
            "Created pipeline {} (inbound: {}): '{}'",
            id,
            entry.ports.has_inbound(),
            description
        );
        self.inner
            .pipelines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, entry);
        Ok(PipelineHandle { id })
    }

    fn lookup(&self, id: PipelineId) -> Option<Arc<PipelineEntry>> {
        self.inner
            .pipelines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn entry(&self, handle: PipelineHandle) -> Result<Arc<PipelineEntry>> {
        self.lookup(handle.id).ok_or(Error::InvalidHandle(handle.id))
    }

    /// Attaches the pipeline to the event loop and starts processing.
    ///
    /// Does not wait for the first frame.
    pub fn start(&self, handle: PipelineHandle) -> Result<()> {
        let entry = self.entry(handle)?;
        let mut lifecycle = entry.lifecycle();
        if lifecycle.state != PipelineState::Created {
            return Err(entry.invalid_state(lifecycle.state, "start"));
        }

        let event_loop = &self.inner.event_loop;
        let bus = event_loop.attach(entry.id, entry.clone());
        if let Err(e) = self.attach_graph(&entry, bus) {
            entry.graph.unwatch();
            // The graph may have moved part of the way towards playing.
            if let Err(idle) = entry.graph.set_state(GraphState::Idle) {
                warn!(
                    "Pipeline {}: failed to go idle after failed start: {}",
                    entry.id, idle
                );
            }
            entry.ports.set_outbound(None);
            event_loop.detach(entry.id);
            return Err(e);
        }

        lifecycle.state = PipelineState::Playing;
        info!("Pipeline {} playing", entry.id);
        Ok(())
    }

    fn attach_graph(&self, entry: &PipelineEntry, bus: crate::BusSender) -> Result<()> {
        entry.graph.watch(bus.clone())?;
        let outbound = entry
            .graph
            .find_element(&self.inner.config.elements.outbound);
        if let Some(element) = &outbound {
            element.watch_samples(bus)?;
        }
        entry.ports.set_outbound(outbound);
        entry.graph.set_state(GraphState::Playing)
    }

    /// Requests an orderly end-of-stream.
    ///
    /// Returns immediately; completion is reported through
    /// [`PipelineHandler::on_end_of_stream`].
    pub fn stop(&self, handle: PipelineHandle) -> Result<()> {
        let entry = self.entry(handle)?;
        let mut lifecycle = entry.lifecycle();
        match lifecycle.state {
            PipelineState::Playing => {
                entry.graph.send_end_of_stream()?;
                lifecycle.state = PipelineState::Stopping;
                debug!("Pipeline {} stopping", entry.id);
                Ok(())
            }
            PipelineState::Faulted => Err(Error::EngineFatal {
                pipeline: entry.id,
                message: lifecycle.fault.clone().unwrap_or_default(),
            }),
            state => Err(entry.invalid_state(state, "stop")),
        }
    }

    /// Forces the graph idle and releases it. The handle becomes invalid.
    ///
    /// No callback for this pipeline runs after `destroy` returns, except when
    /// `destroy` is itself called from a callback on the loop thread.
    pub fn destroy(&self, handle: PipelineHandle) -> Result<()> {
        let entry = self
            .inner
            .pipelines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.id)
            .ok_or(Error::InvalidHandle(handle.id))?;

        entry.destroyed.store(true, Ordering::SeqCst);
        entry.ports.close();
        entry.graph.unwatch();
        self.inner.event_loop.detach(entry.id);
        if !self.inner.event_loop.is_loop_thread() {
            // Wait out a delivery that passed the destroyed check.
            drop(lock(&entry.dispatch_gate));
        }

        entry.lifecycle().state = PipelineState::Destroyed;
        if let Err(e) = entry.graph.set_state(GraphState::Idle) {
            warn!("Pipeline {}: failed to go idle: {}", entry.id, e);
        }
        info!("Pipeline {} destroyed", entry.id);
        Ok(())
    }

    /// Copies `bytes` into the pipeline's inbound element.
    ///
    /// Silently does nothing when the pipeline has no inbound element or is
    /// gone, since pushes may race teardown. Zero-length buffers are forwarded.
    pub fn push_buffer(&self, handle: PipelineHandle, bytes: &[u8]) -> Result<()> {
        let Some(entry) = self.lookup(handle.id) else {
            trace!("No pipeline with ID {}, discarding push", handle.id);
            return Ok(());
        };
        entry.ports.inject(entry.id, bytes, &entry.counters)
    }

    /// An [`std::io::Write`] adapter over [`Self::push_buffer`].
    pub fn writer(&self, handle: PipelineHandle) -> PipelineWriter {
        PipelineWriter::new(self.clone(), handle)
    }

    /// Asks the encoder to emit a keyframe with all stream headers.
    pub fn force_keyframe(&self, handle: PipelineHandle) -> Result<()> {
        let name = &self.inner.config.elements.encoder;
        self.entry(handle)?.with_active("force keyframe on", |graph| {
            find(graph, name)?.request_keyframe()
        })
    }

    /// Sets the encoder's target bitrate, in the encoder's own unit.
    pub fn set_bitrate(&self, handle: PipelineHandle, bitrate: u32) -> Result<()> {
        let config = &self.inner.config;
        self.entry(handle)?.with_active("set bitrate on", |graph| {
            find(graph, &config.elements.encoder)?.set_property(
                &config.properties.bitrate,
                PropertyValue::UInt(bitrate.into()),
            )
        })
    }

    /// Reads the payloader's synchronization-source identifier.
    pub fn sync_id(&self, handle: PipelineHandle) -> Result<u32> {
        let config = &self.inner.config;
        self.entry(handle)?.with_active("read sync id of", |graph| {
            let element = find(graph, &config.elements.payloader)?;
            let value = element.property(&config.properties.sync_id)?;
            value.as_u32().ok_or_else(|| Error::PropertyType {
                element: element.name(),
                property: config.properties.sync_id.clone(),
                reason: format!("{value:?} is not a 32-bit identifier"),
            })
        })
    }

    /// Sets the payloader's synchronization-source identifier.
    pub fn set_sync_id(&self, handle: PipelineHandle, sync_id: u32) -> Result<()> {
        let config = &self.inner.config;
        self.entry(handle)?.with_active("set sync id of", |graph| {
            find(graph, &config.elements.payloader)?.set_property(
                &config.properties.sync_id,
                PropertyValue::UInt(sync_id.into()),
            )
        })
    }

    /// Current lifecycle state.
    pub fn state(&self, handle: PipelineHandle) -> Result<PipelineState> {
        Ok(self.entry(handle)?.lifecycle().state)
    }

    /// The fatal error message of a faulted pipeline.
    pub fn fault(&self, handle: PipelineHandle) -> Result<Option<String>> {
        Ok(self.entry(handle)?.lifecycle().fault.clone())
    }

    /// Buffer and byte counts in both directions since creation.
    pub fn stats(&self, handle: PipelineHandle) -> Result<PipelineStats> {
        Ok(self.entry(handle)?.counters.snapshot())
    }

    /// Ids of all pipelines that have not been destroyed.
    pub fn pipelines(&self) -> Vec<PipelineId> {
        let mut ids: Vec<_> = self
            .inner
            .pipelines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }
}

fn find(graph: &dyn Graph, name: &str) -> Result<Arc<dyn Element>> {
    graph
        .find_element(name)
        .ok_or_else(|| Error::ElementNotFound(name.to_owned()))
}
