// SPDX-FileCopyrightText: 2025 Contributors to the gstbridge project.
// SPDX-License-Identifier: Apache-2.0

//! In-memory engine and helpers shared by the integration tests.
//!
//! The fake engine understands a tiny subset of the launch syntax:
//! `factory [name=x] [key=value...] ! factory ...`. Known factories are
//! `appsrc`, `appsink`, `encoder`, `payloader`, `queue`, `testsrc`,
//! `fakesink` and `brokensink`, which makes every transition to playing fail
//! after the state has changed. Anything else is a parse error, as is an
//! empty segment.

#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicU64, AtomicUsize, Ordering},
        mpsc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use gstbridge::{
    BridgeConfig, BusSender, Element, Engine, Error, EventLoop, Graph, GraphMessage, GraphState,
    MediaBuffer, PipelineHandler, PipelineId, PipelineManager, PropertyValue, Result, Watch,
};

/// Upper bound for anything a test waits on.
pub const TIMEOUT: Duration = Duration::from_secs(5);

const FACTORIES: &[&str] = &[
    "appsrc",
    "appsink",
    "encoder",
    "payloader",
    "queue",
    "testsrc",
    "fakesink",
    "brokensink",
];

static LOG_ONCE: std::sync::Once = std::sync::Once::new();

pub fn setup_logging() {
    LOG_ONCE.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .with_test_writer()
            .init();
    });
}

pub struct FakeElement {
    name: String,
    factory: String,
    injected: Mutex<Vec<MediaBuffer>>,
    samples: Mutex<VecDeque<MediaBuffer>>,
    sample_bus: Mutex<Option<BusSender>>,
    properties: Mutex<HashMap<String, PropertyValue>>,
    keyframes: AtomicUsize,
}

impl FakeElement {
    fn new(factory: &str, name: String) -> Self {
        let mut properties = HashMap::new();
        match factory {
            "encoder" => {
                properties.insert("bitrate".to_owned(), PropertyValue::UInt(2048));
            }
            "payloader" => {
                properties.insert("ssrc".to_owned(), PropertyValue::UInt(0));
                properties.insert("mtu".to_owned(), PropertyValue::UInt(1400));
            }
            _ => {}
        }
        Self {
            name,
            factory: factory.to_owned(),
            injected: Mutex::new(Vec::new()),
            samples: Mutex::new(VecDeque::new()),
            sample_bus: Mutex::new(None),
            properties: Mutex::new(properties),
            keyframes: AtomicUsize::new(0),
        }
    }

    /// Emulates the engine producing an outbound sample.
    pub fn produce(&self, payload: &[u8], duration: Option<u64>) {
        self.samples.lock().unwrap().push_back(MediaBuffer {
            payload: payload.to_vec(),
            duration,
        });
        if let Some(bus) = self.sample_bus.lock().unwrap().as_ref() {
            bus.post(GraphMessage::SampleReady);
        }
    }

    pub fn injected(&self) -> Vec<MediaBuffer> {
        self.injected.lock().unwrap().clone()
    }

    pub fn pending_samples(&self) -> usize {
        self.samples.lock().unwrap().len()
    }

    pub fn keyframes(&self) -> usize {
        self.keyframes.load(Ordering::SeqCst)
    }

    pub fn raw_property(&self, name: &str) -> Option<PropertyValue> {
        self.properties.lock().unwrap().get(name).cloned()
    }
}

impl Element for FakeElement {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn inject(&self, buffer: MediaBuffer) -> Result<()> {
        if self.factory != "appsrc" {
            return Err(Error::Engine(format!("{} cannot accept buffers", self.name)));
        }
        self.injected.lock().unwrap().push(buffer);
        Ok(())
    }

    fn watch_samples(&self, bus: BusSender) -> Result<()> {
        *self.sample_bus.lock().unwrap() = Some(bus);
        Ok(())
    }

    fn pull_sample(&self) -> Option<MediaBuffer> {
        self.samples.lock().unwrap().pop_front()
    }

    fn request_keyframe(&self) -> Result<()> {
        if self.factory != "encoder" {
            return Err(Error::Engine(format!("{} is not an encoder", self.name)));
        }
        self.keyframes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn property(&self, name: &str) -> Result<PropertyValue> {
        self.properties
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::PropertyNotFound {
                element: self.name.clone(),
                property: name.to_owned(),
            })
    }

    fn set_property(&self, name: &str, value: PropertyValue) -> Result<()> {
        let mut properties = self.properties.lock().unwrap();
        let current = properties.get_mut(name).ok_or_else(|| Error::PropertyNotFound {
            element: self.name.clone(),
            property: name.to_owned(),
        })?;
        if std::mem::discriminant(current) != std::mem::discriminant(&value) {
            return Err(Error::PropertyType {
                element: self.name.clone(),
                property: name.to_owned(),
                reason: format!("cannot store {value:?} in {current:?}"),
            });
        }
        *current = value;
        Ok(())
    }
}

pub struct FakeGraph {
    pub description: String,
    elements: Vec<Arc<FakeElement>>,
    state: Mutex<GraphState>,
    bus: Mutex<Option<BusSender>>,
    eos_requests: AtomicUsize,
}

impl FakeGraph {
    pub fn element(&self, name: &str) -> Arc<FakeElement> {
        self.elements
            .iter()
            .find(|e| e.name == name)
            .cloned()
            .unwrap_or_else(|| panic!("no element {name} in '{}'", self.description))
    }

    pub fn state(&self) -> GraphState {
        *self.state.lock().unwrap()
    }

    pub fn eos_requests(&self) -> usize {
        self.eos_requests.load(Ordering::SeqCst)
    }

    pub fn is_watched(&self) -> bool {
        self.bus.lock().unwrap().is_some()
    }

    /// Emulates the engine reporting an error on the bus.
    pub fn post_error(&self, message: &str) {
        if let Some(bus) = self.bus.lock().unwrap().as_ref() {
            bus.post(GraphMessage::Error(message.to_owned()));
        }
    }

    pub fn post_end_of_stream(&self) {
        if let Some(bus) = self.bus.lock().unwrap().as_ref() {
            bus.post(GraphMessage::EndOfStream);
        }
    }
}

/// The boxed graph handed to the manager; the test keeps the shared half.
struct GraphRef(Arc<FakeGraph>);

impl Graph for GraphRef {
    fn set_state(&self, state: GraphState) -> Result<()> {
        *self.0.state.lock().unwrap() = state;
        let broken = self.0.elements.iter().any(|e| e.factory == "brokensink");
        if state == GraphState::Playing && broken {
            return Err(Error::Engine(format!(
                "'{}' failed to reach playing",
                self.0.description
            )));
        }
        Ok(())
    }

    fn send_end_of_stream(&self) -> Result<()> {
        self.0.eos_requests.fetch_add(1, Ordering::SeqCst);
        // Samples produced so far are already queued ahead of this message.
        self.0.post_end_of_stream();
        Ok(())
    }

    fn find_element(&self, name: &str) -> Option<Arc<dyn Element>> {
        self.0
            .elements
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.clone() as Arc<dyn Element>)
    }

    fn watch(&self, bus: BusSender) -> Result<()> {
        *self.0.bus.lock().unwrap() = Some(bus);
        Ok(())
    }

    fn unwatch(&self) {
        self.0.bus.lock().unwrap().take();
        for element in &self.0.elements {
            element.sample_bus.lock().unwrap().take();
        }
    }
}

#[derive(Default)]
pub struct FakeEngine {
    graphs: Mutex<Vec<Arc<FakeGraph>>>,
}

impl FakeEngine {
    pub fn graphs(&self) -> usize {
        self.graphs.lock().unwrap().len()
    }

    pub fn last_graph(&self) -> Arc<FakeGraph> {
        self.graphs
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no graph parsed yet")
    }
}

impl Engine for FakeEngine {
    fn parse(&self, description: &str) -> Result<Box<dyn Graph>> {
        let mut elements = Vec::new();
        for (index, segment) in description.split('!').enumerate() {
            let mut tokens = segment.split_whitespace();
            let factory = tokens
                .next()
                .ok_or_else(|| Error::GraphParse(format!("empty element at position {index}")))?;
            if !FACTORIES.contains(&factory) {
                return Err(Error::GraphParse(format!("no element \"{factory}\"")));
            }
            let mut name = format!("{factory}{index}");
            for token in tokens {
                match token.split_once('=') {
                    Some(("name", value)) => name = value.to_owned(),
                    Some(_) => {}
                    None => return Err(Error::GraphParse(format!("unexpected token '{token}'"))),
                }
            }
            elements.push(Arc::new(FakeElement::new(factory, name)));
        }
        let graph = Arc::new(FakeGraph {
            description: description.to_owned(),
            elements,
            state: Mutex::new(GraphState::Idle),
            bus: Mutex::new(None),
            eos_requests: AtomicUsize::new(0),
        });
        self.graphs.lock().unwrap().push(graph.clone());
        Ok(Box::new(GraphRef(graph)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Buffer {
        pipeline: PipelineId,
        bytes: Vec<u8>,
        duration: Option<u64>,
    },
    EndOfStream(PipelineId),
    FatalError(PipelineId, String),
}

/// Records every callback in arrival order.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
    changed: Condvar,
}

impl RecordingHandler {
    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
        self.changed.notify_all();
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_for(&self, pipeline: PipelineId) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| match e {
                Event::Buffer { pipeline: p, .. } => *p == pipeline,
                Event::EndOfStream(p) | Event::FatalError(p, _) => *p == pipeline,
            })
            .collect()
    }

    pub fn buffers_for(&self, pipeline: PipelineId) -> Vec<Vec<u8>> {
        self.events_for(pipeline)
            .into_iter()
            .filter_map(|e| match e {
                Event::Buffer { bytes, .. } => Some(bytes),
                _ => None,
            })
            .collect()
    }

    /// Blocks until `predicate` holds for the recorded events or [`TIMEOUT`].
    pub fn wait_until(&self, predicate: impl Fn(&[Event]) -> bool) -> bool {
        let deadline = Instant::now() + TIMEOUT;
        let mut events = self.events.lock().unwrap();
        while !predicate(&events) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            events = self.changed.wait_timeout(events, deadline - now).unwrap().0;
        }
        true
    }
}

impl PipelineHandler for RecordingHandler {
    fn on_buffer(&self, pipeline: PipelineId, bytes: &[u8], duration: Option<u64>) {
        self.record(Event::Buffer {
            pipeline,
            bytes: bytes.to_vec(),
            duration,
        });
    }

    fn on_end_of_stream(&self, pipeline: PipelineId) {
        self.record(Event::EndOfStream(pipeline));
    }

    fn on_fatal_error(&self, pipeline: PipelineId, message: &str) {
        self.record(Event::FatalError(pipeline, message.to_owned()));
    }
}

static SENTINEL: AtomicU64 = AtomicU64::new(u64::MAX);

struct Sentinel(Mutex<Option<mpsc::Sender<()>>>);

impl Watch for Sentinel {
    fn dispatch(&self, _message: GraphMessage) {
        if let Some(done) = self.0.lock().unwrap().take() {
            let _ = done.send(());
        }
    }
}

/// Waits until everything queued on `event_loop` before this call has been
/// dispatched.
pub fn drain(event_loop: &EventLoop) {
    let id = PipelineId::from_raw(SENTINEL.fetch_sub(1, Ordering::SeqCst));
    let (done, finished) = mpsc::channel();
    let bus = event_loop.attach(id, Arc::new(Sentinel(Mutex::new(Some(done)))));
    bus.post(GraphMessage::EndOfStream);
    finished
        .recv_timeout(TIMEOUT)
        .expect("event loop did not drain in time");
    event_loop.detach(id);
}

/// A manager over a fake engine with its own running event loop.
pub struct Harness {
    pub manager: PipelineManager,
    pub engine: Arc<FakeEngine>,
    pub handler: Arc<RecordingHandler>,
    pub event_loop: EventLoop,
    thread: Option<JoinHandle<()>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        setup_logging();
        let engine = Arc::new(FakeEngine::default());
        let handler = Arc::new(RecordingHandler::default());
        let event_loop = EventLoop::new();
        let thread = event_loop.spawn().unwrap();
        let manager = PipelineManager::builder(engine.clone())
            .handler(handler.clone())
            .event_loop(event_loop.clone())
            .config(config)
            .build();
        Self {
            manager,
            engine,
            handler,
            event_loop,
            thread: Some(thread),
        }
    }

    pub fn drain(&self) {
        drain(&self.event_loop);
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.event_loop.quit();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Sender graph in the fake syntax, using the default element names.
pub const SENDER: &str =
    "testsrc ! encoder name=x264enc ! payloader name=rtph264pay ! appsink name=appsink";

/// Receiver graph in the fake syntax, using the default element names.
pub const RECEIVER: &str = "appsrc name=src ! queue ! fakesink";
