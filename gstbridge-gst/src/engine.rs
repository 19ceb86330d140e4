// SPDX-FileCopyrightText: 2025 Contributors to the gstbridge project.
// SPDX-License-Identifier: Apache-2.0

//! Graph parsing and bus routing.

use std::sync::Arc;

use gst::prelude::*;
use gstreamer as gst;
use tracing::{debug, trace};

use gstbridge::{BusSender, Element, Engine, Error, Graph, GraphMessage, GraphState, Result};

use crate::{CAT, GstElement};

/// [`Engine`] backed by the process-wide GStreamer registry.
#[derive(Debug)]
pub struct GstEngine {
    _initialized: (),
}

impl GstEngine {
    /// Initializes GStreamer. Calling this more than once is harmless.
    pub fn new() -> Result<Self> {
        gst::init().map_err(|e| Error::Engine(format!("Failed to initialize GStreamer: {e}")))?;
        debug!("GStreamer {} initialized", gst::version_string());
        Ok(Self { _initialized: () })
    }

    /// Like [`Engine::parse`], keeping the concrete graph type.
    pub fn parse_graph(&self, description: &str) -> Result<GstGraph> {
        let element = gst::parse::launch_full(description, None, gst::ParseFlags::FATAL_ERRORS)
            .map_err(|e| Error::GraphParse(e.to_string()))?;

        // A description naming a single element does not produce a bin.
        let pipeline = match element.downcast::<gst::Pipeline>() {
            Ok(pipeline) => pipeline,
            Err(element) => {
                let pipeline = gst::Pipeline::new();
                pipeline
                    .add(&element)
                    .map_err(|e| Error::GraphParse(e.to_string()))?;
                pipeline
            }
        };
        gst::debug!(CAT, obj = pipeline, "Parsed '{}'", description);
        Ok(GstGraph { pipeline })
    }
}

impl Engine for GstEngine {
    fn parse(&self, description: &str) -> Result<Box<dyn Graph>> {
        Ok(Box::new(self.parse_graph(description)?))
    }
}

/// A parsed `gst::Pipeline`.
pub struct GstGraph {
    pipeline: gst::Pipeline,
}

impl GstGraph {
    pub fn pipeline(&self) -> &gst::Pipeline {
        &self.pipeline
    }

    fn bus(&self) -> Result<gst::Bus> {
        self.pipeline
            .bus()
            .ok_or_else(|| Error::Engine(format!("{} has no bus", self.pipeline.name())))
    }
}

/// Translates bus messages into loop messages. Everything is dropped from the
/// bus afterwards since nothing else reads it.
fn route(bus: &BusSender, message: &gst::Message) -> gst::BusSyncReply {
    use gst::MessageView;

    match message.view() {
        MessageView::Eos(..) => {
            bus.post(GraphMessage::EndOfStream);
        }
        MessageView::Error(err) => {
            let source = message
                .src()
                .map(|s| s.path_string().to_string())
                .unwrap_or_else(|| "unknown".to_owned());
            let text = match err.debug() {
                Some(details) => format!("{source}: {} ({details})", err.error()),
                None => format!("{source}: {}", err.error()),
            };
            bus.post(GraphMessage::Error(text));
        }
        MessageView::Warning(warning) => {
            tracing::warn!("Pipeline {}: {}", bus.pipeline(), warning.error());
        }
        _ => {
            trace!("Pipeline {}: dropping {:?}", bus.pipeline(), message.type_());
        }
    }
    gst::BusSyncReply::Drop
}

impl Graph for GstGraph {
    fn set_state(&self, state: GraphState) -> Result<()> {
        let target = match state {
            GraphState::Idle => gst::State::Null,
            GraphState::Playing => gst::State::Playing,
        };
        self.pipeline.set_state(target).map_err(|e| {
            Error::Engine(format!(
                "Failed to set {} to {:?}: {}",
                self.pipeline.name(),
                target,
                e
            ))
        })?;
        gst::debug!(CAT, obj = self.pipeline, "State change to {:?} requested", target);
        Ok(())
    }

    fn send_end_of_stream(&self) -> Result<()> {
        if self.pipeline.send_event(gst::event::Eos::new()) {
            Ok(())
        } else {
            Err(Error::Engine(format!(
                "{} did not accept end-of-stream",
                self.pipeline.name()
            )))
        }
    }

    fn find_element(&self, name: &str) -> Option<Arc<dyn Element>> {
        self.pipeline
            .by_name(name)
            .map(|element| Arc::new(GstElement::new(element)) as Arc<dyn Element>)
    }

    fn watch(&self, bus: BusSender) -> Result<()> {
        gst::debug!(
            CAT,
            obj = self.pipeline,
            "Routing bus to pipeline {}",
            bus.pipeline()
        );
        self.bus()?
            .set_sync_handler(move |_, message| route(&bus, message));
        Ok(())
    }

    fn unwatch(&self) {
        if let Ok(bus) = self.bus() {
            bus.unset_sync_handler();
        }
    }
}

impl Drop for GstGraph {
    fn drop(&mut self) {
        // Pipelines must reach NULL before their last reference goes away.
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
