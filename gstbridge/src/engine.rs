// SPDX-FileCopyrightText: 2025 Contributors to the gstbridge project.
// SPDX-License-Identifier: Apache-2.0

//! Interfaces consumed from the media-pipeline engine.
//!
//! The bridge never interprets graph descriptions itself. An [`Engine`] turns
//! text into a [`Graph`]; a graph hands out [`Element`]s by name and reports
//! asynchronous [`GraphMessage`]s through a [`BusSender`] it is given when the
//! pipeline starts.
//!
//! ```text
//! Engine::parse ──► Graph ──► find_element(name) ──► Element
//!                     │                                 │
//!                     └── watch(bus) ◄── BusSender ──► watch_samples(bus)
//! ```

use std::sync::Arc;

use crate::{Result, event_loop::BusSender};

/// Target processing state of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    /// Not processing, all engine resources released.
    Idle,
    Playing,
}

/// Asynchronous notification from a running graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphMessage {
    EndOfStream,
    Error(String),

    /// The outbound extraction element has a sample ready to be pulled.
    SampleReady,
}

/// A buffer copied out of, or about to be copied into, the engine.
///
/// `duration` is the engine-defined duration or capture time, when known.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MediaBuffer {
    pub payload: Vec<u8>,
    pub duration: Option<u64>,
}

impl MediaBuffer {
    /// Copies `bytes` into a new owned buffer.
    pub fn copy_from_slice(bytes: &[u8]) -> Self {
        Self {
            payload: bytes.to_vec(),
            duration: None,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Value of an element property.
///
/// Engines convert to and from their native property type and reject values
/// that do not fit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    UInt(u64),
    Int(i64),
    Bool(bool),
    Str(String),
}

impl PropertyValue {
    /// Returns the value as `u32` when it is a non-negative integer in range.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            PropertyValue::UInt(v) => u32::try_from(*v).ok(),
            PropertyValue::Int(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }
}

/// Parses graph descriptions into runnable graphs.
pub trait Engine: Send + Sync {
    /// Fails with [`crate::Error::GraphParse`] on malformed descriptions or
    /// descriptions referencing unknown element types.
    fn parse(&self, description: &str) -> Result<Box<dyn Graph>>;
}

/// One instantiated processing graph.
pub trait Graph: Send + Sync {
    fn set_state(&self, state: GraphState) -> Result<()>;

    /// Requests an orderly end-of-stream. Returns before the graph drains.
    fn send_end_of_stream(&self) -> Result<()>;

    fn find_element(&self, name: &str) -> Option<Arc<dyn Element>>;

    /// Routes the graph's end-of-stream and error messages to `bus`.
    fn watch(&self, bus: BusSender) -> Result<()>;

    /// Stops routing messages. Messages already posted may still be queued.
    fn unwatch(&self);
}

/// A named node inside a graph.
pub trait Element: Send + Sync {
    fn name(&self) -> String;

    /// Hands an owned buffer to an injection element.
    fn inject(&self, buffer: MediaBuffer) -> Result<()>;

    /// Arranges for [`GraphMessage::SampleReady`] to be posted to `bus` for
    /// every sample this element produces.
    fn watch_samples(&self, bus: BusSender) -> Result<()>;

    /// Copies out the next ready sample, if any, without blocking.
    fn pull_sample(&self) -> Option<MediaBuffer>;

    fn request_keyframe(&self) -> Result<()>;

    fn property(&self, name: &str) -> Result<PropertyValue>;

    fn set_property(&self, name: &str, value: PropertyValue) -> Result<()>;
}
