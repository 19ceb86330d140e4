// SPDX-FileCopyrightText: 2025 Contributors to the gstbridge project.
// SPDX-License-Identifier: Apache-2.0

//! Error types for bridge operations.
//!
//! Parse and handle-validity errors are returned synchronously from the call
//! that caused them. Engine fatal errors arrive asynchronously through
//! [`crate::PipelineHandler::on_fatal_error`] and are only returned from later
//! calls on the faulted pipeline.

use crate::{PipelineId, PipelineState};

/// Convenience result type using [`Error`] as the error variant.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors that can occur when driving a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The engine rejected the graph description. No pipeline was created.
    #[error("Graph parse error: {0}")]
    GraphParse(String),

    /// The handle is unknown or its pipeline has been destroyed.
    #[error("Invalid pipeline handle {0}")]
    InvalidHandle(PipelineId),

    /// A control operation targeted an element the graph does not contain.
    ///
    /// The pipeline keeps running; only the failing call is affected.
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// The engine reported an unrecoverable error for this pipeline.
    #[error("Pipeline {pipeline} faulted: {message}")]
    EngineFatal {
        pipeline: PipelineId,
        message: String,
    },

    /// The operation is not valid in the pipeline's current state.
    #[error("Cannot {operation} pipeline {pipeline} in state {state:?}")]
    InvalidState {
        pipeline: PipelineId,
        state: PipelineState,
        operation: &'static str,
    },

    /// The element exists but has no property with this name.
    #[error("Element {element} has no property {property}")]
    PropertyNotFound { element: String, property: String },

    /// The property exists but cannot hold the supplied or requested value.
    #[error("Property {property} of {element}: {reason}")]
    PropertyType {
        element: String,
        property: String,
        reason: String,
    },

    /// A non-fatal refusal from the engine (state change, event, injection).
    #[error("Engine error: {0}")]
    Engine(String),

    /// [`crate::EventLoop::run`] was called while the loop was already running.
    #[error("Event loop is already running")]
    EventLoopRunning,

    /// Failed to parse a configuration document.
    #[error("Configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// I/O failure (configuration files, worker threads).
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}
