// SPDX-FileCopyrightText: 2025 Contributors to the gstbridge project.
// SPDX-License-Identifier: Apache-2.0

//! Host callbacks.
//!
//! All methods run on the event loop thread and must return quickly. Work that
//! may block belongs on [`crate::EventLoop::offload`].

use std::{
    io::Write,
    sync::{Mutex, PoisonError},
};

use tracing::{debug, trace, warn};

use crate::PipelineId;

/// Receives outbound buffers and lifecycle notifications.
pub trait PipelineHandler: Send + Sync {
    /// An outbound buffer. `bytes` is only valid for the duration of the call;
    /// copy it to keep it.
    fn on_buffer(&self, pipeline: PipelineId, bytes: &[u8], duration: Option<u64>);

    /// The pipeline drained after [`crate::PipelineManager::stop`]. Delivered
    /// at most once; no `on_buffer` follows it.
    fn on_end_of_stream(&self, pipeline: PipelineId) {
        let _ = pipeline;
    }

    /// The engine reported an unrecoverable error. Delivered at most once.
    fn on_fatal_error(&self, pipeline: PipelineId, message: &str) {
        let _ = (pipeline, message);
    }
}

/// Handler for pipelines that produce nothing the host wants.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHandler;

impl PipelineHandler for NullHandler {
    fn on_buffer(&self, pipeline: PipelineId, bytes: &[u8], _duration: Option<u64>) {
        trace!("Pipeline {}: dropping {} outbound bytes", pipeline, bytes.len());
    }
}

/// Writes every outbound buffer of a pipeline to `W` and closes it on
/// end-of-stream.
///
/// Writes happen inline on the loop thread, so `W` should be non-blocking or
/// buffered.
pub struct WriterHandler<W: Write + Send> {
    writer: Mutex<Option<W>>,
}

impl<W: Write + Send> WriterHandler<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(Some(writer)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Takes the writer back. Returns `None` once it has been closed.
    pub fn into_inner(self) -> Option<W> {
        self.writer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> PipelineHandler for WriterHandler<W> {
    fn on_buffer(&self, pipeline: PipelineId, bytes: &[u8], _duration: Option<u64>) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(writer) = writer.as_mut() else {
            warn!("Pipeline {}: writer closed, discarding buffer", pipeline);
            return;
        };
        if let Err(e) = writer.write_all(bytes) {
            warn!(
                "Pipeline {}: failed to write {} bytes: {}",
                pipeline,
                bytes.len(),
                e
            );
        }
    }

    fn on_end_of_stream(&self, pipeline: PipelineId) {
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.flush() {
                warn!("Pipeline {}: failed to close writer: {}", pipeline, e);
            }
            debug!("Pipeline {}: writer closed", pipeline);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_collects_buffers_until_end_of_stream() {
        let id = PipelineId::from_raw(7);
        let handler = WriterHandler::new(Vec::new());
        handler.on_buffer(id, b"abc", None);
        handler.on_buffer(id, b"", Some(1));
        handler.on_buffer(id, b"de", None);
        assert!(!handler.is_closed());
        assert_eq!(handler.into_inner().unwrap(), b"abcde");
    }

    #[test]
    fn writer_is_closed_on_end_of_stream() {
        let id = PipelineId::from_raw(1);
        let handler = WriterHandler::new(Vec::new());
        handler.on_buffer(id, b"abc", None);
        handler.on_end_of_stream(id);
        assert!(handler.is_closed());
        handler.on_buffer(id, b"late", None);
        assert!(handler.into_inner().is_none());
    }
}
