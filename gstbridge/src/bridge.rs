// SPDX-FileCopyrightText: 2025 Contributors to the gstbridge project.
// SPDX-License-Identifier: Apache-2.0

//! Buffer bridge.
//!
//! Bytes cross the boundary by copy only. Inbound, the host's slice is copied
//! into a [`MediaBuffer`] whose ownership passes to the engine; the host keeps
//! its original. Outbound, the engine's sample is copied into a `MediaBuffer`
//! owned by the bridge, lent to the handler for the duration of one call and
//! dropped right after.
//!
//! Neither direction takes the pipeline's lifecycle lock. The injection and
//! extraction elements are cached in [`Ports`] and cleared on destroy.

use std::{
    io,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use tracing::trace;

use crate::{
    Element, MediaBuffer, PipelineHandle, PipelineHandler, PipelineId, PipelineManager, Result,
};

/// Traffic counters of one pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub buffers_pushed: u64,
    pub bytes_pushed: u64,
    pub buffers_delivered: u64,
    pub bytes_delivered: u64,
}

#[derive(Debug, Default)]
pub(crate) struct TrafficCounters {
    buffers_pushed: AtomicU64,
    bytes_pushed: AtomicU64,
    buffers_delivered: AtomicU64,
    bytes_delivered: AtomicU64,
}

impl TrafficCounters {
    fn record_push(&self, len: usize) {
        self.buffers_pushed.fetch_add(1, Ordering::Relaxed);
        self.bytes_pushed.fetch_add(len as u64, Ordering::Relaxed);
    }

    fn record_delivery(&self, len: usize) {
        self.buffers_delivered.fetch_add(1, Ordering::Relaxed);
        self.bytes_delivered.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            buffers_pushed: self.buffers_pushed.load(Ordering::Relaxed),
            bytes_pushed: self.bytes_pushed.load(Ordering::Relaxed),
            buffers_delivered: self.buffers_delivered.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
        }
    }
}

type Port = RwLock<Option<Arc<dyn Element>>>;

fn read(port: &Port) -> Option<Arc<dyn Element>> {
    port.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn write(port: &Port, element: Option<Arc<dyn Element>>) {
    *port.write().unwrap_or_else(PoisonError::into_inner) = element;
}

/// Cached injection and extraction elements of one pipeline.
pub(crate) struct Ports {
    inbound: Port,
    outbound: Port,
    closed: AtomicBool,
}

impl Ports {
    pub(crate) fn new(inbound: Option<Arc<dyn Element>>) -> Self {
        Self {
            inbound: RwLock::new(inbound),
            outbound: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn has_inbound(&self) -> bool {
        read(&self.inbound).is_some()
    }

    pub(crate) fn set_outbound(&self, element: Option<Arc<dyn Element>>) {
        write(&self.outbound, element);
    }

    /// Drops both cached elements; later pushes and pulls become no-ops.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        write(&self.inbound, None);
        write(&self.outbound, None);
    }

    /// Copies `bytes` into a new engine buffer and injects it.
    ///
    /// A missing injection element is not an error. Neither is a refusal from
    /// an element whose pipeline was closed while the push was in flight.
    pub(crate) fn inject(
        &self,
        pipeline: PipelineId,
        bytes: &[u8],
        counters: &TrafficCounters,
    ) -> Result<()> {
        let Some(element) = read(&self.inbound) else {
            trace!("Pipeline {}: no inbound element, ignoring push", pipeline);
            return Ok(());
        };
        let buffer = MediaBuffer::copy_from_slice(bytes);
        match element.inject(buffer) {
            Ok(()) => {
                counters.record_push(bytes.len());
                trace!("Pipeline {}: {} bytes pushed", pipeline, bytes.len());
                Ok(())
            }
            Err(e) if self.closed.load(Ordering::SeqCst) => {
                trace!("Pipeline {}: push raced teardown: {}", pipeline, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Copies out the next ready sample of the extraction element.
    pub(crate) fn pull(&self) -> Option<MediaBuffer> {
        read(&self.outbound)?.pull_sample()
    }
}

/// Lends `buffer` to the handler, then releases it.
pub(crate) fn deliver(
    pipeline: PipelineId,
    buffer: MediaBuffer,
    handler: &dyn PipelineHandler,
    counters: &TrafficCounters,
) {
    trace!(
        "Pipeline {}: delivering {} bytes (duration {:?})",
        pipeline,
        buffer.len(),
        buffer.duration
    );
    counters.record_delivery(buffer.len());
    handler.on_buffer(pipeline, &buffer.payload, buffer.duration);
}

/// [`io::Write`] adapter pushing every write as one inbound buffer.
pub struct PipelineWriter {
    manager: PipelineManager,
    handle: PipelineHandle,
}

impl PipelineWriter {
    pub(crate) fn new(manager: PipelineManager, handle: PipelineHandle) -> Self {
        Self { manager, handle }
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle
    }
}

impl io::Write for PipelineWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.manager
            .push_buffer(self.handle, buf)
            .map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
