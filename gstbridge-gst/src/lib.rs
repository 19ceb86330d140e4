//! GStreamer backend for gstbridge
//!
//! Implements the [`gstbridge::Engine`] interfaces on top of GStreamer:
//!
//! - **Parsing**: descriptions go through `gst::parse::launch_full` with fatal
//!   errors enabled, so unknown element factories fail creation.
//! - **Bus**: end-of-stream and error messages are intercepted by a bus sync
//!   handler and posted to the bridge's event loop. No GLib main loop is
//!   needed.
//! - **Buffers**: `appsrc` is the injection element and `appsink` the
//!   extraction element. `appsink` signals a ready sample from its streaming
//!   thread; the sample itself is pulled on the event loop thread.
//! - **Control**: keyframe requests are upstream force-key-unit events;
//!   bitrate and sync id are ordinary element properties.
//!
//! [`SenderGraph`] and [`ReceiverGraph`] build the descriptions of the
//! H.264-over-RTP graphs the bridge is usually driven with.
//!
//! ## GStreamer Concepts (for non-GStreamer developers)
//! - **Element**: A processing unit in a pipeline (source, filter, or sink)
//! - **Bus**: Per-pipeline message queue carrying errors, EOS and state changes
//! - **Sample**: A buffer plus the caps describing it, as handed out by `appsink`

// SPDX-FileCopyrightText: 2025 Contributors to the gstbridge project.
// SPDX-License-Identifier: Apache-2.0

use std::sync::LazyLock;

use gstreamer as gst;

mod element;
mod engine;
mod graphs;

pub use element::GstElement;
pub use engine::{GstEngine, GstGraph};
pub use graphs::{ReceiverGraph, SenderGraph};

/// Debug category for everything this crate logs through GStreamer.
///
/// Enable with `GST_DEBUG=gstbridge:5`.
pub(crate) static CAT: LazyLock<gst::DebugCategory> = LazyLock::new(|| {
    gst::DebugCategory::new(
        "gstbridge",
        gst::DebugColorFlags::empty(),
        Some("Host process bridge"),
    )
});
