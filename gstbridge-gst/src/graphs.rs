// SPDX-FileCopyrightText: 2025 Contributors to the gstbridge project.
// SPDX-License-Identifier: Apache-2.0

//! Descriptions of the H.264-over-RTP sender and receiver graphs.
//!
//! Element names match [`gstbridge::config::ElementNames::default`], so the
//! default [`gstbridge::BridgeConfig`] finds the encoder, payloader and the
//! injection and extraction elements without further setup.

use std::{fmt, path::Path};

use gstbridge::config::{DEFAULT_ENCODER, DEFAULT_INBOUND, DEFAULT_OUTBOUND, DEFAULT_PAYLOADER};

/// Default encoder target, in kbit/s (the `x264enc` default).
pub const DEFAULT_BITRATE_KBPS: u32 = 2048;

/// Default RTP packet size, in bytes.
pub const DEFAULT_MTU: u32 = 1000;

/// Default video sink of the receiver.
pub const DEFAULT_VIDEO_SINK: &str = "autovideosink";

/// Raw video source, H.264 encoder, RTP payloader and `appsink`.
///
/// ```
/// use gstbridge_gst::SenderGraph;
///
/// let description = SenderGraph::new("videotestsrc is-live=true").bitrate(500).to_string();
/// assert!(description.starts_with("videotestsrc is-live=true ! x264enc name=x264enc"));
/// assert!(description.contains("bitrate=500"));
/// assert!(description.ends_with("appsink name=appsink"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderGraph {
    source: String,
    bitrate_kbps: u32,
    mtu: u32,
}

impl Default for SenderGraph {
    fn default() -> Self {
        Self::new("videotestsrc")
    }
}

impl SenderGraph {
    /// `source` is a description fragment producing raw video.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
            mtu: DEFAULT_MTU,
        }
    }

    /// Decodes the video file at `path` as the source.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self::new(format!(
            "filesrc location=\"{}\" ! queue ! decodebin ! videoconvert",
            path.as_ref().display()
        ))
    }

    /// Initial encoder target, in kbit/s.
    pub fn bitrate(mut self, kbps: u32) -> Self {
        self.bitrate_kbps = kbps;
        self
    }

    /// Maximum RTP packet size, in bytes.
    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }
}

impl fmt::Display for SenderGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ! x264enc name={} pass=5 speed-preset=4 bitrate={} tune=4 \
             ! rtph264pay name={} mtu={} ! appsink name={}",
            self.source,
            DEFAULT_ENCODER,
            self.bitrate_kbps,
            DEFAULT_PAYLOADER,
            self.mtu,
            DEFAULT_OUTBOUND
        )
    }
}

/// `appsrc`, RTP depayloader, H.264 decoder and a video sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverGraph {
    sink: String,
}

impl Default for ReceiverGraph {
    fn default() -> Self {
        Self {
            sink: DEFAULT_VIDEO_SINK.to_owned(),
        }
    }
}

impl ReceiverGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the final video sink, e.g. with `fakesink` for headless runs.
    pub fn sink(mut self, sink: impl Into<String>) -> Self {
        self.sink = sink.into();
        self
    }
}

impl fmt::Display for ReceiverGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "appsrc name={} ! application/x-rtp,clock-rate=90000,payload=96 \
             ! rtpjitterbuffer ! rtph264depay ! h264parse ! avdec_h264 \
             ! videoconvert ! {}",
            DEFAULT_INBOUND, self.sink
        )
    }
}
