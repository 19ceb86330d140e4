// SPDX-FileCopyrightText: 2025 Contributors to the gstbridge project.
// SPDX-License-Identifier: Apache-2.0

//! Bridge configuration.
//!
//! Names the elements the bridge looks up inside every graph and the
//! properties the control operations touch. All fields have defaults matching
//! an H.264 sender graph (`x264enc ! rtph264pay ! appsink`) and an RTP receiver
//! graph fed by `appsrc name=src`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Default name of the inbound injection element.
pub const DEFAULT_INBOUND: &str = "src";

/// Default name of the outbound extraction element.
pub const DEFAULT_OUTBOUND: &str = "appsink";

/// Default name of the encoder receiving keyframe and bitrate requests.
pub const DEFAULT_ENCODER: &str = "x264enc";

/// Default name of the payloader carrying the synchronization-source id.
pub const DEFAULT_PAYLOADER: &str = "rtph264pay";

/// Element names looked up inside each graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementNames {
    pub inbound: String,
    pub outbound: String,
    pub encoder: String,
    pub payloader: String,
}

impl Default for ElementNames {
    fn default() -> Self {
        Self {
            inbound: DEFAULT_INBOUND.to_owned(),
            outbound: DEFAULT_OUTBOUND.to_owned(),
            encoder: DEFAULT_ENCODER.to_owned(),
            payloader: DEFAULT_PAYLOADER.to_owned(),
        }
    }
}

/// Property names used by the control operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertyNames {
    /// Target bitrate on the encoder.
    pub bitrate: String,

    /// Synchronization-source identifier on the payloader.
    pub sync_id: String,
}

impl Default for PropertyNames {
    fn default() -> Self {
        Self {
            bitrate: "bitrate".to_owned(),
            sync_id: "ssrc".to_owned(),
        }
    }
}

/// What happens after a pipeline reports a fatal engine error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalErrorPolicy {
    /// Mark the pipeline faulted and let the host decide.
    #[default]
    Surface,

    /// Notify the host, then terminate the process with exit code 1.
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub elements: ElementNames,
    pub properties: PropertyNames,
    pub fatal_error_policy: FatalErrorPolicy,

    /// Worker threads for [`crate::EventLoop::offload`].
    pub offload_threads: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            elements: ElementNames::default(),
            properties: PropertyNames::default(),
            fatal_error_policy: FatalErrorPolicy::default(),
            offload_threads: 2,
        }
    }
}

impl BridgeConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON configuration file. Missing fields keep their defaults.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&json)
    }
}
