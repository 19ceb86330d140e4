// SPDX-FileCopyrightText: 2025 Contributors to the gstbridge project.
// SPDX-License-Identifier: Apache-2.0

//! # gstbridge
//!
//! Drives media pipelines built by an external engine and bridges buffers and
//! events between them and the host process.
//!
//! ## Overview
//!
//! The engine is consumed through two narrow interfaces ([`Engine::parse`] and
//! [`Graph::find_element`] plus the element capabilities). Everything else is
//! owned here:
//!
//! - **Lifecycle**: [`PipelineManager`] creates, starts, stops and destroys
//!   pipelines and applies control operations (keyframe, bitrate, sync id).
//! - **Buffer bridge**: host bytes are copied into the engine on
//!   [`PipelineManager::push_buffer`]; engine samples are copied out and lent
//!   to [`PipelineHandler::on_buffer`].
//! - **Event loop**: one [`EventLoop`] thread dispatches every pipeline's
//!   samples, end-of-stream and error messages.
//! - **Timestamps**: [`clock::now`] returns 16.16 fixed-point wall-clock time
//!   since [`clock::init_epoch`].
//!
//! ## Architecture
//!
//! ```text
//!  host threads                       engine threads
//!  ────────────                       ──────────────
//!  PipelineManager ──parse──► Engine ──► Graph ──► Element
//!      │  push_buffer (copy-in) ─────────────────────► inbound
//!      │                                                 │
//!      │                           outbound ── SampleReady / Eos / Error
//!      │                                                 │
//!      │                                            BusSender
//!      │                                                 ▼
//!      └── attach ──────────────────────────────► EventLoop (one thread)
//!                                                        │
//!                                  PipelineHandler ◄─────┘ (copy-out)
//! ```
//!
//! ## Thread Safety
//!
//! - [`PipelineManager`] and [`EventLoop`] are `Send + Sync` and cheap to clone
//! - Lifecycle transitions and control operations on one pipeline are
//!   serialized by a per-pipeline lock
//! - Handler methods always run on the event loop thread, in production order
//!   per pipeline

mod bridge;
mod engine;
mod error;
mod event_loop;
mod handler;
mod pipeline;

pub mod clock;
pub mod config;

pub use bridge::{PipelineStats, PipelineWriter};
pub use clock::NtpShort;
pub use config::BridgeConfig;
pub use engine::{Element, Engine, Graph, GraphMessage, GraphState, MediaBuffer, PropertyValue};
pub use error::{Error, Result};
pub use event_loop::{BusSender, EventLoop, Watch};
pub use handler::{NullHandler, PipelineHandler, WriterHandler};
pub use pipeline::{ManagerBuilder, PipelineHandle, PipelineId, PipelineManager, PipelineState};
