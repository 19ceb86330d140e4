// SPDX-FileCopyrightText: 2025 Contributors to the gstbridge project.
// SPDX-License-Identifier: Apache-2.0

//! Relays RTP from a sender pipeline into a receiver pipeline in-process.
//!
//! The sender encodes a video source to H.264 and packetizes it; every RTP
//! packet it hands to the host is pushed straight into a receiver that
//! depacketizes, decodes and displays it.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p gstbridge-gst --example relay -- --seconds 10
//!
//! # Headless, with a keyframe every two seconds
//! cargo run -p gstbridge-gst --example relay -- \
//!   --sink "fakesink sync=false" --keyframe-interval 2
//! ```

use std::{
    path::PathBuf,
    sync::{Arc, atomic::AtomicU64, atomic::Ordering, mpsc},
    time::{Duration, Instant},
};

use clap::Parser;
use gstbridge::{
    BridgeConfig, EventLoop, NullHandler, PipelineHandle, PipelineHandler, PipelineId,
    PipelineManager, clock,
};
use gstbridge_gst::{GstEngine, ReceiverGraph, SenderGraph};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Raw video source fragment of the sender
    #[arg(long, default_value = "videotestsrc is-live=true")]
    source: String,

    /// Initial encoder bitrate in kbit/s
    #[arg(short, long, default_value_t = 2048)]
    bitrate: u32,

    /// RTP packet size in bytes
    #[arg(long, default_value_t = 1000)]
    mtu: u32,

    /// Video sink of the receiver
    #[arg(long, default_value = "autovideosink")]
    sink: String,

    /// How long to relay before stopping the sender
    #[arg(long, default_value_t = 10)]
    seconds: u64,

    /// Force a keyframe every N seconds
    #[arg(long)]
    keyframe_interval: Option<u64>,

    /// RTP synchronization source of the sender
    #[arg(long)]
    ssrc: Option<u32>,

    /// JSON bridge configuration
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();
}

/// Pushes every packet of the sender into the receiver.
struct Relay {
    manager: PipelineManager,
    receiver: PipelineHandle,
    packets: AtomicU64,
    finished: std::sync::Mutex<mpsc::Sender<()>>,
}

impl PipelineHandler for Relay {
    fn on_buffer(&self, pipeline: PipelineId, bytes: &[u8], _duration: Option<u64>) {
        if let Err(e) = self.manager.push_buffer(self.receiver, bytes) {
            warn!("Pipeline {}: relay failed: {}", pipeline, e);
        }
        let packets = self.packets.fetch_add(1, Ordering::Relaxed) + 1;
        if packets % 500 == 0 {
            let now = clock::now();
            debug!(
                "{} packets relayed at {}.{:05}",
                packets,
                now.seconds(),
                u64::from(now.fraction()) * 100_000 / 65_536
            );
        }
    }

    fn on_end_of_stream(&self, pipeline: PipelineId) {
        info!("Pipeline {}: sender drained", pipeline);
        if let Ok(finished) = self.finished.lock() {
            let _ = finished.send(());
        }
    }

    fn on_fatal_error(&self, pipeline: PipelineId, message: &str) {
        warn!("Pipeline {}: sender failed: {}", pipeline, message);
        if let Ok(finished) = self.finished.lock() {
            let _ = finished.send(());
        }
    }
}

fn main() -> gstbridge::Result<()> {
    setup_logging();
    let args = Args::parse();
    clock::init_epoch();

    let config = match &args.config {
        Some(path) => BridgeConfig::from_path(path)?,
        None => BridgeConfig::default(),
    };
    let event_loop = EventLoop::new();
    let loop_thread = event_loop.spawn()?;

    let manager = PipelineManager::builder(Arc::new(GstEngine::new()?))
        .handler(Arc::new(NullHandler))
        .event_loop(event_loop.clone())
        .config(config)
        .build();

    let receiver = manager.create(&ReceiverGraph::new().sink(args.sink).to_string())?;
    manager.start(receiver)?;

    let (finished, drained) = mpsc::channel();
    let relay = Arc::new(Relay {
        manager: manager.clone(),
        receiver,
        packets: AtomicU64::new(0),
        finished: std::sync::Mutex::new(finished),
    });
    let sender_graph = SenderGraph::new(args.source)
        .bitrate(args.bitrate)
        .mtu(args.mtu);
    let sender = manager.create_with_handler(&sender_graph.to_string(), relay.clone())?;
    manager.start(sender)?;
    match args.ssrc {
        Some(ssrc) => manager.set_sync_id(sender, ssrc)?,
        None => info!("Sender ssrc: {:#010x}", manager.sync_id(sender)?),
    }

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    let tick = Duration::from_secs(args.keyframe_interval.unwrap_or(1).max(1));
    let mut ended_early = false;
    while Instant::now() < deadline {
        if drained.recv_timeout(tick).is_ok() {
            ended_early = true;
            break;
        }
        if args.keyframe_interval.is_some() {
            manager.force_keyframe(sender)?;
        }
        let stats = manager.stats(sender)?;
        info!(
            "Relayed {} packets ({} bytes)",
            stats.buffers_delivered, stats.bytes_delivered
        );
    }

    if !ended_early {
        manager.stop(sender)?;
        if drained.recv_timeout(Duration::from_secs(5)).is_err() {
            warn!("Sender did not drain in time");
        }
    }
    info!(
        "Receiver got {} bytes",
        manager.stats(receiver)?.bytes_pushed
    );

    manager.destroy(sender)?;
    manager.destroy(receiver)?;
    event_loop.quit();
    let _ = loop_thread.join();
    Ok(())
}
