mod sim_fetcher;
mod sim_sink;

use std::sync::Arc;
use std::time::Instant;

use abr_core::config::Config;
use abr_core::events::{CoreEvent, EventSubscriber};
use abr_core::model::{Representation, SegmentIndex, SegmentReference};
use abr_core::pipeline::SinkKind;
use abr_core::CoreSession;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::sim_fetcher::SimFetcher;
use crate::sim_sink::SimSink;

/// Drives the ABR core against a scripted network/sink simulation and
/// prints the quality decisions it makes.
#[derive(Parser, Debug)]
#[command(name = "abr-sim", version, about)]
struct Args {
    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease log verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    quiet: u8,

    /// Starting link bandwidth, in bits/s.
    #[arg(long, default_value_t = 5_000_000)]
    bandwidth_bps: u64,

    /// Number of scheduler ticks to simulate.
    #[arg(long, default_value_t = 20)]
    ticks: u32,
}

struct PrintingSubscriber;

impl EventSubscriber for PrintingSubscriber {
    fn on_event(&mut self, event: &CoreEvent) {
        match event {
            CoreEvent::VideoBitrateChanged { representation, switch_reason } => {
                tracing::info!(bitrate = representation.bitrate, reason = ?switch_reason, "video bitrate changed");
            }
            CoreEvent::BufferTargetChanged { new_buffer_target } => {
                tracing::info!(new_buffer_target, "buffer target changed");
            }
            other => tracing::debug!(?other, "core event"),
        }
    }
}

fn init_tracing(verbose: u8, quiet: u8) {
    let level = match verbose as i16 - quiet as i16 {
        i16::MIN..=-1 => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
}

const SEGMENT_DURATION: f64 = 4.0;
const SEGMENT_COUNT: u64 = 60;

fn build_ladder() -> Vec<Arc<Representation>> {
    let bitrates = [400_000u64, 1_000_000, 3_000_000, 6_000_000];
    bitrates
        .iter()
        .map(|&bitrate| {
            let segments = (0..SEGMENT_COUNT)
                .map(|n| SegmentReference::new(n, n as f64 * SEGMENT_DURATION, (n + 1) as f64 * SEGMENT_DURATION))
                .collect();
            Arc::new(Representation::new(
                format!("r{bitrate}"),
                bitrate,
                "avc1.64001f",
                SegmentIndex::new(segments),
                None,
            ))
        })
        .collect()
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.verbose, args.quiet);

    let mut session = CoreSession::new(Config::default(), SinkKind::Standard, Instant::now());
    session.subscribe(Box::new(PrintingSubscriber));

    let now = Instant::now();
    session.on_representations_changed(build_ladder(), Vec::new(), now);

    let mut video_sink = SimSink::new(SEGMENT_DURATION);
    let mut audio_sink = SimSink::new(SEGMENT_DURATION);
    let video_fetcher = SimFetcher::new(args.bandwidth_bps, 500_000);
    let audio_fetcher = SimFetcher::new(args.bandwidth_bps, 500_000);
    let stream_end = SEGMENT_COUNT as f64 * SEGMENT_DURATION;

    // This demo has no real playback clock: the playhead stays at the
    // start while the pipeline fills the buffer ahead of it.
    let playhead = 0.0;
    for tick in 0..args.ticks {
        let now = Instant::now();
        let outcome = session
            .tick(
                &mut video_sink,
                &mut audio_sink,
                &video_fetcher,
                &audio_fetcher,
                now,
                playhead,
                false,
                false,
                false,
                stream_end,
                0,
                0,
                "video/mp4",
                "avc1.64001f",
            )
            .await
            .expect("tick failed");

        if outcome.quality_changed {
            tracing::info!(tick, "quality decision applied");
        }
        tracing::debug!(
            tick,
            buffer_level = outcome.buffer_level,
            stall = outcome.stall_confirmed,
            interval = ?session.scheduler.current_interval(),
            "tick complete"
        );
    }
}
