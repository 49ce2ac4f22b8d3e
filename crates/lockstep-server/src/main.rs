//! Lockstep server binary.
//!
//! Serves the demo arena game.
//!
//! # Usage
//!
//! ```bash
//! # Default cadence (33 ms), unbounded history pruned by acknowledgements
//! lockstep-server --bind 0.0.0.0:4433
//!
//! # 60 Hz, keep at most 256 frames
//! lockstep-server --tick-ms 16 --max-frames 256
//! ```

use std::{num::NonZeroUsize, time::Duration};

use clap::Parser;
use lockstep_core::{Retention, SimulationConfig};
use lockstep_server::{Server, ServerRuntimeConfig, demo::Arena};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Lockstep session server
#[derive(Parser, Debug)]
#[command(name = "lockstep-server")]
#[command(about = "Frame-stepped lockstep session server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// Milliseconds between two simulation ticks
    #[arg(long, default_value = "33")]
    tick_ms: u64,

    /// Maximum number of retained frames (unbounded if omitted or zero)
    #[arg(long)]
    max_frames: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let retention =
        args.max_frames.and_then(NonZeroUsize::new).map_or(Retention::Unbounded, Retention::Frames);

    tracing::info!(bind = %args.bind, tick_ms = args.tick_ms, ?retention, "server starting");

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        simulation: SimulationConfig {
            tick_interval: Duration::from_millis(args.tick_ms),
            retention,
        },
    };

    let server = Server::bind(config, Arena).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}
