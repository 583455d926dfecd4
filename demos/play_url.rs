//! Stream a remote track through the default audio device.
//!
//! ```text
//! cargo run --example play_url -- https://example.com/song.mp3 --volume 0.5
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chunkstream::config::ConfigManager;
use chunkstream::{ChunkedPlayer, PlayerError, PlayerEvent, StreamLogger, TrackMetadata};
use clap::Parser;
use log::warn;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser, Debug)]
#[command(name = "play_url")]
#[command(about = "Chunked streaming playback of a single URL")]
struct Args {
    /// Track URL (http or https)
    url: String,

    /// Exact duration in seconds, skipping the size-based estimate
    #[arg(long)]
    duration: Option<f64>,

    /// Start volume (0.0 - 1.0)
    #[arg(long)]
    volume: Option<f32>,

    /// Output device name
    #[arg(long)]
    device: Option<String>,

    /// Seconds per chunk
    #[arg(long)]
    chunk_duration: Option<f64>,

    /// Start position in seconds
    #[arg(long)]
    start: Option<f64>,

    /// Read settings from this TOML file instead of ~/.config/chunkstream
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    if std::env::var("CHUNKSTREAM_LOG_LEVEL").is_err() {
        std::env::set_var("CHUNKSTREAM_LOG_LEVEL", "warn");
    }
    if let Err(e) = StreamLogger::init() {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e.user_message());
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), PlayerError> {
    let manager = match &args.config {
        Some(path) => ConfigManager::with_path(path.clone())?,
        None => ConfigManager::new()?,
    };
    let mut config = manager.get_config().clone();
    if let Some(volume) = args.volume {
        config.initial_volume = volume;
    }
    if let Some(chunk_duration) = args.chunk_duration {
        config.chunk_duration = chunk_duration;
    }
    if args.device.is_some() {
        config.preferred_device = args.device.clone();
    }

    let player = ChunkedPlayer::with_default_output(config)?;
    let mut events = player.subscribe();

    let metadata = args.duration.map(TrackMetadata::with_duration);
    let info = player.load_track(&args.url, metadata).await?;
    println!(
        "Loaded {} ({:.0}s in {} chunks)",
        info.display_name(),
        info.layout.duration,
        info.layout.total_chunks
    );

    if let Some(start) = args.start {
        player.seek(start).await?;
    }
    player.play().await?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!("\nReceived interrupt signal. Stopping playback...");
        shutdown_flag.store(true, Ordering::Relaxed);
    }) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }

    let mut poll = tokio::time::interval(Duration::from_millis(200));
    loop {
        tokio::select! {
            _ = poll.tick() => {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(PlayerEvent::BufferHealth { health, chunks_ahead }) => {
                    let snapshot = player.snapshot();
                    println!(
                        "{} / {:.0}s  chunk {}/{}  buffer {}% ({} ahead)",
                        snapshot.position_formatted(),
                        snapshot.duration,
                        snapshot.current_chunk + 1,
                        snapshot.total_chunks,
                        health,
                        chunks_ahead
                    );
                }
                Ok(PlayerEvent::PerformanceStats(stats)) => {
                    println!(
                        "loaded {} chunks, avg {:.0}ms, {:.2} MB resident",
                        stats.counters.chunks_loaded,
                        stats.counters.average_load_time_ms,
                        stats.memory_usage.mb
                    );
                }
                Ok(PlayerEvent::ChunkError { chunk_index, error }) => {
                    eprintln!("chunk {} failed: {}", chunk_index, error);
                }
                Ok(PlayerEvent::Ended) => {
                    println!("Playback finished");
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    player.close();
    Ok(())
}
