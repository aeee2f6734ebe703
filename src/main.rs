//! pcmflow - streaming PCM delivery engine - Main entry point
//!
//! Plays one remote stream through the default (or named) audio device:
//! spawns the decoder subprocess, wires the reader into the output
//! callback, and runs the watchdog loop until the stream advances.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pcmflow::{AudioOutput, Config, SeekCoordinator, StreamReader};

/// Command-line arguments for pcmflow
#[derive(Parser, Debug)]
#[command(name = "pcmflow")]
#[command(about = "Streaming PCM delivery engine")]
#[command(version)]
struct Args {
    /// Stream URL to play
    #[arg(required_unless_present = "list_devices")]
    url: Option<String>,

    /// Declared stream duration in seconds (0 = unknown)
    #[arg(short = 'd', long, default_value = "0")]
    duration: f64,

    /// Start offset in seconds
    #[arg(short = 's', long, default_value = "0")]
    start: f64,

    /// Configuration file
    #[arg(short, long, env = "PCMFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Decoder binary, overrides the configured path
    #[arg(long, env = "PCMFLOW_DECODER")]
    decoder: Option<String>,

    /// Audio output device name
    #[arg(long)]
    device: Option<String>,

    /// List audio output devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pcmflow=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.list_devices {
        for name in AudioOutput::list_devices().context("Failed to list audio devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::load(path).context("Failed to load configuration")?,
        None => Config::default(),
    };
    if let Some(decoder) = args.decoder {
        config.decoder_path = decoder;
    }

    let url = args.url.as_deref().unwrap_or_default();
    info!("Starting pcmflow for {}", url);

    let reader = StreamReader::open(config.clone(), url, args.duration)
        .context("Failed to open stream")?;

    if args.start > 0.0 {
        let coordinator = SeekCoordinator::new(
            Arc::clone(&reader),
            config.seek_debounce(),
        );
        let frame = (args.start * config.sample_rate as f64) as u64;
        coordinator.pointer_down(frame);
        coordinator.pointer_up(frame);
    }

    let (advance_tx, advance_rx) = crossbeam_channel::bounded(1);
    let output = AudioOutput::new(Arc::clone(&reader), &config, args.device, advance_tx)
        .context("Failed to open audio output")?;
    output.play().context("Failed to start playback")?;

    // Watchdog loop: tick until the stream advances or the process is
    // interrupted
    loop {
        std::thread::sleep(Duration::from_millis(100));
        output.tick();
        if let Ok(reason) = advance_rx.try_recv() {
            info!("Stream finished: {:?}", reason);
            break;
        }
    }

    reader.dispose();
    Ok(())
}
