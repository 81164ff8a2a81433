//! kplay - interactive WAV player
//!
//! Plays one WAV file with live balance, volume, pitch and tempo control
//! from single-key commands.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kplay_audio::{AudioEngine, PcmSource, StageRegistry, TopologyBuilder};
use kplay_comms::{ControlEvent, EVENT_QUEUE_CAPACITY, create_event_queue};
use kplay_control::{ConsoleStatus, ControlActor, Mode, QueueListener, RawModeGuard, keyboard};

use crate::config::Settings;

/// Interactive WAV player
#[derive(Parser, Debug)]
#[command(name = "kplay", version)]
#[command(about = "Play a WAV file with real-time balance, volume, pitch and tempo control", long_about = None)]
struct Args {
    /// Output: device (default, portaudio, alsa, tinyalsa), stdout (-), null, or a file path
    #[arg(short, long)]
    output: Option<String>,

    /// Also record the rendered stream to this file
    #[arg(short = 's', long)]
    record: Option<PathBuf>,

    /// Playback mode: normal, repeat or non-interactive (once)
    #[arg(short, long)]
    mode: Option<Mode>,

    /// Initial master volume (0.0-1.0, 0 starts muted)
    #[arg(short, long, allow_hyphen_values = true)]
    volume: Option<String>,

    /// Initial pitch ratio (0.1-100)
    #[arg(short, long, allow_hyphen_values = true)]
    pitch: Option<String>,

    /// Initial tempo ratio (0.1-30)
    #[arg(short, long, allow_hyphen_values = true)]
    tempo: Option<String>,

    /// No key help and no status line
    #[arg(short, long)]
    quiet: bool,

    /// RON settings file; command-line values take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// WAV file to play
    wavfile: PathBuf,
}

impl Args {
    fn settings(&self) -> Settings {
        Settings {
            output: self.output.clone(),
            record: self.record.clone(),
            mode: self.mode,
            volume: number("volume", self.volume.as_deref()),
            pitch: number("pitch", self.pitch.as_deref()),
            tempo: number("tempo", self.tempo.as_deref()),
            quiet: self.quiet.then_some(true),
        }
    }
}

fn number(name: &str, raw: Option<&str>) -> Option<f32> {
    raw.and_then(|raw| config::parse_number(name, raw))
}

fn main() -> Result<()> {
    // Logs go to stderr; stdout may be carrying audio
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kplay=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    play(&args)
}

fn play(args: &Args) -> Result<()> {
    let file_settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let config = args.settings().or(file_settings).resolve()?;
    tracing::debug!("Configuration: {:?}", config);

    let (events, inbox) = create_event_queue(EVENT_QUEUE_CAPACITY);

    let progress_events = events.clone();
    let source = PcmSource::open(&args.wavfile)
        .with_context(|| format!("Failed to open {}", args.wavfile.display()))?
        .with_progress_observer(move |progress| {
            // Dropped when the queue is full; the next block reports again
            let _ = progress_events.try_send(ControlEvent::Progress(progress));
        });
    let source = Arc::new(source);

    let registry = StageRegistry::with_builtins();
    let topology = TopologyBuilder::new(&registry)
        .build(
            source.header(),
            source.clone(),
            &config.output,
            config.record.as_deref(),
        )
        .context("Failed to build playback graph")?;
    let channels = topology.handles.channels;

    let engine = AudioEngine::spawn(topology.graph, QueueListener::new(events.clone()))
        .context("Failed to start audio engine")?;

    let status = ConsoleStatus::new(channels, config.quiet);
    status.print_help();

    let raw_mode = RawModeGuard::enable().context("Failed to configure terminal")?;
    keyboard::spawn_reader(events, raw_mode.is_enabled())
        .context("Failed to start keyboard reader")?;

    let actor = ControlActor::new(
        config.state,
        topology.handles,
        engine,
        source,
        inbox,
        Box::new(status),
    );
    let result = actor.run();

    drop(raw_mode);
    ConsoleStatus::new(channels, config.quiet).finish();

    let state = result?;
    tracing::info!("Session ended: {:?}", state);
    Ok(())
}
