//! tactus: onset-driven adaptive drum sequencer

mod cli;
mod offline;

use std::io::Write;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use cli::Args;
use crossbeam_channel::RecvTimeoutError;
use tactus_core::{EngineConfig, Preset, TrackConfig};
use tactus_services::{AudioInputService, ConfigStore, RhythmService};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Sample rate used to lay out preset tracks when no device is open
const LAYOUT_SAMPLE_RATE: f64 = 48000.0;
const STATUS_INTERVAL: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tactus_cli=info".parse()?)
                .add_directive("tactus_core=info".parse()?)
                .add_directive("tactus_services=info".parse()?),
        )
        .init();

    let args = Args::parse();

    if args.list_devices {
        let devices = AudioInputService::list_devices()?;
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    let store = match &args.config {
        Some(path) => ConfigStore::new(path),
        None => ConfigStore::default_location(),
    };
    let config = store.load()?;
    let preset = Preset::from(args.preset);

    if args.save_config {
        let resolved = with_preset_tracks(config, preset)?;
        store.save(&resolved)?;
        println!("{}", store.path().display());
        return Ok(());
    }

    if let Some(path) = &args.wav {
        let (samples, sample_rate) = offline::read_wav(path)?;
        info!(path = %path.display(), sample_rate, samples = samples.len(), "Analysing WAV");
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let summary = offline::analyse(&samples, sample_rate, &config, preset, args.block_size, &mut out)?;
        out.flush()?;
        info!(states = ?summary.track_states, "Final track states");
        return Ok(());
    }

    run_live(&args, config, preset)
}

/// Fill in the preset's own track layout when the config names none
fn with_preset_tracks(mut config: EngineConfig, preset: Preset) -> Result<EngineConfig> {
    if config.tracks.is_empty() {
        let machine = preset.build(LAYOUT_SAMPLE_RATE, config.tempo)?;
        config.tracks = machine.tracks().iter().map(TrackConfig::from_track).collect();
    }
    Ok(config)
}

fn run_live(args: &Args, config: EngineConfig, preset: Preset) -> Result<()> {
    let mut service = RhythmService::start(&args.device, config, preset, args.block_size)
        .with_context(|| format!("Failed to start input '{}'", args.device))?;
    let monitor = service.monitor();
    let started = Instant::now();
    let deadline = args.seconds.map(Duration::from_secs_f64);
    let mut last_status = Instant::now();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    loop {
        if deadline.is_some_and(|d| started.elapsed() >= d) {
            break;
        }
        match service.events().recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                let seconds = started.elapsed().as_secs_f64();
                let line = offline::EventLine {
                    sample: (seconds * service.sample_rate() as f64) as usize,
                    seconds,
                    event,
                };
                serde_json::to_writer(&mut out, &line)?;
                writeln!(out)?;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if last_status.elapsed() >= STATUS_INTERVAL {
            last_status = Instant::now();
            info!(
                bpm = monitor.bpm(),
                density = monitor.density(),
                amplitude = monitor.mean_amplitude(),
                onsets = monitor.onset_count(),
                releases = monitor.release_count(),
                dropped = monitor.dropped_events(),
                states = ?monitor.track_states(),
                "Status"
            );
        }
    }

    service.stop();
    out.flush()?;
    Ok(())
}
