//! Offline analysis of a WAV file

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tactus_core::{EngineConfig, NoteEvent, Preset, RhythmEngine, TrackState};
use tracing::info;

/// One JSON line per note event
#[derive(Debug, Serialize)]
pub struct EventLine {
    pub sample: usize,
    pub seconds: f64,
    #[serde(flatten)]
    pub event: NoteEvent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub blocks: usize,
    pub events: usize,
    pub final_bpm: f64,
    pub track_states: Vec<TrackState>,
}

/// Read a WAV file as mono f32. Returns (samples, sample_rate).
pub fn read_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let reader = hound::WavReader::open(path).with_context(|| format!("Failed to open WAV {}", path.display()))?;

    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.into_samples::<f32>().filter_map(|s| s.ok()).collect(),
        hound::SampleFormat::Int => {
            let max_val = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .filter_map(|s| s.ok())
                .map(|s| s as f32 / max_val)
                .collect()
        }
    };

    if samples.is_empty() {
        bail!("WAV file {} is empty", path.display());
    }

    let mono = if channels == 1 {
        samples
    } else {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };
    Ok((mono, spec.sample_rate))
}

/// Run `samples` through a fresh engine, writing each event as a JSON line to `out`
pub fn analyse<W: Write>(
    samples: &[f32],
    sample_rate: u32,
    config: &EngineConfig,
    preset: Preset,
    block_size: usize,
    out: &mut W,
) -> Result<Summary> {
    config.warn_rejected();
    let machine = preset.build(sample_rate as f64, config.tempo)?;
    let mut engine = RhythmEngine::new(sample_rate as f32, config.detector, machine);
    engine.apply_config(config);

    let block_size = block_size.max(1);
    let mut events = 0;
    let mut write_result = Ok(());
    engine.process_buffer(samples, block_size, |start, block_events| {
        for event in block_events {
            if write_result.is_err() {
                return;
            }
            let line = EventLine {
                sample: start,
                seconds: start as f64 / sample_rate as f64,
                event: *event,
            };
            write_result = serde_json::to_writer(&mut *out, &line)
                .map_err(anyhow::Error::from)
                .and_then(|()| writeln!(out).map_err(anyhow::Error::from));
            events += 1;
        }
    });
    write_result.context("Failed to write events")?;

    let summary = Summary {
        blocks: samples.len().div_ceil(block_size),
        events,
        final_bpm: engine.machine().bpm(),
        track_states: engine.machine().states().to_vec(),
    };
    info!(
        blocks = summary.blocks,
        events = summary.events,
        bpm = summary.final_bpm,
        "Offline analysis finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyse_writes_json_lines() {
        let sample_rate = 48000;
        let mut samples = vec![0.0f32; sample_rate as usize];
        for s in &mut samples[24000..24100] {
            *s = 0.9;
        }
        let mut out = Vec::new();
        let summary = analyse(&samples, sample_rate, &EngineConfig::default(), Preset::TriggersOnly, 480, &mut out).unwrap();

        assert_eq!(summary.blocks, 100);
        assert_eq!(summary.events, 2);
        assert!(summary.track_states.is_empty());

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["sample"], 24000);
        assert_eq!(lines[0]["kind"], "note_on");
        assert_eq!(lines[0]["source"]["type"], "onset");
        assert_eq!(lines[1]["kind"], "note_off");
    }

    #[test]
    fn test_read_wav_downmixes_stereo() {
        let path = std::env::temp_dir().join(format!("tactus-read-{}.wav", std::process::id()));
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..10 {
            writer.write_sample(16384i16).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let (mono, rate) = read_wav(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(rate, 44100);
        assert_eq!(mono.len(), 10);
        assert!((mono[0] - 0.25).abs() < 1e-6);
    }
}
