//! Live rhythm service: input stream in, note events out

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, bounded};
use tactus_core::{EngineConfig, NoteEvent, Preset, RhythmEngine, TactusError};
use thiserror::Error;
use tracing::info;

use crate::audio_input::{AudioInputError, AudioInputService, InputStreamHandle};
use crate::monitor::EngineMonitor;
use crate::snapshot::{SnapshotReader, SnapshotWriter, snapshot_channel};

/// Note events buffered for the consumer before new ones are dropped
const EVENT_QUEUE: usize = 1024;
pub const DEFAULT_BLOCK_SIZE: usize = 512;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Input error: {0}")]
    Input(#[from] AudioInputError),
    #[error("Engine setup failed: {0}")]
    Engine(#[from] TactusError),
    #[error("Engine is no longer running")]
    Stopped,
}

/// Audio-thread side of the service: downmix, run blocks, publish results
///
/// Everything it needs is allocated up front so `process` never allocates.
pub struct EngineProcessor {
    engine: RhythmEngine,
    reader: SnapshotReader,
    monitor: Arc<EngineMonitor>,
    events: Sender<NoteEvent>,
    channels: usize,
    block_size: usize,
    mono: Vec<f32>,
}

impl EngineProcessor {
    pub fn new(
        engine: RhythmEngine,
        reader: SnapshotReader,
        monitor: Arc<EngineMonitor>,
        events: Sender<NoteEvent>,
        channels: u16,
        block_size: usize,
    ) -> Self {
        let block_size = block_size.max(1);
        Self {
            engine,
            reader,
            monitor,
            events,
            channels: channels.max(1) as usize,
            block_size,
            mono: Vec::with_capacity(block_size),
        }
    }

    /// Process interleaved input, one engine block per `block_size` frames
    pub fn process(&mut self, interleaved: &[f32]) {
        let channels = self.channels;
        for frames in interleaved.chunks(self.block_size * channels) {
            self.mono.clear();
            self.mono
                .extend(frames.chunks(channels).map(|frame| frame.iter().sum::<f32>() / channels as f32));

            if let Some(config) = self.reader.poll() {
                self.engine.apply_config(config);
            }
            for event in self.engine.process_block(&self.mono) {
                // Full queue means the consumer is behind; drop rather than block
                let _ = self.events.try_send(*event);
            }
            self.monitor.publish(&self.engine);
        }
    }

    pub fn engine(&self) -> &RhythmEngine {
        &self.engine
    }
}

/// A running engine fed by a live input device
pub struct RhythmService {
    handle: Option<InputStreamHandle>,
    writer: SnapshotWriter,
    monitor: Arc<EngineMonitor>,
    events: Receiver<NoteEvent>,
    device_name: String,
    sample_rate: u32,
}

impl RhythmService {
    /// Open `device_id`, build the preset at the device's sample rate and start streaming
    pub fn start(device_id: &str, config: EngineConfig, preset: Preset, block_size: usize) -> Result<Self, ServiceError> {
        let input = AudioInputService::open(device_id)?;
        let sample_rate = input.sample_rate();
        let channels = input.channels();
        let device_name = input.name().to_string();

        config.warn_rejected();
        let machine = preset.build(sample_rate as f64, config.tempo)?;
        let mut engine = RhythmEngine::new(sample_rate as f32, config.detector, machine);
        engine.apply_config(&config);

        let monitor = Arc::new(EngineMonitor::new(engine.machine().track_count()));
        let (writer, reader) = snapshot_channel(config);
        let (events_tx, events_rx) = bounded(EVENT_QUEUE);
        let mut processor = EngineProcessor::new(engine, reader, monitor.clone(), events_tx, channels, block_size);

        let handle = AudioInputService::start_stream(input, move |data| processor.process(data))?;

        info!(
            device = %device_name,
            sample_rate,
            channels,
            block_size,
            preset = preset.name(),
            "Rhythm service started"
        );

        Ok(Self {
            handle: Some(handle),
            writer,
            monitor,
            events: events_rx,
            device_name,
            sample_rate,
        })
    }

    /// Hand a new configuration to the audio thread
    pub fn update_config(&self, config: &EngineConfig) -> Result<(), ServiceError> {
        if self.handle.is_none() || !self.writer.publish(config) {
            return Err(ServiceError::Stopped);
        }
        info!(bpm = config.tempo.bpm, tracks = config.tracks.len(), "Config published");
        Ok(())
    }

    pub fn monitor(&self) -> Arc<EngineMonitor> {
        self.monitor.clone()
    }

    /// Note events in the order the engine produced them
    pub fn events(&self) -> &Receiver<NoteEvent> {
        &self.events
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop();
            self.writer.collect_retired();
            info!(blocks = self.monitor.blocks_processed(), "Rhythm service stopped");
        }
    }
}

impl Drop for RhythmService {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tactus_core::{DetectorSettings, EventSource, TempoSettings};

    fn processor(channels: u16, block_size: usize) -> (EngineProcessor, SnapshotWriter, Receiver<NoteEvent>) {
        let machine = Preset::TriggersOnly.build(48000.0, TempoSettings::default()).unwrap();
        let engine = RhythmEngine::new(48000.0, DetectorSettings::default(), machine);
        let monitor = Arc::new(EngineMonitor::new(0));
        let (writer, reader) = snapshot_channel(engine.current_config());
        let (tx, rx) = bounded(64);
        (EngineProcessor::new(engine, reader, monitor, tx, channels, block_size), writer, rx)
    }

    #[test]
    fn test_host_buffer_split_into_blocks() {
        let (mut p, _writer, _rx) = processor(2, 480);
        // 1200 stereo frames: two full blocks and a partial one
        p.process(&vec![0.0; 2400]);
        assert_eq!(p.monitor.blocks_processed(), 3);
    }

    #[test]
    fn test_stereo_downmix_triggers_onset_event() {
        let (mut p, _writer, rx) = processor(2, 480);
        p.process(&vec![0.0; 2 * 480 * 30]);
        // Loud left channel only
        let hit: Vec<f32> = (0..960).map(|i| if i % 2 == 0 { 1.0 } else { 0.0 }).collect();
        p.process(&hit);

        let events: Vec<NoteEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].source, EventSource::Onset(0));
        assert_eq!(p.monitor.onset_count(), 1);
    }

    #[test]
    fn test_out_of_range_bias_keeps_previous_value() {
        let (mut p, writer, _rx) = processor(1, 256);
        let mut config = p.engine().current_config();
        config.detector.on_beat_bias = 0.25;
        assert!(writer.publish(&config));
        p.process(&[0.0; 256]);

        config.detector.on_beat_bias = 1.5;
        assert!(writer.publish(&config));
        p.process(&[0.0; 256]);
        assert_eq!(p.engine().detector().settings().on_beat_bias, 0.25);
    }

    #[test]
    fn test_published_config_applies_at_next_block() {
        let (mut p, writer, _rx) = processor(1, 256);
        let mut config = p.engine().current_config();
        config.tempo.bpm = 140.0;
        config.detector.onset_threshold = 6.0;
        assert!(writer.publish(&config));

        p.process(&[0.0; 256]);
        assert_eq!(p.engine().machine().bpm(), 140.0);
        assert_eq!(p.engine().detector().settings().onset_threshold, 6.0);
        assert_eq!(p.monitor.bpm(), 140.0);
    }
}
