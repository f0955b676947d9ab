//! Per-block pipeline tying the detector to the state machine

use tracing::info;

use crate::clock::TempoSettings;
use crate::config::{EngineConfig, TrackConfig};
use crate::detector::{DetectorSettings, OnsetDetector};
use crate::events::{EventBuffer, NoteEvent};
use crate::predicate::BlockContext;
use crate::state_machine::{ONSET_TRIGGER_SLOTS, RELEASE_TRIGGER_SLOTS, StateMachine};

/// Detector plus state machine, driven one audio block at a time
pub struct RhythmEngine {
    detector: OnsetDetector,
    machine: StateMachine,
    events: EventBuffer,
    /// Tempo of the last applied config, so unchanged snapshots leave adaptation alone
    applied_bpm: f64,
}

impl RhythmEngine {
    pub fn new(sample_rate: f32, detector: DetectorSettings, mut machine: StateMachine) -> Self {
        // Worst case per block: every trigger slot and every track fires, each as on + off
        let capacity = 2 * (ONSET_TRIGGER_SLOTS + RELEASE_TRIGGER_SLOTS + machine.track_count());
        machine.set_sample_rate(sample_rate as f64);
        info!(
            sample_rate,
            tracks = machine.track_count(),
            bpm = machine.bpm(),
            "Rhythm engine ready"
        );
        Self {
            detector: OnsetDetector::new(sample_rate, detector),
            applied_bpm: machine.bpm(),
            machine,
            events: EventBuffer::with_capacity(capacity),
        }
    }

    /// Apply a configuration snapshot. Never allocates.
    ///
    /// Rejected fields keep the value already in place. Tempo is only written
    /// when the snapshot's tempo differs from the last applied one, so resending
    /// a config does not undo tempo adaptation.
    pub fn apply_config(&mut self, config: &EngineConfig) {
        self.detector.apply_settings(&config.detector);

        self.machine.set_adaptation(&config.tempo);
        if config.tempo.bpm.is_finite() && config.tempo.bpm != self.applied_bpm {
            self.machine.set_tempo(config.tempo.bpm);
            self.applied_bpm = config.tempo.bpm;
        }

        for (index, track) in config.tracks.iter().enumerate().take(self.machine.track_count()) {
            self.machine.with_track_mut(index, |t| track.apply_to(t));
        }
    }

    /// Run one block of mono audio and return the notes it produced
    pub fn process_block(&mut self, samples: &[f32]) -> &[NoteEvent] {
        self.events.clear();
        if samples.is_empty() {
            return self.events.as_slice();
        }

        self.detector.ingest(samples);
        let detection = self.detector.detect();

        let ctx = BlockContext::new(&self.detector, self.machine.beat_position());
        self.machine.update(&ctx, samples.len());
        self.detector.set_beat_position(self.machine.beat_position());

        self.machine.emit_triggers(detection, &mut self.events);
        self.machine.poll_tracks(&mut self.events);
        self.events.as_slice()
    }

    /// Run a whole buffer in fixed-size blocks, handing each block's start sample and events to `sink`
    pub fn process_buffer<F>(&mut self, samples: &[f32], block_size: usize, mut sink: F)
    where
        F: FnMut(usize, &[NoteEvent]),
    {
        let block_size = block_size.max(1);
        for (i, block) in samples.chunks(block_size).enumerate() {
            let events = self.process_block(block);
            if !events.is_empty() {
                sink(i * block_size, events);
            }
        }
    }

    /// Snapshot of the current settings, for saving or editing on the control side
    pub fn current_config(&self) -> EngineConfig {
        let adapter = self.machine.adapter();
        EngineConfig {
            detector: *self.detector.settings(),
            tempo: TempoSettings {
                bpm: self.machine.bpm(),
                adapt_enabled: adapter.enabled,
                adaptation_speed: adapter.speed,
                adaptation_bias: adapter.bias,
            },
            tracks: self.machine.tracks().iter().map(TrackConfig::from_track).collect(),
        }
    }

    pub fn detector(&self) -> &OnsetDetector {
        &self.detector
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut StateMachine {
        &mut self.machine
    }

    /// Events dropped in the last block because the buffer was full
    pub fn dropped_events(&self) -> usize {
        self.events.dropped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventSource, NoteKind};
    use crate::track::{SequenceTrack, TrackNote};

    const SAMPLE_RATE: f32 = 48000.0;

    fn engine_with_track(state_on: bool) -> RhythmEngine {
        let tempo = TempoSettings { bpm: 120.0, ..Default::default() };
        let mut builder = StateMachine::builder(SAMPLE_RATE as f64, tempo);
        let track = SequenceTrack::new(TrackNote { note: 42, velocity: 90 }, 1, 4).with_pattern("1010");
        if state_on {
            builder.track_with_state(track, crate::state_machine::TrackState::On);
        } else {
            builder.track(track);
        }
        RhythmEngine::new(SAMPLE_RATE, DetectorSettings::default(), builder.build().unwrap())
    }

    #[test]
    fn test_onset_emits_trigger_note() {
        let mut engine = engine_with_track(false);
        let silence = vec![0.0; 480];
        for _ in 0..50 {
            assert!(engine.process_block(&silence).is_empty());
        }
        let hit = vec![0.9; 480];
        let events = engine.process_block(&hit).to_vec();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].source, EventSource::Onset(0));
        assert_eq!(events[0].note, 36);
        assert_eq!(events[0].kind, NoteKind::NoteOn);
        assert_eq!(events[1].kind, NoteKind::NoteOff);
    }

    #[test]
    fn test_sounding_track_plays_pattern() {
        let mut engine = engine_with_track(true);
        let silence = vec![0.0; 480];
        let mut notes = 0;
        // Just under one beat at 120 BPM (50 blocks of 480)
        for _ in 0..45 {
            notes += engine
                .process_block(&silence)
                .iter()
                .filter(|e| e.source == EventSource::Track(0) && e.kind == NoteKind::NoteOn)
                .count();
        }
        // Pattern 1010 hits steps 0 and 2 once each
        assert_eq!(notes, 2);
    }

    #[test]
    fn test_process_buffer_reports_block_offsets() {
        let mut engine = engine_with_track(false);
        let mut samples = vec![0.0; 48000];
        for s in &mut samples[24000..24200] {
            *s = 0.9;
        }
        let mut offsets = Vec::new();
        engine.process_buffer(&samples, 480, |start, events| {
            if events.iter().any(|e| matches!(e.source, EventSource::Onset(_))) {
                offsets.push(start);
            }
        });
        assert_eq!(offsets, vec![24000]);
    }

    #[test]
    fn test_unchanged_tempo_in_snapshot_keeps_adapted_tempo() {
        let mut engine = engine_with_track(false);
        let mut config = engine.current_config();
        engine.apply_config(&config);
        assert_eq!(engine.machine().bpm(), 120.0);

        // Simulate adaptation drifting the clock
        engine.machine_mut().set_tempo(118.0);
        engine.apply_config(&config);
        assert_eq!(engine.machine().bpm(), 118.0);

        config.tempo.bpm = 100.0;
        engine.apply_config(&config);
        assert_eq!(engine.machine().bpm(), 100.0);
    }

    #[test]
    fn test_config_updates_tracks_and_detector() {
        let mut engine = engine_with_track(false);
        let mut config = engine.current_config();
        config.detector.onset_threshold = 5.0;
        config.tracks[0].pattern = "0001".to_string();
        config.tracks[0].num_beats = 2;
        engine.apply_config(&config);

        assert_eq!(engine.detector().settings().onset_threshold, 5.0);
        let track = engine.machine().track(0).unwrap();
        assert_eq!(track.pattern_string(), "00010000");
    }

    #[test]
    fn test_rejected_values_keep_previous_settings() {
        let mut engine = engine_with_track(false);
        let mut config = engine.current_config();
        config.detector.on_beat_bias = 0.25;
        config.tempo.adaptation_bias = 0.5;
        engine.apply_config(&config);

        config.detector.on_beat_bias = 1.5;
        config.detector.min_inter_event_gap = -1.0;
        config.tempo.adaptation_bias = 3.0;
        config.tempo.bpm = f64::NAN;
        config.tracks[0].num_divisions = 0;
        engine.apply_config(&config);

        let settings = engine.detector().settings();
        assert_eq!(settings.on_beat_bias, 0.25);
        assert_eq!(settings.min_inter_event_gap, 0.2);
        assert_eq!(engine.machine().adapter().bias, 0.5);
        assert_eq!(engine.machine().bpm(), 120.0);
        assert_eq!(engine.machine().track(0).map(|t| t.num_divisions()), Some(4));
    }
}
