//! Lock-free engine state for display threads

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

use tactus_core::{RhythmEngine, TrackState};

/// Shared engine state, written by the audio thread and read anywhere
pub struct EngineMonitor {
    bpm_raw: AtomicU64,
    beat_raw: AtomicU64,
    density_raw: AtomicU32,
    mean_amplitude_raw: AtomicU32,
    onset: AtomicBool,
    release: AtomicBool,
    onsets: AtomicU64,
    releases: AtomicU64,
    blocks: AtomicU64,
    dropped_events: AtomicU64,
    track_states: Box<[AtomicU8]>,
}

impl EngineMonitor {
    pub fn new(track_count: usize) -> Self {
        Self {
            bpm_raw: AtomicU64::new(0),
            beat_raw: AtomicU64::new(0),
            density_raw: AtomicU32::new(0),
            mean_amplitude_raw: AtomicU32::new(0),
            onset: AtomicBool::new(false),
            release: AtomicBool::new(false),
            onsets: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            blocks: AtomicU64::new(0),
            dropped_events: AtomicU64::new(0),
            track_states: (0..track_count).map(|_| AtomicU8::new(TrackState::Off.as_u8())).collect(),
        }
    }

    pub fn bpm(&self) -> f64 {
        f64::from_bits(self.bpm_raw.load(Ordering::Relaxed))
    }

    pub fn beat_position(&self) -> f64 {
        f64::from_bits(self.beat_raw.load(Ordering::Relaxed))
    }

    pub fn density(&self) -> f32 {
        f32::from_bits(self.density_raw.load(Ordering::Relaxed))
    }

    pub fn mean_amplitude(&self) -> f32 {
        f32::from_bits(self.mean_amplitude_raw.load(Ordering::Relaxed))
    }

    /// Whether the last block detected an onset
    pub fn onset(&self) -> bool {
        self.onset.load(Ordering::Relaxed)
    }

    /// Whether the last block detected a release
    pub fn release(&self) -> bool {
        self.release.load(Ordering::Relaxed)
    }

    pub fn onset_count(&self) -> u64 {
        self.onsets.load(Ordering::Relaxed)
    }

    pub fn release_count(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }

    pub fn blocks_processed(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    pub fn track_count(&self) -> usize {
        self.track_states.len()
    }

    pub fn track_state(&self, index: usize) -> Option<TrackState> {
        self.track_states
            .get(index)
            .map(|s| TrackState::from_u8(s.load(Ordering::Relaxed)))
    }

    pub fn track_states(&self) -> Vec<TrackState> {
        (0..self.track_count()).filter_map(|i| self.track_state(i)).collect()
    }

    /// Publish the engine's state after a block. Never allocates.
    pub fn publish(&self, engine: &RhythmEngine) {
        let detector = engine.detector();
        let machine = engine.machine();
        let detection = detector.detection();

        self.bpm_raw.store(machine.bpm().to_bits(), Ordering::Relaxed);
        self.beat_raw.store(machine.beat_position().to_bits(), Ordering::Relaxed);
        self.density_raw.store(detector.density().to_bits(), Ordering::Relaxed);
        self.mean_amplitude_raw
            .store(detector.mean_amplitude().to_bits(), Ordering::Relaxed);
        self.onset.store(detection.onset, Ordering::Relaxed);
        self.release.store(detection.release, Ordering::Relaxed);
        if detection.onset {
            self.onsets.fetch_add(1, Ordering::Relaxed);
        }
        if detection.release {
            self.releases.fetch_add(1, Ordering::Relaxed);
        }
        self.blocks.fetch_add(1, Ordering::Relaxed);
        self.dropped_events
            .fetch_add(engine.dropped_events() as u64, Ordering::Relaxed);

        for (slot, state) in self.track_states.iter().zip(machine.states()) {
            slot.store(state.as_u8(), Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tactus_core::{DetectorSettings, Preset, TempoSettings};

    #[test]
    fn test_publish_mirrors_engine() {
        let machine = Preset::DrumMesh.build(48000.0, TempoSettings::default()).unwrap();
        let mut engine = RhythmEngine::new(48000.0, DetectorSettings::default(), machine);
        let monitor = EngineMonitor::new(engine.machine().track_count());

        engine.process_block(&[0.0; 480]);
        monitor.publish(&engine);

        assert_eq!(monitor.blocks_processed(), 1);
        assert_eq!(monitor.bpm(), engine.machine().bpm());
        assert_eq!(monitor.beat_position(), engine.machine().beat_position());
        assert_eq!(monitor.track_states(), engine.machine().states().to_vec());
        assert_eq!(monitor.track_state(3), Some(TrackState::On));
        assert!(!monitor.onset());
    }
}
