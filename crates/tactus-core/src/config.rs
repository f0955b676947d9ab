//! Engine configuration snapshot
//!
//! An [`EngineConfig`] is built on the control side and handed to the audio
//! thread whole. Applying one never allocates; a field the engine cannot use
//! is skipped and the value already in place is kept.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock::{MAX_TEMPO, MIN_TEMPO, TempoSettings};
use crate::detector::DetectorSettings;
use crate::error::{Result, TactusError};
use crate::track::{MAX_STEPS, SequenceTrack, TrackNote};

/// Per-track settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    /// Steps as a `0`/`1` string
    pub pattern: String,
    pub num_beats: u32,
    pub num_divisions: u32,
    pub midi_note: u8,
    pub midi_velocity: u8,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            pattern: "1000".to_string(),
            num_beats: 1,
            num_divisions: 4,
            midi_note: 36,
            midi_velocity: 100,
        }
    }
}

impl TrackConfig {
    pub fn from_track(track: &SequenceTrack) -> Self {
        let note = track.note();
        Self {
            pattern: track.pattern_string(),
            num_beats: track.num_beats(),
            num_divisions: track.num_divisions(),
            midi_note: note.note,
            midi_velocity: note.velocity,
        }
    }

    pub fn note(&self) -> TrackNote {
        TrackNote {
            note: self.midi_note,
            velocity: self.midi_velocity,
        }
    }

    /// Write these settings into a track. Sizes go first so the pattern lands on the new length.
    pub fn apply_to(&self, track: &mut SequenceTrack) {
        track.set_num_beats(self.num_beats);
        track.set_num_divisions(self.num_divisions);
        track.set_pattern_str(&self.pattern);
        track.set_note(self.note());
    }

    fn validate(&self, index: usize) -> Result<()> {
        let steps = self.num_beats as usize * self.num_divisions as usize;
        if self.num_beats == 0 || self.num_divisions == 0 || steps > MAX_STEPS {
            return Err(TactusError::InvalidConfig(format!(
                "track {index}: {} beats x {} divisions must give 1 to {MAX_STEPS} steps",
                self.num_beats, self.num_divisions
            )));
        }
        if self.midi_note > 127 || self.midi_velocity > 127 {
            return Err(TactusError::InvalidConfig(format!(
                "track {index}: note {} / velocity {} outside MIDI range",
                self.midi_note, self.midi_velocity
            )));
        }
        Ok(())
    }
}

/// Everything the control side can change while the engine runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub detector: DetectorSettings,
    pub tempo: TempoSettings,
    pub tracks: Vec<TrackConfig>,
}

impl EngineConfig {
    /// Check every field, reporting the first problem found
    pub fn validate(&self) -> Result<()> {
        let invalid = self.detector.invalid_fields();
        if !invalid.is_empty() {
            return Err(TactusError::InvalidConfig(format!("detector: {}", invalid.join(", "))));
        }
        if !(self.tempo.bpm.is_finite() && (MIN_TEMPO..=MAX_TEMPO).contains(&self.tempo.bpm)) {
            return Err(TactusError::InvalidConfig(format!(
                "tempo: {} BPM outside {MIN_TEMPO}..={MAX_TEMPO}",
                self.tempo.bpm
            )));
        }
        if !(self.tempo.adaptation_speed.is_finite() && self.tempo.adaptation_speed >= 0.0) {
            return Err(TactusError::InvalidConfig("tempo: adaptation_speed".to_string()));
        }
        if !(-1.0..=1.0).contains(&self.tempo.adaptation_bias) {
            return Err(TactusError::InvalidConfig("tempo: adaptation_bias".to_string()));
        }
        for (index, track) in self.tracks.iter().enumerate() {
            track.validate(index)?;
        }
        Ok(())
    }

    /// Fields the engine will ignore when this config is applied, keeping their current values
    pub fn rejected_fields(&self) -> Vec<String> {
        let mut rejected: Vec<String> = self
            .detector
            .invalid_fields()
            .into_iter()
            .map(|field| format!("detector.{field}"))
            .collect();
        if !self.tempo.bpm.is_finite() {
            rejected.push("tempo.bpm".to_string());
        }
        if !(self.tempo.adaptation_speed.is_finite() && self.tempo.adaptation_speed >= 0.0) {
            rejected.push("tempo.adaptation_speed".to_string());
        }
        if !(-1.0..=1.0).contains(&self.tempo.adaptation_bias) {
            rejected.push("tempo.adaptation_bias".to_string());
        }
        for (index, track) in self.tracks.iter().enumerate() {
            if track.validate(index).is_err() {
                rejected.push(format!("tracks[{index}]"));
            }
        }
        rejected
    }

    /// Log each rejected field on the control side. Returns how many there were.
    pub fn warn_rejected(&self) -> usize {
        let rejected = self.rejected_fields();
        for field in &rejected {
            warn!(field = field.as_str(), "Rejected config value, keeping the current one");
        }
        rejected.len()
    }
}
