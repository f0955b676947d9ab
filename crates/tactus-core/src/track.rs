//! Step-sequencer track polled against the shared beat clock

use serde::{Deserialize, Serialize};

/// Upper bound on `num_beats * num_divisions`
pub const MAX_STEPS: usize = 256;

/// Note a track plays when one of its steps fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackNote {
    pub note: u8,
    pub velocity: u8,
}

impl Default for TrackNote {
    fn default() -> Self {
        Self { note: 36, velocity: 100 }
    }
}

/// Fixed-length on/off step pattern
///
/// The pattern always holds exactly `num_beats * num_divisions` steps.
#[derive(Debug, Clone)]
pub struct SequenceTrack {
    pattern: Vec<bool>,
    num_beats: u32,
    num_divisions: u32,
    note: TrackNote,
    /// Step returned by the previous poll
    last_step: Option<usize>,
    /// Beat position last fed by the state machine
    beat_position: f64,
}

impl SequenceTrack {
    /// Build an empty track. Invalid sizes fall back to a single one-step beat.
    pub fn new(note: TrackNote, num_beats: u32, num_divisions: u32) -> Self {
        let (num_beats, num_divisions) = if valid_size(num_beats, num_divisions) {
            (num_beats, num_divisions)
        } else {
            (1, 1)
        };
        let mut pattern = Vec::with_capacity(MAX_STEPS);
        pattern.resize((num_beats * num_divisions) as usize, false);
        Self {
            pattern,
            num_beats,
            num_divisions,
            note: sanitize_note(note),
            last_step: None,
            beat_position: 0.0,
        }
    }

    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.set_pattern_str(pattern);
        self
    }

    pub fn num_beats(&self) -> u32 {
        self.num_beats
    }

    pub fn num_divisions(&self) -> u32 {
        self.num_divisions
    }

    pub fn len(&self) -> usize {
        self.pattern.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pattern.is_empty()
    }

    pub fn pattern(&self) -> &[bool] {
        &self.pattern
    }

    pub fn note(&self) -> TrackNote {
        self.note
    }

    /// Notes outside the MIDI range are ignored and the previous note kept
    pub fn set_note(&mut self, note: TrackNote) {
        if note.note <= 127 && note.velocity <= 127 {
            self.note = note;
        }
    }

    pub fn beat_position(&self) -> f64 {
        self.beat_position
    }

    pub fn set_beat_position(&mut self, beat_position: f64) {
        self.beat_position = beat_position;
    }

    /// Step under the current beat position
    pub fn current_step(&self) -> usize {
        let divisions = self.num_divisions as f64;
        let beat = self.beat_position.rem_euclid(self.num_beats as f64).floor();
        let sub = (self.beat_position.rem_euclid(1.0) * divisions).floor().min(divisions - 1.0);
        ((beat * divisions + sub) as usize).min(self.pattern.len() - 1)
    }

    /// Returns the step's bit the first time a step is polled, false on repeat polls of the same step
    pub fn poll(&mut self) -> bool {
        let step = self.current_step();
        if self.last_step == Some(step) {
            return false;
        }
        self.last_step = Some(step);
        self.pattern[step]
    }

    /// Copy steps from `steps`, truncating or zero-filling to the track length
    pub fn set_pattern(&mut self, steps: &[bool]) {
        for (i, slot) in self.pattern.iter_mut().enumerate() {
            *slot = steps.get(i).copied().unwrap_or(false);
        }
    }

    /// Parse a step string where `0` is a rest and any other character a hit
    pub fn set_pattern_str(&mut self, pattern: &str) {
        let mut chars = pattern.chars();
        for slot in self.pattern.iter_mut() {
            *slot = chars.next().is_some_and(|c| c != '0');
        }
    }

    /// Pattern as a `0`/`1` string
    pub fn pattern_string(&self) -> String {
        self.pattern.iter().map(|&hit| if hit { '1' } else { '0' }).collect()
    }

    /// Change the beat count, keeping existing steps. Ignored when the new size is invalid.
    pub fn set_num_beats(&mut self, num_beats: u32) {
        if num_beats == self.num_beats || !valid_size(num_beats, self.num_divisions) {
            return;
        }
        self.num_beats = num_beats;
        self.resize();
    }

    /// Change the divisions per beat, keeping existing steps. Ignored when the new size is invalid.
    pub fn set_num_divisions(&mut self, num_divisions: u32) {
        if num_divisions == self.num_divisions || !valid_size(self.num_beats, num_divisions) {
            return;
        }
        self.num_divisions = num_divisions;
        self.resize();
    }

    fn resize(&mut self) {
        // Capacity is reserved for MAX_STEPS, so this never reallocates
        self.pattern.resize((self.num_beats * self.num_divisions) as usize, false);
        self.last_step = None;
    }
}

fn valid_size(num_beats: u32, num_divisions: u32) -> bool {
    num_beats > 0 && num_divisions > 0 && (num_beats as usize) * (num_divisions as usize) <= MAX_STEPS
}

fn sanitize_note(note: TrackNote) -> TrackNote {
    TrackNote {
        note: note.note.min(127),
        velocity: note.velocity.min(127),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(beats: u32, divisions: u32, pattern: &str) -> SequenceTrack {
        SequenceTrack::new(TrackNote::default(), beats, divisions).with_pattern(pattern)
    }

    #[test]
    fn test_pattern_string_truncates_and_pads() {
        let mut t = track(1, 4, "1x0111");
        assert_eq!(t.pattern_string(), "1101");
        t.set_pattern_str("1");
        assert_eq!(t.pattern_string(), "1000");
        t.set_pattern(&[false, true]);
        assert_eq!(t.pattern_string(), "0100");
    }

    #[test]
    fn test_poll_fires_once_per_step() {
        let mut t = track(1, 4, "1100");
        t.set_beat_position(0.0);
        assert!(t.poll());
        t.set_beat_position(0.1);
        assert!(!t.poll());
        t.set_beat_position(0.3);
        assert!(t.poll());
        t.set_beat_position(0.6);
        assert!(!t.poll());
        // wrap back to step 0 on the next beat
        t.set_beat_position(1.05);
        assert!(t.poll());
    }

    #[test]
    fn test_step_index_uses_beat_within_cycle() {
        let mut t = track(2, 2, "0001");
        t.set_beat_position(5.7); // beat 1 of 2, second half
        assert_eq!(t.current_step(), 3);
        assert!(t.poll());
    }

    #[test]
    fn test_resize_preserves_steps() {
        let mut t = track(2, 2, "1011");
        t.set_num_beats(1);
        assert_eq!(t.pattern_string(), "10");
        t.set_num_beats(3);
        assert_eq!(t.pattern_string(), "100000");
        t.set_num_divisions(1);
        assert_eq!(t.pattern_string(), "100");
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn test_invalid_sizes_are_ignored() {
        let mut t = track(4, 4, "1");
        t.set_num_divisions(0);
        t.set_num_beats(100);
        assert_eq!((t.num_beats(), t.num_divisions()), (4, 4));
        assert_eq!(t.len(), 16);

        let fallback = SequenceTrack::new(TrackNote::default(), 0, 3);
        assert_eq!(fallback.len(), 1);
    }

    #[test]
    fn test_note_clamped_to_midi_range() {
        let t = SequenceTrack::new(TrackNote { note: 200, velocity: 255 }, 1, 1);
        assert_eq!(t.note(), TrackNote { note: 127, velocity: 127 });
    }

    #[test]
    fn test_set_note_keeps_previous_when_out_of_range() {
        let mut t = track(1, 4, "1000");
        t.set_note(TrackNote { note: 42, velocity: 90 });
        t.set_note(TrackNote { note: 42, velocity: 200 });
        assert_eq!(t.note(), TrackNote { note: 42, velocity: 90 });
    }
}
