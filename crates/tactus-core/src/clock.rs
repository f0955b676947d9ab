//! Beat clock shared by tracks and beat-relative predicates

use serde::{Deserialize, Serialize};

/// Beat position wraps back to zero here
pub const MAX_BEATS: f64 = 64.0;
pub const MIN_TEMPO: f64 = 10.0;
pub const MAX_TEMPO: f64 = 300.0;
/// Tempo requests closer than this to the current tempo are ignored
const TEMPO_DEADBAND: f64 = 0.01;

/// Tempo settings as exposed to the control side
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoSettings {
    /// Tempo in BPM
    pub bpm: f64,
    /// Nudge tempo toward detected onsets
    pub adapt_enabled: bool,
    /// Gain of the adaptation loop
    pub adaptation_speed: f64,
    /// -1.0 prefers slowing down, 1.0 prefers speeding up
    pub adaptation_bias: f64,
}

impl Default for TempoSettings {
    fn default() -> Self {
        Self {
            bpm: 90.0,
            adapt_enabled: false,
            adaptation_speed: 5.0,
            adaptation_bias: 0.0,
        }
    }
}

/// Wrapping beat position driven by sample count
#[derive(Debug, Clone)]
pub struct BeatClock {
    /// Current position in beats, in [0, MAX_BEATS)
    position: f64,
    /// Tempo in BPM
    bpm: f64,
    /// Sample rate for time conversion
    sample_rate: f64,
}

impl BeatClock {
    pub fn new(sample_rate: f64, bpm: f64) -> Self {
        let sample_rate = if sample_rate.is_finite() && sample_rate > 0.0 { sample_rate } else { 44100.0 };
        let bpm = if bpm.is_finite() { bpm.clamp(MIN_TEMPO, MAX_TEMPO) } else { TempoSettings::default().bpm };
        Self {
            position: 0.0,
            bpm,
            sample_rate,
        }
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        if sample_rate.is_finite() && sample_rate > 0.0 {
            self.sample_rate = sample_rate;
        }
    }

    /// Change tempo, clamped to the supported range. Returns whether the tempo moved.
    pub fn set_tempo(&mut self, bpm: f64) -> bool {
        if !bpm.is_finite() {
            return false;
        }
        let bpm = bpm.clamp(MIN_TEMPO, MAX_TEMPO);
        if (bpm - self.bpm).abs() <= TEMPO_DEADBAND {
            return false;
        }
        self.bpm = bpm;
        true
    }

    /// Beats advanced per audio sample at the current tempo
    pub fn beats_per_sample(&self) -> f64 {
        self.bpm / (60.0 * self.sample_rate)
    }

    /// Advance by a block of samples, returning the number of beats advanced
    pub fn advance(&mut self, samples: usize) -> f64 {
        let beats = samples as f64 * self.beats_per_sample();
        self.position = (self.position + beats).rem_euclid(MAX_BEATS);
        beats
    }

    /// Whether a cycle of `cycle_beats` restarted during the last `advanced` beats
    pub fn wrapped(&self, cycle_beats: f64, advanced: f64) -> bool {
        self.position.rem_euclid(cycle_beats.max(f64::EPSILON)) < advanced
    }

}

/// Cyclic distance from `position` to `beat + sub_beat / total_sub_beats` inside a cycle of `total_beats`
pub fn beat_distance(position: f64, beat: u32, sub_beat: u32, total_beats: u32, total_sub_beats: u32) -> f64 {
    let cycle = total_beats.max(1) as f64;
    let target = beat as f64 + sub_beat as f64 / total_sub_beats.max(1) as f64;
    let distance = (position.rem_euclid(cycle) - target.rem_euclid(cycle)).abs();
    distance.min(cycle - distance)
}

/// Distances from `position` back to the sub-beat just passed and forward to
/// the next one, with `sub_beats` evenly spaced sub-beats per beat
pub fn sub_beat_distances(position: f64, sub_beats: u32) -> (f64, f64) {
    let sub_position = position.rem_euclid(1.0) * sub_beats.max(1) as f64;
    let to_prev = sub_position - sub_position.floor();
    (to_prev, 1.0 - to_prev)
}

/// Distance to whichever neighbouring sub-beat is closer (0.0 to 0.5)
pub fn nearest_sub_beat_distance(position: f64, sub_beats: u32) -> f64 {
    let (to_prev, to_next) = sub_beat_distances(position, sub_beats);
    to_prev.min(to_next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_wraps_at_max_beats() {
        // 120 BPM at 48 kHz: one beat every 24000 samples
        let mut clock = BeatClock::new(48000.0, 120.0);
        let advanced = clock.advance(24000);
        assert!((advanced - 1.0).abs() < 1e-9);
        assert!((clock.position() - 1.0).abs() < 1e-9);

        clock.advance(24000 * 63);
        assert!(clock.position() < 1e-6 || (MAX_BEATS - clock.position()) < 1e-6);
    }

    #[test]
    fn test_tempo_deadband_and_clamp() {
        let mut clock = BeatClock::new(48000.0, 120.0);
        assert!(!clock.set_tempo(120.005));
        assert_eq!(clock.bpm(), 120.0);
        assert!(clock.set_tempo(1000.0));
        assert_eq!(clock.bpm(), MAX_TEMPO);
        assert!(!clock.set_tempo(f64::NAN));
    }

    #[test]
    fn test_wrapped_detects_cycle_restart() {
        let mut clock = BeatClock::new(48000.0, 120.0);
        // 0.9 beats
        let advanced = clock.advance(21600);
        assert!(!clock.wrapped(1.0, advanced));
        // crosses beat 1.0
        let advanced = clock.advance(4800);
        assert!(clock.wrapped(1.0, advanced));
        assert!(!clock.wrapped(4.0, advanced));
    }

    #[test]
    fn test_beat_distance_is_cyclic() {
        let mut clock = BeatClock::new(48000.0, 120.0);
        clock.advance(24000 * 3 + 21600); // 3.9 beats
        let distance = beat_distance(clock.position(), 0, 0, 4, 1);
        assert!((distance - 0.1).abs() < 1e-9);
        let distance = beat_distance(clock.position(), 3, 1, 4, 2);
        assert!((distance - 0.4).abs() < 1e-9);
        // Position beyond the cycle folds back in
        assert!(beat_distance(5.0, 1, 0, 2, 2).abs() < 1e-9);
    }

    #[test]
    fn test_sub_beat_distances() {
        let (prev, next) = sub_beat_distances(2.3, 4);
        assert!((prev - 0.2).abs() < 1e-9);
        assert!((next - 0.8).abs() < 1e-9);
        assert!((nearest_sub_beat_distance(0.125, 4) - 0.5).abs() < 1e-9);
        assert_eq!(nearest_sub_beat_distance(1.0, 4), 0.0);
    }
}
