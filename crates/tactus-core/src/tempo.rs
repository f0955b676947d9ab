//! Tempo self-adaptation toward detected onsets

use crate::clock::{BeatClock, TempoSettings, sub_beat_distances};

/// Sub-beats per beat the adapter aligns onsets to
pub const ADAPT_SUB_BEATS: u32 = 4;

/// Nudges the clock tempo so onsets land closer to the sub-beat grid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoAdapter {
    pub enabled: bool,
    /// Gain, in BPM per unit of sub-beat error
    pub speed: f64,
    /// -1.0 favours slowing down, 1.0 favours speeding up
    pub bias: f64,
}

impl Default for TempoAdapter {
    fn default() -> Self {
        let settings = TempoSettings::default();
        Self::from_settings(&settings)
    }
}

impl TempoAdapter {
    pub fn from_settings(settings: &TempoSettings) -> Self {
        let defaults = TempoSettings::default();
        let mut adapter = Self {
            enabled: settings.adapt_enabled,
            speed: defaults.adaptation_speed,
            bias: defaults.adaptation_bias,
        };
        adapter.apply_settings(settings);
        adapter
    }

    /// Take the adaptation fields of `settings`, keeping the current value of any rejected field
    pub fn apply_settings(&mut self, settings: &TempoSettings) {
        self.enabled = settings.adapt_enabled;
        self.set_speed(settings.adaptation_speed);
        self.set_bias(settings.adaptation_bias);
    }

    pub fn set_speed(&mut self, speed: f64) {
        if speed.is_finite() && speed >= 0.0 {
            self.speed = speed;
        }
    }

    /// Out-of-range values are ignored and the previous bias kept
    pub fn set_bias(&mut self, bias: f64) {
        if (-1.0..=1.0).contains(&bias) {
            self.bias = bias;
        }
    }

    /// Signed tempo change for an onset at `position` with the given onset density
    ///
    /// An onset just after a sub-beat means the player is behind the clock, so
    /// tempo drops; one just before a sub-beat means they are ahead.
    pub fn correction(&self, position: f64, density: f32) -> f64 {
        let (to_prev, to_next) = sub_beat_distances(position, ADAPT_SUB_BEATS);
        let damping = 1.0 / (1.0 + density.max(0.0) as f64);
        let speed_up = 0.5 * (self.bias + 1.0);
        let slow_down = 1.0 - speed_up;
        if to_prev < to_next {
            -slow_down * damping * self.speed * to_prev
        } else {
            speed_up * damping * self.speed * to_next
        }
    }

    /// Apply one block's adaptation. Returns whether the tempo moved.
    pub fn adapt(&self, clock: &mut BeatClock, onset: bool, density: f32) -> bool {
        if !self.enabled || !onset {
            return false;
        }
        let correction = self.correction(clock.position(), density);
        clock.set_tempo(clock.bpm() + correction)
    }
}
