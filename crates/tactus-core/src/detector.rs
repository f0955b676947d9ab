//! Onset and release detection over a rolling window of input audio
//!
//! The detector compares the energy of the newest part of the analysis window
//! ("after") against the part before it ("before"). A sharp rise is an onset,
//! a sharp fall is a release. Both are weighted by how close the beat clock
//! is to a sub-beat, so hits that land on the grid need less evidence.
//!
//! Call [`OnsetDetector::ingest`] then [`OnsetDetector::detect`] exactly once
//! per audio block. Everything else only observes the result of that pair.

use serde::{Deserialize, Serialize};

use crate::clock::nearest_sub_beat_distance;
use crate::ring::FixedRing;

/// Samples of audio history kept for analysis
pub const HISTORY_LEN: usize = 8192;
/// Inter-onset intervals kept for density estimation
pub const INTERVAL_SLOTS: usize = 4;
/// Downsampled volume samples kept for trend and mean estimation
pub const VOLUME_SLOTS: usize = 8;
/// Seconds between downsampled volume samples
pub const VOLUME_INTERVAL_SECS: f32 = 0.2;

/// Summed absolute amplitude both regions must exceed together
const ENERGY_FLOOR: f32 = 2.0;
const RATIO_EPSILON: f32 = 1e-6;
const TREND_EPSILON: f32 = 0.001;
const INITIAL_INTERVAL_SECS: f32 = 2.0;
/// Time-since-onset restarts here, never at zero
const MIN_ELAPSED_SECS: f32 = 0.001;

/// Detection-affecting parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// after/before energy ratio needed for an onset
    pub onset_threshold: f32,
    /// before/after energy ratio needed for a release
    pub release_threshold: f32,
    /// Analysis window length in seconds
    pub window_duration: f32,
    /// Cooldown after any detection, in seconds
    pub min_inter_event_gap: f32,
    /// Share of the window (0.0 to 1.0) counted as "after"
    pub edge_position_ratio: f32,
    /// How much sub-beat proximity weights detection (0.0 to 1.0)
    pub on_beat_bias: f32,
    /// Sub-beats per beat considered by the on-beat prior
    pub num_sub_beats: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            onset_threshold: 3.0,
            release_threshold: 3.0,
            window_duration: 0.05,
            min_inter_event_gap: 0.2,
            edge_position_ratio: 0.5,
            on_beat_bias: 1.0,
            num_sub_beats: 4,
        }
    }
}

impl DetectorSettings {
    /// Names of fields holding values the detector would reject
    pub fn invalid_fields(&self) -> Vec<&'static str> {
        let mut invalid = Vec::new();
        if !self.onset_threshold.is_finite() {
            invalid.push("onset_threshold");
        }
        if !self.release_threshold.is_finite() {
            invalid.push("release_threshold");
        }
        if !(self.window_duration.is_finite() && self.window_duration > 0.0) {
            invalid.push("window_duration");
        }
        if !(self.min_inter_event_gap.is_finite() && self.min_inter_event_gap >= 0.0) {
            invalid.push("min_inter_event_gap");
        }
        if !(0.0..=1.0).contains(&self.edge_position_ratio) {
            invalid.push("edge_position_ratio");
        }
        if !(0.0..=1.0).contains(&self.on_beat_bias) {
            invalid.push("on_beat_bias");
        }
        if self.num_sub_beats == 0 {
            invalid.push("num_sub_beats");
        }
        invalid
    }

    /// Copy with every invalid field replaced by its default
    pub fn sanitized(&self) -> Self {
        let defaults = Self::default();
        let mut settings = *self;
        for field in self.invalid_fields() {
            match field {
                "onset_threshold" => settings.onset_threshold = defaults.onset_threshold,
                "release_threshold" => settings.release_threshold = defaults.release_threshold,
                "window_duration" => settings.window_duration = defaults.window_duration,
                "min_inter_event_gap" => settings.min_inter_event_gap = defaults.min_inter_event_gap,
                "edge_position_ratio" => settings.edge_position_ratio = defaults.edge_position_ratio,
                "on_beat_bias" => settings.on_beat_bias = defaults.on_beat_bias,
                _ => settings.num_sub_beats = defaults.num_sub_beats,
            }
        }
        settings
    }
}

/// Outcome of the most recent `detect()` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Detection {
    pub onset: bool,
    pub release: bool,
}

impl Detection {
    pub fn any(&self) -> bool {
        self.onset || self.release
    }
}

pub struct OnsetDetector {
    sample_rate: f32,
    settings: DetectorSettings,
    /// Circular sample history; `write_pos` is the oldest sample
    history: Box<[f32]>,
    write_pos: usize,
    /// Analysis window length in samples
    window_len: usize,
    /// Offset inside the window where the "after" region starts
    split: usize,
    gap_samples: usize,
    /// Samples left before another detection may fire
    cooldown: usize,
    elapsed_since_onset: f32,
    intervals: FixedRing<INTERVAL_SLOTS>,
    volumes: FixedRing<VOLUME_SLOTS>,
    mean_volume: f32,
    until_volume_sample: f32,
    beat_position: f64,
    detection: Detection,
}

impl OnsetDetector {
    pub fn new(sample_rate: f32, settings: DetectorSettings) -> Self {
        let sample_rate = if sample_rate.is_finite() && sample_rate > 0.0 { sample_rate } else { 44100.0 };
        let mut detector = Self {
            sample_rate,
            settings: settings.sanitized(),
            history: vec![0.0; HISTORY_LEN].into_boxed_slice(),
            write_pos: 0,
            window_len: 0,
            split: 0,
            gap_samples: 0,
            cooldown: 0,
            elapsed_since_onset: MIN_ELAPSED_SECS,
            intervals: FixedRing::filled(INITIAL_INTERVAL_SECS),
            volumes: FixedRing::filled(0.0),
            mean_volume: 0.0,
            until_volume_sample: VOLUME_INTERVAL_SECS,
            beat_position: 0.0,
            detection: Detection::default(),
        };
        detector.update_window();
        detector.update_gap();
        detector.cooldown = detector.gap_samples;
        detector
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Analysis window length in samples
    pub fn window_len(&self) -> usize {
        self.window_len
    }

    pub fn cooldown_samples(&self) -> usize {
        self.cooldown
    }

    /// Result of the last `detect()` call
    pub fn detection(&self) -> Detection {
        self.detection
    }

    pub fn beat_position(&self) -> f64 {
        self.beat_position
    }

    // ------------------------------------------------------------------
    // Parameter setters. Changing a detection-affecting value clears the
    // history; writing the current value again is a no-op.

    pub fn set_onset_threshold(&mut self, threshold: f32) {
        if !threshold.is_finite() || threshold == self.settings.onset_threshold {
            return;
        }
        self.settings.onset_threshold = threshold;
        self.reset();
    }

    pub fn set_release_threshold(&mut self, threshold: f32) {
        if !threshold.is_finite() || threshold == self.settings.release_threshold {
            return;
        }
        self.settings.release_threshold = threshold;
        self.reset();
    }

    pub fn set_window_duration(&mut self, secs: f32) {
        if !(secs.is_finite() && secs > 0.0) || secs == self.settings.window_duration {
            return;
        }
        self.settings.window_duration = secs;
        self.update_window();
        self.reset();
    }

    pub fn set_min_inter_event_gap(&mut self, secs: f32) {
        if !(secs.is_finite() && secs >= 0.0) || secs == self.settings.min_inter_event_gap {
            return;
        }
        self.settings.min_inter_event_gap = secs;
        self.update_gap();
        self.reset();
    }

    pub fn set_edge_position_ratio(&mut self, ratio: f32) {
        if !(0.0..=1.0).contains(&ratio) || ratio == self.settings.edge_position_ratio {
            return;
        }
        self.settings.edge_position_ratio = ratio;
        self.update_window();
        self.reset();
    }

    /// Out-of-range values are ignored and the previous bias kept
    pub fn set_on_beat_bias(&mut self, bias: f32) {
        if (0.0..=1.0).contains(&bias) {
            self.settings.on_beat_bias = bias;
        }
    }

    pub fn set_num_sub_beats(&mut self, sub_beats: u32) {
        if sub_beats > 0 {
            self.settings.num_sub_beats = sub_beats;
        }
    }

    pub fn apply_settings(&mut self, settings: &DetectorSettings) {
        self.set_onset_threshold(settings.onset_threshold);
        self.set_release_threshold(settings.release_threshold);
        self.set_window_duration(settings.window_duration);
        self.set_min_inter_event_gap(settings.min_inter_event_gap);
        self.set_edge_position_ratio(settings.edge_position_ratio);
        self.set_on_beat_bias(settings.on_beat_bias);
        self.set_num_sub_beats(settings.num_sub_beats);
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        if !(sample_rate.is_finite() && sample_rate > 0.0) || sample_rate == self.sample_rate {
            return;
        }
        self.sample_rate = sample_rate;
        self.update_window();
        self.update_gap();
        self.reset();
    }

    /// Beat phase used by the on-beat prior, fed by the state machine after each clock advance
    pub fn set_beat_position(&mut self, beat_position: f64) {
        self.beat_position = beat_position;
    }

    /// Clear the sample history and restart the cooldown
    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.cooldown = self.gap_samples;
    }

    fn update_window(&mut self) {
        let window = (self.settings.window_duration * self.sample_rate) as usize;
        self.window_len = window.clamp(1, HISTORY_LEN);
        let before_share = 1.0 - self.settings.edge_position_ratio;
        self.split = ((before_share * self.window_len as f32) as usize).min(self.window_len);
    }

    fn update_gap(&mut self) {
        self.gap_samples = (self.settings.min_inter_event_gap * self.sample_rate) as usize;
    }

    // ------------------------------------------------------------------

    /// Append a block of mono samples and advance the cooldown, density and volume timers
    pub fn ingest(&mut self, samples: &[f32]) {
        let tail = &samples[samples.len().saturating_sub(HISTORY_LEN)..];
        for &sample in tail {
            self.history[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % HISTORY_LEN;
        }

        let secs = samples.len() as f32 / self.sample_rate;
        self.elapsed_since_onset += secs;
        self.until_volume_sample -= secs;
        self.cooldown = self.cooldown.saturating_sub(samples.len());

        if self.until_volume_sample <= 0.0 {
            let volume = self.history.iter().map(|s| s.abs()).sum::<f32>() / HISTORY_LEN as f32;
            let dropped = self.volumes.push(volume);
            self.mean_volume += (volume - dropped) / VOLUME_SLOTS as f32;
            self.until_volume_sample += VOLUME_INTERVAL_SECS;
        }
    }

    /// Look for an onset, then a release, in the current window
    pub fn detect(&mut self) -> Detection {
        self.detection = Detection::default();
        if self.cooldown > 0 {
            return self.detection;
        }

        let (before, after) = self.region_energy();
        let energetic = before + after > ENERGY_FLOOR;
        let prior = self.prior();

        if energetic && prior * (after / before.max(RATIO_EPSILON)) > self.settings.onset_threshold {
            self.cooldown = self.gap_samples;
            self.intervals.push(self.elapsed_since_onset);
            self.elapsed_since_onset = MIN_ELAPSED_SECS;
            self.detection.onset = true;
        } else if energetic && prior * (before / after.max(RATIO_EPSILON)) > self.settings.release_threshold {
            // Releases are not rhythmic hits, so the interval ring is left alone
            self.cooldown = self.gap_samples;
            self.detection.release = true;
        }

        self.detection
    }

    /// Summed absolute amplitude of the (before, after) regions of the window
    fn region_energy(&self) -> (f32, f32) {
        let (newer, older) = self.history.split_at(self.write_pos);
        let mut window = older
            .iter()
            .chain(newer.iter())
            .skip(HISTORY_LEN - self.window_len)
            .map(|s| s.abs());
        let before: f32 = window.by_ref().take(self.split).sum();
        let after: f32 = window.sum();
        (before, after)
    }

    /// Detection weight from sub-beat proximity, blended toward 1.0 as the bias drops
    pub fn prior(&self) -> f32 {
        let distance = nearest_sub_beat_distance(self.beat_position, self.settings.num_sub_beats) as f32;
        let bias = self.settings.on_beat_bias;
        (1.0 - distance) * bias + (1.0 - bias)
    }

    /// Onsets per second over the last few intervals
    ///
    /// The interval still in progress is blended in only when that lowers the
    /// estimate, so density decays during silence and never jumps up.
    pub fn density(&self) -> f32 {
        let slots = INTERVAL_SLOTS as f32;
        let sum = self.intervals.sum();
        let stored = 1.0 / (sum / slots).max(RATIO_EPSILON);
        let with_current = 1.0 / ((self.elapsed_since_onset + sum - self.intervals.oldest()) / slots).max(RATIO_EPSILON);
        stored.min(with_current)
    }

    /// Running mean of the downsampled volume history
    pub fn mean_amplitude(&self) -> f32 {
        self.mean_volume
    }

    /// Whether volume fell strictly at every step over the last `lookback` seconds
    ///
    /// "Not decreasing" does not mean "increasing": one flat step breaks the run.
    pub fn is_trend_decreasing(&self, lookback: f32) -> bool {
        let pairs = ((lookback / VOLUME_INTERVAL_SECS).max(0.0) as usize).min(VOLUME_SLOTS - 1);
        (0..pairs).all(|age| self.volumes.get(age) - self.volumes.get(age + 1) < -TREND_EPSILON)
    }

    /// Seconds since the last onset
    pub fn elapsed_since_onset(&self) -> f32 {
        self.elapsed_since_onset
    }

    /// Stored inter-onset intervals, newest first
    pub fn intervals(&self) -> impl Iterator<Item = f32> + '_ {
        self.intervals.iter()
    }

    /// Downsampled volume history, newest first
    pub fn volume_history(&self) -> impl Iterator<Item = f32> + '_ {
        self.volumes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 48000.0;
    const BLOCK: usize = 480;

    fn detector() -> OnsetDetector {
        OnsetDetector::new(SAMPLE_RATE, DetectorSettings::default())
    }

    /// Feed `blocks` blocks of a constant-amplitude square wave
    fn feed(detector: &mut OnsetDetector, amplitude: f32, blocks: usize) -> Vec<Detection> {
        let block: Vec<f32> = (0..BLOCK)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect();
        (0..blocks)
            .map(|_| {
                detector.ingest(&block);
                detector.detect()
            })
            .collect()
    }

    #[test]
    fn test_silence_never_triggers() {
        let mut det = detector();
        let detections = feed(&mut det, 0.0, 300);
        assert!(detections.iter().all(|d| !d.any()));
        assert_eq!(det.mean_amplitude(), 0.0);
    }

    #[test]
    fn test_single_transient_fires_once_in_its_block() {
        let mut det = detector();
        let silence_blocks = (2.0 * SAMPLE_RATE) as usize / BLOCK;
        feed(&mut det, 0.0, silence_blocks);

        // Transient starts 100 samples into the next block and lasts 400 samples
        let start = silence_blocks * BLOCK + 100;
        let mut onset_blocks = Vec::new();
        for block_index in silence_blocks..silence_blocks + 100 {
            let block: Vec<f32> = (0..BLOCK)
                .map(|i| {
                    let n = block_index * BLOCK + i;
                    if (start..start + 400).contains(&n) { 0.9 } else { 0.0 }
                })
                .collect();
            det.ingest(&block);
            let detection = det.detect();
            assert!(!detection.release, "unexpected release at block {block_index}");
            if detection.onset {
                onset_blocks.push(block_index);
                assert_eq!(det.cooldown_samples(), (0.2 * SAMPLE_RATE) as usize);
            }
        }
        assert_eq!(onset_blocks, vec![silence_blocks]);
    }

    #[test]
    fn test_release_after_sustained_sound() {
        let mut det = detector();
        feed(&mut det, 0.0, 50);
        let loud = feed(&mut det, 0.5, 100);
        assert_eq!(loud.iter().filter(|d| d.onset).count(), 1);
        let intervals_before: Vec<f32> = det.intervals().collect();

        let quiet = feed(&mut det, 0.0, 50);
        assert_eq!(quiet.iter().filter(|d| d.release).count(), 1);
        assert!(quiet.iter().all(|d| !d.onset));
        let intervals_after: Vec<f32> = det.intervals().collect();
        assert_eq!(intervals_before, intervals_after);
    }

    #[test]
    fn test_onset_wins_when_both_conditions_hold() {
        let mut det = detector();
        det.set_onset_threshold(-1.0);
        det.set_release_threshold(-1.0);
        let detections = feed(&mut det, 0.5, 40);
        let first = detections.iter().find(|d| d.any()).copied().unwrap_or_default();
        assert!(first.onset);
        assert!(!first.release);
    }

    #[test]
    fn test_cooldown_suppresses_detection() {
        let mut det = detector();
        feed(&mut det, 0.0, 50);
        feed(&mut det, 0.8, 1);
        assert!(det.detection().onset);
        // A sharper hit right after is ignored while cooling down
        let during = feed(&mut det, 0.0, 2);
        let again = feed(&mut det, 1.0, 1);
        assert!(during.iter().chain(again.iter()).all(|d| !d.any()));
        assert!(det.cooldown_samples() > 0);
    }

    #[test]
    fn test_density_decays_during_silence() {
        let mut det = detector();
        for _ in 0..4 {
            feed(&mut det, 0.0, 30);
            feed(&mut det, 0.8, 1);
        }
        let mut previous = det.density();
        for _ in 0..500 {
            feed(&mut det, 0.0, 1);
            let density = det.density();
            assert!(density <= previous);
            previous = density;
        }
        assert!(previous < 1.0);
    }

    #[test]
    fn test_density_never_rises_from_in_progress_gap() {
        let mut det = detector();
        // Newest intervals short, oldest one long
        det.intervals = FixedRing::filled(5.0);
        det.intervals.push(0.1);
        det.intervals.push(0.1);
        det.intervals.push(0.1);
        let stored = 1.0 / (det.intervals.sum() / INTERVAL_SLOTS as f32);
        det.elapsed_since_onset = 2.0;
        assert!((det.density() - stored).abs() < 1e-6);
    }

    #[test]
    fn test_trend_decreasing_requires_every_step() {
        let mut det = detector();
        for volume in [0.8, 0.6, 0.4, 0.2] {
            det.volumes.push(volume);
        }
        assert!(det.is_trend_decreasing(0.6));
        // A flat step in the lookback breaks the run
        det.volumes.push(0.2);
        assert!(!det.is_trend_decreasing(0.6));
        // Lookback is capped at the history size
        assert!(!det.is_trend_decreasing(100.0));
    }

    #[test]
    fn test_trend_drop_of_exactly_epsilon_is_not_decreasing() {
        let mut det = detector();
        det.volumes.push(0.001);
        det.volumes.push(0.0);
        assert!(!det.is_trend_decreasing(0.2));
        det.volumes.push(-0.5);
        assert!(!det.is_trend_decreasing(0.4));
    }

    #[test]
    fn test_mean_amplitude_tracks_volume_ring() {
        let mut det = detector();
        feed(&mut det, 0.3, 200);
        let ring_mean = det.volume_history().sum::<f32>() / VOLUME_SLOTS as f32;
        assert!((det.mean_amplitude() - ring_mean).abs() < 1e-4);
        assert!(det.mean_amplitude() > 0.2);
    }

    #[test]
    fn test_changing_parameters_resets_history() {
        let mut det = detector();
        feed(&mut det, 0.0, 50);
        feed(&mut det, 0.5, 5);

        // Same value: nothing cleared
        det.set_onset_threshold(3.0);
        assert!(det.history.iter().any(|s| *s != 0.0));

        det.set_onset_threshold(4.0);
        assert!(det.history.iter().all(|s| *s == 0.0));
        assert_eq!(det.cooldown_samples(), (0.2 * SAMPLE_RATE) as usize);
    }

    #[test]
    fn test_out_of_range_values_are_ignored() {
        let mut det = detector();
        det.set_on_beat_bias(1.5);
        assert_eq!(det.settings().on_beat_bias, 1.0);
        det.set_on_beat_bias(0.25);
        assert_eq!(det.settings().on_beat_bias, 0.25);
        det.set_edge_position_ratio(-0.1);
        assert_eq!(det.settings().edge_position_ratio, 0.5);
        det.set_window_duration(0.0);
        assert_eq!(det.settings().window_duration, 0.05);
        det.set_window_duration(10.0);
        assert_eq!(det.window_len(), HISTORY_LEN);
    }

    #[test]
    fn test_prior_blends_sub_beat_proximity() {
        let mut det = detector();
        det.set_beat_position(1.0);
        assert!((det.prior() - 1.0).abs() < 1e-6);
        // Halfway between sub-beats at four per beat
        det.set_beat_position(0.125);
        assert!((det.prior() - 0.5).abs() < 1e-6);
        det.set_on_beat_bias(0.0);
        assert!((det.prior() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_sanitized_settings_replace_invalid_fields() {
        let settings = DetectorSettings {
            on_beat_bias: 3.0,
            window_duration: f32::NAN,
            ..Default::default()
        };
        assert_eq!(settings.invalid_fields(), vec!["window_duration", "on_beat_bias"]);
        let clean = settings.sanitized();
        assert_eq!(clean, DetectorSettings::default());
    }
}
