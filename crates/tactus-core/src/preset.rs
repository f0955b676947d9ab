//! Ready-made track meshes

use serde::{Deserialize, Serialize};

use crate::clock::TempoSettings;
use crate::error::Result;
use crate::predicate::{GateTable, Predicate};
use crate::state_machine::{Effect, StateMachine, StateMachineBuilder, TrackState};
use crate::track::{SequenceTrack, TrackNote};

/// Named starting points for the state machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// Eight drum tracks switched by loudness, density and trend
    #[default]
    DrumMesh,
    /// No tracks; onsets and releases only fire the trigger tables
    TriggersOnly,
}

impl Preset {
    pub fn name(self) -> &'static str {
        match self {
            Preset::DrumMesh => "drum_mesh",
            Preset::TriggersOnly => "triggers_only",
        }
    }

    pub fn build(self, sample_rate: f64, tempo: TempoSettings) -> Result<StateMachine> {
        match self {
            Preset::DrumMesh => drum_mesh(sample_rate, tempo),
            Preset::TriggersOnly => StateMachine::builder(sample_rate, tempo).build(),
        }
    }
}

/// (note, velocity, beats, divisions, pattern) for each drum-mesh track
const DRUM_TRACKS: [(u8, u8, u32, u32, &str); 8] = [
    (51, 60, 1, 4, "1001"),
    (39, 100, 2, 4, "00001000"),
    (38, 10, 4, 4, "0101010001010010"),
    (42, 100, 4, 2, "10101010"),
    (46, 110, 2, 2, "0101"),
    (41, 110, 1, 4, "1011"),
    (53, 110, 1, 2, "11"),
    (52, 110, 1, 2, "10"),
];

/// Track that starts sounding before any rule fires
const ALWAYS_ON_TRACK: usize = 3;

const LOUD: f32 = 0.04;
const VERY_LOUD: f32 = 0.07;
const BUSY: f32 = 0.8;
const VERY_BUSY: f32 = 1.3;
const TREND_LOOKBACK: f32 = 0.3;
const ON_BEAT_TOLERANCE: f64 = 0.3;

pub fn drum_mesh(sample_rate: f64, tempo: TempoSettings) -> Result<StateMachine> {
    drum_mesh_builder(sample_rate, tempo)?.build()
}

/// The drum mesh, still open for extra tracks or rules
pub fn drum_mesh_builder(sample_rate: f64, tempo: TempoSettings) -> Result<StateMachineBuilder> {
    let mut b = StateMachine::builder(sample_rate, tempo);

    for (index, &(note, velocity, beats, divisions, pattern)) in DRUM_TRACKS.iter().enumerate() {
        let track = SequenceTrack::new(TrackNote { note, velocity }, beats, divisions).with_pattern(pattern);
        let state = if index == ALWAYS_ON_TRACK { TrackState::On } else { TrackState::Off };
        b.track_with_state(track, state);
    }

    let loud = b.predicate(Predicate::MeanAmplitudeAbove(LOUD))?;
    let very_loud = b.predicate(Predicate::MeanAmplitudeAbove(VERY_LOUD))?;
    let busy = b.predicate(Predicate::DensityAbove(BUSY))?;
    let very_busy = b.predicate(Predicate::DensityAbove(VERY_BUSY))?;
    let fading = b.predicate(Predicate::TrendDecreasing {
        lookback: TREND_LOOKBACK,
        invert: false,
    })?;
    let not_fading = b.predicate(Predicate::TrendDecreasing {
        lookback: TREND_LOOKBACK,
        invert: true,
    })?;
    // Off-beat eighth of a one-beat cycle
    let on_offbeat = b.predicate(Predicate::NearBeat {
        beat: 0,
        sub_beat: 1,
        total_beats: 1,
        total_sub_beats: 2,
        threshold: ON_BEAT_TOLERANCE,
    })?;
    // Beat 2 of a two-beat cycle
    let on_backbeat = b.predicate(Predicate::NearBeat {
        beat: 1,
        sub_beat: 0,
        total_beats: 2,
        total_sub_beats: 2,
        threshold: ON_BEAT_TOLERANCE,
    })?;

    // Ride: fading or very loud
    let ride = b.or(very_loud, fading)?;
    b.bind(ride, &[(0, Effect::TurnOn)], false);

    // Snare: busy or loud
    let snare = b.or(busy, loud)?;
    b.bind(snare, &[(1, Effect::TurnOn)], false);

    // Ghost snare: quiet
    let quiet = b.not(loud)?;
    b.bind(quiet, &[(2, Effect::TurnOn)], false);

    // Open hihat: busy, or loud and holding
    let loud_holding = b.and(loud, not_fading)?;
    let open_hat = b.or(loud_holding, busy)?;
    b.bind(open_hat, &[(4, Effect::TurnOn)], false);

    // Tom: latched on by a loud backbeat hit or a very busy passage
    let backbeat_hit = b.and(loud, on_backbeat)?;
    let tom = b.or(backbeat_hit, very_busy)?;
    b.bind(tom, &[(5, Effect::TurnOn)], true);

    // Second ride: loud and holding
    b.bind(loud_holding, &[(6, Effect::TurnOn)], false);

    // Crash: very loud
    b.bind(very_loud, &[(7, Effect::TurnOn)], false);

    // Onset slot 2 (china) for loud off-beat hits
    let offbeat_hit = b.and(on_offbeat, loud)?;
    b.gate(offbeat_hit, GateTable::Onset, &[(2, true)], false)?;

    // Onset slot 1 (open hihat) while sparse
    let sparse = b.not(busy)?;
    b.gate(sparse, GateTable::Onset, &[(1, true)], false)?;

    // Release slot 0 (snare) for loud releases away from the backbeat
    let off_backbeat = b.not(on_backbeat)?;
    let loud_off_backbeat = b.and(off_backbeat, loud)?;
    b.gate(loud_off_backbeat, GateTable::Release, &[(0, true)], false)?;

    Ok(b)
}
