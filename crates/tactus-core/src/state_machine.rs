//! Track state machine: predicate bindings, hysteresis and the per-block update order

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{BeatClock, TempoSettings};
use crate::detector::Detection;
use crate::error::{Result, TactusError};
use crate::events::{EventBuffer, EventSource};
use crate::predicate::{BlockContext, GateBinding, GateId, GateTable, Predicate, PredicateArena, PredicateId};
use crate::tempo::TempoAdapter;
use crate::track::SequenceTrack;

/// Per-track hysteresis state
///
/// Transient states commit to `On`/`Off` only when the track's cycle restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    #[default]
    Off,
    TurningOn,
    On,
    TurningOff,
}

impl TrackState {
    /// Whether the track plays its pattern in this state
    pub fn is_sounding(self) -> bool {
        matches!(self, TrackState::On | TrackState::TurningOff)
    }

    pub fn as_u8(self) -> u8 {
        match self {
            TrackState::Off => 0,
            TrackState::TurningOn => 1,
            TrackState::On => 2,
            TrackState::TurningOff => 3,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => TrackState::TurningOn,
            2 => TrackState::On,
            3 => TrackState::TurningOff,
            _ => TrackState::Off,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    TurnOn,
    TurnOff,
}

/// A registered condition and the track effects it drives
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub condition: PredicateId,
    pub effects: Vec<(usize, Effect)>,
    /// Skip undoing effects while the condition is false
    pub one_way: bool,
}

/// One slot of an onset or release trigger table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSlot {
    pub note: u8,
    pub velocity: u8,
    pub enabled: bool,
}

impl TriggerSlot {
    pub const fn new(note: u8, enabled: bool) -> Self {
        Self {
            note,
            velocity: DEFAULT_TRIGGER_VELOCITY,
            enabled,
        }
    }
}

pub const DEFAULT_TRIGGER_VELOCITY: u8 = 110;
pub const ONSET_TRIGGER_SLOTS: usize = 3;
pub const RELEASE_TRIGGER_SLOTS: usize = 2;

pub fn default_onset_triggers() -> [TriggerSlot; ONSET_TRIGGER_SLOTS] {
    [TriggerSlot::new(36, true), TriggerSlot::new(46, false), TriggerSlot::new(52, false)]
}

pub fn default_release_triggers() -> [TriggerSlot; RELEASE_TRIGGER_SLOTS] {
    [TriggerSlot::new(39, true), TriggerSlot::new(53, false)]
}

/// Wires tracks, predicates and bindings before streaming starts
///
/// Nothing is checked until [`StateMachineBuilder::build`], except that
/// predicates can only reference predicates added before them.
#[derive(Debug, Clone)]
pub struct StateMachineBuilder {
    sample_rate: f64,
    tempo: TempoSettings,
    tracks: Vec<SequenceTrack>,
    states: Vec<TrackState>,
    arena: PredicateArena,
    bindings: Vec<Binding>,
    gates: Vec<GateBinding>,
    onset_triggers: [TriggerSlot; ONSET_TRIGGER_SLOTS],
    release_triggers: [TriggerSlot; RELEASE_TRIGGER_SLOTS],
}

impl StateMachineBuilder {
    pub fn new(sample_rate: f64, tempo: TempoSettings) -> Self {
        Self {
            sample_rate,
            tempo,
            tracks: Vec::new(),
            states: Vec::new(),
            arena: PredicateArena::new(),
            bindings: Vec::new(),
            gates: Vec::new(),
            onset_triggers: default_onset_triggers(),
            release_triggers: default_release_triggers(),
        }
    }

    /// Add a track, initially `Off`. Returns its index.
    pub fn track(&mut self, track: SequenceTrack) -> usize {
        self.track_with_state(track, TrackState::Off)
    }

    pub fn track_with_state(&mut self, track: SequenceTrack, state: TrackState) -> usize {
        self.tracks.push(track);
        self.states.push(state);
        self.tracks.len() - 1
    }

    pub fn predicate(&mut self, predicate: Predicate) -> Result<PredicateId> {
        self.arena.add(predicate)
    }

    pub fn and(&mut self, a: PredicateId, b: PredicateId) -> Result<PredicateId> {
        self.arena.add(Predicate::And(a, b))
    }

    pub fn or(&mut self, a: PredicateId, b: PredicateId) -> Result<PredicateId> {
        self.arena.add(Predicate::Or(a, b))
    }

    pub fn not(&mut self, a: PredicateId) -> Result<PredicateId> {
        self.arena.add(Predicate::Not(a))
    }

    /// Register a condition driving track effects
    pub fn bind(&mut self, condition: PredicateId, effects: &[(usize, Effect)], one_way: bool) -> &mut Self {
        self.bindings.push(Binding {
            condition,
            effects: effects.to_vec(),
            one_way,
        });
        self
    }

    /// Register a gate over a trigger table. The returned node observes it and is always false.
    pub fn gate(
        &mut self,
        condition: PredicateId,
        table: GateTable,
        slots: &[(usize, bool)],
        one_way: bool,
    ) -> Result<(GateId, PredicateId)> {
        let gate = GateId(self.gates.len());
        self.gates.push(GateBinding {
            condition,
            table,
            slots: slots.to_vec(),
            one_way,
        });
        let node = self.arena.add(Predicate::Gate(gate))?;
        Ok((gate, node))
    }

    fn validate(&self) -> Result<()> {
        let count = self.tracks.len();
        for binding in &self.bindings {
            if !self.arena.contains(binding.condition) {
                return Err(TactusError::UnknownPredicate(binding.condition.index()));
            }
            for &(index, _) in &binding.effects {
                if index >= count {
                    return Err(TactusError::TrackOutOfRange { index, count });
                }
            }
        }
        for gate in &self.gates {
            if !self.arena.contains(gate.condition) {
                return Err(TactusError::UnknownPredicate(gate.condition.index()));
            }
            let slots = match gate.table {
                GateTable::Onset => ONSET_TRIGGER_SLOTS,
                GateTable::Release => RELEASE_TRIGGER_SLOTS,
            };
            if let Some(&(slot, _)) = gate.slots.iter().find(|(slot, _)| *slot >= slots) {
                return Err(TactusError::GateSlotOutOfRange { slot, count: slots });
            }
        }
        if let Some(gate) = self.arena.gate_refs().find(|g| g.index() >= self.gates.len()) {
            return Err(TactusError::UnknownGate(gate.index()));
        }
        Ok(())
    }

    pub fn build(self) -> Result<StateMachine> {
        self.validate()?;
        debug!(
            tracks = self.tracks.len(),
            predicates = self.arena.len(),
            bindings = self.bindings.len(),
            gates = self.gates.len(),
            "State machine built"
        );
        Ok(StateMachine {
            clock: BeatClock::new(self.sample_rate, self.tempo.bpm),
            adapter: TempoAdapter::from_settings(&self.tempo),
            tracks: self.tracks,
            states: self.states,
            arena: self.arena,
            bindings: self.bindings,
            gates: self.gates,
            onset_triggers: self.onset_triggers,
            release_triggers: self.release_triggers,
        })
    }
}

/// Owns the beat clock, tracks and predicate graph, and runs them once per block
#[derive(Debug, Clone)]
pub struct StateMachine {
    clock: BeatClock,
    adapter: TempoAdapter,
    tracks: Vec<SequenceTrack>,
    states: Vec<TrackState>,
    arena: PredicateArena,
    bindings: Vec<Binding>,
    gates: Vec<GateBinding>,
    onset_triggers: [TriggerSlot; ONSET_TRIGGER_SLOTS],
    release_triggers: [TriggerSlot; RELEASE_TRIGGER_SLOTS],
}

impl StateMachine {
    pub fn builder(sample_rate: f64, tempo: TempoSettings) -> StateMachineBuilder {
        StateMachineBuilder::new(sample_rate, tempo)
    }

    // ------------------------------------------------------------------
    // Hysteresis

    pub fn apply_effect(&mut self, track: usize, effect: Effect) {
        let Some(state) = self.states.get_mut(track) else {
            return;
        };
        *state = match (effect, *state) {
            (Effect::TurnOn, TrackState::Off | TrackState::TurningOff) => TrackState::TurningOn,
            (Effect::TurnOff, TrackState::On | TrackState::TurningOn) => TrackState::TurningOff,
            (_, current) => current,
        };
    }

    pub fn undo_effect(&mut self, track: usize, effect: Effect) {
        let Some(state) = self.states.get_mut(track) else {
            return;
        };
        *state = match (effect, *state) {
            (Effect::TurnOff, TrackState::Off | TrackState::TurningOff) => TrackState::TurningOn,
            (Effect::TurnOn, TrackState::On | TrackState::TurningOn) => TrackState::TurningOff,
            (_, current) => current,
        };
    }

    /// Force a track state, bypassing hysteresis
    pub fn set_state(&mut self, track: usize, state: TrackState) -> Result<()> {
        let count = self.states.len();
        let slot = self
            .states
            .get_mut(track)
            .ok_or(TactusError::TrackOutOfRange { index: track, count })?;
        *slot = state;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Per-block steps

    /// Evaluate all predicates, apply or undo each binding in order, then apply gates
    pub fn evaluate_predicates(&mut self, ctx: &BlockContext) {
        self.arena.evaluate_all(ctx);

        for b in 0..self.bindings.len() {
            let fired = self.arena.truth(self.bindings[b].condition);
            if !fired && self.bindings[b].one_way {
                continue;
            }
            for e in 0..self.bindings[b].effects.len() {
                let (track, effect) = self.bindings[b].effects[e];
                if fired {
                    self.apply_effect(track, effect);
                } else {
                    self.undo_effect(track, effect);
                }
            }
        }

        for gate in &self.gates {
            let fired = self.arena.truth(gate.condition);
            if !fired && gate.one_way {
                continue;
            }
            let table: &mut [TriggerSlot] = match gate.table {
                GateTable::Onset => &mut self.onset_triggers,
                GateTable::Release => &mut self.release_triggers,
            };
            for &(slot, enabled) in &gate.slots {
                if let Some(trigger) = table.get_mut(slot) {
                    trigger.enabled = if fired { enabled } else { !enabled };
                }
            }
        }
    }

    /// Nudge tempo toward this block's onset. Returns whether the tempo moved.
    pub fn adapt_tempo(&mut self, onset: bool, density: f32) -> bool {
        self.adapter.adapt(&mut self.clock, onset, density)
    }

    /// Advance the clock, commit tracks whose cycle restarted and feed sounding tracks
    pub fn advance_clock(&mut self, samples: usize) -> f64 {
        let advanced = self.clock.advance(samples);
        let position = self.clock.position();
        for (track, state) in self.tracks.iter_mut().zip(self.states.iter_mut()) {
            if self.clock.wrapped(track.num_beats() as f64, advanced) {
                *state = match *state {
                    TrackState::TurningOn => TrackState::On,
                    TrackState::TurningOff => TrackState::Off,
                    settled => settled,
                };
            }
            if state.is_sounding() {
                track.set_beat_position(position);
            }
        }
        advanced
    }

    /// Run the decision steps of one block in order
    pub fn update(&mut self, ctx: &BlockContext, samples: usize) -> f64 {
        self.evaluate_predicates(ctx);
        self.adapt_tempo(ctx.onset, ctx.density);
        self.advance_clock(samples)
    }

    /// Trigger notes for this block's detection from the enabled table slots
    pub fn emit_triggers(&self, detection: Detection, events: &mut EventBuffer) {
        if detection.onset {
            for (slot, trigger) in self.onset_triggers.iter().enumerate().filter(|(_, t)| t.enabled) {
                events.trigger(EventSource::Onset(slot), trigger.note, trigger.velocity);
            }
        }
        if detection.release {
            for (slot, trigger) in self.release_triggers.iter().enumerate().filter(|(_, t)| t.enabled) {
                events.trigger(EventSource::Release(slot), trigger.note, trigger.velocity);
            }
        }
    }

    /// Poll every sounding track and emit its step hits
    pub fn poll_tracks(&mut self, events: &mut EventBuffer) {
        for (index, (track, state)) in self.tracks.iter_mut().zip(self.states.iter()).enumerate() {
            if state.is_sounding() && track.poll() {
                let note = track.note();
                events.trigger(EventSource::Track(index), note.note, note.velocity);
            }
        }
    }

    // ------------------------------------------------------------------
    // Control-side setters

    pub fn set_tempo(&mut self, bpm: f64) -> bool {
        self.clock.set_tempo(bpm)
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.clock.set_sample_rate(sample_rate);
    }

    /// Update adaptation from control settings; rejected fields keep their current value
    pub fn set_adaptation(&mut self, settings: &TempoSettings) {
        self.adapter.apply_settings(settings);
    }

    /// Edit a track's pattern, size or note
    pub fn with_track_mut<R>(&mut self, index: usize, edit: impl FnOnce(&mut SequenceTrack) -> R) -> Option<R> {
        self.tracks.get_mut(index).map(edit)
    }

    // ------------------------------------------------------------------
    // Read-only views

    pub fn clock(&self) -> &BeatClock {
        &self.clock
    }

    pub fn beat_position(&self) -> f64 {
        self.clock.position()
    }

    pub fn bpm(&self) -> f64 {
        self.clock.bpm()
    }

    pub fn adapter(&self) -> &TempoAdapter {
        &self.adapter
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn track(&self, index: usize) -> Option<&SequenceTrack> {
        self.tracks.get(index)
    }

    pub fn tracks(&self) -> &[SequenceTrack] {
        &self.tracks
    }

    pub fn track_state(&self, index: usize) -> Option<TrackState> {
        self.states.get(index).copied()
    }

    pub fn states(&self) -> &[TrackState] {
        &self.states
    }

    pub fn predicates(&self) -> &PredicateArena {
        &self.arena
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn gates(&self) -> &[GateBinding] {
        &self.gates
    }

    pub fn onset_triggers(&self) -> &[TriggerSlot] {
        &self.onset_triggers
    }

    pub fn release_triggers(&self) -> &[TriggerSlot] {
        &self.release_triggers
    }
}
