//! tactus-core: Onset detection and the adaptive track state machine

pub mod clock;
pub mod config;
pub mod detector;
pub mod engine;
mod error;
pub mod events;
pub mod predicate;
pub mod preset;
mod ring;
pub mod state_machine;
pub mod tempo;
pub mod track;

pub use clock::{BeatClock, TempoSettings};
pub use config::{EngineConfig, TrackConfig};
pub use detector::{Detection, DetectorSettings, OnsetDetector};
pub use engine::RhythmEngine;
pub use error::{Result, TactusError};
pub use events::{EventBuffer, EventSource, NoteEvent, NoteKind};
pub use predicate::{BlockContext, GateBinding, GateId, GateTable, Predicate, PredicateArena, PredicateId};
pub use preset::{Preset, drum_mesh};
pub use state_machine::{Binding, Effect, StateMachine, StateMachineBuilder, TrackState, TriggerSlot};
pub use tempo::TempoAdapter;
pub use track::{SequenceTrack, TrackNote};
