//! Error types for tactus

use thiserror::Error;

/// Setup-time wiring errors. Nothing on the audio thread produces these.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TactusError {
    #[error("Track index {index} out of range ({count} tracks)")]
    TrackOutOfRange { index: usize, count: usize },
    #[error("Unknown predicate: {0}")]
    UnknownPredicate(usize),
    #[error("Predicate {node} references child {child} that is not defined before it")]
    ForwardReference { node: usize, child: usize },
    #[error("Unknown gate: {0}")]
    UnknownGate(usize),
    #[error("Gate slot {slot} out of range ({count} slots)")]
    GateSlotOutOfRange { slot: usize, count: usize },
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, TactusError>;
