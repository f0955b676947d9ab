//! Composable transition predicates
//!
//! Predicates form a DAG stored in a flat arena. A node may only reference
//! nodes added before it, so evaluating the arena front to back visits every
//! child before its parent and fills the whole truth table in one pass.

use serde::{Deserialize, Serialize};

use crate::clock::beat_distance;
use crate::detector::OnsetDetector;
use crate::error::{Result, TactusError};

/// Handle to a node in a [`PredicateArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PredicateId(usize);

impl PredicateId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle to a gate binding registered on the state machine builder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GateId(pub(crate) usize);

impl GateId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A single predicate node
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Predicate {
    /// Onset density (onsets per second) above the threshold
    DensityAbove(f32),
    /// Downsampled mean amplitude above the threshold
    MeanAmplitudeAbove(f32),
    /// Volume fell at every step over `lookback` seconds (or did not, when inverted)
    TrendDecreasing { lookback: f32, invert: bool },
    /// An onset or release happened within `threshold` beats of a point in a beat cycle
    NearBeat {
        beat: u32,
        sub_beat: u32,
        total_beats: u32,
        total_sub_beats: u32,
        threshold: f64,
    },
    And(PredicateId, PredicateId),
    Or(PredicateId, PredicateId),
    Not(PredicateId),
    /// Observes a gate binding. Always false; the gate acts through its binding.
    Gate(GateId),
}

impl Predicate {
    /// Child nodes referenced by this node
    pub fn children(&self) -> [Option<PredicateId>; 2] {
        match *self {
            Predicate::And(a, b) | Predicate::Or(a, b) => [Some(a), Some(b)],
            Predicate::Not(a) => [Some(a), None],
            _ => [None, None],
        }
    }
}

/// Everything a predicate may observe for the current block
///
/// Built once per block after detection and shared read-only by every node.
#[derive(Clone, Copy)]
pub struct BlockContext<'a> {
    pub detector: &'a OnsetDetector,
    pub onset: bool,
    pub release: bool,
    pub density: f32,
    pub mean_amplitude: f32,
    pub beat_position: f64,
}

impl<'a> BlockContext<'a> {
    pub fn new(detector: &'a OnsetDetector, beat_position: f64) -> Self {
        let detection = detector.detection();
        Self {
            detector,
            onset: detection.onset,
            release: detection.release,
            density: detector.density(),
            mean_amplitude: detector.mean_amplitude(),
            beat_position,
        }
    }

    /// Whether anything was detected this block
    pub fn event(&self) -> bool {
        self.onset || self.release
    }
}

#[derive(Debug, Clone, Default)]
pub struct PredicateArena {
    nodes: Vec<Predicate>,
    truth: Vec<bool>,
}

impl PredicateArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Its children must already be in the arena.
    pub fn add(&mut self, predicate: Predicate) -> Result<PredicateId> {
        let node = self.nodes.len();
        for child in predicate.children().into_iter().flatten() {
            if child.0 >= node {
                return Err(TactusError::ForwardReference { node, child: child.0 });
            }
        }
        self.nodes.push(predicate);
        self.truth.push(false);
        Ok(PredicateId(node))
    }

    pub fn get(&self, id: PredicateId) -> Option<&Predicate> {
        self.nodes.get(id.0)
    }

    pub fn contains(&self, id: PredicateId) -> bool {
        id.0 < self.nodes.len()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PredicateId, &Predicate)> {
        self.nodes.iter().enumerate().map(|(i, p)| (PredicateId(i), p))
    }

    /// Gates observed by `Gate` nodes
    pub fn gate_refs(&self) -> impl Iterator<Item = GateId> + '_ {
        self.nodes.iter().filter_map(|p| match p {
            Predicate::Gate(gate) => Some(*gate),
            _ => None,
        })
    }

    /// Evaluate every node once, front to back, into the truth table
    pub fn evaluate_all(&mut self, ctx: &BlockContext) {
        for i in 0..self.nodes.len() {
            let value = match self.nodes[i] {
                Predicate::And(a, b) => self.truth[a.0] && self.truth[b.0],
                Predicate::Or(a, b) => self.truth[a.0] || self.truth[b.0],
                Predicate::Not(a) => !self.truth[a.0],
                leaf => evaluate_leaf(&leaf, ctx),
            };
            self.truth[i] = value;
        }
    }

    /// Result of the last `evaluate_all` for a node
    pub fn truth(&self, id: PredicateId) -> bool {
        self.truth.get(id.0).copied().unwrap_or(false)
    }
}

fn evaluate_leaf(predicate: &Predicate, ctx: &BlockContext) -> bool {
    match *predicate {
        Predicate::DensityAbove(threshold) => ctx.density > threshold,
        Predicate::MeanAmplitudeAbove(threshold) => ctx.mean_amplitude > threshold,
        Predicate::TrendDecreasing { lookback, invert } => ctx.detector.is_trend_decreasing(lookback) != invert,
        Predicate::NearBeat {
            beat,
            sub_beat,
            total_beats,
            total_sub_beats,
            threshold,
        } => {
            ctx.event() && beat_distance(ctx.beat_position, beat, sub_beat, total_beats, total_sub_beats) < threshold
        }
        Predicate::Gate(_) => false,
        Predicate::And(..) | Predicate::Or(..) | Predicate::Not(_) => false,
    }
}

/// Which trigger-note table a gate writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateTable {
    Onset,
    Release,
}

/// Side effect of a gate: enables or disables trigger-table slots from a condition
#[derive(Debug, Clone, PartialEq)]
pub struct GateBinding {
    pub condition: PredicateId,
    pub table: GateTable,
    /// (slot, enabled state written while the condition holds)
    pub slots: Vec<(usize, bool)>,
    /// Leave slots untouched while the condition is false
    pub one_way: bool,
}
