use crate::label::{Label, LabeledWeights, Proposition};
use alloc::string::String;
use slotmap::new_key_type;
use tempo_core::Weight;

new_key_type! {
    /// A unique identifier for a time-point in a [`NetGraph`](super::NetGraph)
    pub struct NodeKey;
    /// A unique identifier for an edge in a [`NetGraph`](super::NetGraph)
    pub struct EdgeKey;
}

/// A time-point of the network
///
/// The name is the stable identity; it is owned by the graph's registry
/// and cannot change after insertion. `potential` and `labeled_potential`
/// are engine-owned scratch state, carried here so that a check can be
/// resumed on an already-mutated graph.
#[derive(Clone, Debug)]
pub struct TimePoint {
    pub(super) name: String,
    /// Scenario restriction: the node is executed only when this label is
    /// satisfied. Empty for STNU time-points.
    pub label: Label,
    /// For an observer node, the proposition whose truth value the node
    /// decides when executed
    pub observed: Option<Proposition>,
    /// Whether this time-point is the contingent end of a contingent link
    pub contingent: bool,
    /// Node potential maintained by the potential engine
    pub potential: Weight,
    /// Labeled potential for conditional networks
    pub labeled_potential: LabeledWeights,
    /// Opaque layout metadata, preserved for round-tripping
    pub x: f64,
    /// Opaque layout metadata, preserved for round-tripping
    pub y: f64,
}

impl TimePoint {
    /// A fresh time-point with the empty label and no roles
    pub fn new() -> Self {
        Self {
            name: String::new(),
            label: Label::empty(),
            observed: None,
            contingent: false,
            potential: 0,
            labeled_potential: LabeledWeights::new(),
            x: 0.0,
            y: 0.0,
        }
    }

    /// The unique name of this time-point
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Default for TimePoint {
    fn default() -> Self {
        Self::new()
    }
}
