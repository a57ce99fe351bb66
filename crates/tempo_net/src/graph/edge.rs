use super::NodeKey;
use crate::label::LabeledWeights;
use alloc::string::String;
use core::fmt;
use tempo_core::Weight;

/// Provenance of an edge's constraints
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, derive_more::Display)]
pub enum ConstraintType {
    /// A constraint stated in the input network
    #[default]
    #[display("requirement")]
    Requirement,
    /// One side of a contingent link
    #[display("contingent")]
    Contingent,
    /// A constraint produced by propagation
    #[display("derived")]
    Derived,
    /// A bookkeeping constraint (stand-ins, horizon edges)
    #[display("internal")]
    Internal,
}

/// A lower- or upper-case labeled value: a contingent time-point and a
/// weight
///
/// On an edge `A → C` a lower value `(c, x)` records the minimum duration
/// of the link activated by `A`; on an edge `V → A` an upper value
/// `(C, −v)` is the contingent upper bound (when `V = C`) or a wait
/// (otherwise).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CaseValue {
    /// The contingent time-point the value refers to
    pub node: NodeKey,
    /// The weight, negative for upper-case values
    pub value: Weight,
}

/// An edge of the network
///
/// The value slots are independent: a single edge may carry an ordinary
/// value and a wait at the same time. An edge with every slot empty is
/// removed by cleanup passes.
#[derive(Clone, Debug)]
pub struct Edge {
    pub(super) name: String,
    pub(super) src: NodeKey,
    pub(super) dst: NodeKey,
    /// Provenance tag, dispatched on by the propagation rules
    pub kind: ConstraintType,
    /// Ordinary value: `dst − src ≤ w`
    pub ordinary: Option<Weight>,
    /// Lower-case value of a contingent link `src → dst`
    pub lower: Option<CaseValue>,
    /// Upper-case value (contingent upper bound or wait)
    pub upper: Option<CaseValue>,
    /// Labeled values for conditional networks
    pub labeled: LabeledWeights,
}

impl Edge {
    pub(super) fn new(name: String, src: NodeKey, dst: NodeKey, kind: ConstraintType) -> Self {
        Self {
            name,
            src,
            dst,
            kind,
            ordinary: None,
            lower: None,
            upper: None,
            labeled: LabeledWeights::new(),
        }
    }

    /// The unique name of this edge
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source time-point
    pub fn src(&self) -> NodeKey {
        self.src
    }

    /// Destination time-point
    pub fn dst(&self) -> NodeKey {
        self.dst
    }

    /// Returns `true` when no value of any kind is present
    pub fn is_empty(&self) -> bool {
        self.ordinary.is_none()
            && self.lower.is_none()
            && self.upper.is_none()
            && self.labeled.is_empty()
    }

    /// Tightens the ordinary value to `min(current, w)`
    ///
    /// Returns `true` when the edge changed.
    pub fn merge_ordinary(&mut self, w: Weight) -> bool {
        match self.ordinary {
            Some(cur) if cur <= w => false,
            _ => {
                self.ordinary = Some(w);
                true
            }
        }
    }

    /// Tightens the upper-case value for `node` to `min(current, w)`
    ///
    /// An upper value for a different contingent node is a contract
    /// violation: waits always target the activation of exactly one link.
    pub fn merge_upper(&mut self, node: NodeKey, w: Weight) -> bool {
        match &mut self.upper {
            Some(case) => {
                debug_assert_eq!(case.node, node, "upper-case value for a different contingent");
                if case.value <= w {
                    false
                } else {
                    case.value = w;
                    true
                }
            }
            None => {
                self.upper = Some(CaseValue { node, value: w });
                true
            }
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.kind)?;
        if let Some(w) = self.ordinary {
            write!(f, " {w}")?;
        }
        if let Some(lc) = &self.lower {
            write!(f, " LC:{}", lc.value)?;
        }
        if let Some(uc) = &self.upper {
            write!(f, " UC:{}", uc.value)?;
        }
        if !self.labeled.is_empty() {
            write!(f, " {}", self.labeled)?;
        }
        Ok(())
    }
}
