//! A compact mapping `Label → Weight`.
//!
//! The compaction invariant: no entry is dominated by another one. An
//! entry `(ℓ, v)` is dominated by `(ℓ₁, v₁)` when `ℓ` subsumes `ℓ₁` and
//! `v₁ ≤ v`: in every scenario where `ℓ` applies, `ℓ₁` applies too and
//! already enforces a bound at least as strong.

use super::Label;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;
use tempo_core::Weight;

/// Map from labels to weights, kept compact under label subsumption
///
/// Iteration is in label order, which is the canonical order for
/// reproducible rule application.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct LabeledWeights {
    map: BTreeMap<Label, Weight>,
}

impl LabeledWeights {
    /// Creates an empty map
    pub const fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    /// Creates a map holding a single pair
    pub fn singleton(label: Label, value: Weight) -> Self {
        let mut map = Self::new();
        map.put(label, value);
        map
    }

    /// Returns `true` when the map holds no pair
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Number of pairs in the map
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// The weight stored for exactly `label`, if any
    pub fn get(&self, label: &Label) -> Option<Weight> {
        self.map.get(label).copied()
    }

    /// The smallest weight over all pairs, or `None` when empty
    pub fn min_value(&self) -> Option<Weight> {
        self.map.values().copied().min()
    }

    /// The smallest weight among pairs whose label is subsumed by
    /// `scenario` (i.e. the bound in force in that scenario)
    pub fn min_value_subsumed_by(&self, scenario: &Label) -> Option<Weight> {
        self.map
            .iter()
            .filter(|(l, _)| scenario.subsumes(l))
            .map(|(_, v)| *v)
            .min()
    }

    /// Inserts `(label, value)` unless a dominating pair is present;
    /// removes every pair the new one dominates
    ///
    /// Returns `true` when the map changed.
    pub fn put(&mut self, label: Label, value: Weight) -> bool {
        if value == tempo_core::INF {
            return false;
        }
        if self
            .map
            .iter()
            .any(|(l, v)| label.subsumes(l) && *v <= value)
        {
            return false;
        }
        let dominated: Vec<Label> = self
            .map
            .iter()
            .filter(|(l, v)| l.subsumes(&label) && value <= **v)
            .map(|(l, _)| *l)
            .collect();
        for l in dominated {
            self.map.remove(&l);
        }
        self.map.insert(label, value);
        true
    }

    /// Applies [`put`](Self::put) for every pair of `other`
    ///
    /// Returns `true` when any pair was inserted.
    pub fn merge(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (l, v) in other.iter() {
            changed |= self.put(l, v);
        }
        changed
    }

    /// Removes the pair with exactly `label`, returning its weight
    pub fn remove(&mut self, label: &Label) -> Option<Weight> {
        self.map.remove(label)
    }

    /// Iterates pairs in label order
    pub fn iter(&self) -> impl Iterator<Item = (Label, Weight)> + '_ {
        self.map.iter().map(|(l, v)| (*l, *v))
    }

    /// Retains only the pairs for which `keep` returns `true`
    pub fn retain(&mut self, mut keep: impl FnMut(&Label, Weight) -> bool) {
        self.map.retain(|l, v| keep(l, *v));
    }
}

impl fmt::Display for LabeledWeights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (l, v) in self.iter() {
            write!(f, " ({v}, {l})")?;
        }
        write!(f, " }}")
    }
}

impl fmt::Debug for LabeledWeights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromIterator<(Label, Weight)> for LabeledWeights {
    fn from_iter<T: IntoIterator<Item = (Label, Weight)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (l, v) in iter {
            map.put(l, v);
        }
        map
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::tests_support::label;
    use tempo_core::NEG_INF;

    #[test]
    fn dominated_pair_is_rejected() {
        let mut m = LabeledWeights::new();
        assert!(m.put(Label::empty(), 3));
        // (a, 5): in every `a` scenario, ⊤ already enforces 3
        assert!(!m.put(label("a"), 5));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn dominating_pair_evicts() {
        let mut m = LabeledWeights::new();
        assert!(m.put(label("a¬b"), 7));
        assert!(m.put(label("a"), 2));
        assert_eq!(m.len(), 1);
        assert_eq!(m.get(&label("a")), Some(2));
    }

    #[test]
    fn incomparable_labels_coexist() {
        let mut m = LabeledWeights::new();
        assert!(m.put(label("a"), 1));
        assert!(m.put(label("¬a"), 1));
        assert!(m.put(label("b"), 0));
        assert_eq!(m.len(), 3);
    }

    #[test]
    fn tighter_value_replaces_same_label() {
        let mut m = LabeledWeights::new();
        m.put(label("a"), 4);
        assert!(m.put(label("a"), 1));
        assert!(!m.put(label("a"), 4));
        assert_eq!(m.get(&label("a")), Some(1));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn neg_inf_dominates_everything_under_its_label() {
        let mut m = LabeledWeights::new();
        m.put(label("¿a"), -3);
        assert!(m.put(label("¿a"), NEG_INF));
        assert!(!m.put(label("¿ab"), -100));
        assert_eq!(m.min_value(), Some(NEG_INF));
    }

    #[test]
    fn scenario_lookup_picks_applicable_minimum() {
        let m: LabeledWeights = [
            (Label::empty(), 10),
            (label("a"), 5),
            (label("¬a"), 7),
            (label("ab"), 2),
        ]
        .into_iter()
        .collect();
        assert_eq!(m.min_value_subsumed_by(&label("ab")), Some(2));
        assert_eq!(m.min_value_subsumed_by(&label("a¬b")), Some(5));
        assert_eq!(m.min_value_subsumed_by(&label("¬a")), Some(7));
        assert_eq!(m.min_value_subsumed_by(&Label::empty()), Some(10));
    }
}
