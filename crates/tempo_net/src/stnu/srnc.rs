//! Witness-cycle helpers: expanding derived edges back to input edges
//! and valuing a cycle.
//!
//! The cycle finder records, for every ordinary edge it materializes, the
//! sequence of edges the derivation walked. Expanding a witness replaces
//! each derived edge by its sequence, recursively, until only edges of
//! the input graph remain.

use crate::graph::{EdgeKey, NetGraph};
use alloc::vec::Vec;
use tempo_core::collections::HashMap;
use tempo_core::weight::{INF, sum_saturating};
use tempo_core::Weight;

/// The value an edge contributes to a semi-reducible cycle: the smallest
/// of its ordinary, lower-case and upper-case values
pub(crate) fn edge_value(g: &NetGraph, key: EdgeKey) -> Weight {
    let Some(e) = g.edge(key) else { return 0 };
    let mut v = INF;
    if let Some(w) = e.ordinary {
        v = v.min(w);
    }
    if let Some(lc) = e.lower {
        v = v.min(lc.value);
    }
    if let Some(uc) = e.upper {
        v = v.min(uc.value);
    }
    if v == INF { 0 } else { v }
}

/// Sums the edge values of a cycle in order
pub(crate) fn cycle_value(g: &NetGraph, edges: &[EdgeKey]) -> Weight {
    edges
        .iter()
        .fold(0, |acc, k| sum_saturating(acc, edge_value(g, *k)))
}

/// Replaces every derived edge by its originating sequence, recursively
pub(crate) fn expand_edges(
    derivations: &HashMap<EdgeKey, Vec<EdgeKey>>,
    edges: &[EdgeKey],
) -> Vec<EdgeKey> {
    let mut out = Vec::new();
    // derivations only ever reference older edges, so the nesting depth
    // is bounded by the number of recorded derivations
    let depth = derivations.len() + 1;
    for &e in edges {
        expand_one(derivations, e, depth, &mut out);
    }
    out
}

fn expand_one(
    derivations: &HashMap<EdgeKey, Vec<EdgeKey>>,
    edge: EdgeKey,
    depth: usize,
    out: &mut Vec<EdgeKey>,
) {
    if depth > 0 {
        if let Some(seq) = derivations.get(&edge) {
            for &inner in seq {
                expand_one(derivations, inner, depth - 1, out);
            }
            return;
        }
    }
    out.push(edge);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{CaseValue, ConstraintType, NetGraph};

    #[test]
    fn expansion_recurses_through_nested_derivations() {
        let mut g = NetGraph::new();
        let a = g.add_node("A").unwrap();
        let b = g.add_node("B").unwrap();
        let c = g.add_node("C").unwrap();
        let ab = g.add_edge("ab", a, b, ConstraintType::Requirement).unwrap();
        let bc = g.add_edge("bc", b, c, ConstraintType::Requirement).unwrap();
        let ac = g.add_edge("ac", a, c, ConstraintType::Derived).unwrap();
        let ca = g.add_edge("ca", c, a, ConstraintType::Requirement).unwrap();
        let mut derivations: HashMap<EdgeKey, Vec<EdgeKey>> = HashMap::default();
        derivations.insert(ac, alloc::vec![ab, bc]);
        let expanded = expand_edges(&derivations, &[ac, ca]);
        assert_eq!(expanded, alloc::vec![ab, bc, ca]);
    }

    #[test]
    fn cycle_value_prefers_case_values() {
        let mut g = NetGraph::new();
        let a = g.add_node("A").unwrap();
        let c = g.add_node("C").unwrap();
        let lo = g.add_edge("lo", a, c, ConstraintType::Contingent).unwrap();
        g[lo].lower = Some(CaseValue { node: c, value: 1 });
        g[lo].ordinary = Some(9);
        let up = g.add_edge("up", c, a, ConstraintType::Contingent).unwrap();
        g[up].upper = Some(CaseValue { node: c, value: -9 });
        assert_eq!(cycle_value(&g, &[lo, up]), 1 - 9);
    }
}
