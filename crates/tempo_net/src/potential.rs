//! The potential engine: single-source shortest paths over the
//! lower/ordinary sub-graph.
//!
//! A potential `h` satisfies `h(v) ≤ h(u) + w` for every lower/ordinary
//! edge `u → v`, so `h(u) + w − h(v)` is a non-negative Dijkstra weight
//! for every later pass. `h` comes from Bellman-Ford off a virtual source
//! reaching every node at 0; after new edges are materialized into an
//! activation node, [`update_potential`] repairs `h` incrementally.

use crate::graph::{Edge, EdgeKey, NetGraph, NodeKey};
use crate::pq::MinQueue;
use alloc::vec::Vec;
use slotmap::SecondaryMap;
use tempo_core::collections::HashMap;
use tempo_core::weight::{INF, sum_saturating};
use tempo_core::Weight;

/// Per-node potentials
pub type Potentials = SecondaryMap<NodeKey, Weight>;

/// A negative cycle over lower/ordinary edges, in traversal order
#[derive(Clone, Debug)]
pub struct NegativeCycle {
    /// The edges of the cycle
    pub edges: Vec<EdgeKey>,
}

impl NegativeCycle {
    /// Sum of the cycle's lower/ordinary weights
    pub fn value(&self, g: &NetGraph) -> Weight {
        self.edges
            .iter()
            .filter_map(|k| g.edge(*k).and_then(ol_weight))
            .fold(0, sum_saturating)
    }
}

/// The weight an edge contributes to the lower/ordinary sub-graph:
/// `min(ordinary, lower-case)`, upper-case values excluded
pub(crate) fn ol_weight(e: &Edge) -> Option<Weight> {
    let mut w = e.ordinary.unwrap_or(INF);
    if let Some(lc) = &e.lower {
        w = w.min(lc.value);
    }
    (w != INF).then_some(w)
}

/// Bellman-Ford from a virtual source reaching every node with weight 0
///
/// At most `|V| − 1` relaxation rounds; one more round still relaxing
/// means a negative cycle, which is extracted and returned.
pub fn sssp_bellman_ford_ol(g: &NetGraph) -> Result<Potentials, NegativeCycle> {
    let nodes = g.node_keys();
    let edges = g.edge_keys();
    let mut dist: Potentials = SecondaryMap::new();
    let mut pred: SecondaryMap<NodeKey, EdgeKey> = SecondaryMap::new();
    for &n in &nodes {
        dist.insert(n, 0);
    }

    for _round in 1..nodes.len() {
        let mut changed = false;
        for &ek in &edges {
            let e = &g[ek];
            let Some(w) = ol_weight(e) else { continue };
            let cand = sum_saturating(dist[e.src()], w);
            if cand < dist[e.dst()] {
                dist[e.dst()] = cand;
                pred.insert(e.dst(), ek);
                changed = true;
            }
        }
        if !changed {
            return Ok(dist);
        }
    }

    // one extra round: any remaining relaxation exposes a negative cycle
    for &ek in &edges {
        let e = &g[ek];
        let Some(w) = ol_weight(e) else { continue };
        if sum_saturating(dist[e.src()], w) < dist[e.dst()] {
            pred.insert(e.dst(), ek);
            return Err(extract_cycle(g, &pred, e.dst(), nodes.len()));
        }
    }
    Ok(dist)
}

/// Incrementally repairs `h` after new lower/ordinary edges were added
/// into `a`
///
/// Only nodes whose shortest-path bound actually drops are revisited; the
/// queue is ordered by drop size (largest first), which makes each pop
/// final. A second pop of the same node certifies a negative cycle
/// through `a`.
pub fn update_potential(
    g: &NetGraph,
    h: &mut Potentials,
    a: NodeKey,
) -> Result<(), NegativeCycle> {
    let n = g.node_count();
    let mut snapshot: HashMap<NodeKey, Weight> = HashMap::default();
    let mut pred: SecondaryMap<NodeKey, EdgeKey> = SecondaryMap::new();
    let mut pops: HashMap<NodeKey, u32> = HashMap::default();
    let mut queue: MinQueue<NodeKey> = MinQueue::new();

    let mut best = h[a];
    for ek in g.in_edges(a) {
        let e = &g[ek];
        let Some(w) = ol_weight(e) else { continue };
        let cand = sum_saturating(h[e.src()], w);
        if cand < best {
            best = cand;
            pred.insert(a, ek);
        }
    }
    if best >= h[a] {
        return Ok(());
    }
    snapshot.insert(a, h[a]);
    h[a] = best;
    // key = h'(v) − h(v): the most-decreased node pops first
    queue.insert_or_decrease(a, best - snapshot[&a]);

    while let Some((v, _)) = queue.pop_min() {
        let count = pops.entry(v).or_insert(0);
        *count += 1;
        if *count > 1 {
            return Err(extract_cycle(g, &pred, v, n));
        }
        for ek in g.out_edges(v) {
            let e = &g[ek];
            let Some(w) = ol_weight(e) else { continue };
            let cand = sum_saturating(h[v], w);
            let dst = e.dst();
            if cand < h[dst] {
                snapshot.entry(dst).or_insert(h[dst]);
                h[dst] = cand;
                pred.insert(dst, ek);
                queue.insert_or_decrease(dst, cand - snapshot[&dst]);
            }
        }
    }
    Ok(())
}

/// Walks `pred` back from `start` far enough to land on a cycle, then
/// collects it in traversal order
fn extract_cycle(
    g: &NetGraph,
    pred: &SecondaryMap<NodeKey, EdgeKey>,
    start: NodeKey,
    n: usize,
) -> NegativeCycle {
    let mut node = start;
    for _ in 0..n {
        let Some(&ek) = pred.get(node) else { break };
        node = g[ek].src();
    }
    let anchor = node;
    let mut edges = Vec::new();
    loop {
        let Some(&ek) = pred.get(node) else { break };
        edges.push(ek);
        node = g[ek].src();
        if node == anchor || edges.len() > n {
            break;
        }
    }
    edges.reverse();
    NegativeCycle { edges }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ConstraintType;

    fn diamond() -> (NetGraph, [NodeKey; 3]) {
        let mut g = NetGraph::new();
        let a = g.add_node("A").unwrap();
        let b = g.add_node("B").unwrap();
        let c = g.add_node("C").unwrap();
        let ab = g.add_edge("ab", a, b, ConstraintType::Requirement).unwrap();
        let bc = g.add_edge("bc", b, c, ConstraintType::Requirement).unwrap();
        g[ab].ordinary = Some(-2);
        g[bc].ordinary = Some(-3);
        (g, [a, b, c])
    }

    #[test]
    fn potentials_follow_shortest_paths() {
        let (g, [a, b, c]) = diamond();
        let h = sssp_bellman_ford_ol(&g).unwrap();
        assert_eq!(h[a], 0);
        assert_eq!(h[b], -2);
        assert_eq!(h[c], -5);
    }

    #[test]
    fn negative_cycle_is_extracted_in_order() {
        let (mut g, [a, _b, c]) = diamond();
        let ca = g.add_edge("ca", c, a, ConstraintType::Requirement).unwrap();
        g[ca].ordinary = Some(4);
        let cycle = sssp_bellman_ford_ol(&g).unwrap_err();
        assert_eq!(cycle.edges.len(), 3);
        assert_eq!(cycle.value(&g), -1);
        // consecutive edges share a node
        for pair in cycle.edges.windows(2) {
            assert_eq!(g[pair[0]].dst(), g[pair[1]].src());
        }
    }

    #[test]
    fn update_repairs_potentials_after_new_edge() {
        let (mut g, [a, b, c]) = diamond();
        let d = g.add_node("D").unwrap();
        let mut h = sssp_bellman_ford_ol(&g).unwrap();
        let da = g.add_edge("da", d, a, ConstraintType::Derived).unwrap();
        g[da].ordinary = Some(-4);
        update_potential(&g, &mut h, a).unwrap();
        assert_eq!(h[a], -4);
        assert_eq!(h[b], -6);
        assert_eq!(h[c], -9);
        assert_eq!(h[d], 0);
    }

    #[test]
    fn update_detects_negative_cycle_through_anchor() {
        let (mut g, [a, _b, c]) = diamond();
        let mut h = sssp_bellman_ford_ol(&g).unwrap();
        let ca = g.add_edge("ca", c, a, ConstraintType::Derived).unwrap();
        g[ca].ordinary = Some(-1);
        assert!(update_potential(&g, &mut h, a).is_err());
    }

    #[test]
    fn lower_case_values_count_upper_case_do_not() {
        let mut g = NetGraph::new();
        let a = g.add_node("A").unwrap();
        let c = g.add_node("C").unwrap();
        let lo = g.add_edge("lo", a, c, ConstraintType::Contingent).unwrap();
        g[lo].lower = Some(crate::graph::CaseValue { node: c, value: 1 });
        let up = g.add_edge("up", c, a, ConstraintType::Contingent).unwrap();
        g[up].upper = Some(crate::graph::CaseValue { node: c, value: -3 });
        let h = sssp_bellman_ford_ol(&g).unwrap();
        assert_eq!(h[c], 0);
        assert_eq!(h[a], 0);
    }
}
