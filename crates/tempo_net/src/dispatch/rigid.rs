//! Rigid components: detection, collapse, expansion.
//!
//! Two time-points are rigid when tight ordinary constraints fix their
//! distance in both directions. Every strongly connected component of
//! the tight-edge graph with at least two members is collapsed onto a
//! representative (preferring the zero node, then activation nodes, then
//! the lexicographically smallest name); incident values are shifted by
//! the member offsets. Contingent time-points, activations and the zero
//! node are never moved; at most they serve as representatives.

use super::ordinary_potentials;
use crate::error::NetError;
use crate::graph::{CaseValue, ConstraintType, NetGraph, NodeKey};
use alloc::vec;
use alloc::vec::Vec;
use fixedbitset::FixedBitSet;
use tempo_core::collections::HashMap;
use tempo_core::weight::sum_saturating;
use tempo_core::Weight;

/// A collapsed component: the representative and each moved member with
/// its offset (`member = rep + offset`)
pub(super) struct RigidComponent {
    pub rep: NodeKey,
    pub members: Vec<(NodeKey, Weight)>,
}

/// Finds and collapses every rigid component
pub(super) fn collapse(g: &mut NetGraph) -> Result<Vec<RigidComponent>, NetError> {
    let h = ordinary_potentials(g)?;
    let nodes = g.node_keys();
    let n = nodes.len();
    let mut index: HashMap<NodeKey, usize> = HashMap::default();
    for (i, &k) in nodes.iter().enumerate() {
        index.insert(k, i);
    }
    let mut tight: Vec<Vec<usize>> = vec![Vec::new(); n];
    for ek in g.edge_keys() {
        let e = &g[ek];
        let Some(w) = e.ordinary else { continue };
        if h[e.dst()] == sum_saturating(h[e.src()], w) {
            tight[index[&e.src()]].push(index[&e.dst()]);
        }
    }

    let mut components = Vec::new();
    for scc in strongly_connected(&tight) {
        if scc.len() < 2 {
            continue;
        }
        let members: Vec<NodeKey> = scc.iter().map(|&i| nodes[i]).collect();
        let rep = choose_representative(g, &members);
        let movers: Vec<(NodeKey, Weight)> = members
            .iter()
            .copied()
            .filter(|&m| m != rep && movable(g, m))
            .map(|m| (m, h[m] - h[rep]))
            .collect();
        if movers.is_empty() {
            continue;
        }
        for &(m, off) in &movers {
            reroute(g, m, rep, off);
        }
        components.push(RigidComponent {
            rep,
            members: movers,
        });
    }
    Ok(components)
}

/// Re-inserts every collapsed member as a `±offset` pair around its
/// representative
pub(super) fn expand(g: &mut NetGraph, components: &[RigidComponent]) {
    for comp in components {
        for &(m, off) in &comp.members {
            let fwd = g.ensure_edge(comp.rep, m, ConstraintType::Derived);
            g[fwd].merge_ordinary(off);
            let back = g.ensure_edge(m, comp.rep, ConstraintType::Derived);
            g[back].merge_ordinary(-off);
        }
    }
}

fn choose_representative(g: &NetGraph, members: &[NodeKey]) -> NodeKey {
    if let Some(&z) = members.iter().find(|&&m| Some(m) == g.zero()) {
        return z;
    }
    let best_of = |candidates: Vec<NodeKey>| {
        candidates
            .into_iter()
            .min_by(|a, b| g[*a].name().cmp(g[*b].name()))
    };
    let activations: Vec<NodeKey> = members
        .iter()
        .copied()
        .filter(|&m| g.contingent_of_activation(m).is_some())
        .collect();
    if let Some(rep) = best_of(activations) {
        return rep;
    }
    best_of(members.to_vec()).expect("component is non-empty")
}

fn movable(g: &NetGraph, m: NodeKey) -> bool {
    !g[m].contingent && g.contingent_of_activation(m).is_none() && Some(m) != g.zero()
}

/// Reroutes every edge incident to `m` onto `rep`, shifting values
fn reroute(g: &mut NetGraph, m: NodeKey, rep: NodeKey, off: Weight) {
    let outgoing: Vec<_> = g.out_edges(m).collect();
    for ek in outgoing {
        let Some(edge) = g.remove_edge(ek) else { continue };
        if edge.dst() == rep || edge.dst() == m {
            continue; // absorbed by the rigid offset
        }
        // m = rep + off: a bound on (v − m) becomes one on (v − rep),
        // loosened by off
        let target = g.ensure_edge(rep, edge.dst(), edge.kind);
        if let Some(w) = edge.ordinary {
            g[target].merge_ordinary(sum_saturating(w, off));
        }
        if let Some(lc) = edge.lower {
            g[target].lower = Some(CaseValue {
                node: lc.node,
                value: sum_saturating(lc.value, off),
            });
        }
        if let Some(uc) = edge.upper {
            g[target].merge_upper(uc.node, sum_saturating(uc.value, off));
        }
        for (l, v) in edge.labeled.iter() {
            g[target].labeled.put(l, sum_saturating(v, off));
        }
    }
    let incoming: Vec<_> = g.in_edges(m).collect();
    for ek in incoming {
        let Some(edge) = g.remove_edge(ek) else { continue };
        if edge.src() == rep || edge.src() == m {
            continue;
        }
        let target = g.ensure_edge(edge.src(), rep, edge.kind);
        if let Some(w) = edge.ordinary {
            g[target].merge_ordinary(sum_saturating(w, -off));
        }
        if let Some(lc) = edge.lower {
            g[target].lower = Some(CaseValue {
                node: lc.node,
                value: sum_saturating(lc.value, -off),
            });
        }
        if let Some(uc) = edge.upper {
            g[target].merge_upper(uc.node, sum_saturating(uc.value, -off));
        }
        for (l, v) in edge.labeled.iter() {
            g[target].labeled.put(l, sum_saturating(v, -off));
        }
    }
}

/// Iterative Tarjan over an index-based adjacency list
fn strongly_connected(adj: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = adj.len();
    let mut index = vec![usize::MAX; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = FixedBitSet::with_capacity(n);
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0usize;
    let mut sccs: Vec<Vec<usize>> = Vec::new();
    // (node, next-neighbor position)
    let mut work: Vec<(usize, usize)> = Vec::new();

    for start in 0..n {
        if index[start] != usize::MAX {
            continue;
        }
        work.push((start, 0));
        while let Some(&mut (v, ref mut ni)) = work.last_mut() {
            if *ni == 0 {
                index[v] = next_index;
                lowlink[v] = next_index;
                next_index += 1;
                stack.push(v);
                on_stack.insert(v);
            }
            if let Some(&w) = adj[v].get(*ni) {
                *ni += 1;
                if index[w] == usize::MAX {
                    work.push((w, 0));
                } else if on_stack.contains(w) {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
                continue;
            }
            // all neighbors visited
            work.pop();
            if let Some(&(parent, _)) = work.last() {
                lowlink[parent] = lowlink[parent].min(lowlink[v]);
            }
            if lowlink[v] == index[v] {
                let mut scc = Vec::new();
                loop {
                    let w = stack.pop().expect("tarjan stack underflow");
                    on_stack.remove(w);
                    scc.push(w);
                    if w == v {
                        break;
                    }
                }
                sccs.push(scc);
            }
        }
    }
    sccs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tarjan_finds_the_cycle_and_the_tail() {
        // 0 → 1 → 2 → 0, 2 → 3
        let adj = vec![vec![1], vec![2], vec![0, 3], vec![]];
        let mut sccs = strongly_connected(&adj);
        sccs.sort_by_key(|s| s.len());
        assert_eq!(sccs.len(), 2);
        assert_eq!(sccs[0], vec![3]);
        let mut cycle = sccs[1].clone();
        cycle.sort_unstable();
        assert_eq!(cycle, vec![0, 1, 2]);
    }

    #[test]
    fn singletons_stay_uncollapsed() {
        let mut g = NetGraph::new();
        let a = g.add_node("A").unwrap();
        let b = g.add_node("B").unwrap();
        let e = g.add_edge("ab", a, b, ConstraintType::Requirement).unwrap();
        g[e].ordinary = Some(3);
        let comps = collapse(&mut g).unwrap();
        assert!(comps.is_empty());
        assert_eq!(g.edge_count(), 1);
    }
}
