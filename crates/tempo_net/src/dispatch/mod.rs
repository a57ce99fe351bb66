//! Dispatchability minimization.
//!
//! Given a network just certified dynamically controllable by a
//! dispatchability-preserving checker, this pass removes every dominated
//! ordinary constraint and redundant wait, collapsing rigidly-connected
//! time-points while it works and expanding them back at the end. The
//! result is the minimal equivalent network executable with `O(|V|)`
//! lookahead.
//!
//! The minimizer never judges controllability: a negative ordinary cycle
//! in its input is a contract violation, and all mutations happen on a
//! working copy committed only on success.

mod rigid;

use crate::error::NetError;
use crate::graph::{ConstraintType, EdgeKey, NetGraph, NodeKey};
use crate::pq::MinQueue;
use crate::stnu::materialize_wait;
use alloc::string::ToString;
use alloc::vec;
use alloc::vec::Vec;
use fixedbitset::FixedBitSet;
use slotmap::SecondaryMap;
use tempo_core::collections::HashMap;
use tempo_core::weight::{INF, is_finite, sum_saturating};
use tempo_core::Weight;

/// Minimizes a dispatchable network in place
///
/// Fails with `ContractViolation` when the input's ordinary constraints
/// are inconsistent (it was not produced by a successful dispatchable
/// check); the graph is left untouched in that case.
pub fn minimize(g: &mut NetGraph) -> Result<(), NetError> {
    let mut work = g.clone();
    run(&mut work)?;
    *g = work;
    Ok(())
}

fn run(g: &mut NetGraph) -> Result<(), NetError> {
    let rigids = rigid::collapse(g)?;

    let stand_ins = add_stand_ins(g);
    regress_waits(g)?;
    drop_dominated_ordinary(g)?;
    remove_stand_ins(g, stand_ins);
    prune_waits(g)?;
    rigid::expand(g, &rigids);
    g.clean_empty_edges();
    Ok(())
}

/// Bellman-Ford over ordinary values only, from a fake source reaching
/// every node at 0
pub(crate) fn ordinary_potentials(
    g: &NetGraph,
) -> Result<SecondaryMap<NodeKey, Weight>, NetError> {
    let nodes = g.node_keys();
    let edges = g.edge_keys();
    let mut dist: SecondaryMap<NodeKey, Weight> = SecondaryMap::new();
    for &n in &nodes {
        dist.insert(n, 0);
    }
    for round in 0..nodes.len() {
        let mut changed = false;
        for &ek in &edges {
            let e = &g[ek];
            let Some(w) = e.ordinary else { continue };
            let cand = sum_saturating(dist[e.src()], w);
            if cand < dist[e.dst()] {
                dist[e.dst()] = cand;
                changed = true;
            }
        }
        if !changed {
            return Ok(dist);
        }
        if round + 1 == nodes.len() {
            return Err(NetError::ContractViolation(
                "minimizer input has inconsistent ordinary constraints".to_string(),
            ));
        }
    }
    Ok(dist)
}

/// All-pairs shortest ordinary distances (Johnson: one reweighted
/// Dijkstra per node)
struct Apsp {
    index: HashMap<NodeKey, usize>,
    nodes: Vec<NodeKey>,
    dist: Vec<Weight>,
}

impl Apsp {
    fn compute(g: &NetGraph) -> Result<Self, NetError> {
        let h = ordinary_potentials(g)?;
        let nodes = g.node_keys();
        let n = nodes.len();
        let mut index: HashMap<NodeKey, usize> = HashMap::default();
        for (i, &k) in nodes.iter().enumerate() {
            index.insert(k, i);
        }
        let mut dist = vec![INF; n * n];
        for (si, &s) in nodes.iter().enumerate() {
            let mut queue: MinQueue<NodeKey> = MinQueue::new();
            let mut popped = FixedBitSet::with_capacity(n);
            queue.insert_or_decrease(s, 0);
            while let Some((u, key)) = queue.pop_min() {
                let ui = index[&u];
                if popped.contains(ui) {
                    continue;
                }
                popped.insert(ui);
                // undo the reweighting
                let du = sum_saturating(key, h[u] - h[s]);
                dist[si * n + ui] = du;
                for ek in g.out_edges(u) {
                    let e = &g[ek];
                    let Some(w) = e.ordinary else { continue };
                    let v = e.dst();
                    if popped.contains(index[&v]) {
                        continue;
                    }
                    let reduced = sum_saturating(key, sum_saturating(h[u] - h[v], w));
                    queue.insert_or_decrease(v, reduced);
                }
            }
        }
        Ok(Self { index, nodes, dist })
    }

    fn get(&self, u: NodeKey, v: NodeKey) -> Weight {
        let n = self.nodes.len();
        self.dist[self.index[&u] * n + self.index[&v]]
    }
}

/// A stand-in ordinary value: the edge it was written to and the value
/// that slot held before
struct StandIn {
    edge: EdgeKey,
    written: Weight,
    previous: Option<Weight>,
}

/// Records contingent bounds and wait companions as ordinary values so
/// that ordinary minimization sees them as competitors
fn add_stand_ins(g: &mut NetGraph) -> Vec<StandIn> {
    let mut out = Vec::new();
    let write = |g: &mut NetGraph, edge: EdgeKey, value: Weight, out: &mut Vec<StandIn>| {
        let previous = g[edge].ordinary;
        if previous.is_none_or(|p| value < p) {
            g[edge].ordinary = Some(value);
            out.push(StandIn {
                edge,
                written: value,
                previous,
            });
        }
    };
    for link in g.contingent_links() {
        write(g, link.lower_edge, link.max, &mut out);
        write(g, link.upper_edge, -link.min, &mut out);
    }
    for ek in g.edge_keys() {
        let Some(uc) = g[ek].upper else { continue };
        if g[ek].src() == uc.node {
            continue; // the upper-case edge itself, handled above
        }
        // a wait of magnitude v implies an unconditional bound of x
        if let Some(link) = g.contingent_link(uc.node) {
            write(g, ek, -link.min, &mut out);
        }
    }
    out
}

fn remove_stand_ins(g: &mut NetGraph, stand_ins: Vec<StandIn>) {
    for s in stand_ins {
        if g.edge(s.edge).is_some() && g[s.edge].ordinary == Some(s.written) {
            g[s.edge].ordinary = s.previous;
        }
    }
}

/// Step 5: regress every wait backward over shortest ordinary distances,
/// at most once per contingent link
fn regress_waits(g: &mut NetGraph) -> Result<(), NetError> {
    let k = g.contingent_links().len();
    for _ in 0..k {
        let apsp = Apsp::compute(g)?;
        let mut changed = false;
        for ek in g.edge_keys() {
            let Some(uc) = g[ek].upper else { continue };
            let v_node = g[ek].src();
            if v_node == uc.node {
                continue;
            }
            let Some(link) = g.contingent_link(uc.node) else {
                continue;
            };
            for &u in &apsp.nodes {
                if u == v_node || u == link.act || u == link.ctg {
                    continue;
                }
                let d = apsp.get(u, v_node);
                if !is_finite(d) {
                    continue;
                }
                // (U, d, V) ∘ (V, C:−v, A) ⇒ (U, C:d−v, A)
                let regressed = sum_saturating(d, uc.value);
                changed |= materialize_wait(g, u, &link, regressed, true);
            }
        }
        if !changed {
            break;
        }
    }
    Ok(())
}

/// Step 6: keep only undominated tight ordinary values
fn drop_dominated_ordinary(g: &mut NetGraph) -> Result<(), NetError> {
    let apsp = Apsp::compute(g)?;
    let mut doomed: Vec<EdgeKey> = Vec::new();
    for ek in g.edge_keys() {
        let e = &g[ek];
        let Some(w) = e.ordinary else { continue };
        let (u, v) = (e.src(), e.dst());
        let d = apsp.get(u, v);
        if d < w {
            // slack: a strictly shorter path exists
            doomed.push(ek);
            continue;
        }
        let dominated = apsp.nodes.iter().any(|&t| {
            if t == u || t == v {
                return false;
            }
            let through = sum_saturating(apsp.get(u, t), apsp.get(t, v));
            if !is_finite(through) || through != w {
                return false;
            }
            if w < 0 {
                apsp.get(t, v) < 0
            } else {
                apsp.get(u, t) >= 0
            }
        });
        if dominated {
            doomed.push(ek);
        }
    }
    for ek in doomed {
        g[ek].ordinary = None;
    }
    Ok(())
}

/// Step 7a: drop waits implied by ordinary distances or by another wait
/// on the same contingent reachable through a non-positive path
fn prune_waits(g: &mut NetGraph) -> Result<(), NetError> {
    let apsp = Apsp::compute(g)?;
    // collect (edge, V, C, v) for every wait
    let mut waits: Vec<(EdgeKey, NodeKey, NodeKey, Weight)> = Vec::new();
    for ek in g.edge_keys() {
        let Some(uc) = g[ek].upper else { continue };
        let src = g[ek].src();
        if src != uc.node {
            waits.push((ek, src, uc.node, -uc.value));
        }
    }
    let mut doomed: Vec<EdgeKey> = Vec::new();
    for &(ek, v_node, ctg, v) in &waits {
        let act = g[ek].dst();
        let by_distance = apsp.get(v_node, act) <= -v;
        let by_other_wait = waits.iter().any(|&(_, u_node, c2, u_v)| {
            if c2 != ctg || u_node == v_node {
                return false;
            }
            let d = apsp.get(v_node, u_node);
            d <= 0 && is_finite(d) && u_v - d >= v
        });
        if by_distance || by_other_wait {
            doomed.push(ek);
        }
    }
    for ek in doomed {
        g[ek].upper = None;
    }
    Ok(())
}
