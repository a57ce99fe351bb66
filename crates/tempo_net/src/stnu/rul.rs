//! The contingent-link-centric checker family: RUL2018, RUL2021, the
//! FD_STNU variants and the SRN cycle finder.
//!
//! For every upper-case edge `(C, C:−y, A)` a backward Dijkstra from `C`,
//! reweighted by the current potential, computes `δ(X → C)` over ordinary
//! in-edges (RELAX⁻) and other links' lower-case edges (LOWER⁻).
//! Distances reaching `Δ_C = y − x` are cut off and bypass the upper-case
//! edge as new ordinary edges `X → A` of weight `δ − y`; smaller
//! distances become waits in the FD variants. Popping the activation node
//! of a link whose own bypass is unfinished interrupts the current one;
//! a cyclic interruption chain certifies non-controllability, as does a
//! negative `δ(C → C)` or a potential failure.

use super::{Stop, materialize_wait};
use super::{cycle_value, expand_edges};
use crate::graph::{ConstraintType, ContingentLink, EdgeKey, NetGraph, NodeKey};
use crate::potential::{NegativeCycle, Potentials, sssp_bellman_ford_ol, update_potential};
use crate::pq::MinQueue;
use crate::status::{CheckStatus, CycleKind, WitnessCycle};
use alloc::vec::Vec;
use slotmap::SecondaryMap;
use tempo_core::collections::{HashMap, HashSet};
use tempo_core::weight::sum_saturating;
use tempo_core::{Deadline, Weight};

/// Which member of the family is running
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(super) enum Variant {
    /// Full potential rebuild after every bypass
    Rul2018,
    /// Incremental potential updates anchored at the activation node
    Rul2021,
    /// RUL2021 plus wait generation
    Fd {
        /// Omit waits whose magnitude exceeds the contingent upper bound
        improved: bool,
    },
    /// RUL2021 plus derivation tracking and witness expansion
    CycleFinder,
}

impl Variant {
    fn incremental(self) -> bool {
        !matches!(self, Variant::Rul2018)
    }

    fn waits(self) -> Option<bool> {
        match self {
            Variant::Fd { improved } => Some(improved),
            _ => None,
        }
    }

    fn trace(self) -> bool {
        matches!(self, Variant::CycleFinder)
    }
}

/// Lifecycle of one contingent link's bypass
#[derive(Clone, Copy, PartialEq, Eq, Default)]
enum ElementStatus {
    #[default]
    UnStarted,
    /// Bypass in progress; being needed again is an interruption cycle
    Started,
    /// Bypass edges are in place
    Finished,
}

pub(super) fn check(
    g: &mut NetGraph,
    status: &mut CheckStatus,
    deadline: &Deadline,
    variant: Variant,
) -> Result<(), Stop> {
    let h = match sssp_bellman_ford_ol(g) {
        Ok(h) => h,
        Err(cycle) => {
            record_lo_witness(g, status, variant, &cycle);
            return Err(Stop::NotDc);
        }
    };
    let mut checker = Rul {
        g,
        status,
        deadline,
        variant,
        h,
        state: SecondaryMap::new(),
        stack: Vec::new(),
        trigger_paths: Vec::new(),
    };
    for link in checker.g.contingent_links() {
        if checker.link_state(link.ctg) != ElementStatus::Finished {
            checker.bypass(link.ctg)?;
        }
    }
    Ok(())
}

fn record_lo_witness(
    g: &NetGraph,
    status: &mut CheckStatus,
    variant: Variant,
    cycle: &NegativeCycle,
) {
    if !variant.trace() {
        return;
    }
    let edges = expand_edges(&status.derivations, &cycle.edges);
    let value = cycle_value(g, &edges);
    status.witness = Some(WitnessCycle {
        kind: CycleKind::LoGraphPotFailure,
        edges,
        value,
    });
}

/// What one backward pass from a contingent time-point produced
enum BackpropOutcome {
    /// Every reachable distance settled
    Completed {
        settled: Vec<(NodeKey, Weight)>,
        parents: HashMap<NodeKey, EdgeKey>,
    },
    /// An unstarted link's activation was popped below the cutoff; its
    /// bypass must run first
    Interrupted { ctg: NodeKey, path: Vec<EdgeKey> },
}

struct Rul<'a> {
    g: &'a mut NetGraph,
    status: &'a mut CheckStatus,
    deadline: &'a Deadline,
    variant: Variant,
    h: Potentials,
    state: SecondaryMap<NodeKey, ElementStatus>,
    /// Contingent time-points whose bypass is on the call stack
    stack: Vec<NodeKey>,
    /// For each stack frame but the last, the path that led into the
    /// next frame's activation; fuels interruption-cycle witnesses
    trigger_paths: Vec<Vec<EdgeKey>>,
}

impl Rul<'_> {
    fn link_state(&self, ctg: NodeKey) -> ElementStatus {
        self.state.get(ctg).copied().unwrap_or_default()
    }

    /// Runs the bypass of `ctg` to completion, recursing into links it
    /// depends on
    fn bypass(&mut self, ctg: NodeKey) -> Result<(), Stop> {
        self.state.insert(ctg, ElementStatus::Started);
        self.stack.push(ctg);
        loop {
            self.status.cycles += 1;
            if self.deadline.expired() {
                self.status.timeout = true;
                return Err(Stop::Timeout);
            }
            let link = self.g.contingent_link(ctg).expect("link is registered");
            match self.backprop(&link)? {
                BackpropOutcome::Interrupted { ctg: needed, path } => {
                    self.trigger_paths.push(path);
                    self.bypass(needed)?;
                    self.trigger_paths.pop();
                    // new bypass edges and potentials invalidate the
                    // interrupted pass; start it over
                }
                BackpropOutcome::Completed { settled, parents } => {
                    self.apply(&link, &settled, &parents)?;
                    break;
                }
            }
        }
        self.stack.pop();
        self.state.insert(ctg, ElementStatus::Finished);
        Ok(())
    }

    /// Backward Dijkstra from `link.ctg` with `h`-reduced keys
    fn backprop(&mut self, link: &ContingentLink) -> Result<BackpropOutcome, Stop> {
        let delta = link.delta();
        let mut queue: MinQueue<NodeKey> = MinQueue::new();
        let mut parents: HashMap<NodeKey, EdgeKey> = HashMap::default();
        let mut popped: HashSet<NodeKey> = HashSet::default();
        let mut settled: Vec<(NodeKey, Weight)> = Vec::new();

        for e in self.g.in_edges(link.ctg) {
            let edge = &self.g[e];
            let Some(w) = edge.ordinary else { continue };
            let src = edge.src();
            let key = sum_saturating(self.h[src], w);
            if queue.insert_or_decrease(src, key) {
                parents.insert(src, e);
            }
        }

        while let Some((x, key)) = queue.pop_min() {
            popped.insert(x);
            let dist = key - self.h[x];
            settled.push((x, dist));

            if x == link.ctg {
                if dist < 0 {
                    self.record_cc_witness(link, &parents);
                    return Err(Stop::NotDc);
                }
                continue;
            }
            if dist >= delta {
                // the cutoff: RELAX⁻/LOWER⁻ cannot fire past Δ_C
                continue;
            }
            if let Some(needed) = self.g.contingent_of_activation(x) {
                if needed != link.ctg {
                    match self.link_state(needed) {
                        ElementStatus::Started => {
                            self.record_interruption_witness(needed, x, link, &parents);
                            return Err(Stop::NotDc);
                        }
                        ElementStatus::UnStarted => {
                            let path = path_to(self.g, &parents, x, link.ctg);
                            return Ok(BackpropOutcome::Interrupted { ctg: needed, path });
                        }
                        ElementStatus::Finished => {}
                    }
                }
            }

            // RELAX⁻ over ordinary in-edges
            for e in self.g.in_edges(x) {
                let edge = &self.g[e];
                let Some(w) = edge.ordinary else { continue };
                let src = edge.src();
                if popped.contains(&src) {
                    continue;
                }
                let val = sum_saturating(dist, w);
                let k = sum_saturating(self.h[src], val);
                if queue.insert_or_decrease(src, k) {
                    parents.insert(src, e);
                    self.status.rules.relax += 1;
                }
            }

            // LOWER⁻: a contingent time-point of another link is replaced
            // by its activation through the lower-case value
            if self.g[x].contingent && x != link.ctg {
                if let Some(other) = self.g.contingent_link(x) {
                    if !popped.contains(&other.act) {
                        let val = sum_saturating(dist, other.min);
                        let k = sum_saturating(self.h[other.act], val);
                        if queue.insert_or_decrease(other.act, k) {
                            parents.insert(other.act, other.lower_edge);
                            self.status.rules.lower += 1;
                        }
                    }
                }
            }
        }

        Ok(BackpropOutcome::Completed { settled, parents })
    }

    /// Materializes bypass edges and waits, then repairs the potential
    fn apply(
        &mut self,
        link: &ContingentLink,
        settled: &[(NodeKey, Weight)],
        parents: &HashMap<NodeKey, EdgeKey>,
    ) -> Result<(), Stop> {
        let delta = link.delta();
        let mut changed = false;
        for &(x, dist) in settled {
            if x == link.ctg || x == link.act {
                continue;
            }
            if dist >= delta {
                let w = sum_saturating(dist, -link.max);
                let e = self.g.ensure_edge(x, link.act, ConstraintType::Derived);
                if self.g[e].merge_ordinary(w) {
                    changed = true;
                    self.status.rules.upper += 1;
                    if self.variant.trace() {
                        let mut seq = path_to(self.g, parents, x, link.ctg);
                        seq.push(link.upper_edge);
                        self.status.derivations.insert(e, seq);
                    }
                }
            } else if let Some(improved) = self.variant.waits() {
                let w = sum_saturating(dist, -link.max);
                if materialize_wait(self.g, x, link, w, improved) {
                    self.status.rules.waits += 1;
                }
            }
        }
        if changed {
            self.status.rules.potential_updates += 1;
            let refresh = if self.variant.incremental() {
                update_potential(self.g, &mut self.h, link.act)
            } else {
                match sssp_bellman_ford_ol(self.g) {
                    Ok(h) => {
                        self.h = h;
                        Ok(())
                    }
                    Err(cycle) => Err(cycle),
                }
            };
            if let Err(cycle) = refresh {
                record_lo_witness(self.g, self.status, self.variant, &cycle);
                return Err(Stop::NotDc);
            }
        }
        Ok(())
    }

    /// A settled path `C ⇝ C` of negative value
    fn record_cc_witness(&mut self, link: &ContingentLink, parents: &HashMap<NodeKey, EdgeKey>) {
        if !self.variant.trace() {
            return;
        }
        let raw = cycle_path(self.g, parents, link.ctg);
        let edges = expand_edges(&self.status.derivations, &raw);
        let value = cycle_value(self.g, &edges);
        self.status.witness = Some(WitnessCycle {
            kind: CycleKind::CcLoop,
            edges,
            value,
        });
    }

    /// A cyclic chain of interrupted bypasses, closed through the
    /// upper-case edges of the links on the stack
    fn record_interruption_witness(
        &mut self,
        started: NodeKey,
        activation: NodeKey,
        current: &ContingentLink,
        parents: &HashMap<NodeKey, EdgeKey>,
    ) {
        if !self.variant.trace() {
            return;
        }
        let Some(start_idx) = self.stack.iter().position(|c| *c == started) else {
            return;
        };
        let mut raw = path_to(self.g, parents, activation, current.ctg);
        raw.push(current.upper_edge);
        for j in (start_idx..self.stack.len() - 1).rev() {
            raw.extend_from_slice(&self.trigger_paths[j]);
            if let Some(uc) = self.g.upper_edge(self.stack[j]) {
                raw.push(uc);
            }
        }
        let edges = expand_edges(&self.status.derivations, &raw);
        let value = cycle_value(self.g, &edges);
        self.status.witness = Some(WitnessCycle {
            kind: CycleKind::InterruptionCycle,
            edges,
            value,
        });
    }
}

/// Follows parent pointers from `from` until `target`
fn path_to(
    g: &NetGraph,
    parents: &HashMap<NodeKey, EdgeKey>,
    from: NodeKey,
    target: NodeKey,
) -> Vec<EdgeKey> {
    let mut edges = Vec::new();
    let mut node = from;
    let guard = g.edge_count() + g.node_count() + 1;
    while node != target && edges.len() < guard {
        let Some(&e) = parents.get(&node) else { break };
        edges.push(e);
        node = g[e].dst();
    }
    edges
}

/// Follows parent pointers from `anchor` all the way around to itself
fn cycle_path(
    g: &NetGraph,
    parents: &HashMap<NodeKey, EdgeKey>,
    anchor: NodeKey,
) -> Vec<EdgeKey> {
    let mut edges = Vec::new();
    let mut node = anchor;
    let guard = g.edge_count() + g.node_count() + 1;
    loop {
        let Some(&e) = parents.get(&node) else { break };
        edges.push(e);
        node = g[e].dst();
        if node == anchor || edges.len() >= guard {
            break;
        }
    }
    edges
}
