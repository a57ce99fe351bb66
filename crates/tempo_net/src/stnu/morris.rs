//! Morris' negative-node back-propagation.
//!
//! Runs on the normal-form network (every contingent lower bound is 0). A
//! node is *negative* when it has an incoming ordinary edge of negative
//! value or an incoming upper-case value. For each negative node a
//! bounded Dijkstra walks edges backward: negative ordinary values and
//! upper-case values seed the queue, non-negative ordinary values and
//! lower-case values relax. A node whose distance becomes non-negative is
//! cut off by materializing an ordinary bypass edge; re-entering a
//! negative node whose back-propagation is still on the call stack
//! certifies a negative cycle.
//!
//! Distances are kept per `(node, seeded-by-upper-case)` state: the
//! lower-case value of the link activated by the source must not absorb
//! the source's own upper-case seeds, while ordinary-seeded paths through
//! the same contingent node stay usable. The dispatchable variant records
//! the negative upper-case-seeded distances of an activation node as
//! waits.

use super::{Stop, materialize_wait};
use crate::graph::{ConstraintType, NetGraph, NodeKey};
use crate::pq::MinQueue;
use crate::status::CheckStatus;
use alloc::vec::Vec;
use slotmap::SecondaryMap;
use tempo_core::collections::{HashMap, HashSet};
use tempo_core::weight::sum_saturating;
use tempo_core::{Deadline, Weight};

/// Lifecycle of one negative node's back-propagation
#[derive(Clone, Copy, PartialEq, Eq, Default)]
enum ElementStatus {
    #[default]
    UnStarted,
    /// On the recursion stack; re-entry means a negative cycle
    Started,
    /// Back-propagation completed, bypass edges are in place
    Finished,
}

/// A back-propagation state: a node plus whether the path behind it ends
/// in an upper-case seed
type State = (NodeKey, bool);

pub(super) fn check(
    g: &mut NetGraph,
    status: &mut CheckStatus,
    deadline: &Deadline,
    dispatchable: bool,
) -> Result<(), Stop> {
    let mut checker = Morris {
        g,
        status,
        deadline,
        dispatchable,
        state: SecondaryMap::new(),
    };
    for node in checker.g.node_keys() {
        if checker.is_negative(node) {
            checker.back_propagate(node)?;
        }
    }
    Ok(())
}

struct Morris<'a> {
    g: &'a mut NetGraph,
    status: &'a mut CheckStatus,
    deadline: &'a Deadline,
    dispatchable: bool,
    state: SecondaryMap<NodeKey, ElementStatus>,
}

impl Morris<'_> {
    fn is_negative(&self, node: NodeKey) -> bool {
        self.g.in_edges(node).any(|e| {
            let edge = &self.g[e];
            edge.ordinary.is_some_and(|w| w < 0) || edge.upper.is_some()
        })
    }

    /// Back-propagates from one negative node, materializing bypasses
    fn back_propagate(&mut self, source: NodeKey) -> Result<(), Stop> {
        match self.state.get(source).copied().unwrap_or_default() {
            ElementStatus::Started => return Err(Stop::NotDc),
            ElementStatus::Finished => return Ok(()),
            ElementStatus::UnStarted => {}
        }
        self.state.insert(source, ElementStatus::Started);
        self.status.cycles += 1;
        if self.deadline.expired() {
            self.status.timeout = true;
            return Err(Stop::Timeout);
        }

        // the contingent link activated by `source`; its lower-case value
        // is barred for upper-case-seeded states, and its waits are what
        // the dispatchable variant materializes
        let own_link = self
            .g
            .contingent_of_activation(source)
            .and_then(|c| self.g.contingent_link(c));

        let mut dist: HashMap<State, Weight> = HashMap::default();
        let mut queue: MinQueue<State> = MinQueue::new();
        let mut popped: HashSet<State> = HashSet::default();
        let mut recursed: HashSet<NodeKey> = HashSet::default();

        let mut seeds: Vec<(State, Weight)> = Vec::new();
        for e in self.g.in_edges(source) {
            let edge = &self.g[e];
            if let Some(w) = edge.ordinary.filter(|w| *w < 0) {
                seeds.push(((edge.src(), false), w));
            }
            if let Some(uc) = edge.upper {
                seeds.push(((edge.src(), true), uc.value));
            }
        }
        for (s, w) in seeds {
            if dist.get(&s).is_none_or(|cur| w < *cur) {
                dist.insert(s, w);
                queue.insert_or_decrease(s, w);
            }
        }

        while let Some(((u, via_upper), d)) = queue.pop_min() {
            popped.insert((u, via_upper));
            if d >= 0 {
                if u != source {
                    let e = self.g.ensure_edge(u, source, ConstraintType::Derived);
                    if self.g[e].merge_ordinary(d) {
                        self.status.rules.upper += 1;
                    }
                }
                continue;
            }
            if self.dispatchable && via_upper {
                if let Some(link) = own_link {
                    if materialize_wait(self.g, u, &link, d, false) {
                        self.status.rules.waits += 1;
                    }
                }
            }
            if recursed.insert(u) && self.is_negative(u) {
                self.back_propagate(u)?;
            }
            for e in self.g.in_edges(u).collect::<Vec<_>>() {
                let edge = &self.g[e];
                let src = edge.src();
                // non-negative ordinary values and lower-case values
                // relax; the own link's lower-case value must not close
                // over its upper-case seeds
                let mut step = edge.ordinary.filter(|w| *w >= 0);
                if let Some(lc) = edge.lower {
                    let barred = via_upper && own_link.is_some_and(|l| l.ctg == lc.node);
                    if !barred && step.is_none_or(|w| lc.value < w) {
                        step = Some(lc.value);
                    }
                }
                let Some(w) = step else { continue };
                let next = (src, via_upper);
                if popped.contains(&next) {
                    continue;
                }
                let cand = sum_saturating(d, w);
                if dist.get(&next).is_none_or(|cur| cand < *cur) {
                    dist.insert(next, cand);
                    queue.insert_or_decrease(next, cand);
                    self.status.rules.relax += 1;
                }
            }
        }

        self.state.insert(source, ElementStatus::Finished);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::{CaseValue, ConstraintType, NetGraph};
    use crate::stnu::{CheckOptions, StnuAlg, dc_check};

    fn with_link(x: i64, y: i64) -> NetGraph {
        let mut g = NetGraph::new();
        let a = g.add_node("A").unwrap();
        let c = g.add_node("C").unwrap();
        let lo = g.ensure_edge(a, c, ConstraintType::Contingent);
        g[lo].lower = Some(CaseValue { node: c, value: x });
        let up = g.ensure_edge(c, a, ConstraintType::Contingent);
        g[up].upper = Some(CaseValue { node: c, value: -y });
        g
    }

    /// The upper-case seed of a link must not be absorbed by the same
    /// link's lower-case value; otherwise every contingent link would
    /// close a spurious negative loop through its own activation.
    #[test]
    fn lone_link_does_not_self_interfere() {
        let mut g = with_link(1, 3);
        let status = dc_check(&mut g, StnuAlg::Morris2014, &CheckOptions::default()).unwrap();
        assert_eq!(status.consistent, Some(true));
    }

    /// An ordinary-seeded path through the contingent node still reaches
    /// the lower-case value: here `B` must both precede `A + 4` and
    /// follow within 2 of a contingent that can fire immediately.
    #[test]
    fn ordinary_path_through_contingent_is_not_barred() {
        let mut g = with_link(0, 9);
        let b = g.add_node("B").unwrap();
        let a = g.find_node("A").unwrap();
        let c = g.find_node("C").unwrap();
        let cb = g.ensure_edge(c, b, ConstraintType::Requirement);
        g[cb].merge_ordinary(2);
        let ba = g.ensure_edge(b, a, ConstraintType::Requirement);
        g[ba].merge_ordinary(-4);
        let status = dc_check(&mut g, StnuAlg::Morris2014, &CheckOptions::default()).unwrap();
        assert_eq!(status.consistent, Some(false));
    }

    #[test]
    fn dispatchable_variant_emits_waits_on_the_helper_activation() {
        let mut g = with_link(2, 10);
        let b = g.add_node("B").unwrap();
        let c = g.find_node("C").unwrap();
        let bc = g.ensure_edge(b, c, ConstraintType::Requirement);
        g[bc].merge_ordinary(4);
        let status =
            dc_check(&mut g, StnuAlg::Morris2014Dispatchable, &CheckOptions::default()).unwrap();
        assert_eq!(status.consistent, Some(true));
        assert!(status.rules.waits > 0);
        // the wait targets the normal-form activation A'
        let helper = g.find_node("A'").unwrap();
        let wait_edge = g.edge_between(b, helper).expect("wait edge");
        let wait = g[wait_edge].upper.expect("upper-case wait value");
        assert_eq!(wait.node, c);
    }
}
