//! Conditional STN dynamic-consistency checking.
//!
//! The rules operate on labeled values. `qLP` composes adjacent edges,
//! introducing unknown literals where scenarios disagree; `qR0` drops an
//! observer's own proposition from its non-positive out-values; `qR3`
//! transfers observation constraints between edges pointing at the zero
//! time-point. The engine applies all three to every edge modified in the
//! previous cycle until nothing changes (the network is dynamically
//! consistent), a negative self-loop with an honest label appears (it is
//! not), or the deadline passes.

pub mod lazy;

use crate::error::NetError;
use crate::graph::{ConstraintType, EdgeKey, NetGraph};
use crate::init::{InitOptions, init_and_check};
use crate::label::{Label, Proposition, State};
use crate::status::{CheckStatus, CycleKind, WitnessCycle};
use alloc::vec::Vec;
use tempo_core::collections::{HashMap, HashSet};
use tempo_core::weight::{NEG_INF, sum_saturating};
use tempo_core::{Deadline, Weight};

/// Options for the conditional checker
#[derive(Clone, Copy, Debug, Default)]
pub struct CstnOptions {
    /// Deadline polled at the top of every main cycle
    pub deadline: Deadline,
}

/// Initializes the conditional network and propagates to fixpoint
pub fn dc_check(g: &mut NetGraph, opts: &CstnOptions) -> Result<CheckStatus, NetError> {
    init_and_check(
        g,
        &InitOptions {
            cstn: true,
            ..InitOptions::default()
        },
    )?;
    let mut status = CheckStatus::new("CSTN");
    let mut engine = Engine::new(g, &mut status, &opts.deadline);
    engine.run();
    status.execution_time = opts.deadline.elapsed();
    Ok(status)
}

/// Propagation engine over an already-initialized conditional network
struct Engine<'a> {
    g: &'a mut NetGraph,
    status: &'a mut CheckStatus,
    deadline: &'a Deadline,
    /// `children[p]`: propositions observed only in scenarios involving
    /// `p`
    children: HashMap<Proposition, Vec<Proposition>>,
    /// Safety cap on main cycles
    max_cycles: u64,
}

impl<'a> Engine<'a> {
    fn new(g: &'a mut NetGraph, status: &'a mut CheckStatus, deadline: &'a Deadline) -> Self {
        let mut children: HashMap<Proposition, Vec<Proposition>> = HashMap::default();
        let mut observed_props = 0u32;
        for key in g.node_keys() {
            let Some(q) = g[key].observed else { continue };
            observed_props += 1;
            for (p, _) in g[key].label.literals() {
                children.entry(p).or_default().push(q);
            }
        }
        // |values| × |V|² × 3^|P|, saturating
        let n = g.node_count() as u64;
        let max_w = g.max_abs_weight().unsigned_abs().max(1);
        let max_cycles = max_w
            .saturating_mul(n.saturating_mul(n))
            .saturating_mul(3u64.saturating_pow(observed_props.min(38)));
        Self {
            g,
            status,
            deadline,
            children,
            max_cycles,
        }
    }

    fn run(&mut self) {
        let mut to_check: Vec<EdgeKey> = self.g.edge_keys();
        while !to_check.is_empty() {
            self.status.cycles += 1;
            if self.deadline.expired() {
                self.status.timeout = true;
                return;
            }
            if self.status.cycles > self.max_cycles {
                log::warn!("propagation cycle bound exceeded; giving up");
                return;
            }
            let mut modified = Modified::default();
            for ek in to_check {
                if self.g.edge(ek).is_none() {
                    continue;
                }
                self.apply_qr0(ek, &mut modified);
                self.apply_qr3(ek, &mut modified);
                if !self.apply_qlp_around(ek, &mut modified) {
                    self.status.finish(false);
                    return;
                }
            }
            to_check = modified.order;
        }
        self.status.finish(true);
    }

    /// Strips, for every unknown literal `¿p`, the literals on `p`'s
    /// children
    fn remove_children_of_unknown(&self, mut label: Label) -> Label {
        loop {
            let mut changed = false;
            let current: Vec<(Proposition, State)> = label.literals().collect();
            for (p, state) in current {
                if state != State::Unknown {
                    continue;
                }
                for q in self.children.get(&p).into_iter().flatten() {
                    if label.contains(*q) {
                        label.remove(*q);
                        changed = true;
                    }
                }
            }
            if !changed {
                return label;
            }
        }
    }

    /// `qR0`: on `P? —(w, αp)→ X` with `w ≤ 0`, drop `p` (plus `p`'s
    /// children, plus, towards `Z`, children of unknown) from the label
    fn apply_qr0(&mut self, ek: EdgeKey, modified: &mut Modified) {
        let src = self.g[ek].src();
        let Some(p) = self.g[src].observed else {
            return;
        };
        let to_z = Some(self.g[ek].dst()) == self.g.zero();
        let values: Vec<(Label, Weight)> = self.g[ek].labeled.iter().collect();
        for (label, w) in values {
            if w > 0 || !label.contains(p) {
                continue;
            }
            let mut stripped = label.without(p);
            for q in self.children.get(&p).into_iter().flatten() {
                stripped.remove(*q);
            }
            if to_z {
                stripped = self.remove_children_of_unknown(stripped);
            }
            if stripped == label {
                continue;
            }
            if self.g[ek].labeled.put(stripped, w) {
                modified.push(ek);
                if label.has_unknown() {
                    self.status.rules.qr0 += 1;
                } else {
                    self.status.rules.r0 += 1;
                }
            }
        }
    }

    /// `qR3`: combines an observation edge `P? → Z` with another edge
    /// `nS → Z` whose label mentions `p`
    fn apply_qr3(&mut self, ek: EdgeKey, modified: &mut Modified) {
        let Some(z) = self.g.zero() else { return };
        if self.g[ek].dst() != z {
            return;
        }
        // the edge plays the nS → Z role against every observer...
        self.combine_qr3_into(ek, modified);
        // ...and, when its source is an observer, refreshes its siblings
        if self.g[self.g[ek].src()].observed.is_some() {
            for sibling in self.g.in_edges(z).collect::<Vec<_>>() {
                if sibling != ek {
                    self.combine_qr3_into(sibling, modified);
                }
            }
        }
    }

    /// Applies `qR3` with `target` in the `nS → Z` role
    fn combine_qr3_into(&mut self, target: EdgeKey, modified: &mut Modified) {
        let Some(z) = self.g.zero() else { return };
        let n_s = self.g[target].src();
        let values: Vec<(Label, Weight)> = self.g[target].labeled.iter().collect();
        for (lv, v) in values {
            for (p, _) in lv.literals() {
                let Some(obs) = self.g.observer_of(p) else { continue };
                if obs == n_s {
                    continue;
                }
                let Some(obs_edge) = self.g.edge_between(obs, z) else {
                    continue;
                };
                let beta = lv.without(p);
                let obs_values: Vec<(Label, Weight)> = self.g[obs_edge].labeled.iter().collect();
                for (gamma, w) in obs_values {
                    if w > 0 {
                        continue;
                    }
                    let label =
                        self.remove_children_of_unknown(gamma.conjunction_extended(&beta));
                    let value = w.max(v);
                    if self.g[target].labeled.put(label, value) {
                        modified.push(target);
                        if label.has_unknown() {
                            self.status.rules.qr3 += 1;
                        } else {
                            self.status.rules.r3 += 1;
                        }
                    }
                }
            }
        }
    }

    /// Applies `qLP` to every pair adjacent to `ek`; returns `false` on a
    /// negative honest-labeled loop
    #[must_use]
    fn apply_qlp_around(&mut self, ek: EdgeKey, modified: &mut Modified) -> bool {
        let (src, dst) = (self.g[ek].src(), self.g[ek].dst());
        for succ in self.g.out_edges(dst).collect::<Vec<_>>() {
            if !self.apply_qlp(ek, succ, modified) {
                return false;
            }
        }
        for pred in self.g.in_edges(src).collect::<Vec<_>>() {
            if pred != ek && !self.apply_qlp(pred, ek, modified) {
                return false;
            }
        }
        true
    }

    /// `qLP` on `A —(u,α)→ B —(v,β)→ C`; returns `false` on a negative
    /// honest-labeled loop
    #[must_use]
    fn apply_qlp(&mut self, e1: EdgeKey, e2: EdgeKey, modified: &mut Modified) -> bool {
        let a = self.g[e1].src();
        let c = self.g[e2].dst();
        debug_assert_eq!(self.g[e1].dst(), self.g[e2].src());
        let base = match self.g[a].label.conjunction(&self.g[c].label) {
            Some(base) => base,
            None => return true,
        };
        let first: Vec<(Label, Weight)> = self.g[e1].labeled.iter().collect();
        let second: Vec<(Label, Weight)> = self.g[e2].labeled.iter().collect();
        for (alpha, u) in &first {
            for (beta, v) in &second {
                let s = sum_saturating(*u, *v);
                if s >= 0 {
                    continue;
                }
                let gamma =
                    self.remove_children_of_unknown(alpha.conjunction_extended(beta));
                if a == c {
                    if !gamma.has_unknown() {
                        self.record_loop_witness(e1, e2, s);
                        return false;
                    }
                    let self_loop = self.g.ensure_edge(a, a, ConstraintType::Derived);
                    if self.g[self_loop].labeled.put(gamma, NEG_INF) {
                        modified.push(self_loop);
                        self.status.rules.qlp += 1;
                    }
                    continue;
                }
                if *u >= 0 && gamma.has_unknown() {
                    continue;
                }
                if !gamma.subsumes(&base) {
                    continue;
                }
                let derived = self.g.ensure_edge(a, c, ConstraintType::Derived);
                if self.g[derived].labeled.put(gamma, s) {
                    modified.push(derived);
                    if gamma.has_unknown() {
                        self.status.rules.qlp += 1;
                    } else {
                        self.status.rules.lp += 1;
                    }
                }
            }
        }
        true
    }

    fn record_loop_witness(&mut self, e1: EdgeKey, e2: EdgeKey, value: Weight) {
        self.status.witness = Some(WitnessCycle {
            kind: CycleKind::CcLoop,
            edges: alloc::vec![e1, e2],
            value,
        });
    }
}

/// Order-preserving set of edges touched in the current cycle
#[derive(Default)]
struct Modified {
    seen: HashSet<EdgeKey>,
    order: Vec<EdgeKey>,
}

impl Modified {
    fn push(&mut self, ek: EdgeKey) {
        if self.seen.insert(ek) {
            self.order.push(ek);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ConstraintType, NodeKey};
    use crate::label::tests_support::label;

    fn observer(g: &mut NetGraph, name: &str, p: char) -> NodeKey {
        let key = g.add_node(name).unwrap();
        g[key].observed = Proposition::from_char(p);
        key
    }

    #[test]
    fn r0_drops_the_observers_own_proposition() {
        let mut g = NetGraph::new();
        let p = observer(&mut g, "P?", 'p');
        let x = g.add_node("X").unwrap();
        let e = g.add_edge("px", p, x, ConstraintType::Requirement).unwrap();
        g[e].labeled.put(label("p"), -4);
        let status = dc_check(&mut g, &CstnOptions::default()).unwrap();
        assert_eq!(status.consistent, Some(true));
        let e = g.edge_between(p, x).unwrap();
        assert_eq!(g[e].labeled.get(&Label::empty()), Some(-4));
        assert_eq!(g[e].labeled.len(), 1);
        assert!(status.rules.r0 > 0);
    }

    #[test]
    fn qlp_replaces_unknown_loop_value_by_minus_infinity() {
        let mut g = NetGraph::new();
        let _p = observer(&mut g, "P?", 'p');
        let a = g.add_node("A").unwrap();
        let b = g.add_node("B").unwrap();
        let ab = g.add_edge("ab", a, b, ConstraintType::Requirement).unwrap();
        g[ab].labeled.put(label("p"), -3);
        let ba = g.add_edge("ba", b, a, ConstraintType::Requirement).unwrap();
        g[ba].labeled.put(label("¬p"), -1);
        let status = dc_check(&mut g, &CstnOptions::default()).unwrap();
        assert_eq!(status.consistent, Some(true), "q-loop is semi-reducible");
        let a = g.find_node("A").unwrap();
        let self_loop = g.edge_between(a, a).expect("derived self-loop");
        assert_eq!(g[self_loop].labeled.get(&label("¿p")), Some(NEG_INF));
        assert!(status.rules.qlp > 0);
    }

    #[test]
    fn honest_negative_loop_is_inconsistent() {
        let mut g = NetGraph::new();
        let a = g.add_node("A").unwrap();
        let b = g.add_node("B").unwrap();
        let ab = g.add_edge("ab", a, b, ConstraintType::Requirement).unwrap();
        g[ab].labeled.put(Label::empty(), -3);
        let ba = g.add_edge("ba", b, a, ConstraintType::Requirement).unwrap();
        g[ba].labeled.put(Label::empty(), 1);
        let status = dc_check(&mut g, &CstnOptions::default()).unwrap();
        assert_eq!(status.consistent, Some(false));
        let w = status.witness.expect("loop witness");
        assert!(w.value < 0);
    }

    #[test]
    fn r3_transfers_observation_bounds_toward_zero() {
        let mut g = NetGraph::new();
        let p = observer(&mut g, "P?", 'p');
        let n = g.add_node("N").unwrap();
        let z = g.add_node("Z").unwrap();
        let pz = g.add_edge("pz", p, z, ConstraintType::Requirement).unwrap();
        g[pz].labeled.put(Label::empty(), -5);
        let nz = g.add_edge("nz", n, z, ConstraintType::Requirement).unwrap();
        g[nz].labeled.put(label("p"), -7);
        let status = dc_check(&mut g, &CstnOptions::default()).unwrap();
        assert_eq!(status.consistent, Some(true));
        let nz = g.edge_between(n, z).unwrap();
        // max(−5, −7) = −5 under the p-free label
        assert_eq!(g[nz].labeled.get(&Label::empty()), Some(-5));
        assert!(status.rules.r3 > 0);
    }

    #[test]
    fn fixpoint_is_idempotent() {
        let mut g = NetGraph::new();
        let _p = observer(&mut g, "P?", 'p');
        let a = g.add_node("A").unwrap();
        let b = g.add_node("B").unwrap();
        let ab = g.add_edge("ab", a, b, ConstraintType::Requirement).unwrap();
        g[ab].labeled.put(label("p"), -2);
        g[ab].labeled.put(label("¬p"), 3);
        let ba = g.add_edge("ba", b, a, ConstraintType::Requirement).unwrap();
        g[ba].labeled.put(Label::empty(), 10);
        let status = dc_check(&mut g, &CstnOptions::default()).unwrap();
        assert_eq!(status.consistent, Some(true));
        let snapshot: Vec<_> = g
            .edge_keys()
            .into_iter()
            .map(|k| (g[k].src(), g[k].dst(), g[k].labeled.clone()))
            .collect();
        // a second run must not derive anything new
        let status2 = dc_check(&mut g, &CstnOptions::default()).unwrap();
        assert_eq!(status2.consistent, Some(true));
        let snapshot2: Vec<_> = g
            .edge_keys()
            .into_iter()
            .map(|k| (g[k].src(), g[k].dst(), g[k].labeled.clone()))
            .collect();
        assert_eq!(snapshot.len(), snapshot2.len());
        for ((s1, d1, m1), (s2, d2, m2)) in snapshot.iter().zip(snapshot2.iter()) {
            assert_eq!((s1, d1), (s2, d2));
            assert_eq!(m1, m2);
        }
    }
}
