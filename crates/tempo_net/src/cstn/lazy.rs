//! Lazily-weighted conditional networks.
//!
//! An edge weight may be a piecewise-linear function of a symbolic
//! parameter `∂` instead of a plain integer. Propagation carries the
//! symbolic structure (sums and maxima of linear pieces) and compares
//! values by evaluating at the current `∂`. When a negative loop's value
//! depends on `∂`, the smallest parameter closing the loop is solved for
//! (directly for a linear piece, by binary search for sums and maxima),
//! the parameter is reset globally and the whole check restarts from the
//! initialized graph. A loop that stays negative past the horizon makes
//! the requested parameter unachievable.

use super::CstnOptions;
use crate::error::NetError;
use crate::graph::{EdgeKey, NetGraph};
use crate::init::{InitOptions, init_and_check};
use crate::label::{Label, Proposition, State};
use crate::status::CheckStatus;
use alloc::boxed::Box;
use alloc::vec::Vec;
use tempo_core::collections::HashMap;
use tempo_core::weight::{NEG_INF, is_finite, sum_saturating};
use tempo_core::Weight;

/// A weight that may depend on the parameter `∂`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LazyWeight {
    /// A plain integer
    Const(Weight),
    /// The linear piece `m·∂ + q`, with `m ≥ 0`
    Piece {
        /// Slope; a larger parameter never tightens a constraint
        m: Weight,
        /// Intercept
        q: Weight,
    },
    /// Sum of two lazy weights
    Sum(Box<LazyWeight>, Box<LazyWeight>),
    /// Maximum of two lazy weights
    Max(Box<LazyWeight>, Box<LazyWeight>),
}

impl LazyWeight {
    /// The linear piece `m·∂ + q`
    pub fn piece(m: Weight, q: Weight) -> Self {
        debug_assert!(m >= 0, "pieces must be non-decreasing in the parameter");
        if m == 0 { Self::Const(q) } else { Self::Piece { m, q } }
    }

    /// Structure-preserving sum, folding constants
    pub fn sum(a: Self, b: Self) -> Self {
        match (a, b) {
            (Self::Const(x), Self::Const(y)) => Self::Const(sum_saturating(x, y)),
            (Self::Const(x), Self::Piece { m, q }) | (Self::Piece { m, q }, Self::Const(x)) => {
                Self::Piece {
                    m,
                    q: sum_saturating(q, x),
                }
            }
            (a, b) => Self::Sum(Box::new(a), Box::new(b)),
        }
    }

    /// Structure-preserving maximum, folding constants
    pub fn max(a: Self, b: Self) -> Self {
        match (a, b) {
            (Self::Const(x), Self::Const(y)) => Self::Const(x.max(y)),
            (a, b) => Self::Max(Box::new(a), Box::new(b)),
        }
    }

    /// The value at `∂ = theta`
    pub fn eval(&self, theta: Weight) -> Weight {
        match self {
            Self::Const(w) => *w,
            Self::Piece { m, q } => {
                let scaled = m.saturating_mul(theta).clamp(NEG_INF, tempo_core::INF);
                sum_saturating(scaled, *q)
            }
            Self::Sum(a, b) => sum_saturating(a.eval(theta), b.eval(theta)),
            Self::Max(a, b) => a.eval(theta).max(b.eval(theta)),
        }
    }

    /// Whether the value changes with `∂`
    pub fn depends_on_parameter(&self) -> bool {
        match self {
            Self::Const(_) => false,
            Self::Piece { .. } => true,
            Self::Sum(a, b) | Self::Max(a, b) => {
                a.depends_on_parameter() || b.depends_on_parameter()
            }
        }
    }

    /// Smallest `∂ ∈ [0, horizon]` with a non-negative value, if any
    ///
    /// Every piece is non-decreasing in `∂`, so the whole expression is
    /// and the root can be bisected; a single piece is solved directly.
    pub fn solve_zero(&self, horizon: Weight) -> Option<Weight> {
        match self {
            Self::Const(w) => (*w >= 0).then_some(0),
            Self::Piece { m, q } => {
                if *q >= 0 {
                    return Some(0);
                }
                if !is_finite(*q) {
                    return None;
                }
                let need = -*q;
                let t = need.div_euclid(*m) + Weight::from(need.rem_euclid(*m) > 0);
                (t <= horizon).then_some(t)
            }
            _ => {
                if self.eval(0) >= 0 {
                    return Some(0);
                }
                if self.eval(horizon) < 0 {
                    return None;
                }
                let (mut lo, mut hi) = (0, horizon);
                while lo + 1 < hi {
                    let mid = lo + (hi - lo) / 2;
                    if self.eval(mid) >= 0 {
                        hi = mid;
                    } else {
                        lo = mid;
                    }
                }
                Some(hi)
            }
        }
    }
}

/// A lazily-weighted labeled value attached to an edge of the template
/// graph
pub type LazyValue = (EdgeKey, Label, LazyWeight);

/// Outcome of a lazy check
#[derive(Clone, Debug)]
pub struct LazyOutcome {
    /// The final propagation status (of the last restart)
    pub status: CheckStatus,
    /// The parameter value the verdict holds for
    pub theta: Weight,
}

/// Checks a conditional network whose weights may depend on `∂`
///
/// Starts at `∂ = 0` and raises it to the smallest value neutralizing
/// each parameter-dependent negative loop found, restarting from the
/// initialized graph after every raise. A parameter-independent negative
/// loop, or one that no `∂` within the horizon can fix, ends the check
/// with a negative verdict.
pub fn dc_check_lazy(
    g: &mut NetGraph,
    lazy_values: &[LazyValue],
    opts: &CstnOptions,
) -> Result<LazyOutcome, NetError> {
    init_and_check(
        g,
        &InitOptions {
            cstn: true,
            ..InitOptions::default()
        },
    )?;
    let horizon = g.horizon.unwrap_or(0);
    let mut theta: Weight = 0;
    let mut status;
    loop {
        status = CheckStatus::new("CSTN-lazy");
        let mut engine = LazyEngine::new(g, lazy_values, theta);
        match engine.run(&mut status, opts) {
            LazyVerdict::Consistent => {
                status.finish(true);
                break;
            }
            LazyVerdict::Timeout => break,
            LazyVerdict::NegativeLoop(loop_weight) => {
                if !loop_weight.depends_on_parameter() {
                    status.finish(false);
                    break;
                }
                match loop_weight.solve_zero(horizon) {
                    Some(t) if t > theta => {
                        log::debug!("raising parameter to {t} and restarting");
                        theta = t;
                    }
                    // no admissible parameter within the horizon
                    _ => {
                        status.finish(false);
                        break;
                    }
                }
            }
        }
    }
    status.execution_time = opts.deadline.elapsed();
    Ok(LazyOutcome { status, theta })
}

enum LazyVerdict {
    Consistent,
    NegativeLoop(LazyWeight),
    Timeout,
}

/// A compact labeled map over lazy weights, compared at the current `∂`
#[derive(Clone, Default)]
struct LazyValues {
    entries: Vec<(Label, LazyWeight)>,
}

impl LazyValues {
    fn put(&mut self, label: Label, w: LazyWeight, theta: Weight) -> bool {
        let v = w.eval(theta);
        if self
            .entries
            .iter()
            .any(|(l1, w1)| label.subsumes(l1) && w1.eval(theta) <= v)
        {
            return false;
        }
        self.entries
            .retain(|(l1, w1)| !(l1.subsumes(&label) && v <= w1.eval(theta)));
        self.entries.push((label, w));
        self.entries.sort_by_key(|(l, _)| *l);
        true
    }
}

/// Label propagation with symbolic weights
struct LazyEngine<'a> {
    g: &'a NetGraph,
    theta: Weight,
    values: HashMap<EdgeKey, LazyValues>,
    /// Extra derived constraints keyed by node pair (the template graph
    /// is never mutated)
    derived: HashMap<(crate::graph::NodeKey, crate::graph::NodeKey), LazyValues>,
    children: HashMap<Proposition, Vec<Proposition>>,
    max_cycles: u64,
}

impl<'a> LazyEngine<'a> {
    fn new(g: &'a NetGraph, lazy_values: &[LazyValue], theta: Weight) -> Self {
        let mut values: HashMap<EdgeKey, LazyValues> = HashMap::default();
        for ek in g.edges() {
            let mut slot = LazyValues::default();
            for (l, w) in g[ek].labeled.iter() {
                slot.put(l, LazyWeight::Const(w), theta);
            }
            values.insert(ek, slot);
        }
        for (ek, label, w) in lazy_values {
            if let Some(slot) = values.get_mut(ek) {
                slot.put(*label, w.clone(), theta);
            }
        }
        let mut children: HashMap<Proposition, Vec<Proposition>> = HashMap::default();
        for key in g.node_keys() {
            let Some(q) = g[key].observed else { continue };
            for (p, _) in g[key].label.literals() {
                children.entry(p).or_default().push(q);
            }
        }
        let n = g.node_count() as u64;
        let max_cycles = (g.max_abs_weight().unsigned_abs().max(1))
            .saturating_mul(n.saturating_mul(n))
            .saturating_mul(729);
        Self {
            g,
            theta,
            values,
            derived: HashMap::default(),
            children,
            max_cycles,
        }
    }

    fn strip_unknown_children(&self, mut label: Label) -> Label {
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

    fn run(&mut self, status: &mut CheckStatus, opts: &CstnOptions) -> LazyVerdict {
        loop {
            status.cycles += 1;
            if opts.deadline.expired() {
                status.timeout = true;
                return LazyVerdict::Timeout;
            }
            if status.cycles > self.max_cycles {
                log::warn!("lazy propagation cycle bound exceeded; giving up");
                status.timeout = true;
                return LazyVerdict::Timeout;
            }
            let mut changed = false;
            // snapshot of every constraint: (src, dst, label, weight)
            let constraints = self.snapshot();
            for (a, b, alpha, u) in &constraints {
                for (b2, c, beta, v) in &constraints {
                    if b2 != b {
                        continue;
                    }
                    let s = LazyWeight::sum(u.clone(), v.clone());
                    let s_val = s.eval(self.theta);
                    if s_val >= 0 {
                        continue;
                    }
                    let gamma = self.strip_unknown_children(alpha.conjunction_extended(beta));
                    if a == c {
                        if !gamma.has_unknown() {
                            return LazyVerdict::NegativeLoop(s);
                        }
                        if self.put(*a, *c, gamma, LazyWeight::Const(NEG_INF)) {
                            changed = true;
                            status.rules.qlp += 1;
                        }
                        continue;
                    }
                    if u.eval(self.theta) >= 0 && gamma.has_unknown() {
                        continue;
                    }
                    if self.put(*a, *c, gamma, s) {
                        changed = true;
                        if gamma.has_unknown() {
                            status.rules.qlp += 1;
                        } else {
                            status.rules.lp += 1;
                        }
                    }
                }
            }
            changed |= self.observation_rules(status);
            if !changed {
                return LazyVerdict::Consistent;
            }
        }
    }

    /// `qR0` and `qR3` over the current constraint set
    fn observation_rules(&mut self, status: &mut CheckStatus) -> bool {
        let Some(z) = self.g.zero() else { return false };
        let mut changed = false;
        let constraints = self.snapshot();
        for (src, dst, label, w) in &constraints {
            // qR0
            if let Some(p) = self.g[*src].observed {
                if w.eval(self.theta) <= 0 && label.contains(p) {
                    let mut stripped = label.without(p);
                    for q in self.children.get(&p).cloned().into_iter().flatten() {
                        stripped.remove(q);
                    }
                    if *dst == z {
                        stripped = self.strip_unknown_children(stripped);
                    }
                    if stripped != *label && self.put(*src, *dst, stripped, w.clone()) {
                        changed = true;
                        status.rules.qr0 += 1;
                    }
                }
            }
            // qR3, with this constraint in the nS → Z role
            if *dst != z {
                continue;
            }
            for (p, _) in label.literals() {
                let Some(obs) = self.g.observer_of(p) else { continue };
                if obs == *src {
                    continue;
                }
                let beta = label.without(p);
                for (o_src, o_dst, gamma, ow) in &constraints {
                    if *o_src != obs || *o_dst != z || ow.eval(self.theta) > 0 {
                        continue;
                    }
                    let new_label = self.strip_unknown_children(gamma.conjunction_extended(&beta));
                    let new_w = LazyWeight::max(ow.clone(), w.clone());
                    if self.put(*src, z, new_label, new_w) {
                        changed = true;
                        status.rules.qr3 += 1;
                    }
                }
            }
        }
        changed
    }

    fn snapshot(
        &self,
    ) -> Vec<(
        crate::graph::NodeKey,
        crate::graph::NodeKey,
        Label,
        LazyWeight,
    )> {
        let mut out = Vec::new();
        for ek in self.g.edges() {
            if let Some(slot) = self.values.get(&ek) {
                for (l, w) in &slot.entries {
                    out.push((self.g[ek].src(), self.g[ek].dst(), *l, w.clone()));
                }
            }
        }
        for ((a, b), slot) in &self.derived {
            for (l, w) in &slot.entries {
                out.push((*a, *b, *l, w.clone()));
            }
        }
        out
    }

    fn put(
        &mut self,
        a: crate::graph::NodeKey,
        b: crate::graph::NodeKey,
        label: Label,
        w: LazyWeight,
    ) -> bool {
        if let Some(ek) = self.g.edge_between(a, b) {
            return self
                .values
                .entry(ek)
                .or_default()
                .put(label, w, self.theta);
        }
        self.derived
            .entry((a, b))
            .or_default()
            .put(label, w, self.theta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ConstraintType;
    use crate::label::tests_support::label;

    #[test]
    fn lazy_arithmetic_folds_constants() {
        let s = LazyWeight::sum(LazyWeight::Const(3), LazyWeight::Const(-5));
        assert_eq!(s, LazyWeight::Const(-2));
        let p = LazyWeight::sum(LazyWeight::piece(2, -10), LazyWeight::Const(4));
        assert_eq!(p.eval(0), -6);
        assert_eq!(p.eval(3), 0);
        let m = LazyWeight::max(LazyWeight::piece(1, -4), LazyWeight::Const(-1));
        assert_eq!(m.eval(0), -1);
        assert_eq!(m.eval(10), 6);
    }

    #[test]
    fn piece_root_is_solved_by_ratio() {
        let p = LazyWeight::piece(3, -7);
        // 3∂ − 7 ≥ 0 at ∂ = ⌈7/3⌉ = 3
        assert_eq!(p.solve_zero(100), Some(3));
        assert_eq!(p.solve_zero(2), None);
        assert_eq!(LazyWeight::Const(-1).solve_zero(100), None);
    }

    #[test]
    fn composite_root_is_bisected() {
        let s = LazyWeight::Sum(
            Box::new(LazyWeight::piece(2, -9)),
            Box::new(LazyWeight::Const(1)),
        );
        // 2∂ − 8 ≥ 0 at ∂ = 4
        assert_eq!(s.solve_zero(50), Some(4));
        let m = LazyWeight::Max(
            Box::new(LazyWeight::piece(1, -30)),
            Box::new(LazyWeight::piece(4, -12)),
        );
        assert_eq!(m.solve_zero(50), Some(3));
    }

    #[test]
    fn parameter_is_raised_until_the_loop_closes() {
        // a loop A → B → A whose backward value grows with ∂: consistent
        // once ∂ reaches 5
        let mut g = NetGraph::new();
        let a = g.add_node("A").unwrap();
        let b = g.add_node("B").unwrap();
        let ab = g.add_edge("ab", a, b, ConstraintType::Requirement).unwrap();
        g[ab].labeled.put(Label::empty(), -5);
        let ba = g.add_edge("ba", b, a, ConstraintType::Requirement).unwrap();
        let lazy = [(ba, Label::empty(), LazyWeight::piece(1, 0))];
        let outcome = dc_check_lazy(&mut g, &lazy, &CstnOptions::default()).unwrap();
        assert_eq!(outcome.status.consistent, Some(true));
        assert_eq!(outcome.theta, 5);
    }

    #[test]
    fn constant_negative_loop_stays_inconsistent() {
        let mut g = NetGraph::new();
        let a = g.add_node("A").unwrap();
        let b = g.add_node("B").unwrap();
        let ab = g.add_edge("ab", a, b, ConstraintType::Requirement).unwrap();
        g[ab].labeled.put(Label::empty(), -5);
        let ba = g.add_edge("ba", b, a, ConstraintType::Requirement).unwrap();
        g[ba].labeled.put(Label::empty(), 2);
        let outcome = dc_check_lazy(&mut g, &[], &CstnOptions::default()).unwrap();
        assert_eq!(outcome.status.consistent, Some(false));
        assert_eq!(outcome.theta, 0);
    }

    #[test]
    fn unreachable_parameter_is_rejected_at_the_horizon() {
        let mut g = NetGraph::new();
        let a = g.add_node("A").unwrap();
        let b = g.add_node("B").unwrap();
        let ab = g.add_edge("ab", a, b, ConstraintType::Requirement).unwrap();
        g[ab].labeled.put(Label::empty(), -10);
        let ba = g.add_edge("ba", b, a, ConstraintType::Requirement).unwrap();
        // closing this loop needs ∂ ≥ 5010, far past the horizon
        let lazy = [(ba, Label::empty(), LazyWeight::piece(1, -5_000))];
        let outcome = dc_check_lazy(&mut g, &lazy, &CstnOptions::default()).unwrap();
        assert_eq!(outcome.status.consistent, Some(false));
    }
}
