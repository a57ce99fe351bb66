//! Well-definition checks and graph normalization.
//!
//! [`init_and_check`] is the only entry point: it validates the parsed
//! network, fills the auxiliary indices, computes the horizon and brings
//! contingent links into the form the checkers expect. It operates on a
//! working copy and commits only on success, so a failed initialization
//! leaves the caller's graph untouched.

use crate::error::NetError;
use crate::graph::{CaseValue, ConstraintType, EdgeKey, NetGraph, NodeKey, ZERO_NODE_NAME};
use crate::label::Label;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use tempo_core::Weight;
use tempo_core::collections::HashSet;

/// Switches for [`init_and_check`]
#[derive(Clone, Copy, Debug, Default)]
pub struct InitOptions {
    /// Treat the network as conditional: validate labeled values, convert
    /// plain ordinary values into labeled ones and add horizon edges
    pub cstn: bool,
    /// Rewrite every contingent link `(A, x, y, C)` with `x > 0` into
    /// `(A', 0, y − x, C)` through a rigid helper node
    pub normal_form: bool,
    /// Also record the bounds of every contingent link as ordinary
    /// constraints
    pub contingent_also_as_ordinary: bool,
}

/// Validates the network and fills the auxiliary indices
pub fn init_and_check(g: &mut NetGraph, opts: &InitOptions) -> Result<(), NetError> {
    let mut work = g.clone();
    run(&mut work, opts)?;
    *g = work;
    Ok(())
}

fn run(g: &mut NetGraph, opts: &InitOptions) -> Result<(), NetError> {
    ensure_zero(g)?;
    drop_self_loops(g);
    register_observers(g)?;
    pair_contingents(g, opts)?;
    if opts.cstn {
        check_node_labels(g)?;
        repair_labeled_values(g)?;
    }
    g.clean_empty_edges();
    compute_horizon(g, opts)?;
    if opts.normal_form {
        rewrite_to_normal_form(g)?;
    }
    Ok(())
}

fn ensure_zero(g: &mut NetGraph) -> Result<(), NetError> {
    let z = match g.find_node(ZERO_NODE_NAME) {
        Some(z) => z,
        None => g.add_node(ZERO_NODE_NAME)?,
    };
    if !g[z].label.is_empty() {
        log::warn!("zero time-point carries label {}; cleared", g[z].label);
        g[z].label = Label::empty();
    }
    g.set_zero(z);
    Ok(())
}

fn drop_self_loops(g: &mut NetGraph) {
    let loops: Vec<EdgeKey> = g
        .edge_keys()
        .into_iter()
        .filter(|k| g[*k].src() == g[*k].dst())
        .collect();
    for key in loops {
        log::warn!("removing self-loop {}", g[key].name());
        g.remove_edge(key);
    }
}

fn register_observers(g: &mut NetGraph) -> Result<(), NetError> {
    for key in g.node_keys() {
        let Some(p) = g[key].observed else { continue };
        g.register_observer(p, key)?;
        if g[key].label.contains(p) {
            log::warn!(
                "observer {} mentions its own proposition {}; literal removed",
                g[key].name(),
                p.to_char()
            );
            g[key].label.remove(p);
        }
    }
    Ok(())
}

/// The lower-bound candidate an edge offers when read as the `A → C` side
fn lower_candidate(g: &NetGraph, key: EdgeKey) -> Option<Weight> {
    let e = &g[key];
    e.lower
        .map(|c| c.value)
        .or_else(|| e.ordinary.filter(|w| *w >= 0))
}

/// The upper-bound candidate an edge offers when read as the `C → A` side
fn upper_candidate(g: &NetGraph, key: EdgeKey) -> Option<Weight> {
    let e = &g[key];
    e.upper
        .map(|c| c.value)
        .or_else(|| e.ordinary.filter(|w| *w < 0))
}

fn pair_contingents(g: &mut NetGraph, opts: &InitOptions) -> Result<(), NetError> {
    let mut done: HashSet<NodeKey> = HashSet::default();
    for key in g.edge_keys() {
        if g.edge(key).is_none() || g[key].kind != ConstraintType::Contingent {
            continue;
        }
        let (u, v) = (g[key].src(), g[key].dst());
        if done.contains(&u) || done.contains(&v) {
            continue;
        }
        pair_one(g, key, opts)?;
        done.insert(u);
        done.insert(v);
    }
    Ok(())
}

/// Installs the contingent link one of whose edges is `key`
fn pair_one(g: &mut NetGraph, key: EdgeKey, opts: &InitOptions) -> Result<(), NetError> {
    let (u, v) = (g[key].src(), g[key].dst());
    let companion = g.edge_between(v, u);
    if let Some(c) = companion {
        if g[c].kind != ConstraintType::Contingent {
            return Err(NetError::MalformedInput(format!(
                "companion of contingent edge {} is {}",
                g[key].name(),
                g[c].kind
            )));
        }
    }

    // orient the pair: x sits on A → C, −y on C → A
    if let (Some(x), Some(neg_y)) = (
        lower_candidate(g, key),
        companion.and_then(|c| upper_candidate(g, c)),
    ) {
        return install_link(g, u, v, key, companion.unwrap(), x, -neg_y, opts);
    }
    if let (Some(neg_y), Some(x)) = (
        upper_candidate(g, key),
        companion.and_then(|c| lower_candidate(g, c)),
    ) {
        return install_link(g, v, u, companion.unwrap(), key, x, -neg_y, opts);
    }
    synthesize_companion(g, key, opts)
}

/// Builds the missing side of a contingent link whose present edge
/// carries both bounds (the lower-case value plus the range as an
/// ordinary value)
fn synthesize_companion(
    g: &mut NetGraph,
    key: EdgeKey,
    opts: &InitOptions,
) -> Result<(), NetError> {
    let (u, v) = (g[key].src(), g[key].dst());
    if let (Some(x), Some(y)) = (
        g[key].lower.map(|c| c.value),
        g[key].ordinary.filter(|w| *w > 0),
    ) {
        let upper = g.ensure_edge(v, u, ConstraintType::Contingent);
        g[upper].upper = Some(CaseValue { node: v, value: -y });
        g[key].ordinary = None;
        return install_link(g, u, v, key, upper, x, y, opts);
    }
    if let (Some(neg_y), Some(neg_x)) = (
        g[key].upper.map(|c| c.value),
        g[key].ordinary.filter(|w| *w <= 0),
    ) {
        let lower = g.ensure_edge(v, u, ConstraintType::Contingent);
        g[lower].lower = Some(CaseValue {
            node: u,
            value: -neg_x,
        });
        g[key].ordinary = None;
        return install_link(g, v, u, lower, key, -neg_x, -neg_y, opts);
    }
    Err(NetError::MalformedInput(format!(
        "contingent edge {} has no usable companion",
        g[key].name()
    )))
}

fn install_link(
    g: &mut NetGraph,
    act: NodeKey,
    ctg: NodeKey,
    lower_edge: EdgeKey,
    upper_edge: EdgeKey,
    x: Weight,
    y: Weight,
    opts: &InitOptions,
) -> Result<(), NetError> {
    if !(0 <= x && x < y) {
        return Err(NetError::MalformedInput(format!(
            "contingent link ({}, {x}, {y}, {}) violates 0 ≤ x < y",
            g[act].name(),
            g[ctg].name()
        )));
    }
    g[lower_edge].lower = Some(CaseValue { node: ctg, value: x });
    g[upper_edge].upper = Some(CaseValue {
        node: ctg,
        value: -y,
    });
    if opts.contingent_also_as_ordinary {
        g[lower_edge].merge_ordinary(y);
        g[upper_edge].merge_ordinary(-x);
    } else {
        g[lower_edge].ordinary = None;
        g[upper_edge].ordinary = None;
    }
    g.register_contingent(ctg, act, lower_edge, upper_edge)
}

fn check_node_labels(g: &mut NetGraph) -> Result<(), NetError> {
    for key in g.node_keys() {
        // every proposition mentioned must have an observer, and the
        // node's label must subsume each involved observer's label
        for _ in 0..crate::label::MAX_PROPOSITIONS {
            let label = g[key].label;
            let mut repaired = label;
            for (p, _) in label.literals() {
                let obs = g.observer_of(p).ok_or_else(|| {
                    NetError::MalformedInput(format!(
                        "proposition {} in label of {} has no observer",
                        p.to_char(),
                        g[key].name()
                    ))
                })?;
                let obs_label = g[obs].label;
                if !repaired.subsumes(&obs_label) {
                    repaired = repaired.conjunction(&obs_label).ok_or_else(|| {
                        NetError::MalformedInput(format!(
                            "label of {} inconsistent with observer of {}",
                            g[key].name(),
                            p.to_char()
                        ))
                    })?;
                }
            }
            if repaired == label {
                break;
            }
            log::warn!(
                "label of {} extended to {} to honor observation scenarios",
                g[key].name(),
                repaired
            );
            g[key].label = repaired;
        }
    }
    Ok(())
}

fn repair_labeled_values(g: &mut NetGraph) -> Result<(), NetError> {
    for key in g.edge_keys() {
        let (src, dst) = (g[key].src(), g[key].dst());
        let base = match g[src].label.conjunction(&g[dst].label) {
            Some(base) => base,
            None => {
                log::warn!(
                    "edge {} joins never-coexecuted time-points; removed",
                    g[key].name()
                );
                g.remove_edge(key);
                continue;
            }
        };
        // a plain ordinary value in a conditional network becomes a
        // labeled value under the endpoints' conjunction
        if let Some(w) = g[key].ordinary.take() {
            g[key].labeled.put(base, w);
        }
        let values: Vec<(Label, Weight)> = g[key].labeled.iter().collect();
        let mut rebuilt = crate::label::LabeledWeights::new();
        'values: for (mut label, v) in values {
            if !label.is_consistent_with(&base) {
                log::warn!(
                    "labeled value ({v}, {label}) on {} contradicts its end-points; dropped",
                    g[key].name()
                );
                continue;
            }
            if !label.subsumes(&base) {
                match label.conjunction(&base) {
                    Some(l) => label = l,
                    None => continue 'values,
                }
            }
            // conjoin observer labels until stable
            for _ in 0..crate::label::MAX_PROPOSITIONS {
                let mut changed = false;
                let current: Vec<_> = label.literals().collect();
                for (p, _) in current {
                    let obs = g.observer_of(p).ok_or_else(|| {
                        NetError::MalformedInput(format!(
                            "proposition {} on edge {} has no observer",
                            p.to_char(),
                            g[key].name()
                        ))
                    })?;
                    let obs_label = g[obs].label;
                    if !label.subsumes(&obs_label) {
                        match label.conjunction(&obs_label) {
                            Some(l) => {
                                label = l;
                                changed = true;
                            }
                            None => continue 'values,
                        }
                    }
                }
                if !changed {
                    break;
                }
            }
            rebuilt.put(label, v);
        }
        g[key].labeled = rebuilt;
    }
    Ok(())
}

fn compute_horizon(g: &mut NetGraph, opts: &InitOptions) -> Result<(), NetError> {
    let max_w = g.max_abs_weight();
    let n = g.node_count() as Weight;
    let horizon = max_w
        .checked_mul(n.saturating_sub(1))
        .filter(|h| tempo_core::weight::is_finite(*h))
        .ok_or(NetError::Overflow("the horizon"))?;
    g.horizon = Some(horizon);

    if opts.cstn {
        let z = g.zero().expect("zero node installed above");
        for key in g.node_keys() {
            if key == z {
                continue;
            }
            let label = g[key].label;
            let to_z = g.ensure_edge(key, z, ConstraintType::Internal);
            g[to_z].labeled.put(label, 0);
            let from_z = g.ensure_edge(z, key, ConstraintType::Internal);
            g[from_z].labeled.put(label, horizon);
        }
    }
    Ok(())
}

fn rewrite_to_normal_form(g: &mut NetGraph) -> Result<(), NetError> {
    for link in g.contingent_links() {
        if link.min == 0 {
            continue;
        }
        let helper_name = fresh_helper_name(g, g[link.act].name());
        let helper = g.add_node(&helper_name)?;
        g[helper].label = g[link.act].label;
        g[helper].x = g[link.act].x;
        g[helper].y = g[link.act].y + 20.0;

        let fwd = g.ensure_edge(link.act, helper, ConstraintType::Internal);
        g[fwd].merge_ordinary(link.min);
        let back = g.ensure_edge(helper, link.act, ConstraintType::Internal);
        g[back].merge_ordinary(-link.min);

        g.remove_edge(link.lower_edge);
        g.remove_edge(link.upper_edge);
        g.unregister_contingent(link.ctg);

        let lower = g.ensure_edge(helper, link.ctg, ConstraintType::Contingent);
        g[lower].lower = Some(CaseValue {
            node: link.ctg,
            value: 0,
        });
        let upper = g.ensure_edge(link.ctg, helper, ConstraintType::Contingent);
        g[upper].upper = Some(CaseValue {
            node: link.ctg,
            value: link.min - link.max,
        });
        g.register_contingent(link.ctg, helper, lower, upper)?;
    }
    Ok(())
}

fn fresh_helper_name(g: &NetGraph, base: &str) -> String {
    let mut name = format!("{base}'");
    while g.find_node(&name).is_some() {
        name.push('\'');
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ConstraintType;

    fn two_node_stnu() -> NetGraph {
        let mut g = NetGraph::new();
        let a = g.add_node("A").unwrap();
        let c = g.add_node("C").unwrap();
        let lo = g.add_edge("lo", a, c, ConstraintType::Contingent).unwrap();
        g[lo].ordinary = Some(1);
        let up = g.add_edge("up", c, a, ConstraintType::Contingent).unwrap();
        g[up].ordinary = Some(-3);
        g
    }

    #[test]
    fn pairing_reads_ordinary_contingent_bounds() {
        let mut g = two_node_stnu();
        init_and_check(&mut g, &InitOptions::default()).unwrap();
        let links = g.contingent_links();
        assert_eq!(links.len(), 1);
        assert_eq!((links[0].min, links[0].max), (1, 3));
        assert!(g.zero().is_some());
        // bounds moved into the case slots
        assert!(g[links[0].lower_edge].ordinary.is_none());
        assert!(g[links[0].upper_edge].ordinary.is_none());
    }

    #[test]
    fn invalid_bounds_are_rejected_and_leave_input_untouched() {
        let mut g = two_node_stnu();
        let a = g.find_node("A").unwrap();
        let c = g.find_node("C").unwrap();
        let up = g.edge_between(c, a).unwrap();
        g[up].ordinary = Some(-1); // x == y
        let before_nodes = g.node_count();
        assert!(init_and_check(&mut g, &InitOptions::default()).is_err());
        // no zero node was committed
        assert_eq!(g.node_count(), before_nodes);
        assert!(g.find_node(ZERO_NODE_NAME).is_none());
    }

    #[test]
    fn normal_form_splits_activation() {
        let mut g = two_node_stnu();
        init_and_check(
            &mut g,
            &InitOptions {
                normal_form: true,
                ..InitOptions::default()
            },
        )
        .unwrap();
        let links = g.contingent_links();
        assert_eq!(links.len(), 1);
        assert_eq!((links[0].min, links[0].max), (0, 2));
        let helper = g.find_node("A'").unwrap();
        assert_eq!(links[0].act, helper);
        let a = g.find_node("A").unwrap();
        assert_eq!(g[g.edge_between(a, helper).unwrap()].ordinary, Some(1));
        assert_eq!(g[g.edge_between(helper, a).unwrap()].ordinary, Some(-1));
    }

    #[test]
    fn contingent_bounds_can_double_as_ordinary_constraints() {
        let mut g = two_node_stnu();
        init_and_check(
            &mut g,
            &InitOptions {
                contingent_also_as_ordinary: true,
                ..InitOptions::default()
            },
        )
        .unwrap();
        let links = g.contingent_links();
        assert_eq!(g[links[0].lower_edge].ordinary, Some(3));
        assert_eq!(g[links[0].upper_edge].ordinary, Some(-1));
    }

    #[test]
    fn labeled_values_subsume_endpoints_and_observers_after_init() {
        let mut g = NetGraph::new();
        let p = g.add_node("P?").unwrap();
        g[p].observed = crate::label::Proposition::from_char('p');
        let q = g.add_node("Q?").unwrap();
        g[q].observed = crate::label::Proposition::from_char('q');
        g[q].label = "p".parse().unwrap();
        let x = g.add_node("X").unwrap();
        g[x].label = "q".parse().unwrap();
        let e = g.add_edge("e", p, x, ConstraintType::Requirement).unwrap();
        // too weak a label: must be tightened to the endpoint conjunction
        // and to the observer label of q
        g[e].labeled.put(Label::empty(), 4);
        init_and_check(
            &mut g,
            &InitOptions {
                cstn: true,
                ..InitOptions::default()
            },
        )
        .unwrap();
        let e = g.edge_between(p, x).unwrap();
        for (label, _) in g[e].labeled.iter() {
            let base = g[p].label.conjunction(&g[x].label).unwrap();
            assert!(label.subsumes(&base));
            for (prop, _) in label.literals() {
                let obs = g.observer_of(prop).unwrap();
                assert!(label.subsumes(&g[obs].label));
            }
        }
    }

    #[test]
    fn cstn_init_adds_horizon_edges() {
        let mut g = NetGraph::new();
        let p = g.add_node("P?").unwrap();
        g[p].observed = crate::label::Proposition::from_char('p');
        let x = g.add_node("X").unwrap();
        g[x].label = "p".parse().unwrap();
        let e = g.add_edge("px", p, x, ConstraintType::Requirement).unwrap();
        g[e].ordinary = Some(5);
        init_and_check(
            &mut g,
            &InitOptions {
                cstn: true,
                ..InitOptions::default()
            },
        )
        .unwrap();
        let z = g.zero().unwrap();
        let h = g.horizon.unwrap();
        assert!(h >= 5);
        let xz = g.edge_between(x, z).unwrap();
        assert_eq!(g[xz].labeled.get(&"p".parse().unwrap()), Some(0));
        let zx = g.edge_between(z, x).unwrap();
        assert_eq!(g[zx].labeled.get(&"p".parse().unwrap()), Some(h));
        // ordinary value was converted into a labeled one
        let px = g.edge_between(p, x).unwrap();
        assert!(g[px].ordinary.is_none());
        assert_eq!(g[px].labeled.get(&"p".parse().unwrap()), Some(5));
    }
}
