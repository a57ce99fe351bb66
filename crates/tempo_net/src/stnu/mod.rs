//! STNU dynamic-controllability checkers.
//!
//! Every algorithm mutates the graph in place until either no rule can
//! fire (the network is dynamically controllable) or a negative cycle is
//! found. The dispatchability-preserving variants additionally leave
//! waits and bypass edges behind; `FD_STNU` finishes by handing the graph
//! to the dispatchability minimizer.

mod morris;
mod rul;
mod srnc;

pub(crate) use srnc::{cycle_value, expand_edges};

use crate::error::NetError;
use crate::graph::{ConstraintType, ContingentLink, NetGraph, NodeKey};
use crate::init::{InitOptions, init_and_check};
use crate::status::CheckStatus;
use core::str::FromStr;
use tempo_core::{Deadline, Weight};

/// The selectable DC-checking algorithms
#[derive(Clone, Copy, PartialEq, Eq, Debug, derive_more::Display)]
pub enum StnuAlg {
    /// Morris' negative-node back-propagation
    #[display("Morris2014")]
    Morris2014,
    /// Morris' back-propagation, additionally materializing waits
    #[display("Morris2014Dispatchable")]
    Morris2014Dispatchable,
    /// Contingent-link-centric check with per-round potential rebuilds
    #[display("RUL2018")]
    Rul2018,
    /// Contingent-link-centric check with incremental potential updates
    #[display("RUL2021")]
    Rul2021,
    /// RUL2021 plus wait generation and dispatchability minimization
    #[display("FD_STNU")]
    FdStnu,
    /// `FD_STNU` without the provably redundant over-horizon waits
    #[display("FD_STNU_IMPROVED")]
    FdStnuImproved,
    /// RUL2021 plus edge-path annotations and an expanded witness cycle
    #[display("SRNCycleFinder")]
    SrnCycleFinder,
}

impl StnuAlg {
    /// Every algorithm, in the canonical order
    pub const ALL: [Self; 7] = [
        Self::Morris2014,
        Self::Morris2014Dispatchable,
        Self::Rul2018,
        Self::Rul2021,
        Self::FdStnu,
        Self::FdStnuImproved,
        Self::SrnCycleFinder,
    ];

    /// The canonical name, as accepted on the command line
    pub fn name(self) -> &'static str {
        match self {
            Self::Morris2014 => "Morris2014",
            Self::Morris2014Dispatchable => "Morris2014Dispatchable",
            Self::Rul2018 => "RUL2018",
            Self::Rul2021 => "RUL2021",
            Self::FdStnu => "FD_STNU",
            Self::FdStnuImproved => "FD_STNU_IMPROVED",
            Self::SrnCycleFinder => "SRNCycleFinder",
        }
    }

    /// Whether a successful check leaves an equivalent dispatchable
    /// network behind
    pub fn dispatchable(self) -> bool {
        matches!(
            self,
            Self::Morris2014Dispatchable | Self::FdStnu | Self::FdStnuImproved
        )
    }
}

impl FromStr for StnuAlg {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| NetError::MalformedInput(alloc::format!("unknown algorithm {s:?}")))
    }
}

/// Options common to every STNU check
#[derive(Clone, Copy, Debug, Default)]
pub struct CheckOptions {
    /// Deadline polled between propagation rounds
    pub deadline: Deadline,
    /// Also record contingent bounds as ordinary constraints during
    /// initialization
    pub contingent_also_as_ordinary: bool,
}

/// Early-exit signal threaded through the propagation loops
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Stop {
    /// A negative cycle was found; the verdict is "not DC"
    NotDc,
    /// The deadline passed; the check is unfinished
    Timeout,
}

/// Initializes the graph and runs `alg` to completion
///
/// The verdict, counters and witness are in the returned status; the
/// graph holds whatever constraints the algorithm materialized. Hard
/// failures (`MalformedInput`, `Overflow`, `ContractViolation`) leave the
/// graph untouched.
pub fn dc_check(
    g: &mut NetGraph,
    alg: StnuAlg,
    opts: &CheckOptions,
) -> Result<CheckStatus, NetError> {
    let normal_form = matches!(alg, StnuAlg::Morris2014 | StnuAlg::Morris2014Dispatchable);
    init_and_check(
        g,
        &InitOptions {
            cstn: false,
            normal_form,
            contingent_also_as_ordinary: opts.contingent_also_as_ordinary,
        },
    )?;

    let mut status = CheckStatus::new(alg.name());
    let outcome = match alg {
        StnuAlg::Morris2014 => morris::check(g, &mut status, &opts.deadline, false),
        StnuAlg::Morris2014Dispatchable => morris::check(g, &mut status, &opts.deadline, true),
        StnuAlg::Rul2018 => rul::check(g, &mut status, &opts.deadline, rul::Variant::Rul2018),
        StnuAlg::Rul2021 => rul::check(g, &mut status, &opts.deadline, rul::Variant::Rul2021),
        StnuAlg::FdStnu => {
            rul::check(g, &mut status, &opts.deadline, rul::Variant::Fd { improved: false })
        }
        StnuAlg::FdStnuImproved => {
            rul::check(g, &mut status, &opts.deadline, rul::Variant::Fd { improved: true })
        }
        StnuAlg::SrnCycleFinder => {
            rul::check(g, &mut status, &opts.deadline, rul::Variant::CycleFinder)
        }
    };
    match outcome {
        Ok(()) => status.finish(true),
        Err(Stop::NotDc) => status.finish(false),
        Err(Stop::Timeout) => {
            status.timeout = true;
            status.finished = false;
        }
    }

    if matches!(alg, StnuAlg::FdStnu | StnuAlg::FdStnuImproved) && status.consistent == Some(true)
    {
        crate::dispatch::minimize(g)?;
    }
    status.execution_time = opts.deadline.elapsed();
    Ok(status)
}

/// Stores a wait `(src, C:wait_value, A)` honoring the value bounds
///
/// A wait whose magnitude does not exceed the link's lower bound is an
/// unconditional constraint and is stored as an ordinary value; one
/// exceeding the upper bound is clipped there, or omitted entirely when
/// `omit_over_horizon` is set.
pub(crate) fn materialize_wait(
    g: &mut NetGraph,
    src: NodeKey,
    link: &ContingentLink,
    wait_value: Weight,
    omit_over_horizon: bool,
) -> bool {
    if src == link.act || src == link.ctg {
        return false;
    }
    let v = -wait_value;
    if v <= link.min {
        let e = g.ensure_edge(src, link.act, ConstraintType::Derived);
        return g[e].merge_ordinary(wait_value);
    }
    if v > link.max {
        if omit_over_horizon {
            return false;
        }
        let e = g.ensure_edge(src, link.act, ConstraintType::Derived);
        return g[e].merge_upper(link.ctg, -link.max);
    }
    let e = g.ensure_edge(src, link.act, ConstraintType::Derived);
    g[e].merge_upper(link.ctg, wait_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{CaseValue, ConstraintType, NetGraph};
    use crate::status::CycleKind;

    pub(crate) fn stnu(
        nodes: &[&str],
        requirements: &[(&str, &str, Weight)],
        contingents: &[(&str, Weight, Weight, &str)],
    ) -> NetGraph {
        let mut g = NetGraph::new();
        for n in nodes {
            g.add_node(n).unwrap();
        }
        for (u, v, w) in requirements {
            let u = g.find_node(u).unwrap();
            let v = g.find_node(v).unwrap();
            let e = g.ensure_edge(u, v, ConstraintType::Requirement);
            g[e].merge_ordinary(*w);
        }
        for (a, x, y, c) in contingents {
            let a = g.find_node(a).unwrap();
            let c = g.find_node(c).unwrap();
            let lo = g.ensure_edge(a, c, ConstraintType::Contingent);
            g[lo].lower = Some(CaseValue { node: c, value: *x });
            let up = g.ensure_edge(c, a, ConstraintType::Contingent);
            g[up].upper = Some(CaseValue { node: c, value: -*y });
        }
        g
    }

    fn verdict(g: &NetGraph, alg: StnuAlg) -> bool {
        let mut work = g.clone();
        let status = dc_check(&mut work, alg, &CheckOptions::default()).unwrap();
        assert!(status.finished, "{alg} did not finish");
        status.consistent.unwrap()
    }

    #[test]
    fn two_node_network_is_controllable_under_every_algorithm() {
        let g = stnu(&["A", "C"], &[], &[("A", 1, 3, "C")]);
        for alg in StnuAlg::ALL {
            assert!(verdict(&g, alg), "{alg} rejected a controllable network");
        }
    }

    #[test]
    fn infeasible_triangle_is_rejected_by_every_algorithm() {
        let g = stnu(
            &["A", "B", "C"],
            &[("A", "B", 1), ("B", "C", 1), ("C", "A", -3)],
            &[],
        );
        for alg in StnuAlg::ALL {
            assert!(!verdict(&g, alg), "{alg} accepted an infeasible triangle");
        }
    }

    #[test]
    fn triangle_witness_has_three_original_edges_and_value_minus_one() {
        let mut g = stnu(
            &["A", "B", "C"],
            &[("A", "B", 1), ("B", "C", 1), ("C", "A", -3)],
            &[],
        );
        let status = dc_check(&mut g, StnuAlg::SrnCycleFinder, &CheckOptions::default()).unwrap();
        assert_eq!(status.consistent, Some(false));
        let w = status.witness.expect("cycle finder must produce a witness");
        assert_eq!(w.edges.len(), 3);
        assert_eq!(w.value, -1);
        for key in &w.edges {
            assert_ne!(g[*key].kind, ConstraintType::Derived);
        }
    }

    #[test]
    fn wait_bypass_adds_the_expected_wait() {
        // contingent (A, 2, 10, C); B reaches C within 4, so B must wait
        // for C or 6 after A
        let mut g = stnu(
            &["A", "B", "C", "X"],
            &[("X", "A", 5), ("B", "X", 0), ("B", "C", 4)],
            &[("A", 2, 10, "C")],
        );
        let status = dc_check(&mut g, StnuAlg::FdStnu, &CheckOptions::default()).unwrap();
        assert_eq!(status.consistent, Some(true));
        let b = g.find_node("B").unwrap();
        let a = g.find_node("A").unwrap();
        let c = g.find_node("C").unwrap();
        let ba = g.edge_between(b, a).expect("wait edge B → A");
        let wait = g[ba].upper.expect("upper-case wait value");
        assert_eq!(wait.node, c);
        assert_eq!(wait.value, 4 - 10);
    }

    #[test]
    fn mutually_interrupting_links_are_rejected() {
        // spec'd interruption scenario: each contingent bounds the other
        // link's activation through a plain ordinary edge
        let g = stnu(
            &["A1", "C1", "A2", "C2"],
            &[("C1", "A2", -3), ("C2", "A1", -3)],
            &[("A1", 1, 5, "C1"), ("A2", 1, 5, "C2")],
        );
        for alg in StnuAlg::ALL {
            assert!(!verdict(&g, alg), "{alg} accepted an interruption cycle");
        }
    }

    #[test]
    fn interruption_cycle_witness_kind() {
        // positive-weight paths into each contingent keep the
        // lower/ordinary graph consistent, so the cyclic bypass
        // dependency itself is what certifies non-controllability
        let mut g = stnu(
            &["A1", "C1", "A2", "C2"],
            &[("A2", "C1", 2), ("A1", "C2", 2)],
            &[("A1", 1, 5, "C1"), ("A2", 1, 5, "C2")],
        );
        let status = dc_check(&mut g, StnuAlg::SrnCycleFinder, &CheckOptions::default()).unwrap();
        assert_eq!(status.consistent, Some(false));
        let w = status.witness.expect("witness");
        assert_eq!(w.kind, CycleKind::InterruptionCycle);
        assert!(w.value < 0);
        for key in &w.edges {
            assert_ne!(g[*key].kind, ConstraintType::Derived, "expanded edge");
        }
    }

    #[test]
    fn expired_deadline_reports_timeout_not_a_verdict() {
        let mut g = stnu(
            &["A", "B", "C", "X"],
            &[("X", "A", 5), ("B", "X", 0), ("B", "C", 4)],
            &[("A", 2, 10, "C")],
        );
        let opts = CheckOptions {
            deadline: Deadline::within(core::time::Duration::ZERO),
            ..CheckOptions::default()
        };
        let status = dc_check(&mut g, StnuAlg::Rul2021, &opts).unwrap();
        assert!(status.timeout);
        assert!(!status.finished);
        assert_eq!(status.consistent, None);
        assert_eq!(status.verdict_text(), "check not finished");
    }

    #[test]
    fn contingent_as_ordinary_flag_keeps_the_verdict() {
        let g = stnu(
            &["A", "B", "C", "X"],
            &[("X", "A", 5), ("B", "X", 0), ("B", "C", 4)],
            &[("A", 2, 10, "C")],
        );
        for alg in StnuAlg::ALL {
            let mut work = g.clone();
            let status = dc_check(
                &mut work,
                alg,
                &CheckOptions {
                    contingent_also_as_ordinary: true,
                    ..CheckOptions::default()
                },
            )
            .unwrap();
            assert_eq!(status.consistent, Some(true), "{alg}");
        }
    }

    #[test]
    fn report_names_algorithm_verdict_and_witness() {
        let mut g = stnu(
            &["A", "B", "C"],
            &[("A", "B", 1), ("B", "C", 1), ("C", "A", -3)],
            &[],
        );
        let status = dc_check(&mut g, StnuAlg::SrnCycleFinder, &CheckOptions::default()).unwrap();
        let report = status.render(&g);
        assert!(report.contains("algorithm: SRNCycleFinder"));
        assert!(report.contains("verdict: not controllable"));
        assert!(report.contains("negative cycle"));
        assert!(report.contains("value -1"));
    }

    #[test]
    fn verdicts_agree_on_a_mixed_batch() {
        let cases = [
            stnu(&["A", "C", "B"], &[("C", "B", 2), ("B", "A", -4)], &[("A", 0, 9, "C")]),
            stnu(
                &["A", "C", "B"],
                &[("A", "B", 10), ("B", "C", 1), ("C", "B", 2)],
                &[("A", 1, 3, "C")],
            ),
            stnu(
                &["A", "C", "D", "E"],
                &[("C", "D", 0), ("D", "E", -2), ("E", "A", 1)],
                &[("A", 2, 7, "C")],
            ),
            stnu(&["P", "Q"], &[("P", "Q", 3), ("Q", "P", -5)], &[]),
        ];
        for (i, g) in cases.iter().enumerate() {
            let reference = verdict(g, StnuAlg::Rul2021);
            for alg in StnuAlg::ALL {
                assert_eq!(
                    verdict(g, alg),
                    reference,
                    "algorithm {alg} disagrees on case {i}"
                );
            }
        }
    }
}
