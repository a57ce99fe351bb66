//! Aggregated outcome of a check run.

use crate::graph::{EdgeKey, NetGraph};
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write as _;
use core::time::Duration;
use tempo_core::Weight;
use tempo_core::collections::HashMap;

/// Classification of a witness negative cycle
#[derive(Clone, Copy, PartialEq, Eq, Debug, derive_more::Display)]
pub enum CycleKind {
    /// A negative cycle in the lower/ordinary sub-graph (potential
    /// computation failed)
    #[display("loGraphPotFailure")]
    LoGraphPotFailure,
    /// A semi-reducible negative cycle through a contingent time-point
    #[display("ccLoop")]
    CcLoop,
    /// A cyclic dependency among contingent-link bypasses
    #[display("interruptionCycle")]
    InterruptionCycle,
}

/// An ordered witness cycle certifying a negative verdict
#[derive(Clone, Debug)]
pub struct WitnessCycle {
    /// What kind of failure the cycle certifies
    pub kind: CycleKind,
    /// The cycle's edges, in traversal order, expanded to edges of the
    /// input graph wherever a derivation is known
    pub edges: Vec<EdgeKey>,
    /// The summed value of the cycle; strictly negative
    pub value: Weight,
}

/// Counters of individual rule applications
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RuleStats {
    /// Ordinary back-relaxations (`RELAX⁻` and Morris relaxation steps)
    pub relax: u64,
    /// Lower-case bypasses (`LOWER⁻`)
    pub lower: u64,
    /// Upper-case bypasses (materialized ordinary edges)
    pub upper: u64,
    /// Waits materialized
    pub waits: u64,
    /// Potential recomputations and incremental updates
    pub potential_updates: u64,
    /// Labeled propagations (`LP`)
    pub lp: u64,
    /// Labeled propagations introducing unknown literals (`qLP`)
    pub qlp: u64,
    /// Observation simplifications (`R0`)
    pub r0: u64,
    /// Observation simplifications on q-labels (`qR0`)
    pub qr0: u64,
    /// Observation transfers (`R3`)
    pub r3: u64,
    /// Observation transfers on q-labels (`qR3`)
    pub qr3: u64,
}

/// Everything a check run reports back
#[derive(Clone, Debug, Default)]
pub struct CheckStatus {
    /// Name of the algorithm that ran
    pub algorithm: &'static str,
    /// The verdict: `Some(true)` for controllable/consistent,
    /// `Some(false)` otherwise, `None` while unfinished
    pub consistent: Option<bool>,
    /// Whether the check ran to completion
    pub finished: bool,
    /// Whether the check was aborted by its deadline
    pub timeout: bool,
    /// Main-loop cycles executed
    pub cycles: u64,
    /// Per-rule application counters
    pub rules: RuleStats,
    /// Wall-clock duration of the check, when a clock was available
    pub execution_time: Option<Duration>,
    /// A negative cycle certifying a negative verdict, when one was
    /// reconstructed
    pub witness: Option<WitnessCycle>,
    /// For every derived edge, the sequence of edges that generated it;
    /// used to expand witnesses into input edges
    pub derivations: HashMap<EdgeKey, Vec<EdgeKey>>,
}

impl CheckStatus {
    /// Fresh status for `algorithm`
    pub fn new(algorithm: &'static str) -> Self {
        Self {
            algorithm,
            ..Self::default()
        }
    }

    /// Marks the check finished with the given verdict
    pub fn finish(&mut self, consistent: bool) {
        self.finished = true;
        self.consistent = Some(consistent);
    }

    /// One-word verdict as required by the final report
    pub fn verdict_text(&self) -> &'static str {
        match (self.finished, self.consistent) {
            (true, Some(true)) => "controllable",
            (true, Some(false)) => "not controllable",
            _ => "check not finished",
        }
    }

    /// Renders the textual report, resolving edge names through `graph`
    ///
    /// The same graph the check ran on must be supplied; otherwise the
    /// witness section is incomplete.
    pub fn render(&self, graph: &NetGraph) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "algorithm: {}", self.algorithm);
        let _ = writeln!(out, "verdict: {}", self.verdict_text());
        if self.timeout {
            let _ = writeln!(out, "timeout: true");
        }
        let _ = writeln!(out, "cycles: {}", self.cycles);
        let r = &self.rules;
        let _ = writeln!(
            out,
            "rules: relax={} lower={} upper={} waits={} potential={} lp={} qlp={} r0={} qr0={} r3={} qr3={}",
            r.relax,
            r.lower,
            r.upper,
            r.waits,
            r.potential_updates,
            r.lp,
            r.qlp,
            r.r0,
            r.qr0,
            r.r3,
            r.qr3
        );
        if let Some(t) = self.execution_time {
            let _ = writeln!(out, "elapsed: {}.{:06}s", t.as_secs(), t.subsec_micros());
        }
        if let Some(w) = &self.witness {
            let _ = writeln!(out, "negative cycle ({}, value {}):", w.kind, w.value);
            for key in &w.edges {
                match graph.edge(*key) {
                    Some(edge) => {
                        let _ = writeln!(out, "  {edge}");
                    }
                    None => {
                        let _ = writeln!(out, "  <removed edge>");
                    }
                }
            }
        }
        out
    }
}
