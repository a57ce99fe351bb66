//! The constraint-graph data model: an arena of time-points and edges
//! with the auxiliary indices every checker relies on.
//!
//! The graph exclusively owns its nodes and edges; all other components
//! refer to them through [`NodeKey`]/[`EdgeKey`], which are invalidated by
//! removal. Node iteration follows name-registry insertion order and edge
//! iteration follows edge insertion order, the canonical orders for
//! reproducible counters and witnesses.

mod edge;
mod node;

pub use edge::{CaseValue, ConstraintType, Edge};
pub use node::{EdgeKey, NodeKey, TimePoint};

use crate::error::NetError;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::ops::{Index, IndexMut};
use indexmap::IndexMap;
use slotmap::{SecondaryMap, SlotMap};
use smallvec::SmallVec;
use tempo_core::collections::HashMap;
use tempo_core::hash::FixedHasher;
use tempo_core::{Weight, weight};

/// The distinguished name of the zero time-point
pub const ZERO_NODE_NAME: &str = "Z";

/// A fully-registered contingent link `(A, x, y, C)`
#[derive(Clone, Copy, Debug)]
pub struct ContingentLink {
    /// The activation time-point `A`
    pub act: NodeKey,
    /// The contingent time-point `C`
    pub ctg: NodeKey,
    /// Minimum duration `x`
    pub min: Weight,
    /// Maximum duration `y`
    pub max: Weight,
    /// The edge `A → C` carrying the lower-case value
    pub lower_edge: EdgeKey,
    /// The edge `C → A` carrying the upper-case value
    pub upper_edge: EdgeKey,
}

impl ContingentLink {
    /// `Δ_C = y − x`, the width of the contingent range
    pub fn delta(&self) -> Weight {
        self.max - self.min
    }
}

/// Directed multigraph of labeled time-points, at most one edge per
/// ordered pair
#[derive(Clone, Default)]
pub struct NetGraph {
    nodes: SlotMap<NodeKey, TimePoint>,
    edges: SlotMap<EdgeKey, Edge>,
    /// Name registry; iteration order is node insertion order
    node_names: IndexMap<String, NodeKey, FixedHasher>,
    edge_names: HashMap<String, EdgeKey>,
    /// Edge insertion order (may contain tombstones of removed edges)
    edge_order: Vec<EdgeKey>,
    out: SecondaryMap<NodeKey, SmallVec<[EdgeKey; 4]>>,
    inc: SecondaryMap<NodeKey, SmallVec<[EdgeKey; 4]>>,
    by_pair: HashMap<(NodeKey, NodeKey), EdgeKey>,
    /// `observer[p] → node`: the node deciding proposition `p`
    observers: HashMap<crate::label::Proposition, NodeKey>,
    /// `activation[C] → A`, in registration order
    activation: IndexMap<NodeKey, NodeKey, FixedHasher>,
    ctg_of_act: HashMap<NodeKey, NodeKey>,
    lower_edges: HashMap<NodeKey, EdgeKey>,
    upper_edges: HashMap<NodeKey, EdgeKey>,
    zero: Option<NodeKey>,
    /// Horizon computed by the initializer, when any
    pub horizon: Option<Weight>,
}

impl NetGraph {
    /// Creates an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of time-points
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of live edges
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Adds a fresh time-point under `name`
    pub fn add_node(&mut self, name: &str) -> Result<NodeKey, NetError> {
        if self.node_names.contains_key(name) {
            return Err(NetError::MalformedInput(format!(
                "duplicate time-point name {name:?}"
            )));
        }
        let mut tp = TimePoint::new();
        tp.name = name.to_string();
        let key = self.nodes.insert(tp);
        self.node_names.insert(name.to_string(), key);
        self.out.insert(key, SmallVec::new());
        self.inc.insert(key, SmallVec::new());
        Ok(key)
    }

    /// Looks a time-point up by name
    pub fn find_node(&self, name: &str) -> Option<NodeKey> {
        self.node_names.get(name).copied()
    }

    /// The time-point behind `key`, unless it was removed
    pub fn node(&self, key: NodeKey) -> Option<&TimePoint> {
        self.nodes.get(key)
    }

    /// The edge behind `key`, unless it was removed
    pub fn edge(&self, key: EdgeKey) -> Option<&Edge> {
        self.edges.get(key)
    }

    /// Iterates node keys in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.node_names.values().copied()
    }

    /// Node keys collected in insertion order
    pub fn node_keys(&self) -> Vec<NodeKey> {
        self.nodes().collect()
    }

    /// Adds an edge `src → dst` under `name`
    ///
    /// At most one edge may connect an ordered pair; values belonging to
    /// the same pair must be merged onto the existing edge.
    pub fn add_edge(
        &mut self,
        name: &str,
        src: NodeKey,
        dst: NodeKey,
        kind: ConstraintType,
    ) -> Result<EdgeKey, NetError> {
        if self.edge_names.contains_key(name) {
            return Err(NetError::MalformedInput(format!(
                "duplicate edge name {name:?}"
            )));
        }
        if self.by_pair.contains_key(&(src, dst)) {
            return Err(NetError::MalformedInput(format!(
                "parallel edge {name:?} between {} and {}",
                self[src].name(),
                self[dst].name()
            )));
        }
        let edge = Edge::new(name.to_string(), src, dst, kind);
        let key = self.edges.insert(edge);
        self.edge_names.insert(name.to_string(), key);
        self.edge_order.push(key);
        self.by_pair.insert((src, dst), key);
        self.out[src].push(key);
        self.inc[dst].push(key);
        Ok(key)
    }

    /// The edge `src → dst`, if present
    pub fn edge_between(&self, src: NodeKey, dst: NodeKey) -> Option<EdgeKey> {
        self.by_pair.get(&(src, dst)).copied()
    }

    /// The edge `src → dst`, created as `kind` with a synthesized name if
    /// absent
    pub fn ensure_edge(&mut self, src: NodeKey, dst: NodeKey, kind: ConstraintType) -> EdgeKey {
        if let Some(key) = self.edge_between(src, dst) {
            return key;
        }
        let name = self.fresh_edge_name(src, dst);
        self.add_edge(&name, src, dst, kind)
            .expect("fresh name cannot collide")
    }

    fn fresh_edge_name(&self, src: NodeKey, dst: NodeKey) -> String {
        let base = format!("{}-{}", self[src].name(), self[dst].name());
        if !self.edge_names.contains_key(&base) {
            return base;
        }
        let mut i = 1usize;
        loop {
            let name = format!("{base}#{i}");
            if !self.edge_names.contains_key(&name) {
                return name;
            }
            i += 1;
        }
    }

    /// Iterates live edge keys in insertion order
    pub fn edges(&self) -> impl Iterator<Item = EdgeKey> + '_ {
        self.edge_order
            .iter()
            .copied()
            .filter(|k| self.edges.contains_key(*k))
    }

    /// Live edge keys collected in insertion order
    pub fn edge_keys(&self) -> Vec<EdgeKey> {
        self.edges().collect()
    }

    /// Outgoing edges of `node`
    pub fn out_edges(&self, node: NodeKey) -> impl Iterator<Item = EdgeKey> + '_ {
        self.out
            .get(node)
            .map(|v| v.as_slice())
            .unwrap_or_default()
            .iter()
            .copied()
    }

    /// Incoming edges of `node`
    pub fn in_edges(&self, node: NodeKey) -> impl Iterator<Item = EdgeKey> + '_ {
        self.inc
            .get(node)
            .map(|v| v.as_slice())
            .unwrap_or_default()
            .iter()
            .copied()
    }

    /// Removes an edge, detaching it from every index
    pub fn remove_edge(&mut self, key: EdgeKey) -> Option<Edge> {
        let edge = self.edges.remove(key)?;
        self.edge_names.remove(&edge.name);
        self.by_pair.remove(&(edge.src, edge.dst));
        if let Some(out) = self.out.get_mut(edge.src) {
            out.retain(|k| *k != key);
        }
        if let Some(inc) = self.inc.get_mut(edge.dst) {
            inc.retain(|k| *k != key);
        }
        self.lower_edges.retain(|_, e| *e != key);
        self.upper_edges.retain(|_, e| *e != key);
        Some(edge)
    }

    /// Removes a time-point together with its incident edges and index
    /// entries
    pub fn remove_node(&mut self, key: NodeKey) -> Option<TimePoint> {
        let incident: Vec<EdgeKey> = self
            .out_edges(key)
            .chain(self.in_edges(key))
            .collect();
        for e in incident {
            self.remove_edge(e);
        }
        let tp = self.nodes.remove(key)?;
        self.node_names.shift_remove(&tp.name);
        self.out.remove(key);
        self.inc.remove(key);
        if let Some(p) = tp.observed {
            self.observers.remove(&p);
        }
        if let Some(act) = self.activation.shift_remove(&key) {
            self.ctg_of_act.remove(&act);
        }
        if let Some(ctg) = self.ctg_of_act.remove(&key) {
            self.activation.shift_remove(&ctg);
        }
        self.lower_edges.remove(&key);
        self.upper_edges.remove(&key);
        if self.zero == Some(key) {
            self.zero = None;
        }
        Some(tp)
    }

    /// The zero time-point, when one has been designated
    pub fn zero(&self) -> Option<NodeKey> {
        self.zero
    }

    /// Designates `node` as the zero time-point
    pub fn set_zero(&mut self, node: NodeKey) {
        self.zero = Some(node);
    }

    /// Registers `node` as the observer of `p`
    ///
    /// Fails when another node already observes `p`.
    pub fn register_observer(
        &mut self,
        p: crate::label::Proposition,
        node: NodeKey,
    ) -> Result<(), NetError> {
        match self.observers.get(&p) {
            Some(prev) if *prev != node => Err(NetError::MalformedInput(format!(
                "proposition {} observed by both {} and {}",
                p.to_char(),
                self[*prev].name(),
                self[node].name()
            ))),
            _ => {
                self.observers.insert(p, node);
                Ok(())
            }
        }
    }

    /// The node observing `p`, if any
    pub fn observer_of(&self, p: crate::label::Proposition) -> Option<NodeKey> {
        self.observers.get(&p).copied()
    }

    /// Registers the contingent link `(act, ctg)` with its case edges
    pub fn register_contingent(
        &mut self,
        ctg: NodeKey,
        act: NodeKey,
        lower_edge: EdgeKey,
        upper_edge: EdgeKey,
    ) -> Result<(), NetError> {
        if let Some(other) = self.ctg_of_act.get(&act) {
            if *other != ctg {
                return Err(NetError::MalformedInput(format!(
                    "activation {} shared by contingent time-points {} and {}",
                    self[act].name(),
                    self[*other].name(),
                    self[ctg].name()
                )));
            }
        }
        self.activation.insert(ctg, act);
        self.ctg_of_act.insert(act, ctg);
        self.lower_edges.insert(ctg, lower_edge);
        self.upper_edges.insert(ctg, upper_edge);
        self.nodes[ctg].contingent = true;
        Ok(())
    }

    /// Unregisters the contingent link of `ctg`, leaving the node's
    /// `contingent` flag untouched
    pub fn unregister_contingent(&mut self, ctg: NodeKey) {
        if let Some(act) = self.activation.shift_remove(&ctg) {
            self.ctg_of_act.remove(&act);
        }
        self.lower_edges.remove(&ctg);
        self.upper_edges.remove(&ctg);
    }

    /// The activation time-point of contingent `ctg`
    pub fn activation_of(&self, ctg: NodeKey) -> Option<NodeKey> {
        self.activation.get(&ctg).copied()
    }

    /// The contingent time-point activated by `act`, if `act` is an
    /// activation node
    pub fn contingent_of_activation(&self, act: NodeKey) -> Option<NodeKey> {
        self.ctg_of_act.get(&act).copied()
    }

    /// The lower-case edge of contingent `ctg`
    pub fn lower_edge(&self, ctg: NodeKey) -> Option<EdgeKey> {
        self.lower_edges.get(&ctg).copied()
    }

    /// The upper-case edge of contingent `ctg`
    pub fn upper_edge(&self, ctg: NodeKey) -> Option<EdgeKey> {
        self.upper_edges.get(&ctg).copied()
    }

    /// Fully-registered contingent links, in registration order
    pub fn contingent_links(&self) -> Vec<ContingentLink> {
        self.activation
            .iter()
            .filter_map(|(ctg, act)| {
                let lower_edge = self.lower_edge(*ctg)?;
                let upper_edge = self.upper_edge(*ctg)?;
                let min = self.edges[lower_edge].lower?.value;
                let max = weight::negate(self.edges[upper_edge].upper?.value);
                Some(ContingentLink {
                    act: *act,
                    ctg: *ctg,
                    min,
                    max,
                    lower_edge,
                    upper_edge,
                })
            })
            .collect()
    }

    /// The link whose contingent time-point is `ctg`
    pub fn contingent_link(&self, ctg: NodeKey) -> Option<ContingentLink> {
        let act = self.activation_of(ctg)?;
        let lower_edge = self.lower_edge(ctg)?;
        let upper_edge = self.upper_edge(ctg)?;
        let min = self.edges[lower_edge].lower?.value;
        let max = weight::negate(self.edges[upper_edge].upper?.value);
        Some(ContingentLink {
            act,
            ctg,
            min,
            max,
            lower_edge,
            upper_edge,
        })
    }

    /// Largest absolute finite weight over every value slot
    pub fn max_abs_weight(&self) -> Weight {
        let mut max = 0;
        for key in self.edges() {
            let e = &self.edges[key];
            let mut probe = |w: Weight| {
                if weight::is_finite(w) {
                    max = max.max(w.abs());
                }
            };
            if let Some(w) = e.ordinary {
                probe(w);
            }
            if let Some(c) = &e.lower {
                probe(c.value);
            }
            if let Some(c) = &e.upper {
                probe(c.value);
            }
            for (_, v) in e.labeled.iter() {
                probe(v);
            }
        }
        max
    }

    /// Removes every edge left with no value
    pub fn clean_empty_edges(&mut self) {
        let empty: Vec<EdgeKey> = self
            .edges()
            .filter(|k| self.edges[*k].is_empty())
            .collect();
        for key in empty {
            self.remove_edge(key);
        }
    }
}

impl Index<NodeKey> for NetGraph {
    type Output = TimePoint;

    fn index(&self, key: NodeKey) -> &TimePoint {
        &self.nodes[key]
    }
}

impl IndexMut<NodeKey> for NetGraph {
    fn index_mut(&mut self, key: NodeKey) -> &mut TimePoint {
        &mut self.nodes[key]
    }
}

impl Index<EdgeKey> for NetGraph {
    type Output = Edge;

    fn index(&self, key: EdgeKey) -> &Edge {
        &self.edges[key]
    }
}

impl IndexMut<EdgeKey> for NetGraph {
    fn index_mut(&mut self, key: EdgeKey) -> &mut Edge {
        &mut self.edges[key]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_and_edge_registries_reject_duplicates() {
        let mut g = NetGraph::new();
        let a = g.add_node("A").unwrap();
        let b = g.add_node("B").unwrap();
        assert!(g.add_node("A").is_err());
        g.add_edge("e0", a, b, ConstraintType::Requirement).unwrap();
        assert!(g.add_edge("e0", b, a, ConstraintType::Requirement).is_err());
        assert!(g.add_edge("e1", a, b, ConstraintType::Requirement).is_err());
    }

    #[test]
    fn removal_detaches_adjacency_and_pairs() {
        let mut g = NetGraph::new();
        let a = g.add_node("A").unwrap();
        let b = g.add_node("B").unwrap();
        let e = g.add_edge("e0", a, b, ConstraintType::Requirement).unwrap();
        assert_eq!(g.edge_between(a, b), Some(e));
        g.remove_edge(e);
        assert_eq!(g.edge_between(a, b), None);
        assert_eq!(g.out_edges(a).count(), 0);
        assert_eq!(g.in_edges(b).count(), 0);
        // the pair is free again
        g.add_edge("e1", a, b, ConstraintType::Derived).unwrap();
    }

    #[test]
    fn node_removal_takes_incident_edges_along() {
        let mut g = NetGraph::new();
        let a = g.add_node("A").unwrap();
        let b = g.add_node("B").unwrap();
        let c = g.add_node("C").unwrap();
        g.add_edge("ab", a, b, ConstraintType::Requirement).unwrap();
        g.add_edge("cb", c, b, ConstraintType::Requirement).unwrap();
        g.add_edge("bc", b, c, ConstraintType::Requirement).unwrap();
        g.remove_node(b);
        assert_eq!(g.edge_count(), 0);
        assert_eq!(g.node_count(), 2);
        assert!(g.find_node("B").is_none());
    }

    #[test]
    fn contingent_registration_builds_link_views() {
        let mut g = NetGraph::new();
        let a = g.add_node("A").unwrap();
        let c = g.add_node("C").unwrap();
        let lo = g.add_edge("lo", a, c, ConstraintType::Contingent).unwrap();
        let up = g.add_edge("up", c, a, ConstraintType::Contingent).unwrap();
        g[lo].lower = Some(CaseValue { node: c, value: 1 });
        g[up].upper = Some(CaseValue { node: c, value: -3 });
        g.register_contingent(c, a, lo, up).unwrap();
        let links = g.contingent_links();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].min, 1);
        assert_eq!(links[0].max, 3);
        assert_eq!(links[0].delta(), 2);
        assert!(g[c].contingent);
        assert_eq!(g.contingent_of_activation(a), Some(c));
    }

    #[test]
    fn activation_sharing_is_rejected() {
        let mut g = NetGraph::new();
        let a = g.add_node("A").unwrap();
        let c1 = g.add_node("C1").unwrap();
        let c2 = g.add_node("C2").unwrap();
        let lo1 = g.add_edge("lo1", a, c1, ConstraintType::Contingent).unwrap();
        let up1 = g.add_edge("up1", c1, a, ConstraintType::Contingent).unwrap();
        g.register_contingent(c1, a, lo1, up1).unwrap();
        let lo2 = g.add_edge("lo2", a, c2, ConstraintType::Contingent).unwrap();
        let up2 = g.add_edge("up2", c2, a, ConstraintType::Contingent).unwrap();
        assert!(g.register_contingent(c2, a, lo2, up2).is_err());
    }
}
