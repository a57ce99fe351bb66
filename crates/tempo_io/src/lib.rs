//! GraphML-flavored reading and writing of temporal networks.
//!
//! The schema mirrors the checker's data model: nodes carry `Obs`, `x`,
//! `y`, `Label` and `Potential` data keys; edges carry `Type`, `Value`,
//! `LabeledValue` (`LC(node):int` / `UC(node):int`), `LabeledValues` and
//! the lower/upper case variants as `{ (int, label) … }` set literals.
//! Unknown literals accept `¿` or ASCII `?`, negation `¬` or `!`, and the
//! empty label renders as `⊤`.

mod read;
mod write;

pub use read::read_graphml;
pub use write::write_graphml;

use tempo_net::NetError;

/// Failures while reading or writing a network file
#[derive(thiserror::Error, Debug)]
pub enum IoError {
    /// Ill-formed XML
    #[error("xml: {0}")]
    Xml(#[from] quick_xml::Error),
    /// Ill-formed attribute
    #[error("xml attribute: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    /// Structurally valid XML describing an invalid network
    #[error("malformed network: {0}")]
    Malformed(String),
    /// The network violates a graph-model invariant
    #[error(transparent)]
    Net(#[from] NetError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempo_net::graph::ConstraintType;

    const TWO_NODE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<graphml>
  <graph edgedefault="directed">
    <node id="A"><data key="x">10</data><data key="y">20</data></node>
    <node id="C"/>
    <edge id="lo" source="A" target="C">
      <data key="Type">contingent</data>
      <data key="LabeledValue">LC(C):1</data>
    </edge>
    <edge id="up" source="C" target="A">
      <data key="Type">contingent</data>
      <data key="LabeledValue">UC(C):-3</data>
    </edge>
  </graph>
</graphml>
"#;

    #[test]
    fn reads_contingent_case_values() {
        let g = read_graphml(TWO_NODE).unwrap();
        assert_eq!(g.node_count(), 2);
        let a = g.find_node("A").unwrap();
        let c = g.find_node("C").unwrap();
        assert_eq!(g[a].x, 10.0);
        let lo = g.edge_between(a, c).unwrap();
        assert_eq!(g[lo].kind, ConstraintType::Contingent);
        assert_eq!(g[lo].lower.unwrap().value, 1);
        assert_eq!(g[lo].lower.unwrap().node, c);
        let up = g.edge_between(c, a).unwrap();
        assert_eq!(g[up].upper.unwrap().value, -3);
    }

    #[test]
    fn round_trips_labels_and_values() {
        let input = r#"<graphml><graph>
  <node id="Z"/>
  <node id="P?"><data key="Obs">p</data></node>
  <node id="X"><data key="Label">p</data></node>
  <edge id="e0" source="P?" target="X">
    <data key="Type">requirement</data>
    <data key="LabeledValues">{ (-4, p) (3, ¬p) }</data>
  </edge>
  <edge id="e1" source="X" target="Z">
    <data key="Type">requirement</data>
    <data key="Value">7</data>
  </edge>
</graph></graphml>"#;
        let g = read_graphml(input).unwrap();
        let rendered = write_graphml(&g).unwrap();
        let g2 = read_graphml(&rendered).unwrap();
        assert_eq!(g2.node_count(), g.node_count());
        assert_eq!(g2.edge_count(), g.edge_count());
        let p = g2.find_node("P?").unwrap();
        assert_eq!(g2[p].observed.unwrap().to_char(), 'p');
        let x = g2.find_node("X").unwrap();
        let e0 = g2.edge_between(p, x).unwrap();
        assert_eq!(g2[e0].labeled.get(&"p".parse().unwrap()), Some(-4));
        assert_eq!(g2[e0].labeled.get(&"¬p".parse().unwrap()), Some(3));
        let z = g2.find_node("Z").unwrap();
        let e1 = g2.edge_between(x, z).unwrap();
        assert_eq!(g2[e1].ordinary, Some(7));
    }

    #[test]
    fn ascii_sigils_are_accepted() {
        let input = r#"<graphml><graph>
  <node id="A"/><node id="B"/>
  <edge id="e" source="A" target="B">
    <data key="LabeledValues">{ (1, !a) (2, ?b) }</data>
  </edge>
</graph></graphml>"#;
        let g = read_graphml(input).unwrap();
        let a = g.find_node("A").unwrap();
        let b = g.find_node("B").unwrap();
        let e = g.edge_between(a, b).unwrap();
        assert_eq!(g[e].labeled.get(&"¬a".parse().unwrap()), Some(1));
        assert_eq!(g[e].labeled.get(&"¿b".parse().unwrap()), Some(2));
    }

    #[test]
    fn unknown_edge_endpoint_is_rejected() {
        let input = r#"<graphml><graph>
  <node id="A"/>
  <edge id="e" source="A" target="Ghost"><data key="Value">1</data></edge>
</graph></graphml>"#;
        assert!(matches!(
            read_graphml(input),
            Err(IoError::Malformed(_))
        ));
    }
}
