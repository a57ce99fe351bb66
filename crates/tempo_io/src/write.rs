use crate::IoError;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use tempo_net::NetGraph;

/// Renders a network in the same GraphML flavor [`read_graphml`] accepts
///
/// [`read_graphml`]: crate::read_graphml
pub fn write_graphml(g: &NetGraph) -> Result<String, IoError> {
    let mut w = Writer::new_with_indent(Vec::new(), b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    w.write_event(Event::Start(BytesStart::new("graphml")))?;
    let mut graph = BytesStart::new("graph");
    graph.push_attribute(("edgedefault", "directed"));
    w.write_event(Event::Start(graph))?;

    for key in g.nodes() {
        let tp = &g[key];
        let mut el = BytesStart::new("node");
        el.push_attribute(("id", tp.name()));
        let mut data: Vec<(&str, String)> = Vec::new();
        if let Some(p) = tp.observed {
            data.push(("Obs", p.to_char().to_string()));
        }
        data.push(("x", format_float(tp.x)));
        data.push(("y", format_float(tp.y)));
        if !tp.label.is_empty() {
            data.push(("Label", tp.label.to_string()));
        }
        if tp.potential != 0 {
            data.push(("Potential", tp.potential.to_string()));
        }
        write_element(&mut w, el, "node", &data)?;
    }

    for key in g.edges() {
        let e = &g[key];
        let mut el = BytesStart::new("edge");
        el.push_attribute(("id", e.name()));
        el.push_attribute(("source", g[e.src()].name()));
        el.push_attribute(("target", g[e.dst()].name()));
        let mut data: Vec<(&str, String)> = Vec::new();
        data.push(("Type", e.kind.to_string()));
        if let Some(v) = e.ordinary {
            data.push(("Value", v.to_string()));
        }
        match (e.lower, e.upper) {
            (Some(lc), upper) => {
                data.push((
                    "LabeledValue",
                    format!("LC({}):{}", g[lc.node].name(), lc.value),
                ));
                if let Some(uc) = upper {
                    data.push((
                        "UpperCaseLabeledValues",
                        format!("{{ ({}, ⊤, {}) }}", uc.value, g[uc.node].name()),
                    ));
                }
            }
            (None, Some(uc)) => {
                data.push((
                    "LabeledValue",
                    format!("UC({}):{}", g[uc.node].name(), uc.value),
                ));
            }
            (None, None) => {}
        }
        if !e.labeled.is_empty() {
            let mut set = String::from("{");
            for (l, v) in e.labeled.iter() {
                set.push_str(&format!(" ({v}, {l})"));
            }
            set.push_str(" }");
            data.push(("LabeledValues", set));
        }
        write_element(&mut w, el, "edge", &data)?;
    }

    w.write_event(Event::End(BytesEnd::new("graph")))?;
    w.write_event(Event::End(BytesEnd::new("graphml")))?;
    String::from_utf8(w.into_inner())
        .map_err(|_| IoError::Malformed("generated graph is not UTF-8".into()))
}

fn write_element(
    w: &mut Writer<Vec<u8>>,
    el: BytesStart<'_>,
    name: &str,
    data: &[(&str, String)],
) -> Result<(), IoError> {
    if data.is_empty() {
        w.write_event(Event::Empty(el))?;
        return Ok(());
    }
    w.write_event(Event::Start(el))?;
    for (key, value) in data {
        let mut d = BytesStart::new("data");
        d.push_attribute(("key", *key));
        w.write_event(Event::Start(d))?;
        w.write_event(Event::Text(BytesText::new(value)))?;
        w.write_event(Event::End(BytesEnd::new("data")))?;
    }
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn format_float(f: f64) -> String {
    if f == f.trunc() {
        format!("{}", f as i64)
    } else {
        format!("{f}")
    }
}
