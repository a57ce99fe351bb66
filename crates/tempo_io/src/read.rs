use crate::IoError;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tempo_core::Weight;
use tempo_net::NetGraph;
use tempo_net::graph::{CaseValue, ConstraintType, EdgeKey, NodeKey};
use tempo_net::label::{Label, Proposition};

#[derive(Default)]
struct RawNode {
    id: String,
    obs: Option<String>,
    x: Option<String>,
    y: Option<String>,
    label: Option<String>,
    potential: Option<String>,
}

#[derive(Default)]
struct RawEdge {
    id: String,
    source: String,
    target: String,
    kind: Option<String>,
    value: Option<String>,
    labeled_value: Option<String>,
    labeled_values: Option<String>,
    lower_set: Option<String>,
    upper_set: Option<String>,
}

enum Ctx {
    Outside,
    Node(RawNode),
    Edge(RawEdge),
}

/// Parses a GraphML-flavored network description
pub fn read_graphml(input: &str) -> Result<NetGraph, IoError> {
    let mut reader = Reader::from_str(input);
    let config = reader.config_mut();
    config.trim_text_start = true;
    config.trim_text_end = true;

    let mut nodes: Vec<RawNode> = Vec::new();
    let mut edges: Vec<RawEdge> = Vec::new();
    let mut ctx = Ctx::Outside;
    let mut data_key: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                open(&e, &mut ctx, &mut data_key, &mut nodes, &mut edges, false)?;
                text.clear();
            }
            Event::Empty(e) => {
                open(&e, &mut ctx, &mut data_key, &mut nodes, &mut edges, true)?;
            }
            Event::Text(t) => {
                text.push_str(&t.unescape()?);
            }
            Event::End(e) => match e.name().as_ref() {
                b"data" => {
                    if let Some(key) = data_key.take() {
                        store(&mut ctx, &key, text.trim());
                    }
                    text.clear();
                }
                b"node" => {
                    if let Ctx::Node(n) = core::mem::replace(&mut ctx, Ctx::Outside) {
                        nodes.push(n);
                    }
                }
                b"edge" => {
                    if let Ctx::Edge(e) = core::mem::replace(&mut ctx, Ctx::Outside) {
                        edges.push(e);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    build(nodes, edges)
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, IoError> {
    for a in e.attributes() {
        let a = a?;
        if a.key.as_ref() == name {
            return Ok(Some(a.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn open(
    e: &BytesStart<'_>,
    ctx: &mut Ctx,
    data_key: &mut Option<String>,
    nodes: &mut Vec<RawNode>,
    edges: &mut Vec<RawEdge>,
    self_closing: bool,
) -> Result<(), IoError> {
    match e.name().as_ref() {
        b"node" => {
            let node = RawNode {
                id: attr(e, b"id")?
                    .ok_or_else(|| IoError::Malformed("node without id".into()))?,
                ..RawNode::default()
            };
            if self_closing {
                nodes.push(node);
            } else {
                *ctx = Ctx::Node(node);
            }
        }
        b"edge" => {
            let edge = RawEdge {
                id: attr(e, b"id")?.unwrap_or_default(),
                source: attr(e, b"source")?
                    .ok_or_else(|| IoError::Malformed("edge without source".into()))?,
                target: attr(e, b"target")?
                    .ok_or_else(|| IoError::Malformed("edge without target".into()))?,
                ..RawEdge::default()
            };
            if self_closing {
                edges.push(edge);
            } else {
                *ctx = Ctx::Edge(edge);
            }
        }
        b"data" if !self_closing => {
            *data_key = attr(e, b"key")?;
        }
        _ => {}
    }
    Ok(())
}

fn store(ctx: &mut Ctx, key: &str, value: &str) {
    let value = value.to_string();
    match ctx {
        Ctx::Node(n) => match key {
            "Obs" => n.obs = Some(value),
            "x" => n.x = Some(value),
            "y" => n.y = Some(value),
            "Label" => n.label = Some(value),
            "Potential" => n.potential = Some(value),
            _ => log::debug!("ignoring node data key {key:?}"),
        },
        Ctx::Edge(e) => match key {
            "Type" => e.kind = Some(value),
            "Value" => e.value = Some(value),
            "LabeledValue" => e.labeled_value = Some(value),
            "LabeledValues" => e.labeled_values = Some(value),
            "LowerCaseLabeledValues" => e.lower_set = Some(value),
            "UpperCaseLabeledValues" => e.upper_set = Some(value),
            _ => log::debug!("ignoring edge data key {key:?}"),
        },
        Ctx::Outside => {}
    }
}

fn build(nodes: Vec<RawNode>, edges: Vec<RawEdge>) -> Result<NetGraph, IoError> {
    let mut g = NetGraph::new();
    for raw in nodes {
        let key = g.add_node(&raw.id)?;
        if let Some(obs) = raw.obs {
            let c = obs.trim().chars().next().ok_or_else(|| {
                IoError::Malformed(format!("empty Obs on node {:?}", g[key].name()))
            })?;
            g[key].observed = Some(Proposition::from_char(c).ok_or_else(|| {
                IoError::Malformed(format!("invalid observed proposition {c:?}"))
            })?);
        }
        if let Some(x) = raw.x {
            g[key].x = parse_float(&x)?;
        }
        if let Some(y) = raw.y {
            g[key].y = parse_float(&y)?;
        }
        if let Some(l) = raw.label {
            g[key].label = parse_label(&l)?;
        }
        if let Some(p) = raw.potential {
            g[key].potential = parse_int(&p)?;
        }
    }
    for raw in edges {
        let src = resolve(&g, &raw.source)?;
        let dst = resolve(&g, &raw.target)?;
        let kind = match raw.kind.as_deref().map(str::trim) {
            None => ConstraintType::Requirement,
            Some(s) if s.eq_ignore_ascii_case("requirement") => ConstraintType::Requirement,
            Some(s) if s.eq_ignore_ascii_case("contingent") => ConstraintType::Contingent,
            Some(s) if s.eq_ignore_ascii_case("derived") => ConstraintType::Derived,
            Some(s) if s.eq_ignore_ascii_case("internal") => ConstraintType::Internal,
            Some(s) => {
                return Err(IoError::Malformed(format!("unknown edge type {s:?}")));
            }
        };
        let name = if raw.id.is_empty() {
            format!("{}-{}", raw.source, raw.target)
        } else {
            raw.id.clone()
        };
        let ek = g.add_edge(&name, src, dst, kind)?;
        if let Some(v) = raw.value {
            g[ek].ordinary = Some(parse_int(&v)?);
        }
        if let Some(cv) = raw.labeled_value {
            apply_case_value(&mut g, ek, &cv)?;
        }
        if let Some(set) = raw.labeled_values {
            for (v, label, _) in parse_set(&set)? {
                g[ek].labeled.put(label, v);
            }
        }
        if let Some(set) = raw.lower_set {
            for (v, _, named) in parse_set(&set)? {
                let node = match named {
                    Some(name) => resolve(&g, &name)?,
                    None => dst,
                };
                g[ek].lower = Some(CaseValue { node, value: v });
            }
        }
        if let Some(set) = raw.upper_set {
            for (v, _, named) in parse_set(&set)? {
                let node = match named {
                    Some(name) => resolve(&g, &name)?,
                    None => src,
                };
                g[ek].upper = Some(CaseValue { node, value: v });
            }
        }
    }
    Ok(g)
}

fn resolve(g: &NetGraph, name: &str) -> Result<NodeKey, IoError> {
    g.find_node(name)
        .ok_or_else(|| IoError::Malformed(format!("unknown time-point {name:?}")))
}

/// `LC(node):int` or `UC(node):int`
fn apply_case_value(g: &mut NetGraph, ek: EdgeKey, s: &str) -> Result<(), IoError> {
    let s = s.trim();
    let (lower, rest) = match s.get(..3) {
        Some("LC(") => (true, &s[3..]),
        Some("UC(") => (false, &s[3..]),
        _ => {
            return Err(IoError::Malformed(format!(
                "case value {s:?} must start with LC( or UC("
            )));
        }
    };
    let close = rest
        .find(')')
        .ok_or_else(|| IoError::Malformed(format!("unclosed case value {s:?}")))?;
    let node = resolve(g, &rest[..close])?;
    let value_part = rest[close + 1..]
        .strip_prefix(':')
        .ok_or_else(|| IoError::Malformed(format!("case value {s:?} misses ':'")))?;
    let value = parse_int(value_part)?;
    if lower {
        g[ek].lower = Some(CaseValue { node, value });
    } else {
        g[ek].upper = Some(CaseValue { node, value });
    }
    Ok(())
}

/// `{ (int, label) … }` with an optional third node-name component
fn parse_set(s: &str) -> Result<Vec<(Weight, Label, Option<String>)>, IoError> {
    let body = s.trim();
    let body = body
        .strip_prefix('{')
        .and_then(|b| b.strip_suffix('}'))
        .ok_or_else(|| IoError::Malformed(format!("set literal {s:?} misses braces")))?;
    let mut out = Vec::new();
    let mut rest = body.trim();
    while !rest.is_empty() {
        let open = rest
            .find('(')
            .ok_or_else(|| IoError::Malformed(format!("expected '(' in {rest:?}")))?;
        let close = rest[open..]
            .find(')')
            .ok_or_else(|| IoError::Malformed(format!("unclosed pair in {rest:?}")))?
            + open;
        let parts: Vec<&str> = rest[open + 1..close].split(',').map(str::trim).collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(IoError::Malformed(format!(
                "pair {:?} must have two or three components",
                &rest[open..=close]
            )));
        }
        let value = parse_int(parts[0])?;
        let label = parse_label(parts[1])?;
        let node = parts.get(2).map(|n| n.to_string());
        out.push((value, label, node));
        rest = rest[close + 1..].trim();
    }
    Ok(out)
}

fn parse_int(s: &str) -> Result<Weight, IoError> {
    s.trim()
        .parse::<Weight>()
        .map_err(|_| IoError::Malformed(format!("invalid integer {s:?}")))
}

fn parse_float(s: &str) -> Result<f64, IoError> {
    s.trim()
        .parse::<f64>()
        .map_err(|_| IoError::Malformed(format!("invalid number {s:?}")))
}

fn parse_label(s: &str) -> Result<Label, IoError> {
    s.trim()
        .parse::<Label>()
        .map_err(|e| IoError::Malformed(format!("invalid label {s:?}: {e}")))
}
