//! Template grammar (spec §4.2): `{{path}}`, `{{#each expr}}…{{/each}}`,
//! `{{#if expr}}…{{/if}}`, with the mandatory non-recursive escape rule.
//!
//! Builds on the straight-line `.replace()` substitution idiom of
//! `agenticlaw-kg::registry::render_template`, extended with a small
//! hand-written block parser (spec §9: "prefer a small hand-written
//! parser... followed by a final substitution pass").

use serde_json::Value;
use wfe_context::expr::{is_truthy, EvalValue};

#[derive(Debug, Clone)]
enum Seg {
    Text(String),
    Tag(String),
}

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Var(String),
    Each { expr: String, body: Vec<Node> },
    If { expr: String, body: Vec<Node> },
}

fn tokenize(input: &str) -> Vec<Seg> {
    let mut segs = Vec::new();
    let mut rest = input;
    loop {
        match rest.find("{{") {
            None => {
                if !rest.is_empty() {
                    segs.push(Seg::Text(rest.to_string()));
                }
                break;
            }
            Some(start) => {
                if start > 0 {
                    segs.push(Seg::Text(rest[..start].to_string()));
                }
                let after_open = &rest[start + 2..];
                match after_open.find("}}") {
                    None => {
                        // Unterminated tag: treat the rest as literal text.
                        segs.push(Seg::Text(rest[start..].to_string()));
                        break;
                    }
                    Some(end) => {
                        segs.push(Seg::Tag(after_open[..end].to_string()));
                        rest = &after_open[end + 2..];
                    }
                }
            }
        }
    }
    segs
}

fn parse_nodes(segs: &[Seg], pos: &mut usize, closing: Option<&str>) -> Vec<Node> {
    let mut nodes = Vec::new();
    while *pos < segs.len() {
        match &segs[*pos] {
            Seg::Text(t) => {
                nodes.push(Node::Text(t.clone()));
                *pos += 1;
            }
            Seg::Tag(tag) => {
                let trimmed = tag.trim();
                if let Some(rest) = trimmed.strip_prefix("#each ") {
                    *pos += 1;
                    let body = parse_nodes(segs, pos, Some("/each"));
                    nodes.push(Node::Each {
                        expr: rest.trim().to_string(),
                        body,
                    });
                } else if let Some(rest) = trimmed.strip_prefix("#if ") {
                    *pos += 1;
                    let body = parse_nodes(segs, pos, Some("/if"));
                    nodes.push(Node::If {
                        expr: rest.trim().to_string(),
                        body,
                    });
                } else if Some(trimmed) == closing {
                    *pos += 1;
                    return nodes;
                } else if trimmed == "/each" || trimmed == "/if" {
                    // Unmatched closing tag; skip it rather than erroring —
                    // malformed bodies still render something useful.
                    *pos += 1;
                } else {
                    nodes.push(Node::Var(trimmed.to_string()));
                    *pos += 1;
                }
            }
        }
    }
    nodes
}

fn is_unsafe_segment(segment: &str) -> bool {
    matches!(segment, "__proto__" | "prototype" | "constructor")
}

fn resolve_segment(value: &Value, segment: &str) -> Option<Value> {
    match value {
        Value::Object(map) => map.get(segment).cloned(),
        Value::Array(arr) => segment.parse::<usize>().ok().and_then(|i| arr.get(i).cloned()),
        _ => None,
    }
}

fn resolve_path(vars: &Value, path: &str) -> Option<Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    if is_unsafe_segment(first) {
        return None;
    }
    let mut cur = resolve_segment(vars, first)?;
    for seg in segments {
        if is_unsafe_segment(seg) {
            return None;
        }
        cur = resolve_segment(&cur, seg)?;
    }
    Some(cur)
}

fn stringify(value: Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => serde_json::to_string(&other).unwrap_or_default(),
    }
}

/// Escapes any residual `{{` produced by a substituted value so a second
/// rendering pass can never expand it (spec §4.2/§9 — the sole defense
/// against template injection via user-controlled data).
fn escape_residual_braces(text: &str) -> String {
    text.replace("{{", "\\{\\{")
}

fn render_nodes(nodes: &[Node], vars: &Value) -> String {
    let mut out = String::new();
    for node in nodes {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Var(path) => {
                let resolved = resolve_path(vars, path);
                out.push_str(&escape_residual_braces(&stringify(resolved)));
            }
            Node::Each { expr, body } => {
                let resolved = resolve_path(vars, expr);
                if let Some(Value::Array(items)) = resolved {
                    for (index, item) in items.iter().enumerate() {
                        let scope = scoped_vars(vars, item, index);
                        out.push_str(&render_nodes(body, &scope));
                    }
                }
                // Non-array `expr`: the whole block is erased.
            }
            Node::If { expr, body } => {
                let resolved = resolve_path(vars, expr);
                if is_truthy(&EvalValue::from(resolved)) {
                    out.push_str(&render_nodes(body, vars));
                }
            }
        }
    }
    out
}

fn scoped_vars(outer: &Value, item: &Value, index: usize) -> Value {
    let mut map = match outer {
        Value::Object(m) => m.clone(),
        _ => serde_json::Map::new(),
    };
    map.insert("this".to_string(), item.clone());
    map.insert("@index".to_string(), Value::from(index));
    Value::Object(map)
}

/// Render `body` against `vars`. Rendering is non-recursive: the escape
/// rule above is applied per substitution, not to the whole output, so a
/// value that itself contains `{{x}}` can never be expanded by this call.
pub fn render(body: &str, vars: &Value) -> String {
    let segs = tokenize(body);
    let mut pos = 0;
    let nodes = parse_nodes(&segs, &mut pos, None);
    render_nodes(&nodes, vars)
}
