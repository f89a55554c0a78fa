//! Whitespace compaction.
//!
//! Adjacent text nodes are merged, whitespace runs at text edges collapse to
//! a single space, and whitespace-only text is dropped where the layout
//! cannot observe it (between table cells, list items, block siblings and at
//! the edges of loop bodies). `pre` and `textarea` content is left untouched.

use crate::ast::{Node, Root};

/// The node that owns a body being compacted.
#[derive(Debug, Clone, Copy)]
enum Parent<'a> {
    Element(&'a str),
    Each,
    Other,
}

pub fn compact(root: &mut Root) {
    compact_body(&mut root.body, None);
}

fn normalize(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return " ".to_string();
    }
    let mut out = String::with_capacity(trimmed.len() + 2);
    if value.starts_with(char::is_whitespace) {
        out.push(' ');
    }
    out.push_str(trimmed);
    if value.ends_with(char::is_whitespace) {
        out.push(' ');
    }
    out
}

fn compact_children(node: &mut Node) {
    match node {
        Node::Element(el) => {
            if el.name == "pre" || el.name == "textarea" {
                return;
            }
            let name = el.name.clone();
            compact_body(&mut el.body, Some(Parent::Element(&name)));
        }
        Node::Each(b) => compact_body(&mut b.body, Some(Parent::Each)),
        Node::Slot(b) => compact_body(&mut b.body, Some(Parent::Other)),
        Node::Fragment(b) => compact_body(&mut b.body, Some(Parent::Other)),
        Node::If(b) => {
            compact_body(&mut b.body, Some(Parent::Other));
            if let Some(alt) = b.else_body.as_mut() {
                compact_body(alt, Some(Parent::Other));
            }
        }
        Node::Await(b) => {
            compact_body(&mut b.main, Some(Parent::Other));
            if let Some(part) = b.then.as_mut() {
                compact_body(&mut part.body, Some(Parent::Other));
            }
            if let Some(part) = b.catch.as_mut() {
                compact_body(&mut part.body, Some(Parent::Other));
            }
        }
        Node::Text(_)
        | Node::Comment(_)
        | Node::Script(_)
        | Node::Style(_)
        | Node::Template(_)
        | Node::SysTag(_) => {}
    }
}

fn compact_body(body: &mut Vec<Node>, parent: Option<Parent<'_>>) {
    let mut i = 0;
    while i < body.len() {
        if let Node::Text(_) = body[i] {
            while i + 1 < body.len() && matches!(body[i + 1], Node::Text(_)) {
                if let Node::Text(next) = body.remove(i + 1) {
                    if let Node::Text(text) = &mut body[i] {
                        text.value.push_str(&next.value);
                        text.span.end = next.span.end;
                    }
                }
            }
            if let Node::Text(text) = &mut body[i] {
                text.value = normalize(&text.value);
            }
        } else {
            compact_children(&mut body[i]);
        }
        i += 1;
    }

    let mut i = 0;
    while i < body.len() {
        if body[i].is_blank_text() && is_removable(body, i, parent) {
            body.remove(i);
            continue;
        }
        i += 1;
    }
}

fn is_removable(body: &[Node], i: usize, parent: Option<Parent<'_>>) -> bool {
    let prev = if i > 0 { body.get(i - 1) } else { None };
    let next = body.get(i + 1);

    if let (Some(prev), Some(next)) = (prev, next) {
        return matches!(
            (prev.element_name(), next.element_name()),
            (Some("td"), Some("td")) | (Some("tr"), Some("tr")) | (Some("li"), Some("li")) | (Some("div"), Some("div"))
        );
    }

    let Some(parent) = parent else {
        return false;
    };
    let p = prev.and_then(Node::element_name);
    let n = next.and_then(Node::element_name);
    let touches = |name: &str| p == Some(name) || n == Some(name);

    match parent {
        Parent::Element("tr") | Parent::Each if touches("td") => true,
        Parent::Element("table") if touches("tbody") => true,
        Parent::Element("ul") if touches("li") => true,
        Parent::Element("div") => true,
        Parent::Element(_) => {
            matches!(prev, Some(Node::Each(_))) || matches!(next, Some(Node::Each(_)))
        }
        _ => false,
    }
}
