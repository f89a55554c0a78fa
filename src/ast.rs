//! Markup tree produced by the parser.
//!
//! One variant per markup construct; every consumer dispatches with an
//! exhaustive `match`, so adding a kind is a compile-time checked change.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn source_text<'s>(&self, source: &'s str) -> &'s str {
        &source[self.start..self.end]
    }
}

/// Stable identity of an element within one parsed tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
    /// Raw attribute text as written, e.g. `value={name}`.
    pub content: String,
}

impl Attribute {
    pub fn new(name: &str, value: Option<&str>) -> Self {
        let content = match value {
            Some(v) => format!("{}=\"{}\"", name, v),
            None => name.to_string(),
        };
        Self {
            name: name.to_string(),
            value: value.map(str::to_string),
            content,
        }
    }
}

/// Insertion-ordered set of class names.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClassSet(Vec<String>);

impl ClassSet {
    pub fn add(&mut self, name: &str) {
        if !self.contains(name) {
            self.0.push(name.to_string());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|c| c == name)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn join(&self, sep: &str) -> String {
        self.0.join(sep)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub id: NodeId,
    pub name: String,
    /// Argument written after the tag name, `<slot:title>` or `<component:{Ctor}>`.
    pub el_arg: Option<String>,
    pub attributes: Vec<Attribute>,
    pub body: Vec<Node>,
    pub open_tag: String,
    pub closed_tag: bool,
    pub void_tag: bool,
    /// Static classes, including scope tokens added by the style scoper.
    pub classes: ClassSet,
    pub span: Span,
}

impl Element {
    pub fn is_component(&self) -> bool {
        self.name == "component" || self.name.starts_with(|c: char| c.is_ascii_uppercase())
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// `<script>`, `<style>` and `<template>` keep their content verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBlock {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub open_tag: String,
    pub content: String,
    pub span: Span,
}

impl RawBlock {
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Text {
    pub value: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub content: String,
    pub span: Span,
}

/// `{#each items as item, i (key)}...{/each}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EachBlock {
    pub value: String,
    pub body: Vec<Node>,
    pub span: Span,
}

/// `{#if cond}...{:else}...{/if}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IfBlock {
    pub value: String,
    pub body: Vec<Node>,
    pub else_body: Option<Vec<Node>>,
    pub span: Span,
}

/// A `{:then x}` or `{:catch e}` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwaitPart {
    pub value: String,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwaitBlock {
    pub value: String,
    pub main: Vec<Node>,
    pub then: Option<AwaitPart>,
    pub catch: Option<AwaitPart>,
    pub span: Span,
}

/// `{#slot:name a, b}...{/slot}` passed to a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotBlock {
    pub value: String,
    pub body: Vec<Node>,
    pub span: Span,
}

/// `{#fragment:name a, b}...{/fragment}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentBlock {
    pub value: String,
    pub body: Vec<Node>,
    pub span: Span,
}

/// `{@html exp}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SysTag {
    pub value: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Node {
    Element(Element),
    Text(Text),
    Comment(Comment),
    Script(RawBlock),
    Style(RawBlock),
    Template(RawBlock),
    Each(EachBlock),
    If(IfBlock),
    Await(AwaitBlock),
    Slot(SlotBlock),
    Fragment(FragmentBlock),
    SysTag(SysTag),
}

impl Node {
    pub fn span(&self) -> Span {
        match self {
            Node::Element(n) => n.span,
            Node::Text(n) => n.span,
            Node::Comment(n) => n.span,
            Node::Script(n) | Node::Style(n) | Node::Template(n) => n.span,
            Node::Each(n) => n.span,
            Node::If(n) => n.span,
            Node::Await(n) => n.span,
            Node::Slot(n) => n.span,
            Node::Fragment(n) => n.span,
            Node::SysTag(n) => n.span,
        }
    }

    /// Short excerpt used to annotate errors raised for this node.
    pub fn excerpt(&self) -> String {
        match self {
            Node::Text(n) => n.value.trim().to_string(),
            Node::Element(n) => n.open_tag.trim().to_string(),
            Node::Comment(n) => n.content.clone(),
            Node::Script(n) | Node::Style(n) | Node::Template(n) => n.open_tag.clone(),
            Node::Each(n) => n.value.trim().to_string(),
            Node::If(n) => n.value.trim().to_string(),
            Node::Await(n) => n.value.trim().to_string(),
            Node::Slot(n) => n.value.trim().to_string(),
            Node::Fragment(n) => n.value.trim().to_string(),
            Node::SysTag(n) => n.value.trim().to_string(),
        }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn element_name(&self) -> Option<&str> {
        self.as_element().map(|e| e.name.as_str())
    }

    pub fn is_blank_text(&self) -> bool {
        matches!(self, Node::Text(t) if t.value.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Root {
    pub body: Vec<Node>,
    pub span: Span,
}
