//! Static selector matching.
//!
//! The style scoper needs to know which markup elements a rule can ever
//! match. A lightweight tree mirroring the static markup is built (loop,
//! condition, await, slot and fragment bodies flattened into their parent)
//! and selectors are matched right to left against it. Every match reports
//! the matched element plus the elements matched by the selector's
//! ancestor and sibling compounds.

use crate::ast::{Node, NodeId, Root};
use crate::css::{AttributeSelector, SelectorItem, SelectorKind};
use crate::error::{CompilerError, Result};

#[derive(Debug, Clone)]
pub struct StaticNode {
    pub source: NodeId,
    pub name: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attributes: Vec<(String, Option<String>)>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

impl StaticNode {
    fn attribute(&self, name: &str) -> Option<Option<&str>> {
        match name {
            "id" => self.id.as_deref().map(Some),
            _ => self
                .attributes
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_deref()),
        }
    }

    fn previous_sibling(&self, dom: &StaticDom, index: usize) -> Option<usize> {
        let siblings = match self.parent {
            Some(p) => &dom.nodes[p].children,
            None => &dom.roots,
        };
        let pos = siblings.iter().position(|&s| s == index)?;
        if pos == 0 {
            None
        } else {
            Some(siblings[pos - 1])
        }
    }
}

#[derive(Debug, Default)]
pub struct StaticDom {
    pub nodes: Vec<StaticNode>,
    pub roots: Vec<usize>,
}

/// One matched element with the elements matched by the other compounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub node: NodeId,
    pub path: Vec<NodeId>,
}

impl StaticDom {
    pub fn build(root: &Root) -> Self {
        let mut dom = StaticDom::default();
        dom.add_body(None, &root.body);
        dom
    }

    fn add_body(&mut self, parent: Option<usize>, body: &[Node]) {
        for node in body {
            match node {
                Node::Each(b) => self.add_body(parent, &b.body),
                Node::Slot(b) => self.add_body(parent, &b.body),
                Node::Fragment(b) => self.add_body(parent, &b.body),
                Node::If(b) => {
                    self.add_body(parent, &b.body);
                    if let Some(alt) = &b.else_body {
                        self.add_body(parent, alt);
                    }
                }
                Node::Await(b) => {
                    self.add_body(parent, &b.main);
                    if let Some(part) = &b.then {
                        self.add_body(parent, &part.body);
                    }
                    if let Some(part) = &b.catch {
                        self.add_body(parent, &part.body);
                    }
                }
                Node::Element(el) => {
                    let mut static_node = StaticNode {
                        source: el.id,
                        name: el.name.clone(),
                        id: None,
                        classes: Vec::new(),
                        attributes: Vec::new(),
                        parent,
                        children: Vec::new(),
                    };
                    for a in &el.attributes {
                        if a.name == "class" {
                            if let Some(v) = &a.value {
                                static_node
                                    .classes
                                    .extend(v.split_whitespace().map(str::to_string));
                            }
                        } else if a.name == "id" {
                            static_node.id = a.value.clone();
                        } else if let Some(name) = a.name.strip_prefix("class:") {
                            static_node.classes.push(name.to_string());
                        } else {
                            static_node.attributes.push((a.name.clone(), a.value.clone()));
                        }
                    }
                    let index = self.nodes.len();
                    self.nodes.push(static_node);
                    match parent {
                        Some(p) => self.nodes[p].children.push(index),
                        None => self.roots.push(index),
                    }
                    self.add_body(Some(index), &el.body);
                }
                Node::Text(_)
                | Node::Comment(_)
                | Node::Script(_)
                | Node::Style(_)
                | Node::Template(_)
                | Node::SysTag(_) => {}
            }
        }
    }

    /// Matches a selector without pseudo parts against every element.
    pub fn select(&self, items: &[SelectorItem]) -> Result<Vec<Match>> {
        let chain = compile(items)?;
        let mut result = Vec::new();
        for index in 0..self.nodes.len() {
            if let Some(path) = self.match_chain(&chain, chain.len() - 1, index) {
                result.push(Match {
                    node: self.nodes[index].source,
                    path: path.into_iter().map(|i| self.nodes[i].source).collect(),
                });
            }
        }
        Ok(result)
    }

    /// Matches `chain[..=pos]` ending at `index`; returns the nodes matched by
    /// the compounds before `pos`.
    fn match_chain(&self, chain: &[Compound], pos: usize, index: usize) -> Option<Vec<usize>> {
        let compound = &chain[pos];
        if !compound.matches(&self.nodes[index]) {
            return None;
        }
        if pos == 0 {
            return Some(Vec::new());
        }
        let node = &self.nodes[index];
        let found = |candidate: usize| -> Option<Vec<usize>> {
            let mut path = self.match_chain(chain, pos - 1, candidate)?;
            path.push(candidate);
            Some(path)
        };
        match compound.combinator {
            Combinator::Descendant => {
                let mut parent = node.parent;
                while let Some(p) = parent {
                    if let Some(path) = found(p) {
                        return Some(path);
                    }
                    parent = self.nodes[p].parent;
                }
                None
            }
            Combinator::Child => node.parent.and_then(found),
            Combinator::Adjacent => node.previous_sibling(self, index).and_then(found),
            Combinator::Sibling => {
                let mut prev = node.previous_sibling(self, index);
                while let Some(p) = prev {
                    if let Some(path) = found(p) {
                        return Some(path);
                    }
                    prev = self.nodes[p].previous_sibling(self, p);
                }
                None
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPOUNDS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
    Adjacent,
    Sibling,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttributeOp {
    Exists,
    Equals,
    Word,
    DashPrefix,
    Prefix,
    Suffix,
    Contains,
}

#[derive(Debug, Clone)]
struct AttributeTest {
    name: String,
    op: AttributeOp,
    value: String,
    ignore_case: bool,
}

impl AttributeTest {
    fn from_selector(attr: &AttributeSelector) -> Option<Self> {
        let op = match attr.operator.as_deref() {
            None => AttributeOp::Exists,
            Some("=") => AttributeOp::Equals,
            Some("~=") => AttributeOp::Word,
            Some("|=") => AttributeOp::DashPrefix,
            Some("^=") => AttributeOp::Prefix,
            Some("$=") => AttributeOp::Suffix,
            Some("*=") => AttributeOp::Contains,
            Some(_) => return None,
        };
        Some(Self {
            name: attr.name.clone(),
            op,
            value: attr.value.clone().unwrap_or_default(),
            ignore_case: attr.modifier == Some('i'),
        })
    }

    fn matches(&self, node: &StaticNode) -> bool {
        let actual = match self.name.as_str() {
            "class" => {
                if node.classes.is_empty() {
                    return false;
                }
                node.classes.join(" ")
            }
            name => match node.attribute(name) {
                None => return false,
                Some(v) => v.unwrap_or("").to_string(),
            },
        };
        let (actual, expected) = if self.ignore_case {
            (actual.to_lowercase(), self.value.to_lowercase())
        } else {
            (actual, self.value.clone())
        };
        match self.op {
            AttributeOp::Exists => true,
            AttributeOp::Equals => actual == expected,
            AttributeOp::Word => actual.split_whitespace().any(|w| w == expected),
            AttributeOp::DashPrefix => actual == expected || actual.starts_with(&format!("{}-", expected)),
            AttributeOp::Prefix => !expected.is_empty() && actual.starts_with(&expected),
            AttributeOp::Suffix => !expected.is_empty() && actual.ends_with(&expected),
            AttributeOp::Contains => !expected.is_empty() && actual.contains(&expected),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct CompoundTests {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<AttributeTest>,
}

#[derive(Debug, Clone)]
struct Compound {
    tests: CompoundTests,
    /// Relation to the previous compound.
    combinator: Combinator,
}

impl Compound {
    fn matches(&self, node: &StaticNode) -> bool {
        let t = &self.tests;
        if let Some(tag) = &t.tag {
            if tag != "*" && !tag.eq_ignore_ascii_case(&node.name) {
                return false;
            }
        }
        if let Some(id) = &t.id {
            if node.id.as_deref() != Some(id.as_str()) {
                return false;
            }
        }
        t.classes.iter().all(|c| node.classes.iter().any(|n| n == c))
            && t.attributes.iter().all(|a| a.matches(node))
    }
}

fn compile(items: &[SelectorItem]) -> Result<Vec<Compound>> {
    let unsupported = || {
        CompilerError::css(format!(
            "Unsupported selector: '{}'",
            crate::css::print_items(items)
        ))
    };
    let mut chain = Vec::new();
    let mut current = CompoundTests::default();
    let mut combinator = Combinator::Descendant;
    let mut open = false;

    for item in items {
        let next = match &item.kind {
            SelectorKind::WhiteSpace => Some(Combinator::Descendant),
            SelectorKind::Combinator('>') => Some(Combinator::Child),
            SelectorKind::Combinator('+') => Some(Combinator::Adjacent),
            SelectorKind::Combinator('~') => Some(Combinator::Sibling),
            SelectorKind::Combinator(_) => return Err(unsupported()),
            _ => None,
        };
        if let Some(next) = next {
            if open {
                chain.push(Compound {
                    tests: std::mem::take(&mut current),
                    combinator,
                });
                open = false;
            }
            combinator = next;
            continue;
        }
        open = true;
        match &item.kind {
            SelectorKind::Type(name) if name == "&" => return Err(unsupported()),
            SelectorKind::Type(name) => current.tag = Some(name.clone()),
            SelectorKind::Id(name) => current.id = Some(name.clone()),
            SelectorKind::Class(name) => current.classes.push(name.clone()),
            SelectorKind::Attribute(attr) => current
                .attributes
                .push(AttributeTest::from_selector(attr).ok_or_else(unsupported)?),
            _ => return Err(unsupported()),
        }
    }
    if open {
        chain.push(Compound {
            tests: current,
            combinator,
        });
    }
    if chain.is_empty() {
        return Err(unsupported());
    }
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::css::parse_selector;
    use crate::parse::parse;

    fn names(dom: &StaticDom, selector: &str) -> Vec<(String, usize)> {
        let items = parse_selector(selector).unwrap().items;
        dom.select(&items)
            .unwrap()
            .into_iter()
            .map(|m| {
                let node = dom.nodes.iter().find(|n| n.source == m.node).unwrap();
                (node.name.clone(), m.path.len())
            })
            .collect()
    }

    #[test]
    fn test_flattened_blocks_are_visible() {
        let root = parse("<ul>{#each items as i}<li class=\"item\">{i}</li>{/each}</ul>").unwrap();
        let dom = StaticDom::build(&root);
        assert_eq!(names(&dom, "ul .item"), vec![("li".to_string(), 1)]);
        assert_eq!(names(&dom, "ul > li"), vec![("li".to_string(), 1)]);
    }

    #[test]
    fn test_combinators() {
        let root = parse("<div><h1 id=\"t\"></h1><p></p><span></span></div>").unwrap();
        let dom = StaticDom::build(&root);
        assert_eq!(names(&dom, "#t + p"), vec![("p".to_string(), 1)]);
        assert_eq!(names(&dom, "h1 ~ span"), vec![("span".to_string(), 1)]);
        assert!(names(&dom, "p + h1").is_empty());
        assert_eq!(names(&dom, "*").len(), 4);
    }

    #[test]
    fn test_class_directive_and_attributes() {
        let root = parse("<a class:active={x} href=\"https://x\" data-k=\"a b\"></a>").unwrap();
        let dom = StaticDom::build(&root);
        assert_eq!(names(&dom, ".active").len(), 1);
        assert_eq!(names(&dom, "a[href^=\"https\"]").len(), 1);
        assert_eq!(names(&dom, "[data-k~=b]").len(), 1);
        assert!(names(&dom, "[data-k=b]").is_empty());
        assert_eq!(names(&dom, "[data-k=\"A B\" i]").len(), 1);
    }

    #[test]
    fn test_escaped_names_match_decoded_markup() {
        let root = parse("<p class=\"a:b\" id=\"1x\" data-v=\"x]y\"></p>").unwrap();
        let dom = StaticDom::build(&root);
        assert_eq!(names(&dom, ".a\\:b").len(), 1);
        assert_eq!(names(&dom, "#\\31 x").len(), 1);
        assert_eq!(names(&dom, "[data-v=\"x]y\"]").len(), 1);
    }

    #[test]
    fn test_pseudo_rejected() {
        let root = parse("<a></a>").unwrap();
        let dom = StaticDom::build(&root);
        let items = parse_selector("a:hover").unwrap().items;
        assert!(dom.select(&items).is_err());
    }
}
