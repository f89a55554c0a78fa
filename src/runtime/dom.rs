//! Arena DOM used by the runtime.
//!
//! Nodes are addressed by `NodeId` and never freed; detached nodes simply
//! have no parent. The document is shared as `DomRef` so bind closures can
//! reach it.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use super::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerId(u64);

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Element { name: String, svg: bool },
    Text(String),
    Comment(String),
    Fragment,
}

#[derive(Clone, Debug)]
pub struct Event {
    pub name: String,
    pub target: NodeId,
    pub detail: Value,
}

pub type Listener = Rc<dyn Fn(&Event)>;

pub type DomRef = Rc<RefCell<Document>>;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

#[derive(Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attributes: Vec<(String, String)>,
    styles: Vec<(String, String)>,
    props: BTreeMap<String, Value>,
    listeners: Vec<(String, ListenerId, Listener)>,
}

impl NodeData {
    fn new(kind: NodeKind) -> Self {
        NodeData {
            kind,
            parent: None,
            children: Vec::new(),
            attributes: Vec::new(),
            styles: Vec::new(),
            props: BTreeMap::new(),
            listeners: Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct Document {
    nodes: Vec<NodeData>,
    next_listener: u64,
    pub(crate) templates: HashMap<(String, bool), NodeId>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> DomRef {
        Rc::new(RefCell::new(Self::new()))
    }

    fn add(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(NodeData::new(kind));
        NodeId(self.nodes.len() - 1)
    }

    fn node(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut NodeData {
        &mut self.nodes[id.0]
    }

    pub fn create_element(&mut self, name: &str) -> NodeId {
        self.add(NodeKind::Element {
            name: name.to_string(),
            svg: false,
        })
    }

    pub fn create_svg_element(&mut self, name: &str) -> NodeId {
        self.add(NodeKind::Element {
            name: name.to_string(),
            svg: true,
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.add(NodeKind::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.add(NodeKind::Comment(text.to_string()))
    }

    pub fn create_fragment(&mut self) -> NodeId {
        self.add(NodeKind::Fragment)
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Element { name, .. } => Some(name),
            _ => None,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TREE NAVIGATION
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn child(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.node(id).children.get(index).copied()
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).children.first().copied()
    }

    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).children.last().copied()
    }

    fn index_in_parent(&self, id: NodeId) -> Option<(NodeId, usize)> {
        let parent = self.parent(id)?;
        let index = self.children(parent).iter().position(|&c| c == id)?;
        Some((parent, index))
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let (parent, index) = self.index_in_parent(id)?;
        self.child(parent, index + 1)
    }

    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        let (parent, index) = self.index_in_parent(id)?;
        index.checked_sub(1).and_then(|i| self.child(parent, i))
    }

    /// `first` through `last` along the sibling chain, inclusive.
    pub fn range(&self, first: NodeId, last: NodeId) -> Vec<NodeId> {
        let mut nodes = Vec::new();
        let mut cursor = Some(first);
        while let Some(node) = cursor {
            nodes.push(node);
            if node == last {
                break;
            }
            cursor = self.next_sibling(node);
        }
        nodes
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MUTATION
    // ═══════════════════════════════════════════════════════════════════════════

    fn detach(&mut self, id: NodeId) {
        if let Some((parent, index)) = self.index_in_parent(id) {
            self.node_mut(parent).children.remove(index);
        }
        self.node_mut(id).parent = None;
    }

    /// Inserting a fragment moves its children and leaves it empty.
    pub fn insert_before(&mut self, parent: NodeId, node: NodeId, reference: Option<NodeId>) {
        if Some(node) == reference {
            return;
        }
        if self.node(node).kind == NodeKind::Fragment {
            let moved = std::mem::take(&mut self.node_mut(node).children);
            for child in moved {
                self.node_mut(child).parent = None;
                self.insert_before(parent, child, reference);
            }
            return;
        }
        self.detach(node);
        let index = reference
            .filter(|r| self.parent(*r) == Some(parent))
            .and_then(|r| self.children(parent).iter().position(|&c| c == r))
            .unwrap_or(self.children(parent).len());
        self.node_mut(parent).children.insert(index, node);
        self.node_mut(node).parent = Some(parent);
    }

    pub fn append_child(&mut self, parent: NodeId, node: NodeId) {
        self.insert_before(parent, node, None);
    }

    pub fn replace_child(&mut self, parent: NodeId, node: NodeId, old: NodeId) {
        if node == old {
            return;
        }
        self.insert_before(parent, node, Some(old));
        self.detach(old);
    }

    pub fn remove(&mut self, id: NodeId) {
        self.detach(id);
    }

    /// `$$removeElements`: removes `first` through `last` inclusive.
    pub fn remove_range(&mut self, first: NodeId, last: NodeId) {
        for node in self.range(first, last) {
            self.detach(node);
        }
    }

    /// Listeners are not cloned.
    pub fn clone_node(&mut self, id: NodeId, deep: bool) -> NodeId {
        let source = self.node(id).clone();
        let copy = self.add(source.kind);
        {
            let data = self.node_mut(copy);
            data.attributes = source.attributes;
            data.styles = source.styles;
            data.props = source.props;
        }
        if deep {
            for child in source.children {
                let child_copy = self.clone_node(child, true);
                self.node_mut(child_copy).parent = Some(copy);
                self.node_mut(copy).children.push(child_copy);
            }
        }
        copy
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CONTENT
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn node_value(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Text(t) | NodeKind::Comment(t) => Some(t),
            _ => None,
        }
    }

    pub fn text_content(&self, id: NodeId) -> String {
        match &self.node(id).kind {
            NodeKind::Text(t) => t.clone(),
            NodeKind::Comment(_) => String::new(),
            _ => self
                .children(id)
                .iter()
                .map(|&c| self.text_content(c))
                .collect(),
        }
    }

    pub fn set_text_content(&mut self, id: NodeId, text: &str) {
        if let NodeKind::Text(t) | NodeKind::Comment(t) = &mut self.node_mut(id).kind {
            *t = text.to_string();
            return;
        }
        for child in self.node(id).children.clone() {
            self.detach(child);
        }
        let node = self.create_text(text);
        self.append_child(id, node);
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.node(id)
            .attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn attributes(&self, id: NodeId) -> &[(String, String)] {
        &self.node(id).attributes
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) {
        let attributes = &mut self.node_mut(id).attributes;
        match attributes.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value.to_string(),
            None => attributes.push((name.to_string(), value.to_string())),
        }
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) {
        self.node_mut(id).attributes.retain(|(n, _)| n != name);
    }

    pub fn class_list(&self, id: NodeId) -> Vec<String> {
        self.attribute(id, "class")
            .map(|c| c.split_whitespace().map(String::from).collect())
            .unwrap_or_default()
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.class_list(id).iter().any(|c| c == class)
    }

    pub fn toggle_class(&mut self, id: NodeId, class: &str, on: bool) {
        let mut list = self.class_list(id);
        let present = list.iter().any(|c| c == class);
        if on == present {
            return;
        }
        if on {
            list.push(class.to_string());
        } else {
            list.retain(|c| c != class);
        }
        self.set_attribute(id, "class", &list.join(" "));
    }

    pub fn style(&self, id: NodeId, property: &str) -> Option<&str> {
        self.node(id)
            .styles
            .iter()
            .find(|(p, _)| p == property)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_style(&mut self, id: NodeId, property: &str, value: Option<&str>) {
        let styles = &mut self.node_mut(id).styles;
        styles.retain(|(p, _)| p != property);
        if let Some(value) = value {
            styles.push((property.to_string(), value.to_string()));
        }
    }

    pub fn prop(&self, id: NodeId, name: &str) -> Value {
        self.node(id).props.get(name).cloned().unwrap_or_default()
    }

    pub fn set_prop(&mut self, id: NodeId, name: &str, value: Value) {
        self.node_mut(id).props.insert(name.to_string(), value);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EVENTS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn add_listener(&mut self, id: NodeId, event: &str, listener: Listener) -> ListenerId {
        self.next_listener += 1;
        let lid = ListenerId(self.next_listener);
        self.node_mut(id)
            .listeners
            .push((event.to_string(), lid, listener));
        lid
    }

    pub fn remove_listener(&mut self, id: NodeId, listener: ListenerId) {
        self.node_mut(id).listeners.retain(|(_, l, _)| *l != listener);
    }

    pub fn listener_count(&self, id: NodeId, event: &str) -> usize {
        self.node(id)
            .listeners
            .iter()
            .filter(|(e, _, _)| e == event)
            .count()
    }

    fn listeners_for(&self, id: NodeId, event: &str) -> Vec<Listener> {
        self.node(id)
            .listeners
            .iter()
            .filter(|(e, _, _)| e == event)
            .map(|(_, _, l)| l.clone())
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Descendant elements with tag `name`, in document order.
    pub fn elements_by_tag(&self, root: NodeId, name: &str) -> Vec<NodeId> {
        let mut found = Vec::new();
        for &child in self.children(root) {
            if self.tag_name(child) == Some(name) {
                found.push(child);
            }
            found.extend(self.elements_by_tag(child, name));
        }
        found
    }

    pub fn to_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_html(id, &mut out);
        out
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for &child in self.children(id) {
            self.write_html(child, &mut out);
        }
        out
    }

    fn write_html(&self, id: NodeId, out: &mut String) {
        let data = self.node(id);
        match &data.kind {
            NodeKind::Text(t) => out.push_str(&escape_text(t)),
            NodeKind::Comment(t) => {
                out.push_str("<!--");
                out.push_str(t);
                out.push_str("-->");
            }
            NodeKind::Fragment => {
                for &child in &data.children {
                    self.write_html(child, out);
                }
            }
            NodeKind::Element { name, .. } => {
                out.push('<');
                out.push_str(name);
                for (n, v) in &data.attributes {
                    out.push_str(&format!(" {}=\"{}\"", n, v.replace('"', "&quot;")));
                }
                if !data.styles.is_empty() && self.attribute(id, "style").is_none() {
                    let style: Vec<String> =
                        data.styles.iter().map(|(p, v)| format!("{}: {}", p, v)).collect();
                    out.push_str(&format!(" style=\"{}\"", style.join("; ")));
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&name.as_str()) {
                    return;
                }
                for &child in &data.children {
                    self.write_html(child, out);
                }
                out.push_str(&format!("</{}>", name));
            }
        }
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Calls the listeners of `target` registered for `name`.
/// Returns the number of listeners invoked.
pub fn dispatch(dom: &DomRef, target: NodeId, name: &str, detail: Value) -> usize {
    let listeners = dom.borrow().listeners_for(target, name);
    let event = Event {
        name: name.to_string(),
        target,
        detail,
    };
    for listener in &listeners {
        listener(&event);
    }
    listeners.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn list(doc: &mut Document, items: &[&str]) -> (NodeId, Vec<NodeId>) {
        let ul = doc.create_element("ul");
        let nodes = items
            .iter()
            .map(|t| {
                let li = doc.create_element("li");
                let text = doc.create_text(t);
                doc.append_child(li, text);
                doc.append_child(ul, li);
                li
            })
            .collect();
        (ul, nodes)
    }

    #[test]
    fn test_insert_and_navigate() {
        let mut doc = Document::new();
        let (ul, li) = list(&mut doc, &["a", "b", "c"]);
        assert_eq!(doc.next_sibling(li[0]), Some(li[1]));
        assert_eq!(doc.previous_sibling(li[0]), None);
        doc.insert_before(ul, li[2], Some(li[0]));
        assert_eq!(doc.text_content(ul), "cab");
        doc.replace_child(ul, li[1], li[2]);
        assert_eq!(doc.text_content(ul), "ba");
        assert_eq!(doc.parent(li[2]), None);
    }

    #[test]
    fn test_fragment_insertion_moves_children() {
        let mut doc = Document::new();
        let (ul, li) = list(&mut doc, &["a"]);
        let frag = doc.create_fragment();
        let x = doc.create_text("x");
        let y = doc.create_text("y");
        doc.append_child(frag, x);
        doc.append_child(frag, y);
        doc.insert_before(ul, frag, Some(li[0]));
        assert_eq!(doc.text_content(ul), "xya");
        assert!(doc.children(frag).is_empty());
    }

    #[test]
    fn test_remove_range_and_clone() {
        let mut doc = Document::new();
        let (ul, li) = list(&mut doc, &["a", "b", "c", "d"]);
        doc.set_attribute(li[1], "class", "x");
        let copy = doc.clone_node(ul, true);
        doc.remove_range(li[1], li[2]);
        assert_eq!(doc.text_content(ul), "ad");
        assert_eq!(doc.inner_html(copy), "<li>a</li><li class=\"x\">b</li><li>c</li><li>d</li>");
    }

    #[test]
    fn test_classes_and_attributes() {
        let mut doc = Document::new();
        let div = doc.create_element("div");
        doc.set_attribute(div, "class", "a");
        doc.toggle_class(div, "b", true);
        doc.toggle_class(div, "b", true);
        doc.toggle_class(div, "a", false);
        assert_eq!(doc.attribute(div, "class"), Some("b"));
        doc.set_style(div, "color", Some("red"));
        assert_eq!(doc.to_html(div), "<div class=\"b\" style=\"color: red\"></div>");
        doc.remove_attribute(div, "class");
        assert!(doc.class_list(div).is_empty());
    }

    #[test]
    fn test_dispatch() {
        let dom = Document::shared();
        let button = dom.borrow_mut().create_element("button");
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        let d = dom.clone();
        let id = dom.borrow_mut().add_listener(
            button,
            "click",
            Rc::new(move |e: &Event| {
                h.set(h.get() + 1);
                d.borrow_mut().set_attribute(e.target, "clicked", "yes");
            }),
        );
        assert_eq!(dispatch(&dom, button, "click", Value::Undefined), 1);
        assert_eq!(dom.borrow().attribute(button, "clicked"), Some("yes"));
        dom.borrow_mut().remove_listener(button, id);
        assert_eq!(dispatch(&dom, button, "click", Value::Undefined), 0);
        assert_eq!(hits.get(), 1);
    }
}
