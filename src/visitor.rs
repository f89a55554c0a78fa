use crate::ast::{AwaitBlock, EachBlock, Element, FragmentBlock, IfBlock, Node, RawBlock, Root, SlotBlock, Text};

/// The MarkupVisitor trait is the single traversal mechanism for the markup tree.
///
/// Rules:
/// 1. Traversal order is document order; `if` visits the main body before `else`,
///    `await` visits pending, then, catch.
/// 2. Implementers override `visit_*` methods to add behavior.
/// 3. Implementers call the matching `walk_*` function to continue traversal
///    unless pruning is intended.
pub trait MarkupVisitor {
    fn visit_root(&mut self, root: &mut Root) {
        walk_root(self, root);
    }

    fn visit_node(&mut self, node: &mut Node) {
        walk_node(self, node);
    }

    fn visit_element(&mut self, element: &mut Element) {
        walk_element(self, element);
    }

    fn visit_text(&mut self, _text: &mut Text) {}

    fn visit_raw_block(&mut self, _block: &mut RawBlock) {}

    fn visit_each(&mut self, block: &mut EachBlock) {
        self.visit_children(&mut block.body);
    }

    fn visit_if(&mut self, block: &mut IfBlock) {
        walk_if(self, block);
    }

    fn visit_await(&mut self, block: &mut AwaitBlock) {
        walk_await(self, block);
    }

    fn visit_slot(&mut self, block: &mut SlotBlock) {
        self.visit_children(&mut block.body);
    }

    fn visit_fragment(&mut self, block: &mut FragmentBlock) {
        self.visit_children(&mut block.body);
    }

    fn visit_children(&mut self, children: &mut Vec<Node>) {
        walk_children(self, children);
    }
}

pub fn walk_root<V: MarkupVisitor + ?Sized>(visitor: &mut V, root: &mut Root) {
    visitor.visit_children(&mut root.body);
}

pub fn walk_children<V: MarkupVisitor + ?Sized>(visitor: &mut V, children: &mut Vec<Node>) {
    for node in children {
        visitor.visit_node(node);
    }
}

pub fn walk_node<V: MarkupVisitor + ?Sized>(visitor: &mut V, node: &mut Node) {
    match node {
        Node::Element(el) => visitor.visit_element(el),
        Node::Text(t) => visitor.visit_text(t),
        Node::Script(b) | Node::Style(b) | Node::Template(b) => visitor.visit_raw_block(b),
        Node::Each(b) => visitor.visit_each(b),
        Node::If(b) => visitor.visit_if(b),
        Node::Await(b) => visitor.visit_await(b),
        Node::Slot(b) => visitor.visit_slot(b),
        Node::Fragment(b) => visitor.visit_fragment(b),
        Node::Comment(_) | Node::SysTag(_) => {}
    }
}

pub fn walk_element<V: MarkupVisitor + ?Sized>(visitor: &mut V, element: &mut Element) {
    visitor.visit_children(&mut element.body);
}

pub fn walk_if<V: MarkupVisitor + ?Sized>(visitor: &mut V, block: &mut IfBlock) {
    visitor.visit_children(&mut block.body);
    if let Some(alt) = block.else_body.as_mut() {
        visitor.visit_children(alt);
    }
}

pub fn walk_await<V: MarkupVisitor + ?Sized>(visitor: &mut V, block: &mut AwaitBlock) {
    visitor.visit_children(&mut block.main);
    if let Some(part) = block.then.as_mut() {
        visitor.visit_children(&mut part.body);
    }
    if let Some(part) = block.catch.as_mut() {
        visitor.visit_children(&mut part.body);
    }
}
