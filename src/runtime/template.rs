//! HTML/SVG string to DOM fragment conversion, cached by content.

use html5ever::{parse_fragment, LocalName, Namespace, ParseOpts, QualName};
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use tendril::TendrilSink;

use super::dom::{Document, NodeId, NodeKind};

const HTML_NS: &str = "http://www.w3.org/1999/xhtml";

/// Parses `html` in a `<body>` context and returns a fresh fragment.
pub fn html_to_fragment(doc: &mut Document, html: &str) -> NodeId {
    to_fragment(doc, html, false)
}

/// Parses markup that belongs inside an `<svg>` element.
pub fn svg_to_fragment(doc: &mut Document, html: &str) -> NodeId {
    to_fragment(doc, html, true)
}

/// `$$htmlToFragmentClean`: empty comments become empty text nodes.
pub fn html_to_fragment_clean(doc: &mut Document, html: &str) -> NodeId {
    let fragment = html_to_fragment(doc, html);
    clean_labels(doc, fragment);
    fragment
}

fn clean_labels(doc: &mut Document, node: NodeId) {
    for child in doc.children(node).to_vec() {
        if matches!(doc.kind(child), NodeKind::Comment(text) if text.is_empty()) {
            let text = doc.create_text("");
            doc.replace_child(node, text, child);
        } else {
            clean_labels(doc, child);
        }
    }
}

fn to_fragment(doc: &mut Document, html: &str, svg: bool) -> NodeId {
    let key = (html.to_string(), svg);
    if let Some(&template) = doc.templates.get(&key) {
        return doc.clone_node(template, true);
    }
    let template = parse(doc, html, svg);
    doc.templates.insert(key, template);
    doc.clone_node(template, true)
}

fn parse(doc: &mut Document, html: &str, svg: bool) -> NodeId {
    let source = if svg {
        format!("<svg>{}</svg>", html)
    } else {
        html.to_string()
    };
    let context = QualName::new(None, Namespace::from(HTML_NS), LocalName::from("body"));
    let dom = parse_fragment(RcDom::default(), ParseOpts::default(), context, vec![])
        .from_utf8()
        .one(source.as_bytes());

    let fragment = doc.create_fragment();
    // fragment parsing wraps the result in a synthetic <html> element
    let mut top: Vec<Handle> = dom.document.children.borrow().clone();
    if let Some(html_root) = top.first().cloned() {
        top = html_root.children.borrow().clone();
    }
    if svg {
        if let Some(svg_root) = top.first().cloned() {
            top = svg_root.children.borrow().clone();
        }
    }
    for handle in &top {
        if let Some(node) = convert(doc, handle, svg) {
            doc.append_child(fragment, node);
        }
    }
    fragment
}

fn convert(doc: &mut Document, handle: &Handle, svg: bool) -> Option<NodeId> {
    let node = match &handle.data {
        NodeData::Text { contents } => doc.create_text(&contents.borrow()),
        NodeData::Comment { contents } => doc.create_comment(contents),
        NodeData::Element { name, attrs, .. } => {
            let tag = name.local.to_string();
            let el = if svg {
                doc.create_svg_element(&tag)
            } else {
                doc.create_element(&tag)
            };
            for attr in attrs.borrow().iter() {
                doc.set_attribute(el, &attr.name.local, &attr.value);
            }
            for child in handle.children.borrow().iter() {
                if let Some(c) = convert(doc, child, svg) {
                    doc.append_child(el, c);
                }
            }
            el
        }
        _ => return None,
    };
    Some(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_fragment() {
        let mut doc = Document::new();
        let frag = html_to_fragment(&mut doc, "<div class=\"a\"> </div><!-- each --><b>x</b>");
        assert_eq!(doc.children(frag).len(), 3);
        assert_eq!(doc.inner_html(frag), "<div class=\"a\"> </div><!-- each --><b>x</b>");
    }

    #[test]
    fn test_cache_returns_fresh_copies() {
        let mut doc = Document::new();
        let a = html_to_fragment(&mut doc, "<i>1</i>");
        let b = html_to_fragment(&mut doc, "<i>1</i>");
        assert_ne!(a, b);
        assert_ne!(doc.first_child(a), doc.first_child(b));
        assert_eq!(doc.templates.len(), 1);
    }

    #[test]
    fn test_svg_fragment() {
        let mut doc = Document::new();
        let frag = svg_to_fragment(&mut doc, "<circle r=\"4\"></circle>");
        let circle = doc.first_child(frag).unwrap();
        assert_eq!(doc.kind(circle), &NodeKind::Element { name: "circle".into(), svg: true });
        assert_eq!(doc.attribute(circle, "r"), Some("4"));
    }

    #[test]
    fn test_clean_labels() {
        let mut doc = Document::new();
        let frag = html_to_fragment_clean(&mut doc, "<p><!----></p><!---->");
        let p = doc.first_child(frag).unwrap();
        assert_eq!(doc.kind(doc.first_child(p).unwrap()), &NodeKind::Text(String::new()));
        assert_eq!(doc.kind(doc.last_child(frag).unwrap()), &NodeKind::Text(String::new()));
    }
}
