//! Binding helpers called by generated code: text, attributes, classes,
//! styles, two-way inputs, events and spread objects.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use super::detector::{ChangeDetector, Comparator, WatchOptions};
use super::dom::{dispatch, DomRef, Event, NodeId};
use super::scheduler::EventLoop;
use super::value::Value;

/// Element properties set directly rather than as attributes.
const DOM_PROPERTIES: &[&str] = &["value", "checked", "selected", "valueAsNumber"];

pub fn bind_text(cd: &ChangeDetector, dom: &DomRef, node: NodeId, get: impl Fn() -> Value + 'static) {
    let dom = dom.clone();
    cd.watch_read_only(get, move |value| {
        dom.borrow_mut().set_text_content(node, &value.to_text());
    });
}

/// Null and undefined remove the attribute.
pub fn bind_attribute(
    cd: &ChangeDetector,
    dom: &DomRef,
    el: NodeId,
    name: &str,
    get: impl Fn() -> Value + 'static,
) {
    let dom = dom.clone();
    let name = name.to_string();
    cd.watch_read_only(get, move |value| {
        let mut doc = dom.borrow_mut();
        if value.is_nullish() {
            doc.remove_attribute(el, &name);
        } else {
            doc.set_attribute(el, &name, &value.to_text());
        }
    });
}

/// `class:name={cond}`; `class_name` may hold a scope hash suffix.
pub fn bind_class(
    cd: &ChangeDetector,
    dom: &DomRef,
    el: NodeId,
    class_name: &str,
    get: impl Fn() -> bool + 'static,
) {
    let dom = dom.clone();
    let classes: Vec<String> = class_name.split_whitespace().map(String::from).collect();
    cd.watch_read_only(
        move || Value::Bool(get()),
        move |value| {
            let mut doc = dom.borrow_mut();
            for class in &classes {
                doc.toggle_class(el, class, value.truthy());
            }
        },
    );
}

pub fn bind_style(
    cd: &ChangeDetector,
    dom: &DomRef,
    el: NodeId,
    property: &str,
    get: impl Fn() -> Value + 'static,
) {
    let dom = dom.clone();
    let property = property.to_string();
    cd.watch_read_only(get, move |value| {
        let text = (!value.is_nullish()).then(|| value.to_text());
        dom.borrow_mut().set_style(el, &property, text.as_deref());
    });
}

/// Attaches a listener and detaches it when `cd` is destroyed (`$cd.ev`).
pub fn add_event(
    cd: &ChangeDetector,
    dom: &DomRef,
    el: NodeId,
    event: &str,
    handler: impl Fn(&Event) + 'static,
) {
    let id = dom.borrow_mut().add_listener(el, event, Rc::new(handler));
    let dom = dom.clone();
    cd.on_destroy(move || dom.borrow_mut().remove_listener(el, id));
}

/// Two-way binding of an element property; `set` receives user edits.
pub fn bind_input(
    cd: &ChangeDetector,
    dom: &DomRef,
    el: NodeId,
    property: &str,
    get: impl Fn() -> Value + 'static,
    set: impl Fn(Value) + 'static,
) {
    let event = if property == "checked" { "change" } else { "input" };
    let prop = property.to_string();
    let reader = dom.clone();
    add_event(cd, dom, el, event, move |_| {
        let value = reader.borrow().prop(el, &prop);
        set(value);
    });

    let dom = dom.clone();
    let prop = property.to_string();
    cd.watch(
        get,
        move |value| dom.borrow_mut().set_prop(el, &prop, value.clone()),
        WatchOptions::read_only(),
    );
}

/// Simulates user input: sets the property, then fires the input event.
pub fn input(dom: &DomRef, el: NodeId, property: &str, value: Value) -> usize {
    dom.borrow_mut().set_prop(el, property, value.clone());
    let event = if property == "checked" { "change" } else { "input" };
    dispatch(dom, el, event, value)
}

// ═══════════════════════════════════════════════════════════════════════════════
// SPREAD OBJECT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct SpreadState {
    prev: BTreeMap<String, Value>,
    list: Vec<BTreeMap<String, Value>>,
    planned: bool,
}

/// `$$makeSpreadObject`: later sources win; rendering is deferred one tick.
#[derive(Clone)]
pub struct SpreadObject {
    cd: ChangeDetector,
    dom: DomRef,
    el: NodeId,
    css: Option<String>,
    event_loop: EventLoop,
    state: Rc<RefCell<SpreadState>>,
}

impl SpreadObject {
    pub fn new(
        cd: &ChangeDetector,
        dom: &DomRef,
        el: NodeId,
        css: Option<&str>,
        event_loop: &EventLoop,
    ) -> Self {
        SpreadObject {
            cd: cd.clone(),
            dom: dom.clone(),
            el,
            css: css.map(String::from),
            event_loop: event_loop.clone(),
            state: Rc::default(),
        }
    }

    fn slot(&self) -> usize {
        let mut state = self.state.borrow_mut();
        state.list.push(BTreeMap::new());
        state.list.len() - 1
    }

    fn plan(&self) {
        let mut state = self.state.borrow_mut();
        if state.planned {
            return;
        }
        state.planned = true;
        let me = self.clone();
        self.event_loop.queue_microtask(move || me.render());
    }

    /// `{...obj}`
    pub fn spread(&self, get: impl Fn() -> Value + 'static) {
        let index = self.slot();
        let me = self.clone();
        self.cd.watch(
            get,
            move |value| {
                let fields = match value {
                    Value::Object(fields) => (**fields).clone(),
                    _ => BTreeMap::new(),
                };
                me.state.borrow_mut().list[index] = fields;
                me.plan();
            },
            WatchOptions::read_only().with_cmp(Comparator::Deep(1)),
        );
    }

    pub fn prop(&self, name: &str, get: impl Fn() -> Value + 'static) {
        let index = self.slot();
        let me = self.clone();
        let name = name.to_string();
        self.cd.watch_read_only(get, move |value| {
            me.state.borrow_mut().list[index].insert(name.clone(), value.clone());
            me.plan();
        });
    }

    pub fn attr(&self, name: &str, value: &str) {
        let index = self.slot();
        self.state.borrow_mut().list[index].insert(name.to_string(), Value::str(value));
    }

    pub fn render(&self) {
        let mut state = self.state.borrow_mut();
        state.planned = false;
        let mut used = HashSet::new();
        let mut writes = Vec::new();
        for source in state.list.iter().rev() {
            for (name, value) in source {
                if used.insert(name.clone()) {
                    writes.push((name.clone(), value.clone()));
                }
            }
        }

        let mut doc = self.dom.borrow_mut();
        for (name, value) in writes {
            if state.prev.get(&name).map_or(false, |p| p.same(&value)) {
                continue;
            }
            state.prev.insert(name.clone(), value.clone());
            if DOM_PROPERTIES.contains(&name.as_str()) {
                doc.set_prop(self.el, &name, value);
            } else if value.is_nullish() {
                doc.remove_attribute(self.el, &name);
            } else {
                let mut text = value.to_text();
                if let (true, Some(css)) = (name == "class", &self.css) {
                    text = format!("{} {}", text, css);
                }
                doc.set_attribute(self.el, &name, &text);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::detector::digest;
    use crate::runtime::dom::Document;
    use std::cell::Cell;

    fn setup() -> (DomRef, NodeId, ChangeDetector) {
        let dom = Document::shared();
        let el = dom.borrow_mut().create_element("input");
        (dom, el, ChangeDetector::new())
    }

    #[test]
    fn test_text_attribute_class_style() {
        let (dom, el, cd) = setup();
        let text = dom.borrow_mut().create_text("");
        dom.borrow_mut().append_child(el, text);
        let n = Rc::new(Cell::new(1));

        let v = n.clone();
        bind_text(&cd, &dom, text, move || Value::from(format!("n={}", v.get())));
        let v = n.clone();
        bind_attribute(&cd, &dom, el, "title", move || {
            if v.get() > 1 { Value::Null } else { Value::from(v.get()) }
        });
        let v = n.clone();
        bind_class(&cd, &dom, el, "big mx", move || v.get() > 1);
        let v = n.clone();
        bind_style(&cd, &dom, el, "width", move || Value::from(format!("{}px", v.get())));

        digest(&cd, || {});
        {
            let doc = dom.borrow();
            assert_eq!(doc.node_value(text), Some("n=1"));
            assert_eq!(doc.attribute(el, "title"), Some("1"));
            assert!(!doc.has_class(el, "big"));
            assert_eq!(doc.style(el, "width"), Some("1px"));
        }
        n.set(2);
        digest(&cd, || {});
        let doc = dom.borrow();
        assert_eq!(doc.node_value(text), Some("n=2"));
        assert_eq!(doc.attribute(el, "title"), None);
        assert_eq!(doc.class_list(el), ["big", "mx"]);
        assert_eq!(doc.style(el, "width"), Some("2px"));
    }

    #[test]
    fn test_bind_input_both_ways() {
        let (dom, el, cd) = setup();
        let model = Rc::new(RefCell::new(Value::from("a")));
        let (g, s) = (model.clone(), model.clone());
        bind_input(&cd, &dom, el, "value", move || g.borrow().clone(), move |v| *s.borrow_mut() = v);
        digest(&cd, || {});
        assert_eq!(dom.borrow().prop(el, "value").to_text(), "a");

        assert_eq!(input(&dom, el, "value", "typed".into()), 1);
        assert_eq!(model.borrow().to_text(), "typed");

        cd.destroy();
        assert_eq!(dom.borrow().listener_count(el, "input"), 0);
    }

    #[test]
    fn test_spread_object_order() {
        let (dom, el, cd) = setup();
        let event_loop = EventLoop::new();
        let spread = SpreadObject::new(&cd, &dom, el, Some("mx"), &event_loop);
        let obj = Rc::new(RefCell::new(Value::from(serde_json::json!({"title": "a", "class": "x"}))));
        spread.attr("title", "static");
        let o = obj.clone();
        spread.spread(move || o.borrow().clone());
        spread.prop("value", || Value::from(5));

        digest(&cd, || {});
        assert_eq!(event_loop.run_until_idle(), 1);
        {
            let doc = dom.borrow();
            assert_eq!(doc.attribute(el, "title"), Some("a"));
            assert_eq!(doc.attribute(el, "class"), Some("x mx"));
            assert_eq!(doc.prop(el, "value").to_text(), "5");
        }

        *obj.borrow_mut() = Value::from(serde_json::json!({"class": "y"}));
        digest(&cd, || {});
        event_loop.run_until_idle();
        let doc = dom.borrow();
        assert_eq!(doc.attribute(el, "title"), Some("static"));
        assert_eq!(doc.attribute(el, "class"), Some("y mx"));
    }
}
