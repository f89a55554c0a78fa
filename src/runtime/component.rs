//! Component instances: props, context, events, slots, mount hook and the
//! dynamic `<component:{ctor}>` block.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use super::blocks::{Branch, MountPoint};
use super::detector::{digest, ChangeDetector};
use super::dom::{DomRef, NodeId};
use super::scheduler::{ApplyScheduler, EventLoop};
use super::template::html_to_fragment;
use super::value::Value;

pub type Handler = Rc<dyn Fn(&Value)>;

/// Event name to handler; `add_handler` chains repeated names (`$$addEvent`).
#[derive(Clone, Default)]
pub struct EventMap(BTreeMap<String, Vec<Handler>>);

impl EventMap {
    pub fn add_handler(&mut self, event: &str, handler: Handler) {
        self.0.entry(event.to_string()).or_default().push(handler);
    }

    pub fn contains(&self, event: &str) -> bool {
        self.0.contains_key(event)
    }

    /// Returns false when nobody listens for `event`.
    pub fn emit(&self, event: &str, detail: &Value) -> bool {
        let Some(handlers) = self.0.get(event) else {
            return false;
        };
        for handler in handlers {
            handler(detail);
        }
        true
    }
}

/// Result of invoking a caller-supplied slot.
pub struct SlotHandle {
    pub destroy: Box<dyn FnOnce()>,
    pub setters: BTreeMap<String, Handler>,
}

pub type SlotFactory = Rc<dyn Fn(&DomRef, NodeId) -> SlotHandle>;

pub type Context = Rc<RefCell<BTreeMap<String, Value>>>;

#[derive(Clone, Default)]
pub struct ComponentOptions {
    pub props: BTreeMap<String, Value>,
    pub events: EventMap,
    pub slots: BTreeMap<String, SlotFactory>,
    pub context: Option<Context>,
    pub no_mount: bool,
}

pub type Constructor = Rc<dyn Fn(&DomRef, &EventLoop, NodeId, ComponentOptions) -> Component>;

struct State {
    props: RefCell<BTreeMap<String, Value>>,
    context: Context,
    events: EventMap,
    slots: BTreeMap<String, SlotFactory>,
    on_mount: RefCell<Vec<Box<dyn FnOnce()>>>,
    no_mount: bool,
    range: RefCell<Option<(NodeId, NodeId)>>,
}

/// A mounted component: root detector, scheduler and exposed state.
#[derive(Clone)]
pub struct Component {
    pub cd: ChangeDetector,
    pub apply: ApplyScheduler,
    pub dom: DomRef,
    state: Rc<State>,
}

impl Component {
    pub fn new(dom: &DomRef, event_loop: &EventLoop, options: ComponentOptions) -> Self {
        let cd = ChangeDetector::new();
        let apply = ApplyScheduler::new(&cd, event_loop);
        Component {
            apply,
            dom: dom.clone(),
            state: Rc::new(State {
                props: RefCell::new(options.props),
                context: options.context.unwrap_or_default(),
                events: options.events,
                slots: options.slots,
                on_mount: RefCell::default(),
                no_mount: options.no_mount,
                range: RefCell::new(None),
            }),
            cd,
        }
    }

    pub fn prop(&self, name: &str) -> Value {
        self.state.props.borrow().get(name).cloned().unwrap_or_default()
    }

    /// Getter closure for watchers.
    pub fn prop_reader(&self, name: &str) -> impl Fn() -> Value + 'static {
        let state = self.state.clone();
        let name = name.to_string();
        move || state.props.borrow().get(&name).cloned().unwrap_or_default()
    }

    /// Updates a prop from the host and schedules a digest.
    pub fn set_prop(&self, name: &str, value: Value) {
        self.state
            .props
            .borrow_mut()
            .insert(name.to_string(), value);
        self.apply.apply();
    }

    pub fn context(&self) -> Context {
        self.state.context.clone()
    }

    pub fn set_context(&self, key: &str, value: Value) {
        self.state.context.borrow_mut().insert(key.to_string(), value);
    }

    pub fn get_context(&self, key: &str) -> Value {
        self.state.context.borrow().get(key).cloned().unwrap_or_default()
    }

    /// `$emit`
    pub fn emit(&self, event: &str, detail: Value) -> bool {
        self.state.events.emit(event, &detail)
    }

    pub fn on_mount(&self, f: impl FnOnce() + 'static) {
        self.state.on_mount.borrow_mut().push(Box::new(f));
    }

    /// Runs pending mount hooks; automatic unless `no_mount` was set.
    pub fn mount(&self) {
        let hooks = std::mem::take(&mut *self.state.on_mount.borrow_mut());
        for hook in hooks {
            hook();
        }
    }

    /// Builds `html`, appends it to `host` and runs the initial digest.
    pub fn render(&self, host: NodeId, html: &str, build: impl FnOnce(&Component, NodeId)) {
        let fragment = html_to_fragment(&mut self.dom.borrow_mut(), html);
        build(self, fragment);
        {
            let mut doc = self.dom.borrow_mut();
            let range = doc.first_child(fragment).zip(doc.last_child(fragment));
            *self.state.range.borrow_mut() = range;
            doc.append_child(host, fragment);
        }
        self.apply.run();
        if !self.state.no_mount {
            self.mount();
        }
    }

    /// Renders the caller's slot at `label`, or `default` when none was passed.
    pub fn attach_slot(&self, name: &str, label: NodeId, default: Option<&Branch>) -> BTreeMap<String, Handler> {
        if let Some(factory) = self.state.slots.get(name) {
            let handle = factory(&self.dom, label);
            self.cd.on_destroy(handle.destroy);
            return handle.setters;
        }
        if let Some(branch) = default {
            MountPoint::new(&self.cd, &self.dom, label).mount(branch);
        }
        BTreeMap::new()
    }

    pub fn destroy(&self) {
        self.cd.destroy();
        if let Some((first, last)) = self.state.range.borrow_mut().take() {
            self.dom.borrow_mut().remove_range(first, last);
        }
    }

    /// Digests without waiting for the event loop.
    pub fn flush(&self) -> usize {
        digest(&self.cd, || {})
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DYNAMIC COMPONENT
// ═══════════════════════════════════════════════════════════════════════════════

pub type Registry = Rc<BTreeMap<String, Constructor>>;

/// `<component:{exp}>`: `get` names the constructor in `registry`; each
/// change tears the previous instance down before mounting the next.
pub fn dynamic_component(
    cd: &ChangeDetector,
    dom: &DomRef,
    event_loop: &EventLoop,
    label: NodeId,
    registry: Registry,
    get: impl Fn() -> Value + 'static,
    options: impl Fn() -> ComponentOptions + 'static,
) {
    let point = MountPoint::new(cd, dom, label);
    let dom = dom.clone();
    let event_loop = event_loop.clone();
    cd.watch(
        get,
        move |name| {
            point.unmount();
            let Some(ctor) = registry.get(&name.to_text()).cloned() else {
                return;
            };
            let tpl = dom.borrow_mut().create_fragment();
            let (dom, event_loop, options) = (dom.clone(), event_loop.clone(), options());
            point.mount_with(tpl, move |cd, fragment| {
                let host = dom.borrow_mut().create_element("div");
                let child = ctor(&dom, &event_loop, host, options);
                let nodes = dom.borrow().children(host).to_vec();
                for node in nodes {
                    dom.borrow_mut().append_child(fragment, node);
                }
                let instance = child.clone();
                cd.on_destroy(move || instance.cd.destroy());
            });
            debug_assert!(point.is_mounted());
        },
        Default::default(),
    );
}
