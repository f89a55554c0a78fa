//! Block drivers: `$$eachBlock`, `$$ifBlock`, `$$awaitBlock`, `$$htmlBlock`.
//!
//! Every block mounts after an anchor node (a label comment), or for a
//! sole-child `each` directly inside its parent element.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use super::detector::{ChangeDetector, Comparator, WatchOptions};
use super::dom::{DomRef, NodeId};
use super::template::html_to_fragment;
use super::value::{IdentityKey, Settled, Value};

/// Installs bindings on a freshly cloned fragment.
pub type Build = Rc<dyn Fn(&ChangeDetector, NodeId)>;

/// Like `Build`, with the value the block exposes (resolved value, error).
pub type ValueBuild = Rc<dyn Fn(&ChangeDetector, NodeId, &Value)>;

/// Updates a live item with its new index and value.
pub type Rebind = Box<dyn Fn(usize, &Value)>;

/// Builds one list item; returns its rebind hook.
pub type ItemBuild = Rc<dyn Fn(&ChangeDetector, NodeId, usize, &Value) -> Rebind>;

pub type KeyFn = Rc<dyn Fn(&Value, usize) -> Value>;

#[derive(Clone)]
pub struct Branch {
    pub tpl: NodeId,
    pub build: Build,
}

#[derive(Clone)]
pub struct ValueBranch {
    pub tpl: NodeId,
    pub build: ValueBuild,
}

/// Where a block's nodes go.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Anchor {
    After(NodeId),
    Inside(NodeId),
}

impl Anchor {
    fn parent(&self, dom: &DomRef) -> Option<NodeId> {
        match *self {
            Anchor::After(label) => dom.borrow().parent(label),
            Anchor::Inside(el) => Some(el),
        }
    }

    fn start(&self) -> Option<NodeId> {
        match *self {
            Anchor::After(label) => Some(label),
            Anchor::Inside(_) => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SINGLE-BRANCH MOUNT POINT
// ═══════════════════════════════════════════════════════════════════════════════

struct Mounted {
    cd: ChangeDetector,
    range: Option<(NodeId, NodeId)>,
}

/// One child detector plus the node range it owns, mounted after a label.
pub(crate) struct MountPoint {
    owner: ChangeDetector,
    dom: DomRef,
    label: NodeId,
    mounted: RefCell<Option<Mounted>>,
}

impl MountPoint {
    pub(crate) fn new(owner: &ChangeDetector, dom: &DomRef, label: NodeId) -> Rc<Self> {
        Rc::new(MountPoint {
            owner: owner.clone(),
            dom: dom.clone(),
            label,
            mounted: RefCell::new(None),
        })
    }

    pub(crate) fn mount_with(&self, tpl: NodeId, build: impl FnOnce(&ChangeDetector, NodeId)) {
        let cd = self.owner.new_child();
        let fragment = self.dom.borrow_mut().clone_node(tpl, true);
        build(&cd, fragment);
        let mut dom = self.dom.borrow_mut();
        let range = dom.first_child(fragment).zip(dom.last_child(fragment));
        if let Some(parent) = dom.parent(self.label) {
            let next = dom.next_sibling(self.label);
            dom.insert_before(parent, fragment, next);
        }
        drop(dom);
        *self.mounted.borrow_mut() = Some(Mounted { cd, range });
    }

    pub(crate) fn mount(&self, branch: &Branch) {
        self.mount_with(branch.tpl, |cd, fragment| (branch.build)(cd, fragment));
    }

    pub(crate) fn unmount(&self) {
        let Some(mounted) = self.mounted.borrow_mut().take() else {
            return;
        };
        self.owner.remove_child(&mounted.cd);
        mounted.cd.destroy();
        if let Some((first, last)) = mounted.range {
            self.dom.borrow_mut().remove_range(first, last);
        }
    }

    pub(crate) fn is_mounted(&self) -> bool {
        self.mounted.borrow().is_some()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// IF
// ═══════════════════════════════════════════════════════════════════════════════

/// Nothing is mounted until the first digest evaluates `cond`.
pub fn if_block(
    cd: &ChangeDetector,
    dom: &DomRef,
    label: NodeId,
    cond: impl Fn() -> bool + 'static,
    main: Branch,
    alt: Option<Branch>,
) {
    let point = MountPoint::new(cd, dom, label);
    cd.watch(
        move || Value::Bool(cond()),
        move |value| {
            point.unmount();
            if value.truthy() {
                point.mount(&main);
            } else if let Some(alt) = &alt {
                point.mount(alt);
            }
        },
        WatchOptions::default(),
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// AWAIT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Default)]
pub struct AwaitParts {
    pub pending: Option<Branch>,
    pub then: Option<ValueBranch>,
    pub catch: Option<ValueBranch>,
}

/// `apply` runs after a settled promise mounts its branch.
pub fn await_block(
    cd: &ChangeDetector,
    dom: &DomRef,
    label: NodeId,
    get: impl Fn() -> Value + 'static,
    parts: AwaitParts,
    apply: impl Fn() + 'static,
) {
    let point = MountPoint::new(cd, dom, label);
    let parts = Rc::new(parts);
    let apply: Rc<dyn Fn()> = Rc::new(apply);
    let generation = Rc::new(Cell::new(0u64));

    cd.watch(
        get,
        move |value| {
            point.unmount();
            generation.set(generation.get() + 1);
            let current = generation.get();

            let Value::Promise(promise) = value else {
                settle(&point, &parts, Ok(value.clone()));
                return;
            };
            if let Some(pending) = &parts.pending {
                point.mount(pending);
            }
            let (point, parts, generation, apply) =
                (point.clone(), parts.clone(), generation.clone(), apply.clone());
            promise.then(move |result| {
                if generation.get() != current {
                    return;
                }
                point.unmount();
                settle(&point, &parts, result);
                apply();
            });
        },
        WatchOptions::default(),
    );
}

fn settle(point: &MountPoint, parts: &AwaitParts, result: Settled) {
    let (branch, value) = match result {
        Ok(value) => (&parts.then, value),
        Err(error) => (&parts.catch, error),
    };
    if let Some(branch) = branch {
        point.mount_with(branch.tpl, |cd, fragment| (branch.build)(cd, fragment, &value));
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTML
// ═══════════════════════════════════════════════════════════════════════════════

/// `{@html exp}`: replaces the nodes after `label` whenever the markup changes.
pub fn html_block(cd: &ChangeDetector, dom: &DomRef, label: NodeId, get: impl Fn() -> Value + 'static) {
    let dom = dom.clone();
    let last: Rc<Cell<Option<NodeId>>> = Rc::new(Cell::new(None));
    cd.watch_read_only(get, move |html| {
        let mut doc = dom.borrow_mut();
        if let Some(last) = last.take() {
            if let Some(first) = doc.next_sibling(label) {
                doc.remove_range(first, last);
            }
        }
        if !html.truthy() {
            return;
        }
        let fragment = html_to_fragment(&mut doc, &html.to_text());
        last.set(doc.last_child(fragment));
        if let Some(parent) = doc.parent(label) {
            let next = doc.next_sibling(label);
            doc.insert_before(parent, fragment, next);
        }
    });
}

// ═══════════════════════════════════════════════════════════════════════════════
// EACH
// ═══════════════════════════════════════════════════════════════════════════════

struct Item {
    cd: ChangeDetector,
    range: Option<(NodeId, NodeId)>,
    rebind: Rebind,
}

impl Item {
    fn single(&self) -> Option<NodeId> {
        self.range.filter(|(first, last)| first == last).map(|(n, _)| n)
    }
}

pub struct EachSpec {
    pub tpl: NodeId,
    pub build: ItemBuild,
    /// Item identity when absent.
    pub key: Option<KeyFn>,
}

/// `$$eachBlock`: keyed reconciliation of a list against live items.
pub fn each_block(
    cd: &ChangeDetector,
    dom: &DomRef,
    anchor: Anchor,
    get: impl Fn() -> Value + 'static,
    spec: EachSpec,
) {
    let owner = cd.clone();
    let dom = dom.clone();
    let live: RefCell<Vec<(IdentityKey, Item)>> = RefCell::new(Vec::new());

    cd.watch(
        get,
        move |array| {
            let Some(parent) = anchor.parent(&dom) else {
                return;
            };
            let items = array.as_array().unwrap_or(&[]);
            let keys: Vec<IdentityKey> = items
                .iter()
                .enumerate()
                .map(|(i, item)| match &spec.key {
                    Some(key) => key(item, i).identity_key(),
                    None => item.identity_key(),
                })
                .collect();

            let old = std::mem::take(&mut *live.borrow_mut());
            let wanted: HashSet<&IdentityKey> = keys.iter().collect();
            let mut reusable: HashMap<IdentityKey, Item> = HashMap::new();
            for (key, item) in old {
                if wanted.contains(&key) && !reusable.contains_key(&key) {
                    reusable.insert(key, item);
                } else {
                    drop_item(&owner, &dom, item);
                }
            }

            let singles: HashSet<NodeId> = reusable.values().filter_map(Item::single).collect();
            let mut prev = anchor.start();
            let mut next_live = Vec::with_capacity(items.len());

            for (i, (item, key)) in items.iter().zip(keys.iter()).enumerate() {
                let target = next_slot(&dom, parent, prev);
                let entry = match reusable.remove(key) {
                    Some(ctx) => {
                        if let Some((first, last)) = ctx.range {
                            if target != Some(first) {
                                let swap = ctx.single().is_some()
                                    && target.map_or(false, |t| singles.contains(&t))
                                    && next_is_reused(&dom, target, keys.get(i + 1), &reusable);
                                let mut doc = dom.borrow_mut();
                                match (swap, target) {
                                    (true, Some(t)) => doc.replace_child(parent, first, t),
                                    _ => {
                                        for node in doc.range(first, last) {
                                            doc.insert_before(parent, node, target);
                                        }
                                    }
                                }
                            }
                        }
                        (ctx.rebind)(i, item);
                        ctx
                    }
                    None => {
                        let child = owner.new_child();
                        let fragment = dom.borrow_mut().clone_node(spec.tpl, true);
                        let rebind = (spec.build)(&child, fragment, i, item);
                        let mut doc = dom.borrow_mut();
                        let range = doc.first_child(fragment).zip(doc.last_child(fragment));
                        doc.insert_before(parent, fragment, target);
                        Item { cd: child, range, rebind }
                    }
                };
                if let Some((_, last)) = entry.range {
                    prev = Some(last);
                }
                next_live.push((key.clone(), entry));
            }

            // duplicate keys leave extra reusable items behind
            for (_, item) in reusable {
                drop_item(&owner, &dom, item);
            }
            *live.borrow_mut() = next_live;
        },
        WatchOptions::default().with_cmp(Comparator::ShallowArray),
    );
}

fn next_slot(dom: &DomRef, parent: NodeId, prev: Option<NodeId>) -> Option<NodeId> {
    let doc = dom.borrow();
    match prev {
        Some(p) => doc.next_sibling(p),
        None => doc.first_child(parent),
    }
}

/// True when the node after `target` starts the next item, which is a live one.
fn next_is_reused(
    dom: &DomRef,
    target: Option<NodeId>,
    next_key: Option<&IdentityKey>,
    reusable: &HashMap<IdentityKey, Item>,
) -> bool {
    let Some(next) = next_key.and_then(|k| reusable.get(k)) else {
        return false;
    };
    let after = target.and_then(|t| dom.borrow().next_sibling(t));
    after.is_some() && after == next.range.map(|(first, _)| first)
}

fn drop_item(owner: &ChangeDetector, dom: &DomRef, item: Item) {
    owner.remove_child(&item.cd);
    item.cd.destroy();
    if let Some((first, last)) = item.range {
        dom.borrow_mut().remove_range(first, last);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::detector::digest;
    use crate::runtime::dom::Document;
    use serde_json::json;

    fn host(dom: &DomRef) -> (NodeId, NodeId) {
        let mut doc = dom.borrow_mut();
        let ul = doc.create_element("ul");
        let label = doc.create_comment(" each ");
        doc.append_child(ul, label);
        (ul, label)
    }

    fn li_template(dom: &DomRef) -> NodeId {
        html_to_fragment(&mut dom.borrow_mut(), "<li> </li>")
    }

    struct Log {
        built: Rc<RefCell<Vec<String>>>,
        destroyed: Rc<RefCell<Vec<String>>>,
    }

    fn item_build(dom: &DomRef, log: &Log) -> ItemBuild {
        let dom = dom.clone();
        let built = log.built.clone();
        let destroyed = log.destroyed.clone();
        Rc::new(move |cd: &ChangeDetector, fragment: NodeId, _i: usize, item: &Value| -> Rebind {
            let id = item.get("id").to_text();
            built.borrow_mut().push(id.clone());
            let d = destroyed.clone();
            cd.on_destroy(move || d.borrow_mut().push(id));
            let li = dom.borrow().first_child(fragment).unwrap();
            let text = dom.borrow().first_child(li).unwrap();
            let current = Rc::new(RefCell::new(item.clone()));
            let (c, dom) = (current.clone(), dom.clone());
            cd.watch_read_only(
                move || c.borrow().get("id"),
                move |v| dom.borrow_mut().set_text_content(text, &v.to_text()),
            );
            Box::new(move |_i, item| *current.borrow_mut() = item.clone())
        })
    }

    #[test]
    fn test_each_keyed_reuse() {
        let dom = Document::shared();
        let (ul, label) = host(&dom);
        let cd = ChangeDetector::new();
        let log = Log {
            built: Rc::default(),
            destroyed: Rc::default(),
        };
        let list = Rc::new(RefCell::new(Value::from(json!([{"id": 1}, {"id": 2}]))));
        let l = list.clone();
        each_block(
            &cd,
            &dom,
            Anchor::After(label),
            move || l.borrow().clone(),
            EachSpec {
                tpl: li_template(&dom),
                build: item_build(&dom, &log),
                key: Some(Rc::new(|item: &Value, _| item.get("id"))),
            },
        );
        digest(&cd, || {});
        assert_eq!(dom.borrow().text_content(ul), "12");
        let second = dom.borrow().children(ul)[2];

        *list.borrow_mut() = Value::from(json!([{"id": 2}, {"id": 3}]));
        digest(&cd, || {});
        assert_eq!(dom.borrow().text_content(ul), "23");
        assert_eq!(dom.borrow().children(ul)[1], second);
        assert_eq!(*log.built.borrow(), ["1", "2", "3"]);
        assert_eq!(*log.destroyed.borrow(), ["1"]);
        assert_eq!(cd.children_len(), 2);
    }

    #[test]
    fn test_each_reorders() {
        let dom = Document::shared();
        let (ul, label) = host(&dom);
        let cd = ChangeDetector::new();
        let log = Log {
            built: Rc::default(),
            destroyed: Rc::default(),
        };
        let list = Rc::new(RefCell::new(Value::from(json!([{"id": 1}, {"id": 2}, {"id": 3}, {"id": 4}]))));
        let l = list.clone();
        each_block(
            &cd,
            &dom,
            Anchor::After(label),
            move || l.borrow().clone(),
            EachSpec {
                tpl: li_template(&dom),
                build: item_build(&dom, &log),
                key: Some(Rc::new(|item: &Value, _| item.get("id"))),
            },
        );
        digest(&cd, || {});

        for order in [json!([2, 1, 3, 4]), json!([4, 3, 2, 1]), json!([1, 4, 2]), json!([])] {
            let ids = order.as_array().unwrap().iter().map(|id| json!({"id": id})).collect();
            *list.borrow_mut() = Value::from(serde_json::Value::Array(ids));
            digest(&cd, || {});
            let expected: String = order.as_array().unwrap().iter().map(|v| v.to_string()).collect();
            assert_eq!(dom.borrow().text_content(ul), expected);
        }
        assert_eq!(log.built.borrow().len(), 4);
        assert_eq!(dom.borrow().children(ul), &[label]);
    }

    #[test]
    fn test_each_inside_parent_without_key() {
        let dom = Document::shared();
        let ul = dom.borrow_mut().create_element("ul");
        let cd = ChangeDetector::new();
        let a = Value::object([("id", Value::from("a"))]);
        let b = Value::object([("id", Value::from("b"))]);
        let list = Rc::new(RefCell::new(Value::array(vec![a.clone(), b.clone()])));
        let log = Log {
            built: Rc::default(),
            destroyed: Rc::default(),
        };
        let l = list.clone();
        each_block(
            &cd,
            &dom,
            Anchor::Inside(ul),
            move || l.borrow().clone(),
            EachSpec {
                tpl: li_template(&dom),
                build: item_build(&dom, &log),
                key: None,
            },
        );
        digest(&cd, || {});
        *list.borrow_mut() = Value::array(vec![b, a]);
        digest(&cd, || {});
        assert_eq!(dom.borrow().text_content(ul), "ba");
        assert_eq!(log.built.borrow().len(), 2);
    }

    fn branch(dom: &DomRef, html: &str) -> Branch {
        Branch {
            tpl: html_to_fragment(&mut dom.borrow_mut(), html),
            build: Rc::new(|_, _| {}),
        }
    }

    #[test]
    fn test_if_block_switches_branches() {
        let dom = Document::shared();
        let div = dom.borrow_mut().create_element("div");
        let label = dom.borrow_mut().create_comment(" if ");
        dom.borrow_mut().append_child(div, label);
        let cd = ChangeDetector::new();
        let show = Rc::new(Cell::new(false));
        let s = show.clone();
        if_block(
            &cd,
            &dom,
            label,
            move || s.get(),
            branch(&dom, "<b>yes</b>"),
            Some(branch(&dom, "<i>no</i>")),
        );
        assert_eq!(dom.borrow().children(div).len(), 1);
        digest(&cd, || {});
        assert_eq!(dom.borrow().inner_html(div), "<!-- if --><i>no</i>");
        show.set(true);
        digest(&cd, || {});
        assert_eq!(dom.borrow().inner_html(div), "<!-- if --><b>yes</b>");
        assert_eq!(cd.children_len(), 1);
    }

    #[test]
    fn test_await_block() {
        let dom = Document::shared();
        let div = dom.borrow_mut().create_element("div");
        let label = dom.borrow_mut().create_comment("");
        dom.borrow_mut().append_child(div, label);
        let cd = ChangeDetector::new();
        let promise = crate::runtime::value::Promise::new();
        let current = Rc::new(RefCell::new(Value::Promise(promise.clone())));
        let applied = Rc::new(Cell::new(0));

        let then_dom = dom.clone();
        let parts = AwaitParts {
            pending: Some(branch(&dom, "<i>loading</i>")),
            then: Some(ValueBranch {
                tpl: html_to_fragment(&mut dom.borrow_mut(), "<b> </b>"),
                build: Rc::new(move |_, fragment, value| {
                    let mut doc = then_dom.borrow_mut();
                    let b = doc.first_child(fragment).unwrap();
                    doc.set_text_content(b, &value.to_text());
                }),
            }),
            catch: None,
        };
        let (c, a) = (current.clone(), applied.clone());
        await_block(&cd, &dom, label, move || c.borrow().clone(), parts, move || a.set(a.get() + 1));

        digest(&cd, || {});
        assert_eq!(dom.borrow().text_content(div), "loading");
        promise.resolve("ready".into());
        assert_eq!(dom.borrow().inner_html(div), "<!----><b>ready</b>");
        assert_eq!(applied.get(), 1);

        let stale = crate::runtime::value::Promise::new();
        *current.borrow_mut() = Value::Promise(stale.clone());
        digest(&cd, || {});
        *current.borrow_mut() = Value::from("plain");
        digest(&cd, || {});
        stale.reject("late".into());
        assert_eq!(dom.borrow().text_content(div), "plain");
        assert_eq!(applied.get(), 1);
    }

    #[test]
    fn test_html_block() {
        let dom = Document::shared();
        let div = dom.borrow_mut().create_element("div");
        let label = dom.borrow_mut().create_comment("");
        let tail = dom.borrow_mut().create_text("!");
        dom.borrow_mut().append_child(div, label);
        dom.borrow_mut().append_child(div, tail);
        let cd = ChangeDetector::new();
        let html = Rc::new(RefCell::new(Value::from("<b>1</b><i>2</i>")));
        let h = html.clone();
        html_block(&cd, &dom, label, move || h.borrow().clone());
        digest(&cd, || {});
        assert_eq!(dom.borrow().inner_html(div), "<!----><b>1</b><i>2</i>!");
        *html.borrow_mut() = Value::from("<u>3</u>");
        digest(&cd, || {});
        assert_eq!(dom.borrow().inner_html(div), "<!----><u>3</u>!");
        *html.borrow_mut() = Value::Null;
        digest(&cd, || {});
        assert_eq!(dom.borrow().inner_html(div), "<!---->!");
    }
}
