//! Change detectors and the digest loop.
//!
//! A detector owns watchers and child detectors. `digest` walks the tree
//! breadth-first, re-evaluating every watcher until a pass reports no
//! changes or the iteration cap is reached.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use super::value::{compare_array, compare_deep, Value};

pub const MAX_DIGEST_LOOPS: usize = 10;
pub const DEFAULT_DEEP_DEPTH: i32 = 10;

pub type Getter = Rc<dyn Fn() -> Value>;
pub type Callback = Rc<dyn Fn(&Value)>;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Comparator {
    #[default]
    Identity,
    ShallowArray,
    Deep(i32),
}

impl Comparator {
    pub fn deep() -> Self {
        Comparator::Deep(DEFAULT_DEEP_DEPTH)
    }

    /// Called only when `prev` and `next` are not identical.
    fn changed(&self, prev: &Value, next: &Value) -> bool {
        match self {
            Comparator::Identity => true,
            Comparator::ShallowArray => compare_array(prev, next),
            Comparator::Deep(depth) => compare_deep(prev, next, *depth),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct WatchOptions {
    pub read_only: bool,
    pub cmp: Comparator,
    /// Initial cached value; a first evaluation equal to it does not fire.
    pub value: Option<Value>,
}

impl WatchOptions {
    pub fn read_only() -> Self {
        WatchOptions {
            read_only: true,
            ..Default::default()
        }
    }

    pub fn with_cmp(mut self, cmp: Comparator) -> Self {
        self.cmp = cmp;
        self
    }
}

struct Watcher {
    get: Getter,
    cb: Callback,
    read_only: bool,
    cmp: Comparator,
    value: RefCell<Value>,
}

impl Watcher {
    /// Returns the number of counted changes (0 or 1).
    fn check(&self) -> usize {
        let next = (self.get)();
        let changed = {
            let prev = self.value.borrow();
            !prev.same(&next) && self.cmp.changed(&prev, &next)
        };
        if !changed {
            return 0;
        }
        *self.value.borrow_mut() = next.clone();
        (self.cb)(&next);
        usize::from(!self.read_only)
    }
}

/// Handle to a registered watcher.
#[derive(Clone)]
pub struct WatchHandle(Rc<Watcher>);

impl WatchHandle {
    pub fn value(&self) -> Value {
        self.0.value.borrow().clone()
    }
}

type Task = Box<dyn FnOnce()>;

struct Inner {
    root: Weak<Inner>,
    children: RefCell<Vec<ChangeDetector>>,
    watchers: RefCell<Vec<Rc<Watcher>>>,
    prefix: RefCell<Vec<Rc<dyn Fn()>>>,
    destroy_list: RefCell<Vec<Task>>,
    once_list: RefCell<Vec<Task>>,
    destroyed: Cell<bool>,
}

impl Inner {
    fn new(root: Weak<Inner>) -> Self {
        Inner {
            root,
            children: RefCell::default(),
            watchers: RefCell::default(),
            prefix: RefCell::default(),
            destroy_list: RefCell::default(),
            once_list: RefCell::default(),
            destroyed: Cell::new(false),
        }
    }
}

#[derive(Clone)]
pub struct ChangeDetector(Rc<Inner>);

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeDetector {
    /// A new root detector.
    pub fn new() -> Self {
        ChangeDetector(Rc::new_cyclic(|me| Inner::new(me.clone())))
    }

    pub fn new_child(&self) -> ChangeDetector {
        let child = ChangeDetector(Rc::new(Inner::new(self.0.root.clone())));
        self.0.children.borrow_mut().push(child.clone());
        child
    }

    pub fn remove_child(&self, child: &ChangeDetector) {
        self.0
            .children
            .borrow_mut()
            .retain(|c| !Rc::ptr_eq(&c.0, &child.0));
    }

    pub fn children_len(&self) -> usize {
        self.0.children.borrow().len()
    }

    pub fn watchers_len(&self) -> usize {
        self.0.watchers.borrow().len()
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.get()
    }

    pub fn ptr_eq(&self, other: &ChangeDetector) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn watch(
        &self,
        get: impl Fn() -> Value + 'static,
        cb: impl Fn(&Value) + 'static,
        options: WatchOptions,
    ) -> WatchHandle {
        let watcher = Rc::new(Watcher {
            get: Rc::new(get),
            cb: Rc::new(cb),
            read_only: options.read_only,
            cmp: options.cmp,
            value: RefCell::new(options.value.unwrap_or_default()),
        });
        self.0.watchers.borrow_mut().push(watcher.clone());
        WatchHandle(watcher)
    }

    pub fn watch_read_only(
        &self,
        get: impl Fn() -> Value + 'static,
        cb: impl Fn(&Value) + 'static,
    ) -> WatchHandle {
        self.watch(get, cb, WatchOptions::read_only())
    }

    /// Runs before this detector's watchers on every pass.
    pub fn prefix(&self, f: impl Fn() + 'static) {
        self.0.prefix.borrow_mut().push(Rc::new(f));
    }

    pub fn on_destroy(&self, f: impl FnOnce() + 'static) {
        self.0.destroy_list.borrow_mut().push(Box::new(f));
    }

    /// Queues `f` on the root; it runs after the next digest settles.
    pub fn once(&self, f: impl FnOnce() + 'static) {
        if let Some(root) = self.0.root.upgrade() {
            root.once_list.borrow_mut().push(Box::new(f));
        }
    }

    pub fn destroy(&self) {
        self.0.destroyed.set(true);
        self.0.watchers.borrow_mut().clear();
        self.0.prefix.borrow_mut().clear();
        let destroy_list = std::mem::take(&mut *self.0.destroy_list.borrow_mut());
        run_guarded(destroy_list, "destroy callback failed");
        let children = std::mem::take(&mut *self.0.children.borrow_mut());
        for child in children {
            child.destroy();
        }
    }
}

fn run_guarded(tasks: Vec<Task>, message: &str) {
    for task in tasks {
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::error!(target: "malina::runtime", "{}", message);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIGEST
// ═══════════════════════════════════════════════════════════════════════════════

/// Where the last counted change of a digest happened.
#[derive(Clone, Debug)]
pub struct WatcherLocation {
    /// Breadth-first position of the detector within its pass, root is 0.
    pub detector: usize,
    /// Registration index of the watcher within its detector.
    pub watcher: usize,
    pub value: Value,
}

#[derive(Clone, Debug)]
pub struct DigestReport {
    pub passes: usize,
    pub converged: bool,
    pub last_changed: Option<WatcherLocation>,
}

/// Runs watchers until stable; returns the number of passes made.
///
/// `on_finish` runs after the loop, before the root's `once` queue.
pub fn digest(root: &ChangeDetector, on_finish: impl FnOnce()) -> usize {
    digest_report(root, on_finish).passes
}

/// [`digest`], reporting convergence and the last counted change.
pub fn digest_report(root: &ChangeDetector, on_finish: impl FnOnce()) -> DigestReport {
    let mut passes = 0;
    let mut converged = false;
    let mut watchers_seen = 0;
    let mut last_changed = None;

    while passes < MAX_DIGEST_LOOPS {
        passes += 1;
        let mut changes = 0;
        let mut queue = VecDeque::from([root.clone()]);
        let mut position = 0;

        while let Some(cd) = queue.pop_front() {
            let prefix: Vec<_> = cd.0.prefix.borrow().clone();
            for f in prefix {
                f();
            }
            let mut i = 0;
            loop {
                let next = cd.0.watchers.borrow().get(i).cloned();
                let Some(w) = next else { break };
                i += 1;
                watchers_seen += 1;
                if w.check() > 0 {
                    changes += 1;
                    last_changed = Some(WatcherLocation {
                        detector: position,
                        watcher: i - 1,
                        value: w.value.borrow().clone(),
                    });
                }
            }
            queue.extend(cd.0.children.borrow().iter().cloned());
            position += 1;
        }

        if changes == 0 {
            converged = true;
            break;
        }
    }

    on_finish();
    let once = std::mem::take(&mut *root.0.once_list.borrow_mut());
    run_guarded(once, "once callback failed");

    if !converged {
        match &last_changed {
            Some(at) => tracing::error!(
                target: "malina::runtime",
                passes,
                watchers_seen,
                detector = at.detector,
                watcher = at.watcher,
                value = ?at.value,
                "Infinity changes"
            ),
            None => tracing::error!(target: "malina::runtime", passes, watchers_seen, "Infinity changes"),
        }
    }
    DigestReport {
        passes,
        converged,
        last_changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(v: i32) -> Rc<Cell<i32>> {
        Rc::new(Cell::new(v))
    }

    #[test]
    fn test_watch_fires_on_change_only() {
        let cd = ChangeDetector::new();
        let src = cell(1);
        let hits = cell(0);
        let (s, h) = (src.clone(), hits.clone());
        cd.watch(move || s.get().into(), move |_| h.set(h.get() + 1), WatchOptions::default());

        assert_eq!(digest(&cd, || {}), 2);
        assert_eq!(hits.get(), 1);
        assert_eq!(digest(&cd, || {}), 1);
        assert_eq!(hits.get(), 1);
        src.set(2);
        digest(&cd, || {});
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn test_cascade_and_breadth_first_order() {
        let root = ChangeDetector::new();
        let child = root.new_child();
        let order = Rc::new(RefCell::new(Vec::new()));
        let a = cell(0);
        let b = cell(0);

        let (o, bb) = (order.clone(), b.clone());
        child.watch(
            move || bb.get().into(),
            move |v| o.borrow_mut().push(format!("child {}", v.to_text())),
            WatchOptions::default(),
        );
        let (o, aa, a2, bb) = (order.clone(), a.clone(), a.clone(), b.clone());
        root.watch(
            move || a2.get().into(),
            move |v| {
                o.borrow_mut().push(format!("root {}", v.to_text()));
                bb.set(aa.get() * 10);
            },
            WatchOptions::default(),
        );

        digest(&root, || {});
        a.set(2);
        digest(&root, || {});
        assert_eq!(*order.borrow(), ["root 0", "child 0", "root 2", "child 20"]);
    }

    #[test]
    fn test_read_only_does_not_loop() {
        let cd = ChangeDetector::new();
        let n = cell(0);
        let nn = n.clone();
        cd.watch_read_only(move || nn.get().into(), |_| {});
        n.set(5);
        assert_eq!(digest(&cd, || {}), 1);
    }

    #[test]
    fn test_idempotent_at_fixpoint() {
        let cd = ChangeDetector::new();
        let n = cell(3);
        let nn = n.clone();
        cd.watch(move || nn.get().into(), |_| {}, WatchOptions::default());
        digest(&cd, || {});
        assert_eq!(digest(&cd, || {}), 1);
        assert_eq!(digest(&cd, || {}), 1);
    }

    #[test]
    fn test_iteration_cap() {
        let cd = ChangeDetector::new();
        let n = cell(0);
        let (a, b) = (n.clone(), n.clone());
        cd.watch(move || a.get().into(), move |_| b.set(b.get() + 1), WatchOptions::default());
        assert_eq!(digest(&cd, || {}), MAX_DIGEST_LOOPS);
        assert_eq!(n.get(), MAX_DIGEST_LOOPS as i32);
    }

    #[test]
    fn test_unstable_watcher_reported() {
        let root = ChangeDetector::new();
        let child = root.new_child();
        let stable = cell(1);
        let s = stable.clone();
        child.watch(move || s.get().into(), |_| {}, WatchOptions::default());
        let n = cell(0);
        let (a, b) = (n.clone(), n.clone());
        child.watch(move || a.get().into(), move |_| b.set(b.get() + 1), WatchOptions::default());

        let report = digest_report(&root, || {});
        assert!(!report.converged);
        assert_eq!(report.passes, MAX_DIGEST_LOOPS);
        let at = report.last_changed.unwrap();
        assert_eq!((at.detector, at.watcher), (1, 1));
        assert_eq!(at.value.as_f64(), Some(9.0));

        let calm = ChangeDetector::new();
        let report = digest_report(&calm, || {});
        assert!(report.converged);
        assert!(report.last_changed.is_none());
    }

    #[test]
    fn test_deep_comparator() {
        let cd = ChangeDetector::new();
        let current = Rc::new(RefCell::new(Value::from(serde_json::json!({"a": [1, 2]}))));
        let hits = cell(0);
        let (c, h) = (current.clone(), hits.clone());
        cd.watch(
            move || c.borrow().clone(),
            move |_| h.set(h.get() + 1),
            WatchOptions::default().with_cmp(Comparator::deep()),
        );
        digest(&cd, || {});
        *current.borrow_mut() = Value::from(serde_json::json!({"a": [1, 2]}));
        digest(&cd, || {});
        assert_eq!(hits.get(), 1);
        *current.borrow_mut() = Value::from(serde_json::json!({"a": [1, 3]}));
        digest(&cd, || {});
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn test_shallow_array_comparator() {
        let cd = ChangeDetector::new();
        let item: Value = "x".into();
        let current = Rc::new(RefCell::new(Value::array(vec![item.clone()])));
        let hits = cell(0);
        let (c, h) = (current.clone(), hits.clone());
        cd.watch(
            move || c.borrow().clone(),
            move |_| h.set(h.get() + 1),
            WatchOptions::default().with_cmp(Comparator::ShallowArray),
        );
        digest(&cd, || {});
        *current.borrow_mut() = Value::array(vec![item.clone()]);
        digest(&cd, || {});
        assert_eq!(hits.get(), 1);
        *current.borrow_mut() = Value::array(vec![item.clone(), item]);
        digest(&cd, || {});
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn test_destroy_and_once() {
        let root = ChangeDetector::new();
        let child = root.new_child();
        let grandchild = child.new_child();
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = log.clone();
        child.on_destroy(move || l.borrow_mut().push("child"));
        child.on_destroy(|| panic!("broken destroy callback"));
        let l = log.clone();
        grandchild.on_destroy(move || l.borrow_mut().push("grandchild"));

        child.destroy();
        child.destroy();
        root.remove_child(&child);
        assert_eq!(*log.borrow(), ["child", "grandchild"]);
        assert_eq!(root.children_len(), 0);
        assert!(grandchild.is_destroyed());

        let l = log.clone();
        grandchild.once(move || l.borrow_mut().push("once"));
        root.once(|| panic!("broken once callback"));
        let l = log.clone();
        root.once(move || l.borrow_mut().push("once 2"));
        let l = log.clone();
        digest(&root, move || l.borrow_mut().push("finish"));
        assert_eq!(*log.borrow(), ["child", "grandchild", "finish", "once", "once 2"]);
    }

    #[test]
    fn test_prefix_runs_before_watchers() {
        let cd = ChangeDetector::new();
        let arg = cell(0);
        let local = cell(0);
        let (a, l) = (arg.clone(), local.clone());
        cd.prefix(move || l.set(a.get()));
        let seen = cell(-1);
        let (l, s) = (local.clone(), seen.clone());
        cd.watch(move || l.get().into(), move |v| s.set(v.as_f64().unwrap_or(-1.0) as i32), WatchOptions::default());
        arg.set(7);
        digest(&cd, || {});
        assert_eq!(seen.get(), 7);
    }
}
