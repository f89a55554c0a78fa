//! Microtask queue and the coalescing apply trigger.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use super::detector::{digest, ChangeDetector};

type Task = Box<dyn FnOnce()>;

/// Explicit stand-in for the host's microtask queue.
#[derive(Clone, Default)]
pub struct EventLoop(Rc<RefCell<VecDeque<Task>>>);

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_microtask(&self, task: impl FnOnce() + 'static) {
        self.0.borrow_mut().push_back(Box::new(task));
    }

    pub fn pending(&self) -> usize {
        self.0.borrow().len()
    }

    /// Runs queued tasks, including ones queued meanwhile; returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.0.borrow_mut().pop_front();
            let Some(task) = task else { break };
            task();
            ran += 1;
        }
        ran
    }
}

struct SchedulerState {
    root: ChangeDetector,
    event_loop: EventLoop,
    planned: Cell<bool>,
    running: Cell<bool>,
    digests: Cell<usize>,
}

/// `$$apply`: schedules one digest on the next tick.
#[derive(Clone)]
pub struct ApplyScheduler(Rc<SchedulerState>);

impl ApplyScheduler {
    pub fn new(root: &ChangeDetector, event_loop: &EventLoop) -> Self {
        ApplyScheduler(Rc::new(SchedulerState {
            root: root.clone(),
            event_loop: event_loop.clone(),
            planned: Cell::new(false),
            running: Cell::new(false),
            digests: Cell::new(0),
        }))
    }

    pub fn apply(&self) {
        if self.0.running.get() || self.0.planned.get() {
            return;
        }
        self.0.planned.set(true);
        let me = self.clone();
        self.0.event_loop.queue_microtask(move || {
            me.0.planned.set(false);
            me.run();
        });
    }

    /// Digests immediately. Calls to `apply` from `once` callbacks schedule a new pass.
    pub fn run(&self) -> usize {
        self.0.running.set(true);
        let state = &self.0;
        let passes = digest(&state.root, || state.running.set(false));
        state.running.set(false);
        state.digests.set(state.digests.get() + 1);
        passes
    }

    pub fn is_running(&self) -> bool {
        self.0.running.get()
    }

    pub fn digests(&self) -> usize {
        self.0.digests.get()
    }

    pub fn root(&self) -> &ChangeDetector {
        &self.0.root
    }
}
