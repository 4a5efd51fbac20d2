//! Process-wide runtime state: batch depth, the pending-observer set, the
//! named-cell debug directory, and the diagnostic log. Held behind
//! `thread_local!`s, mirroring the teacher's `RUNTIME`/`EFFECTS`/
//! `EVENT_REGISTRY` pattern — Rust's test harness already runs each `#[test]`
//! on its own OS thread, so this gives tests the isolation a parameterized
//! instance would otherwise need to provide explicitly.

use std::cell::{Cell as StdCell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Weak;

use crate::error::{CellError, UsageError};
use crate::id::NodeId;

/// Implemented by observers; the pending set holds these rather than the
/// bare `Subscriber` trait because flushing needs to *run* the observer, not
/// just mark it dirty.
pub trait ScheduledObserver {
    fn node_id(&self) -> NodeId;
    fn run_scheduled(&self, causes: &[NodeId]);
}

/// Implemented by sources, computed cells, and containers so the debug
/// registry and devtools bridge can read a value without knowing its type.
pub trait DebugValue {
    fn debug_repr(&self) -> String;
}

struct PendingEntry {
    observer: std::rc::Rc<dyn ScheduledObserver>,
    causes: Vec<NodeId>,
}

#[derive(Default)]
struct PendingSet {
    order: VecDeque<NodeId>,
    entries: HashMap<NodeId, PendingEntry>,
}

impl PendingSet {
    fn enqueue(&mut self, observer: std::rc::Rc<dyn ScheduledObserver>, cause: NodeId) {
        let id = observer.node_id();
        match self.entries.get_mut(&id) {
            Some(entry) => {
                if !entry.causes.contains(&cause) {
                    entry.causes.push(cause);
                }
            }
            None => {
                self.order.push_back(id);
                self.entries.insert(id, PendingEntry { observer, causes: vec![cause] });
            }
        }
    }

    fn pop_front(&mut self) -> Option<(std::rc::Rc<dyn ScheduledObserver>, Vec<NodeId>)> {
        while let Some(id) = self.order.pop_front() {
            if let Some(entry) = self.entries.remove(&id) {
                return Some((entry.observer, entry.causes));
            }
        }
        None
    }
}

#[derive(Default)]
struct Registry {
    cells: HashMap<String, (NodeId, Weak<dyn DebugValue>)>,
    observers: HashMap<String, NodeId>,
    actions: HashSet<String>,
}

#[derive(Default)]
struct Diagnostics {
    log: Vec<CellError>,
}

thread_local! {
    static BATCH_DEPTH: StdCell<u32> = const { StdCell::new(0) };
    static PENDING: RefCell<PendingSet> = RefCell::new(PendingSet::default());
    static REGISTRY: RefCell<Registry> = RefCell::new(Registry::default());
    static DIAGNOSTICS: RefCell<Diagnostics> = RefCell::new(Diagnostics::default());
}

/// True while a `batch` scope is active on this thread.
pub fn is_batching() -> bool {
    BATCH_DEPTH.with(|d| d.get() > 0)
}

/// Schedule `observer` to run once the outermost batch (if any) closes, or
/// immediately if no batch is active. Duplicate enqueues for the same
/// observer within one pending window collapse into a single run whose
/// `causes` list accumulates every cell that triggered it.
pub fn enqueue(observer: std::rc::Rc<dyn ScheduledObserver>, cause: NodeId) {
    PENDING.with(|p| p.borrow_mut().enqueue(observer, cause));
    if !is_batching() {
        flush();
    }
}

/// Drain the pending-observer set, running each entry at most once per
/// drain pass. Writes performed while running an entry may enqueue more
/// work; the loop continues until the set is empty.
pub fn flush() {
    loop {
        let next = PENDING.with(|p| p.borrow_mut().pop_front());
        match next {
            Some((observer, causes)) => observer.run_scheduled(&causes),
            None => break,
        }
    }
}

/// Run `f` inside a batch scope. Nested calls collapse: only the outermost
/// call's completion triggers a flush.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    BATCH_DEPTH.with(|d| d.set(d.get() + 1));
    let result = f();
    let depth = BATCH_DEPTH.with(|d| {
        let next = d.get() - 1;
        d.set(next);
        next
    });
    if depth == 0 {
        flush();
    }
    result
}

/// Register a named cell in the debug directory. Duplicate names are a
/// `UsageError` (logged) but do not prevent registration — the newer cell
/// simply overwrites the directory entry, matching the "downgrade to
/// overwrite in dev" allowance in §6.
pub fn register_cell(name: &str, id: NodeId, value: Weak<dyn DebugValue>) {
    REGISTRY.with(|r| {
        let mut r = r.borrow_mut();
        if r.cells.contains_key(name) {
            record_usage_error(UsageError::DuplicateName(name.to_string()));
        }
        r.cells.insert(name.to_string(), (id, value));
    });
}

pub fn register_observer_name(name: &str, id: NodeId) {
    REGISTRY.with(|r| {
        let mut r = r.borrow_mut();
        if r.observers.contains_key(name) {
            record_usage_error(UsageError::DuplicateName(name.to_string()));
        }
        r.observers.insert(name.to_string(), id);
    });
}

pub fn register_action_name(name: &str) {
    REGISTRY.with(|r| {
        let mut r = r.borrow_mut();
        if r.actions.contains(name) {
            record_usage_error(UsageError::DuplicateName(name.to_string()));
        }
        r.actions.insert(name.to_string());
    });
}

/// Snapshot of every currently-registered, still-alive named cell.
pub fn registered_cells() -> Vec<(String, String)> {
    REGISTRY.with(|r| {
        r.borrow()
            .cells
            .iter()
            .filter_map(|(name, (_, weak))| weak.upgrade().map(|v| (name.clone(), v.debug_repr())))
            .collect()
    })
}

pub fn registered_observer_names() -> Vec<String> {
    REGISTRY.with(|r| r.borrow().observers.keys().cloned().collect())
}

pub fn registered_action_names() -> Vec<String> {
    REGISTRY.with(|r| r.borrow().actions.iter().cloned().collect())
}

/// Log a usage error through `tracing` and append it to this thread's
/// diagnostic log (drained by [`take_cell_errors`], mainly for tests).
pub fn record_usage_error(err: UsageError) {
    tracing::warn!(target: "cellkit_core::usage", "{err}");
    DIAGNOSTICS.with(|d| d.borrow_mut().log.push(CellError::from(err)));
}

/// Log a body-panicked diagnostic through `tracing` and append it to this
/// thread's diagnostic log. Used by observers and computed cells when
/// `catch_unwind` recovers from a panicking body.
pub fn record_cell_error(err: CellError) {
    tracing::error!(target: "cellkit_core::engine", "{err}");
    DIAGNOSTICS.with(|d| d.borrow_mut().log.push(err));
}

/// Drain and return every cell error recorded on this thread so far.
pub fn take_cell_errors() -> Vec<CellError> {
    DIAGNOSTICS.with(|d| std::mem::take(&mut d.borrow_mut().log))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_batch_flushes_once_at_outermost_close() {
        use std::cell::Cell as C;
        use std::rc::Rc;

        struct CountingObserver(Rc<C<u32>>, NodeId);
        impl ScheduledObserver for CountingObserver {
            fn node_id(&self) -> NodeId {
                self.1
            }
            fn run_scheduled(&self, _causes: &[NodeId]) {
                self.0.set(self.0.get() + 1);
            }
        }

        let runs = Rc::new(C::new(0));
        let obs: std::rc::Rc<dyn ScheduledObserver> =
            std::rc::Rc::new(CountingObserver(runs.clone(), NodeId::next()));

        batch(|| {
            batch(|| {
                enqueue(obs.clone(), NodeId::next());
                enqueue(obs.clone(), NodeId::next());
            });
            assert_eq!(runs.get(), 0, "inner batch close must not flush");
        });

        assert_eq!(runs.get(), 1, "duplicate enqueues collapse to one run");
    }

    #[test]
    fn duplicate_cell_name_is_diagnosed_not_fatal() {
        struct V;
        impl DebugValue for V {
            fn debug_repr(&self) -> String {
                "v".into()
            }
        }
        let v: std::rc::Rc<dyn DebugValue> = std::rc::Rc::new(V);
        register_cell("dup-test-name", NodeId::next(), std::rc::Rc::downgrade(&v));
        register_cell("dup-test-name", NodeId::next(), std::rc::Rc::downgrade(&v));
        let errs = take_cell_errors();
        assert!(errs.iter().any(|e| matches!(e, CellError::Usage(UsageError::DuplicateName(n)) if n == "dup-test-name")));
    }
}
