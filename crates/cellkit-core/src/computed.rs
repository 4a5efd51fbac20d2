//! Computed cells — lazy, memoized functions of other cells (§4.3).

use std::cell::{Cell as StdCell, RefCell};
use std::rc::{Rc, Weak};

use crate::cell::{Cell, DepEdge, Subscriber};
use crate::error::{CellError, UsageError};
use crate::id::NodeId;
use crate::runtime::DebugValue;
use crate::tracking::{self, FrameKind};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
    Clean,
    Dirty,
    Computing,
}

/// Per-cell opt-in to the §9 open question on change detection. Default is
/// "always notify on dirty recompute"; setting `suppress_unchanged` makes a
/// specific computed cell compare its new result against the prior one
/// (`T: PartialEq`) and skip notifying downstream when they're equal.
#[derive(Clone, Copy, Debug, Default)]
pub struct ComputedOptions {
    pub suppress_unchanged: bool,
}

/// A lazily-evaluated, memoized cell defined as a pure function of other
/// cells. Recomputes at most once between consecutive reads regardless of
/// how many times its upstreams changed in between.
pub struct Computed<T> {
    inner: Rc<ComputedInner<T>>,
}

pub(crate) struct ComputedInner<T> {
    id: NodeId,
    name: Option<String>,
    state: StdCell<State>,
    value: RefCell<Option<T>>,
    compute: RefCell<Box<dyn FnMut() -> T>>,
    deps: RefCell<Vec<DepEdge>>,
    subscribers: RefCell<Vec<Weak<dyn Subscriber>>>,
    equality: Option<Box<dyn Fn(&T, &T) -> bool>>,
}

impl<T: 'static> Cell for ComputedInner<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    fn add_subscriber(&self, subscriber: Weak<dyn Subscriber>) {
        let mut subs = self.subscribers.borrow_mut();
        let id = match subscriber.upgrade() {
            Some(s) => s.node_id(),
            None => return,
        };
        if !subs.iter().any(|s| s.upgrade().is_some_and(|s| s.node_id() == id)) {
            subs.push(subscriber);
        }
    }
    fn remove_subscriber(&self, id: NodeId) {
        self.subscribers
            .borrow_mut()
            .retain(|s| s.upgrade().is_some_and(|s| s.node_id() != id));
    }
}

impl<T: 'static> Subscriber for ComputedInner<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    /// Invalidate and fan out. Guarded so that an already-`Dirty` cell
    /// absorbs further upstream notifications silently instead of
    /// re-walking its dependent subgraph on every one of them.
    fn notify(&self, _cause: NodeId) {
        if self.state.get() == State::Clean {
            self.state.set(State::Dirty);
            let subs: Vec<Rc<dyn Subscriber>> = {
                let mut subs = self.subscribers.borrow_mut();
                subs.retain(|s| s.upgrade().is_some());
                subs.iter().filter_map(|s| s.upgrade()).collect()
            };
            for sub in subs {
                sub.notify(self.id);
            }
        }
    }
}

impl<T: std::fmt::Debug> DebugValue for ComputedInner<T> {
    fn debug_repr(&self) -> String {
        match &*self.value.borrow() {
            Some(v) => format!("{v:?}"),
            None => "<dirty>".to_string(),
        }
    }
}

impl<T: Clone + 'static> Computed<T> {
    /// Create a computed cell. Always notifies its dependents on a dirty
    /// recompute (§9's default resolution); see [`Computed::new_with_options`]
    /// for the value-equality short-circuit.
    pub fn new(f: impl FnMut() -> T + 'static) -> Self {
        Self::build(None, f, None)
    }

    /// Create a computed cell registered under `name` in the debug
    /// directory.
    pub fn named(name: impl Into<String>, f: impl FnMut() -> T + 'static) -> Self
    where
        T: std::fmt::Debug,
    {
        let name = name.into();
        let cell = Self::build(Some(name.clone()), f, None);
        let debug: Rc<dyn DebugValue> = cell.inner.clone();
        crate::runtime::register_cell(&name, cell.inner.id, Rc::downgrade(&debug));
        cell
    }

    fn build(name: Option<String>, f: impl FnMut() -> T + 'static, equality: Option<Box<dyn Fn(&T, &T) -> bool>>) -> Self {
        Self {
            inner: Rc::new(ComputedInner {
                id: NodeId::next(),
                name,
                state: StdCell::new(State::Dirty),
                value: RefCell::new(None),
                compute: RefCell::new(Box::new(f)),
                deps: RefCell::new(Vec::new()),
                subscribers: RefCell::new(Vec::new()),
                equality,
            }),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.id
    }

    /// Add a raw notification listener, bypassing dependency tracking.
    /// Fires whenever this cell is invalidated (eagerly, on the upstream
    /// write that dirties it) — not only when something next reads it —
    /// but at most once per flush, debounced the same way a tracked
    /// observer is (see `crate::listener`). Used by external bindings (§6).
    pub fn subscribe_raw(&self, on_change: impl Fn() + 'static) -> crate::source::Unsubscribe {
        self.subscribe_raw_with(crate::listener::new(on_change))
    }

    /// Register an existing raw listener (from [`crate::raw_listener`]) on
    /// this cell. Registering the same listener on several cells gives them
    /// a shared debounced identity — see `crate::listener`.
    pub fn subscribe_raw_with(&self, listener: Rc<dyn Subscriber>) -> crate::source::Unsubscribe {
        self.inner.add_subscriber(Rc::downgrade(&listener));
        let weak_cell: Weak<dyn Cell> = Rc::downgrade(&self.inner);
        crate::source::Unsubscribe::new(weak_cell, listener.node_id(), listener)
    }

    /// Read the current value, recomputing if dirty. At most one body
    /// invocation happens between any two reads.
    pub fn read(&self) -> T {
        self.recompute_if_dirty();
        self.track();
        self.inner
            .value
            .borrow()
            .clone()
            .expect("computed has a value once recompute_if_dirty has run")
    }

    fn track(&self) {
        if tracking::current_reader().is_some() {
            let weak_cell: Weak<dyn Cell> = Rc::downgrade(&self.inner);
            tracking::record_read(self.inner.id, weak_cell);
        }
    }

    fn recompute_if_dirty(&self) {
        match self.inner.state.get() {
            State::Clean => return,
            State::Computing => {
                crate::runtime::record_usage_error(UsageError::CyclicComputed(self.inner.id));
                return;
            }
            State::Dirty => {}
        }

        self.inner.state.set(State::Computing);

        // If `compute` panics, this unwinds straight through the call below;
        // the guard's `Drop` runs during unwind and puts the cell back in
        // `Dirty` rather than leaving it stuck in `Computing` forever (which
        // would make every subsequent read misdiagnose itself as cyclic).
        struct ResetOnUnwind<'a> {
            state: &'a StdCell<State>,
        }
        impl<'a> Drop for ResetOnUnwind<'a> {
            fn drop(&mut self) {
                if self.state.get() == State::Computing {
                    self.state.set(State::Dirty);
                }
            }
        }
        let _reset_guard = ResetOnUnwind { state: &self.inner.state };

        let (new_value, reads) = tracking::with_read_tracker(self.inner.id, FrameKind::Computed, || {
            (self.inner.compute.borrow_mut())()
        });

        self.resubscribe(reads);

        let suppress = match &self.inner.equality {
            Some(eq) => match &*self.inner.value.borrow() {
                Some(old) => eq(old, &new_value),
                None => false,
            },
            None => false,
        };

        *self.inner.value.borrow_mut() = Some(new_value);
        self.inner.state.set(State::Clean);

        if !suppress {
            let self_weak: Weak<dyn Subscriber> = Rc::downgrade(&self.inner);
            if let Some(subscriber) = self_weak.upgrade() {
                let subs: Vec<Rc<dyn Subscriber>> = {
                    let mut subs = self.inner.subscribers.borrow_mut();
                    subs.retain(|s| s.upgrade().is_some());
                    subs.iter().filter_map(|s| s.upgrade()).collect()
                };
                for sub in subs {
                    sub.notify(subscriber.node_id());
                }
            }
        }
    }

    /// Diff the freshly-collected read set against the previous one:
    /// unsubscribe from cells no longer read, subscribe to newly read ones.
    fn resubscribe(&self, reads: Vec<DepEdge>) {
        let old_deps = self.inner.deps.replace(Vec::new());
        let self_weak: Weak<dyn Subscriber> = Rc::downgrade(&self.inner);

        for old in &old_deps {
            if !reads.iter().any(|r| r.id == old.id) {
                if let Some(cell) = old.cell.upgrade() {
                    cell.remove_subscriber(self.inner.id);
                }
            }
        }
        for new in &reads {
            if !old_deps.iter().any(|o| o.id == new.id) {
                if let Some(cell) = new.cell.upgrade() {
                    cell.add_subscriber(self_weak.clone());
                }
            }
        }
        self.inner.deps.replace(reads);
    }
}

impl<T: Clone + PartialEq + 'static> Computed<T> {
    /// Create a computed cell with the value-equality short-circuit
    /// enabled per `options.suppress_unchanged`.
    pub fn new_with_options(options: ComputedOptions, f: impl FnMut() -> T + 'static) -> Self {
        let equality: Option<Box<dyn Fn(&T, &T) -> bool>> =
            if options.suppress_unchanged { Some(Box::new(|a: &T, b: &T| a == b)) } else { None };
        Self::build(None, f, equality)
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Source;
    use std::cell::Cell as StdCellT;

    #[test]
    fn recomputes_at_most_once_between_reads() {
        let count = Source::new(2);
        let computes = Rc::new(StdCellT::new(0));
        let computes2 = computes.clone();
        let count2 = count.clone();
        let doubled = Computed::new(move || {
            computes2.set(computes2.get() + 1);
            count2.get() * 2
        });

        assert_eq!(doubled.read(), 4);
        assert_eq!(computes.get(), 1);
        assert_eq!(doubled.read(), 4);
        assert_eq!(computes.get(), 1);

        count.write(3);
        assert_eq!(doubled.read(), 6);
        assert_eq!(computes.get(), 2);
    }

    struct CountingSink {
        id: NodeId,
        count: Rc<StdCellT<u32>>,
    }
    impl Subscriber for CountingSink {
        fn node_id(&self) -> NodeId {
            self.id
        }
        fn notify(&self, _cause: NodeId) {
            self.count.set(self.count.get() + 1);
        }
    }

    #[test]
    fn suppress_unchanged_skips_downstream_notification() {
        let a = Source::new(1);
        let a2 = a.clone();
        let parity = Computed::new_with_options(ComputedOptions { suppress_unchanged: true }, move || a2.get() % 2);
        let _ = parity.read(); // establish baseline, parity == 1

        let notifications = Rc::new(StdCellT::new(0));
        let sink: Rc<dyn Subscriber> = Rc::new(CountingSink { id: NodeId::next(), count: notifications.clone() });
        parity.inner.add_subscriber(Rc::downgrade(&sink));

        a.write(3); // 3 % 2 == 1, unchanged parity: downstream should not be notified
        let _ = parity.read();
        assert_eq!(notifications.get(), 0);

        a.write(4); // 4 % 2 == 0, changed parity: downstream should be notified
        let _ = parity.read();
        assert_eq!(notifications.get(), 1);
    }

    #[test]
    fn write_during_computed_recompute_is_diagnosed() {
        let other = Source::new(0);
        let other2 = other.clone();
        let c = Computed::new(move || {
            other2.write(1);
            42
        });

        let _ = crate::runtime::take_cell_errors();
        assert_eq!(c.read(), 42);
        let errs = crate::runtime::take_cell_errors();
        assert!(errs.iter().any(|e| matches!(e, CellError::Usage(UsageError::WriteDuringComputed(_)))));
    }

    #[test]
    fn self_reading_computed_is_diagnosed_as_cyclic() {
        let recurse = Rc::new(StdCellT::new(false));
        let slot: Rc<RefCell<Option<Computed<i32>>>> = Rc::new(RefCell::new(None));

        let trigger = Source::new(0);
        let trigger2 = trigger.clone();
        let recurse2 = recurse.clone();
        let slot2 = slot.clone();
        let cyclic = Computed::new(move || {
            let _ = trigger2.get();
            if recurse2.get() {
                slot2.borrow().as_ref().unwrap().read()
            } else {
                1
            }
        });
        *slot.borrow_mut() = Some(cyclic.clone());

        assert_eq!(cyclic.read(), 1, "first read establishes a cached value before the cell turns cyclic");

        recurse.set(true);
        trigger.write(1); // dirties `cyclic`, whose next recompute reads itself

        let _ = crate::runtime::take_cell_errors();
        assert_eq!(cyclic.read(), 1, "the inner cyclic read falls back to the last cached value");
        let errs = crate::runtime::take_cell_errors();
        assert!(errs.iter().any(|e| matches!(e, CellError::Usage(UsageError::CyclicComputed(_)))));
    }

    #[test]
    fn panicking_compute_leaves_cell_dirty_for_retry() {
        let attempt = Rc::new(StdCellT::new(0));
        let attempt2 = attempt.clone();
        let c = Computed::new(move || {
            let n = attempt2.get() + 1;
            attempt2.set(n);
            if n == 1 {
                panic!("boom");
            }
            n
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| c.read()));
        assert!(result.is_err(), "the panic propagates to the reader rather than being swallowed");

        assert_eq!(c.read(), 2, "the cell recovered to Dirty and recomputes cleanly on the next read");
    }
}
