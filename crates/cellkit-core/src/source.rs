//! Source cells — the mutable leaves of the reactive graph (§4.2).

use std::rc::{Rc, Weak};
use std::cell::RefCell;

use crate::cell::{Cell, DepEdge, Subscriber};
use crate::id::NodeId;
use crate::runtime::DebugValue;
use crate::tracking::{self, FrameKind};

/// A mutable reactive container. Reading a source inside a computed cell's
/// body or an observer's body registers a dependency edge; writing it
/// notifies every direct subscriber unless the new value equals the old one.
///
/// Requires `T: PartialEq` so the value-equality short-circuit in §4.2 is
/// checkable; types that aren't meaningfully comparable should be wrapped in
/// a newtype with a custom `PartialEq` (e.g. pointer equality over an `Rc`)
/// rather than forcing every source through a fallible identity check.
pub struct Source<T> {
    inner: Rc<SourceInner<T>>,
}

pub(crate) struct SourceInner<T> {
    id: NodeId,
    name: Option<String>,
    value: RefCell<T>,
    subscribers: RefCell<Vec<Weak<dyn Subscriber>>>,
}

impl<T: 'static> Cell for SourceInner<T> {
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

impl<T: std::fmt::Debug> DebugValue for SourceInner<T> {
    fn debug_repr(&self) -> String {
        format!("{:?}", self.value.borrow())
    }
}

impl<T: 'static> Source<T> {
    /// Create an unnamed source cell.
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(SourceInner {
                id: NodeId::next(),
                name: None,
                value: RefCell::new(value),
                subscribers: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Create a source cell registered under `name` in the debug directory
    /// (§6). Duplicate names are diagnosed, not refused.
    pub fn named(name: impl Into<String>, value: T) -> Self
    where
        T: std::fmt::Debug,
    {
        let name = name.into();
        let cell = Self {
            inner: Rc::new(SourceInner {
                id: NodeId::next(),
                name: Some(name.clone()),
                value: RefCell::new(value),
                subscribers: RefCell::new(Vec::new()),
            }),
        };
        let debug: Rc<dyn DebugValue> = cell.inner.clone();
        crate::runtime::register_cell(&name, cell.inner.id, Rc::downgrade(&debug));
        cell
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.id
    }

    /// Read the current value via a borrow, tracking the read if an
    /// evaluator is currently active.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.inner.value.borrow())
    }

    /// Mutate the value in place, always notifying subscribers. Use this
    /// for types that don't implement `PartialEq`/`Clone`; prefer
    /// [`Source::update`] when the equality short-circuit is wanted.
    pub fn update_in_place(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.inner.value.borrow_mut());
        self.notify();
    }

    /// Add a raw notification listener, bypassing dependency tracking
    /// entirely. Used by external bindings (§6), not by cell/computed code.
    /// `on_change` fires at most once per flush, debounced the same way a
    /// tracked observer is (see `crate::listener`), even if several cells it
    /// watches change within one `batch(..)`.
    pub fn subscribe(&self, on_change: impl Fn() + 'static) -> Unsubscribe {
        self.subscribe_with(crate::listener::new(on_change))
    }

    /// Register an existing raw listener (from [`crate::raw_listener`]) on
    /// this cell. Registering the same listener on several cells gives them
    /// a shared debounced identity — see `crate::listener`.
    pub fn subscribe_with(&self, listener: Rc<dyn Subscriber>) -> Unsubscribe {
        let weak: Weak<dyn Subscriber> = Rc::downgrade(&listener);
        self.inner.add_subscriber(weak);
        let weak_cell: Weak<dyn Cell> = Rc::downgrade(&self.inner);
        Unsubscribe {
            cell: weak_cell,
            subscriber_id: listener.node_id(),
            _keep_alive: listener,
        }
    }

    fn track(&self) {
        if tracking::current_reader().is_some() {
            let weak_cell: Weak<dyn Cell> = Rc::downgrade(&self.inner);
            tracking::record_read(self.inner.id, weak_cell);
        }
    }

    fn notify(&self) {
        if let Some(FrameKind::Computed) = tracking::current_reader_kind() {
            crate::runtime::record_usage_error(crate::error::UsageError::WriteDuringComputed(self.inner.id));
        }
        tracking::record_write(self.inner.id);

        let subscribers: Vec<Rc<dyn Subscriber>> = {
            let mut subs = self.inner.subscribers.borrow_mut();
            subs.retain(|s| s.upgrade().is_some());
            subs.iter().filter_map(|s| s.upgrade()).collect()
        };
        for sub in subscribers {
            sub.notify(self.inner.id);
        }
    }
}

impl<T: Clone + 'static> Source<T> {
    /// Read the current value, cloning it out.
    pub fn get(&self) -> T {
        self.with(|v| v.clone())
    }
}

impl<T: PartialEq + Clone + 'static> Source<T> {
    /// Replace the value. A no-op (no dirtying, no notification) if the
    /// resolved value equals the prior one.
    pub fn write(&self, value: T) {
        let changed = {
            let mut current = self.inner.value.borrow_mut();
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        };
        if changed {
            self.notify();
        }
    }

    /// Apply `f` to a clone of the current value, then `write` the result
    /// (so the equality short-circuit still applies).
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut next = self.inner.value.borrow().clone();
        f(&mut next);
        self.write(next);
    }
}

impl<T> Clone for Source<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Source<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source").field("id", &self.inner.id).field("value", &self.inner.value.borrow()).finish()
    }
}

/// A handle returned by [`Source::subscribe`] (and the analogous raw
/// listener methods on [`crate::computed::Computed`] and
/// [`crate::container::Container`]); dropping it unsubscribes.
pub struct Unsubscribe {
    cell: Weak<dyn Cell>,
    subscriber_id: NodeId,
    _keep_alive: Rc<dyn Subscriber>,
}

impl Unsubscribe {
    pub(crate) fn new(cell: Weak<dyn Cell>, subscriber_id: NodeId, keep_alive: Rc<dyn Subscriber>) -> Self {
        Self { cell, subscriber_id, _keep_alive: keep_alive }
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        if let Some(cell) = self.cell.upgrade() {
            cell.remove_subscriber(self.subscriber_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_is_noop_on_equal_value() {
        let s = Source::new(5);
        let n = Rc::new(RefCell::new(0));
        let n2 = n.clone();
        let _unsub = s.subscribe(move || *n2.borrow_mut() += 1);
        s.write(5);
        assert_eq!(*n.borrow(), 0);
        s.write(6);
        assert_eq!(*n.borrow(), 1);
    }

    #[test]
    fn update_applies_function() {
        let s = Source::new(1);
        s.update(|v| *v += 1);
        assert_eq!(s.get(), 2);
    }
}
