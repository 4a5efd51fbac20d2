//! Container cells — sequence-valued sources with a curated mutation API
//! (§4.7). Every mutation produces a fresh `Vec<T>` and publishes once;
//! there is no value-equality short-circuit here (§4.7 invariant).

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::cell::{Cell, DepEdge, Subscriber};
use crate::id::NodeId;
use crate::runtime::DebugValue;
use crate::tracking::{self, FrameKind};

pub struct Container<T> {
    inner: Rc<ContainerInner<T>>,
}

pub(crate) struct ContainerInner<T> {
    id: NodeId,
    name: Option<String>,
    value: RefCell<Vec<T>>,
    subscribers: RefCell<Vec<Weak<dyn Subscriber>>>,
}

impl<T: 'static> Cell for ContainerInner<T> {
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

impl<T: fmt::Debug> DebugValue for ContainerInner<T> {
    fn debug_repr(&self) -> String {
        format!("{:?}", self.value.borrow())
    }
}

impl<T: 'static> Container<T> {
    pub fn new(values: impl Into<Vec<T>>) -> Self {
        Self {
            inner: Rc::new(ContainerInner {
                id: NodeId::next(),
                name: None,
                value: RefCell::new(values.into()),
                subscribers: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn named(name: impl Into<String>, values: impl Into<Vec<T>>) -> Self
    where
        T: fmt::Debug,
    {
        let name = name.into();
        let cell = Self {
            inner: Rc::new(ContainerInner {
                id: NodeId::next(),
                name: Some(name.clone()),
                value: RefCell::new(values.into()),
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

    /// Add a raw notification listener, bypassing dependency tracking, at
    /// most once per flush (see `crate::listener`). Used by external
    /// bindings (§6).
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

    // --- non-mutating accessors -------------------------------------

    pub fn len(&self) -> usize {
        self.track();
        self.inner.value.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.track();
        self.inner.value.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<T>
    where
        T: Clone,
    {
        self.track();
        self.inner.value.borrow().get(index).cloned()
    }

    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.track();
        self.inner.value.borrow().clone()
    }

    pub fn map<R>(&self, mut f: impl FnMut(&T) -> R) -> Vec<R> {
        self.track();
        self.inner.value.borrow().iter().map(|v| f(v)).collect()
    }

    pub fn filter(&self, mut f: impl FnMut(&T) -> bool) -> Vec<T>
    where
        T: Clone,
    {
        self.track();
        self.inner.value.borrow().iter().filter(|v| f(v)).cloned().collect()
    }

    pub fn fold<R>(&self, init: R, mut f: impl FnMut(R, &T) -> R) -> R {
        self.track();
        self.inner.value.borrow().iter().fold(init, |acc, v| f(acc, v))
    }

    pub fn find(&self, mut f: impl FnMut(&T) -> bool) -> Option<T>
    where
        T: Clone,
    {
        self.track();
        self.inner.value.borrow().iter().find(|v| f(v)).cloned()
    }

    pub fn any(&self, mut f: impl FnMut(&T) -> bool) -> bool {
        self.track();
        self.inner.value.borrow().iter().any(|v| f(v))
    }

    pub fn all(&self, mut f: impl FnMut(&T) -> bool) -> bool {
        self.track();
        self.inner.value.borrow().iter().all(|v| f(v))
    }

    pub fn join(&self, sep: &str) -> String
    where
        T: fmt::Display,
    {
        self.track();
        self.inner
            .value
            .borrow()
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(sep)
    }

    pub fn slice(&self, range: impl std::ops::RangeBounds<usize>) -> Vec<T>
    where
        T: Clone,
    {
        self.track();
        let values = self.inner.value.borrow();
        let len = values.len();
        let start = match range.start_bound() {
            std::ops::Bound::Included(&s) => s,
            std::ops::Bound::Excluded(&s) => s + 1,
            std::ops::Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            std::ops::Bound::Included(&e) => (e + 1).min(len),
            std::ops::Bound::Excluded(&e) => e.min(len),
            std::ops::Bound::Unbounded => len,
        };
        if start >= end {
            Vec::new()
        } else {
            values[start..end].to_vec()
        }
    }

    // --- mutating ops: always produce a fresh Vec, publish once -----

    pub fn push_back(&self, value: T) {
        self.inner.value.borrow_mut().push(value);
        self.notify();
    }

    pub fn push_front(&self, value: T) {
        self.inner.value.borrow_mut().insert(0, value);
        self.notify();
    }

    pub fn pop_back(&self) -> Option<T> {
        let v = self.inner.value.borrow_mut().pop();
        if v.is_some() {
            self.notify();
        }
        v
    }

    pub fn pop_front(&self) -> Option<T> {
        let mut values = self.inner.value.borrow_mut();
        if values.is_empty() {
            return None;
        }
        let v = values.remove(0);
        drop(values);
        self.notify();
        Some(v)
    }

    pub fn splice(&self, range: impl std::ops::RangeBounds<usize>, replace_with: impl IntoIterator<Item = T>) -> Vec<T> {
        let removed: Vec<T> = self.inner.value.borrow_mut().splice(range, replace_with).collect();
        self.notify();
        removed
    }

    pub fn sort_by(&self, mut compare: impl FnMut(&T, &T) -> std::cmp::Ordering) {
        self.inner.value.borrow_mut().sort_by(|a, b| compare(a, b));
        self.notify();
    }

    pub fn reverse(&self) {
        self.inner.value.borrow_mut().reverse();
        self.notify();
    }

    pub fn fill(&self, value: T)
    where
        T: Clone,
    {
        let len = self.inner.value.borrow().len();
        *self.inner.value.borrow_mut() = vec![value; len];
        self.notify();
    }

    pub fn clear(&self) {
        self.inner.value.borrow_mut().clear();
        self.notify();
    }

    pub fn set(&self, values: impl Into<Vec<T>>) {
        *self.inner.value.borrow_mut() = values.into();
        self.notify();
    }

    /// Run `f` against a copy-on-write draft of the current sequence,
    /// publishing at most once regardless of how many operations `f`
    /// performs against the draft.
    pub fn mutate(&self, f: impl FnOnce(&mut Draft<'_, T>))
    where
        T: Clone,
    {
        let mut draft_value = self.inner.value.borrow().clone();
        let mut draft = Draft { values: &mut draft_value, touched: false };
        f(&mut draft);
        let touched = draft.touched;
        if touched {
            *self.inner.value.borrow_mut() = draft_value;
            self.notify();
        }
    }
}

impl<T> Clone for Container<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: fmt::Debug> fmt::Debug for Container<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container").field("id", &self.inner.id).field("value", &self.inner.value.borrow()).finish()
    }
}

/// Borrowed, copy-on-write handle passed to [`Container::mutate`]. Tracks
/// whether it was ever mutably dereferenced so `mutate` can skip
/// publishing when the closure only inspected the draft.
pub struct Draft<'a, T> {
    values: &'a mut Vec<T>,
    touched: bool,
}

impl<'a, T> std::ops::Deref for Draft<'a, T> {
    type Target = Vec<T>;
    fn deref(&self) -> &Vec<T> {
        self.values
    }
}

impl<'a, T> std::ops::DerefMut for Draft<'a, T> {
    fn deref_mut(&mut self) -> &mut Vec<T> {
        self.touched = true;
        self.values
    }
}
