//! View-framework binding: the read-side contract a UI layer uses to
//! subscribe to one or more cells and re-render on change (§6).

use std::rc::Rc;

use cellkit_core::{Computed, Container, Source, Subscriber, Unsubscribe};

/// Implemented by anything `use_cells` can bind to. Reading through this
/// trait always tracks — there is no untracked variant here because the
/// binding's whole point is to subscribe.
pub trait CellRead {
    type Value;

    fn read(&self) -> Self::Value;

    /// Register an existing raw listener on this cell; the returned handle
    /// unsubscribes on drop. Registering the *same* listener across several
    /// cells is what gives `use_cells`/`use_named_cells` their once-per-flush
    /// debounce, since the engine's pending set dedups by listener identity.
    fn subscribe_listener(&self, listener: Rc<dyn Subscriber>) -> Unsubscribe;
}

impl<T: Clone + 'static> CellRead for Source<T> {
    type Value = T;
    fn read(&self) -> T {
        self.get()
    }
    fn subscribe_listener(&self, listener: Rc<dyn Subscriber>) -> Unsubscribe {
        Source::subscribe_with(self, listener)
    }
}

impl<T: Clone + 'static> CellRead for Computed<T> {
    type Value = T;
    fn read(&self) -> T {
        Computed::read(self)
    }
    fn subscribe_listener(&self, listener: Rc<dyn Subscriber>) -> Unsubscribe {
        self.subscribe_raw_with(listener)
    }
}

impl<T: Clone + 'static> CellRead for Container<T> {
    type Value = Vec<T>;
    fn read(&self) -> Vec<T> {
        self.to_vec()
    }
    fn subscribe_listener(&self, listener: Rc<dyn Subscriber>) -> Unsubscribe {
        self.subscribe_raw_with(listener)
    }
}

/// A handle returned by [`use_cells`]; holds the underlying unsubscribe
/// guards so the binding tears down when dropped.
pub struct Binding<V> {
    value: V,
    _unsubs: Vec<Unsubscribe>,
}

impl<V> Binding<V> {
    pub fn value(&self) -> &V {
        &self.value
    }
}

/// Bind a single cell: subscribes on construction, unsubscribes on drop.
/// `on_change` fires at most once per flush even if the cell is written to
/// several times within one `batch(..)` (the underlying raw listener is
/// debounced through the engine's pending-set/flush mechanism; see
/// `cellkit_core::raw_listener`).
pub fn use_cell<C: CellRead>(cell: &C, on_change: impl Fn() + 'static) -> Binding<C::Value> {
    let listener = cellkit_core::raw_listener(on_change);
    let unsub = cell.subscribe_listener(listener);
    Binding { value: cell.read(), _unsubs: vec![unsub] }
}

/// Bind a slice of homogeneous cells; `on_change` fires once per flush no
/// matter how many of the referenced cells changed in that flush. All
/// cells share one listener instance, so the engine's pending set (which
/// dedups by listener identity, not by which cell changed) collapses a
/// `batch(..)` touching several of them into a single callback invocation.
pub fn use_cells<C: CellRead>(cells: &[C], on_change: impl Fn() + 'static) -> Binding<Vec<C::Value>> {
    let listener = cellkit_core::raw_listener(on_change);
    let mut unsubs = Vec::with_capacity(cells.len());
    let mut values = Vec::with_capacity(cells.len());
    for cell in cells {
        unsubs.push(cell.subscribe_listener(listener.clone()));
        values.push(cell.read());
    }
    Binding { value: values, _unsubs: unsubs }
}

/// Bind a named map of cells, returning their current values under the
/// same names. Shares one listener across every cell, same as
/// [`use_cells`].
pub fn use_named_cells<C: CellRead>(
    cells: &std::collections::HashMap<&'static str, C>,
    on_change: impl Fn() + 'static,
) -> Binding<std::collections::HashMap<&'static str, C::Value>> {
    let listener = cellkit_core::raw_listener(on_change);
    let mut unsubs = Vec::with_capacity(cells.len());
    let mut values = std::collections::HashMap::with_capacity(cells.len());
    for (name, cell) in cells {
        unsubs.push(cell.subscribe_listener(listener.clone()));
        values.insert(*name, cell.read());
    }
    Binding { value: values, _unsubs: unsubs }
}
