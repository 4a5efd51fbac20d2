//! The shared vocabulary every reactive node is built from.
//!
//! `Cell` is implemented by anything that can be *read* (sources, computed
//! cells, containers): it owns a subscriber set. `Subscriber` is implemented
//! by anything that can be *notified* (computed cells, observers): it is
//! handed a [`NodeId`] so it can look up which of its own dependencies fired.
//!
//! Edges between the two are never an owning `Rc` in either direction —
//! cells hold `Weak<dyn Subscriber>`, subscribers hold a [`DepEdge`] pairing
//! an id with a `Weak<dyn Cell>`. Dropping every strong handle to a cell (or
//! disposing an observer) lets the other side's weak references fail to
//! upgrade instead of forcing an explicit graph-wide sweep.

use std::rc::Weak;

use crate::id::NodeId;

/// Anything that can be depended on: carries an identity and a subscriber
/// list that the tracking context mutates on its behalf.
pub trait Cell {
    /// This node's stable identity.
    fn node_id(&self) -> NodeId;

    /// Optional debug name, surfaced through the registry and devtools.
    fn name(&self) -> Option<&str>;

    /// Record `subscriber` as observing this cell.
    fn add_subscriber(&self, subscriber: Weak<dyn Subscriber>);

    /// Drop `id` from this cell's subscriber set, if present.
    fn remove_subscriber(&self, id: NodeId);
}

/// Anything that can be notified when a cell it depends on changes.
pub trait Subscriber {
    /// This node's stable identity.
    fn node_id(&self) -> NodeId;

    /// Called by a cell this subscriber depends on, once per change
    /// (deduplicated by the caller within a single flush/recompute pass).
    ///
    /// `cause` is the id of the cell that changed, used by observers for
    /// loop-prevention bookkeeping.
    fn notify(&self, cause: NodeId);
}

/// One edge in a subscriber's dependency set: the upstream cell's identity,
/// plus a weak handle used to unsubscribe without a global lookup.
#[derive(Clone)]
pub struct DepEdge {
    pub id: NodeId,
    pub cell: Weak<dyn Cell>,
}

impl DepEdge {
    pub fn new(id: NodeId, cell: Weak<dyn Cell>) -> Self {
        Self { id, cell }
    }
}
