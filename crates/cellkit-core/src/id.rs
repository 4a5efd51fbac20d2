//! Stable identity for cells, observers, and actions.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide unique identifier for any node in the reactive graph.
///
/// Identity, not pointer equality, is what makes subscriber sets and
/// dependency sets comparable across a cell's lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct NodeId(u64);

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

impl NodeId {
    /// Allocate a fresh, globally unique id.
    pub fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
