//! The raw notification listener shared by `Source::subscribe`,
//! `Computed::subscribe_raw`, and `Container::subscribe_raw` (§6's external
//! binding escape hatch).
//!
//! Unlike a tracked `Subscriber` (a computed cell or observer), a raw
//! listener's `notify` doesn't run its callback inline — it routes through
//! [`crate::runtime::enqueue`], the same pending-set/flush mechanism
//! `ObserverInner` uses. That gives it the same debounce: several writes to
//! cells it watches within one `batch(..)` collapse into a single callback
//! invocation at the outermost flush, instead of firing once per write.
//!
//! A single listener instance can also be registered on more than one cell
//! (via `Source::subscribe_with`/`Computed::subscribe_raw_with`/
//! `Container::subscribe_raw_with`) — since the pending set dedups by the
//! listener's own `NodeId`, several of those cells changing within one
//! flush still collapses to one callback invocation, not one per cell.

use std::rc::{Rc, Weak};

use crate::cell::Subscriber;
use crate::id::NodeId;
use crate::runtime::ScheduledObserver;

struct RawListener {
    id: NodeId,
    f: Box<dyn Fn()>,
    self_weak: Weak<RawListener>,
}

impl Subscriber for RawListener {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn notify(&self, cause: NodeId) {
        if let Some(rc) = self.self_weak.upgrade() {
            let scheduled: Rc<dyn ScheduledObserver> = rc;
            crate::runtime::enqueue(scheduled, cause);
        }
    }
}

impl ScheduledObserver for RawListener {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn run_scheduled(&self, _causes: &[NodeId]) {
        (self.f)();
    }
}

/// Build a new raw listener wrapping `f`, returned as a type-erased
/// `Subscriber` ready to hand to a `Cell::add_subscriber`. Public so
/// bindings crates can build one listener and register it on several
/// cells, getting cross-cell debounce for free.
pub fn new(f: impl Fn() + 'static) -> Rc<dyn Subscriber> {
    let listener: Rc<dyn Subscriber> = Rc::new_cyclic(|weak: &Weak<RawListener>| RawListener {
        id: NodeId::next(),
        f: Box::new(f),
        self_weak: weak.clone(),
    });
    listener
}
