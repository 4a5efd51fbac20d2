//! The tracking context: "who is currently reading" and "which observer is
//! currently executing".
//!
//! Two independent thread-local stacks back this module, matching §4.1 of
//! the design: a read-tracker stack (used by computed cells and observers to
//! discover their dependency set) and an active-observer stack (used only
//! for loop-prevention bookkeeping of writes performed *by* an observer's
//! body). Both are restored on every exit path, including panics, via an
//! RAII guard rather than a manual pop.

use std::cell::RefCell;
use std::rc::Rc;

use crate::cell::DepEdge;
use crate::id::NodeId;

/// Which kind of evaluator owns the current read-tracker frame.
///
/// `Source::write` inspects this to raise the `WriteDuringComputed`
/// diagnostic; it never suppresses the write, only reports it (§4.2, §7).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FrameKind {
    Computed,
    Observer,
}

struct ReadFrame {
    id: NodeId,
    kind: FrameKind,
    reads: RefCell<Vec<DepEdge>>,
}

/// Implemented by the observer runtime; kept here (rather than imported
/// from `observer.rs`) so this module has no dependency on it.
pub trait ActiveObserverHandle {
    fn node_id(&self) -> NodeId;
    fn record_write(&self, cell_id: NodeId);
}

thread_local! {
    static READ_TRACKER: RefCell<Vec<Rc<ReadFrame>>> = const { RefCell::new(Vec::new()) };
    static ACTIVE_OBSERVER: RefCell<Vec<Rc<dyn ActiveObserverHandle>>> = const { RefCell::new(Vec::new()) };
}

struct ReadTrackerGuard;

impl Drop for ReadTrackerGuard {
    fn drop(&mut self) {
        READ_TRACKER.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

struct ActiveObserverGuard;

impl Drop for ActiveObserverGuard {
    fn drop(&mut self) {
        ACTIVE_OBSERVER.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Run `f` with `id`/`kind` recorded as the currently-tracking evaluator.
/// Returns `f`'s result plus the set of cells read during `f`, in read
/// order with duplicates collapsed to their first occurrence.
pub fn with_read_tracker<R>(id: NodeId, kind: FrameKind, f: impl FnOnce() -> R) -> (R, Vec<DepEdge>) {
    let frame = Rc::new(ReadFrame {
        id,
        kind,
        reads: RefCell::new(Vec::new()),
    });
    READ_TRACKER.with(|stack| stack.borrow_mut().push(frame.clone()));
    let _guard = ReadTrackerGuard;
    let result = f();
    drop(_guard);
    let reads = frame.reads.borrow().clone();
    (result, reads)
}

/// Run `f` with `obs` recorded as the active observer, for loop-prevention
/// write bookkeeping. Distinct from the read-tracker stack: a computed
/// cell's recomputation pushes a read-tracker frame but never an
/// active-observer frame.
pub fn with_active_observer<R>(obs: Rc<dyn ActiveObserverHandle>, f: impl FnOnce() -> R) -> R {
    ACTIVE_OBSERVER.with(|stack| stack.borrow_mut().push(obs));
    let _guard = ActiveObserverGuard;
    f()
}

/// Called by a cell's read accessor. If a read-tracker frame is active,
/// records `(id, cell)` as one of the current frame's reads (idempotent —
/// re-reading the same cell within one run doesn't duplicate the edge).
pub fn record_read(id: NodeId, cell: std::rc::Weak<dyn crate::cell::Cell>) {
    READ_TRACKER.with(|stack| {
        if let Some(frame) = stack.borrow().last() {
            let mut reads = frame.reads.borrow_mut();
            if !reads.iter().any(|edge| edge.id == id) {
                reads.push(DepEdge::new(id, cell));
            }
        }
    });
}

/// Peek the kind of the currently-tracking evaluator, if any.
pub fn current_reader_kind() -> Option<FrameKind> {
    READ_TRACKER.with(|stack| stack.borrow().last().map(|f| f.kind))
}

/// Peek the id of the currently-tracking evaluator, if any.
pub fn current_reader() -> Option<NodeId> {
    READ_TRACKER.with(|stack| stack.borrow().last().map(|f| f.id))
}

/// Peek the id of the currently-executing observer, if any.
pub fn current_observer() -> Option<NodeId> {
    ACTIVE_OBSERVER.with(|stack| stack.borrow().last().map(|o| o.node_id()))
}

/// Called by a source/container write. If an observer is currently
/// executing, records that it wrote `cell_id` (used to suppress an observer
/// re-running purely in response to cells it wrote itself last time).
pub fn record_write(cell_id: NodeId) {
    ACTIVE_OBSERVER.with(|stack| {
        if let Some(obs) = stack.borrow().last() {
            obs.record_write(cell_id);
        }
    });
}

/// Read a cell's current value without registering a dependency edge, by
/// temporarily hiding the active read-tracker frame (mirrors the teacher's
/// `untracked` helper: pop, run, push back).
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let saved = READ_TRACKER.with(|stack| stack.borrow_mut().pop());
    let result = f();
    if let Some(frame) = saved {
        READ_TRACKER.with(|stack| stack.borrow_mut().push(frame));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;

    struct DummyCell(NodeId);

    impl Cell for DummyCell {
        fn node_id(&self) -> NodeId {
            self.0
        }
        fn name(&self) -> Option<&str> {
            None
        }
        fn add_subscriber(&self, _subscriber: std::rc::Weak<dyn crate::cell::Subscriber>) {}
        fn remove_subscriber(&self, _id: NodeId) {}
    }

    fn dummy_weak(id: NodeId) -> std::rc::Weak<dyn Cell> {
        let strong: Rc<DummyCell> = Rc::new(DummyCell(id));
        Rc::downgrade(&strong)
    }

    #[test]
    fn untracked_hides_outer_frame() {
        let id = NodeId::next();
        let (_, reads) = with_read_tracker(id, FrameKind::Observer, || {
            untracked(|| {
                let cell_id = NodeId::next();
                record_read(cell_id, dummy_weak(cell_id));
            });
        });
        assert!(reads.is_empty());
    }

    #[test]
    fn nested_frames_restore_outer() {
        let outer = NodeId::next();
        let inner = NodeId::next();
        let (reads_seen_during_inner, _) = with_read_tracker(outer, FrameKind::Observer, || {
            with_read_tracker(inner, FrameKind::Computed, || {
                assert_eq!(current_reader(), Some(inner));
            });
            current_reader()
        });
        assert_eq!(reads_seen_during_inner, Some(outer));
    }
}
