//! Observers — the side-effecting subscriber primitive (§4.5).

use std::cell::{Cell as StdCell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use crate::cell::{Cell, DepEdge, Subscriber};
use crate::error::{CellError, UsageError};
use crate::id::NodeId;
use crate::runtime::ScheduledObserver;
use crate::tracking::{self, ActiveObserverHandle, FrameKind};

/// A one-shot cancellation flag handed to async observer/action bodies.
pub struct AbortToken(Rc<AbortInner>);

struct AbortInner {
    flag: StdCell<bool>,
    wakers: RefCell<Vec<Waker>>,
}

impl AbortToken {
    fn new() -> Self {
        Self(Rc::new(AbortInner { flag: StdCell::new(false), wakers: RefCell::new(Vec::new()) }))
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.flag.get()
    }

    pub fn cancel(&self) {
        self.0.flag.set(true);
        for waker in self.0.wakers.borrow_mut().drain(..) {
            waker.wake();
        }
    }

    /// Whether `self` and `other` share the same underlying cancellation
    /// flag — used by actions to tell whether the in-flight slot still
    /// belongs to this invocation before clearing it.
    pub fn same_as(&self, other: &AbortToken) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// A future that resolves once this token is cancelled.
    pub fn cancelled(&self) -> Cancelled {
        Cancelled(self.0.clone())
    }
}

impl Clone for AbortToken {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

pub struct Cancelled(Rc<AbortInner>);

impl Future for Cancelled {
    type Output = ();
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0.flag.get() {
            Poll::Ready(())
        } else {
            self.0.wakers.borrow_mut().push(cx.waker().clone());
            Poll::Pending
        }
    }
}

/// Injectable time source for the infinite-loop heuristic, so tests can
/// drive it deterministically instead of sleeping for real.
pub trait Clock {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub type CleanupFn = Box<dyn FnOnce()>;
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T>>>;

fn panic_message(payload: &(dyn std::any::Any + Send + 'static)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

enum Body {
    Sync(Box<dyn FnMut() -> Option<CleanupFn>>),
    Async(Box<dyn FnMut(AbortToken) -> BoxFuture<Option<CleanupFn>>>),
}

#[derive(Clone, Copy, Debug)]
pub struct ObserverOptions {
    pub once: bool,
    pub prevent_overlap: bool,
    pub prevent_loops: bool,
    pub loop_window: usize,
    pub loop_threshold: u32,
}

impl Default for ObserverOptions {
    fn default() -> Self {
        Self { once: false, prevent_overlap: true, prevent_loops: true, loop_window: 20, loop_threshold: 10 }
    }
}

thread_local! {
    static LIVE_OBSERVERS: RefCell<HashMap<NodeId, Rc<ObserverInner>>> = RefCell::new(HashMap::new());
}

pub(crate) struct ObserverInner {
    id: NodeId,
    name: Option<String>,
    options: ObserverOptions,
    body: RefCell<Body>,
    deps: RefCell<Vec<DepEdge>>,
    cleanup: RefCell<Option<CleanupFn>>,
    disposed: StdCell<bool>,
    is_executing: StdCell<bool>,
    rerun_requested: StdCell<bool>,
    has_run: StdCell<bool>,
    written_this_run: RefCell<HashSet<NodeId>>,
    written_last_run: RefCell<HashSet<NodeId>>,
    exec_history: RefCell<VecDeque<Instant>>,
    abort: RefCell<Option<AbortToken>>,
    clock: Rc<dyn Clock>,
    self_weak: Weak<ObserverInner>,
}

impl Subscriber for ObserverInner {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn notify(&self, cause: NodeId) {
        if self.disposed.get() {
            return;
        }
        if let Some(rc) = self.self_weak.upgrade() {
            let scheduled: Rc<dyn ScheduledObserver> = rc;
            crate::runtime::enqueue(scheduled, cause);
        }
    }
}

impl ScheduledObserver for ObserverInner {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn run_scheduled(&self, causes: &[NodeId]) {
        if let Some(rc) = self.self_weak.upgrade() {
            rc.run(causes);
        }
    }
}

impl ActiveObserverHandle for ObserverInner {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn record_write(&self, cell_id: NodeId) {
        self.written_this_run.borrow_mut().insert(cell_id);
    }
}

impl ObserverInner {
    /// Execution protocol of §4.5, steps 1-11.
    fn run(self: Rc<Self>, causes: &[NodeId]) {
        if self.disposed.get() {
            return;
        }
        if self.options.once && self.has_run.get() {
            return;
        }
        if self.options.prevent_overlap && self.is_executing.get() {
            self.rerun_requested.set(true);
            return;
        }
        if self.has_run.get() && self.options.prevent_loops && !causes.is_empty() {
            let written_last = self.written_last_run.borrow();
            if causes.iter().all(|c| written_last.contains(c)) {
                return;
            }
        }

        self.is_executing.set(true);
        self.record_execution();

        if self.options.prevent_loops && self.loop_heuristic_breached() {
            tracing::error!(target: "cellkit_core::observer", observer = %self.id, "infinite-loop heuristic breached, disposing");
            crate::runtime::record_usage_error(UsageError::ObserverLoopDetected(self.id));
            self.is_executing.set(false);
            self.dispose_internal();
            return;
        }

        if let Some(cleanup) = self.cleanup.borrow_mut().take() {
            cleanup();
        }
        self.written_this_run.borrow_mut().clear();

        let is_async = matches!(&*self.body.borrow(), Body::Async(_));
        let id = self.id;

        if is_async {
            if let Some(prev) = self.abort.borrow_mut().take() {
                prev.cancel();
            }
            let token = AbortToken::new();
            *self.abort.borrow_mut() = Some(token.clone());

            let handle: Rc<dyn ActiveObserverHandle> = self.clone();
            let (body_result, reads) = tracking::with_read_tracker(id, FrameKind::Observer, || {
                tracking::with_active_observer(handle, || {
                    catch_unwind(AssertUnwindSafe(|| match &mut *self.body.borrow_mut() {
                        Body::Async(f) => f(token),
                        Body::Sync(_) => unreachable!("body kind checked above"),
                    }))
                })
            });

            match body_result {
                Ok(future) => {
                    self.resubscribe(reads);
                    let this = self.clone();
                    tokio::task::spawn_local(async move {
                        let cleanup = future.await;
                        *this.cleanup.borrow_mut() = cleanup;
                        this.settle();
                    });
                }
                Err(payload) => {
                    self.log_body_panic(&*payload, reads);
                    self.settle();
                }
            }
        } else {
            let handle: Rc<dyn ActiveObserverHandle> = self.clone();
            let (body_result, reads) = crate::runtime::batch(|| {
                tracking::with_read_tracker(id, FrameKind::Observer, || {
                    tracking::with_active_observer(handle, || {
                        catch_unwind(AssertUnwindSafe(|| match &mut *self.body.borrow_mut() {
                            Body::Sync(f) => f(),
                            Body::Async(_) => unreachable!("body kind checked above"),
                        }))
                    })
                })
            });

            match body_result {
                Ok(cleanup) => {
                    self.resubscribe(reads);
                    *self.cleanup.borrow_mut() = cleanup;
                }
                Err(payload) => self.log_body_panic(&*payload, reads),
            }
            self.settle();
        }
    }

    /// Log a caught body panic and record it as a [`CellError`]. The
    /// cleanup slot is left untouched. The dependency set is only left
    /// untouched too if there's a prior successful one to preserve;
    /// otherwise (the observer's very first run panicked) `reads` holds
    /// whatever was read before the panic, and resubscribing to that is
    /// better than leaving a freshly-built observer with no subscriptions
    /// to ever wake it again.
    fn log_body_panic(&self, payload: &(dyn std::any::Any + Send + 'static), reads: Vec<DepEdge>) {
        let message = panic_message(payload);
        tracing::error!(target: "cellkit_core::observer", observer = %self.id, "observer body panicked: {message}");
        crate::runtime::record_cell_error(CellError::ObserverPanicked(self.id, message));
        if self.deps.borrow().is_empty() {
            self.resubscribe(reads);
        }
    }

    fn settle(self: Rc<Self>) {
        self.is_executing.set(false);
        self.has_run.set(true);
        {
            let mut last = self.written_last_run.borrow_mut();
            let mut this_run = self.written_this_run.borrow_mut();
            std::mem::swap(&mut *last, &mut *this_run);
            this_run.clear();
        }
        if self.options.once {
            self.dispose_internal();
            return;
        }
        if self.rerun_requested.replace(false) {
            self.run(&[]);
        }
    }

    fn record_execution(&self) {
        let mut hist = self.exec_history.borrow_mut();
        hist.push_back(self.clock.now());
        while hist.len() > self.options.loop_window {
            hist.pop_front();
        }
    }

    fn loop_heuristic_breached(&self) -> bool {
        let hist = self.exec_history.borrow();
        let Some(&newest) = hist.back() else {
            return false;
        };
        let count = hist.iter().filter(|&&t| newest.saturating_duration_since(t) < Duration::from_secs(1)).count();
        count as u32 > self.options.loop_threshold
    }

    fn resubscribe(&self, reads: Vec<DepEdge>) {
        let old = self.deps.replace(Vec::new());
        let self_weak: Weak<dyn Subscriber> = self.self_weak.clone();

        for old_edge in &old {
            if !reads.iter().any(|r| r.id == old_edge.id) {
                if let Some(cell) = old_edge.cell.upgrade() {
                    cell.remove_subscriber(self.id);
                }
            }
        }
        for new_edge in &reads {
            if !old.iter().any(|o| o.id == new_edge.id) {
                if let Some(cell) = new_edge.cell.upgrade() {
                    cell.add_subscriber(self_weak.clone());
                }
            }
        }
        self.deps.replace(reads);
    }

    /// Disposal: idempotent. Invokes the last cleanup, unsubscribes from
    /// every upstream cell, cancels any in-flight abort token, and drops
    /// out of the keep-alive table so the handle's own `Rc` (if any) is the
    /// last reference.
    fn dispose_internal(&self) {
        if self.disposed.replace(true) {
            return;
        }
        if let Some(cleanup) = self.cleanup.borrow_mut().take() {
            cleanup();
        }
        for edge in self.deps.borrow_mut().drain(..) {
            if let Some(cell) = edge.cell.upgrade() {
                cell.remove_subscriber(self.id);
            }
        }
        self.rerun_requested.set(false);
        if let Some(token) = self.abort.borrow_mut().take() {
            token.cancel();
        }
        LIVE_OBSERVERS.with(|t| {
            t.borrow_mut().remove(&self.id);
        });
    }
}

/// Handle to a running observer. Disposal is explicit (`dispose`) — the
/// observer is kept alive in a process-wide table independent of this
/// handle, matching the teacher's effect table: dropping `Observer` does
/// not stop it.
pub struct Observer {
    inner: Rc<ObserverInner>,
}

impl Observer {
    pub fn new(body: impl FnMut() -> Option<CleanupFn> + 'static) -> Self {
        Self::build(None, ObserverOptions::default(), Body::Sync(Box::new(body)), Rc::new(SystemClock))
    }

    pub fn with_options(options: ObserverOptions, body: impl FnMut() -> Option<CleanupFn> + 'static) -> Self {
        Self::build(None, options, Body::Sync(Box::new(body)), Rc::new(SystemClock))
    }

    pub fn named(name: impl Into<String>, body: impl FnMut() -> Option<CleanupFn> + 'static) -> Self {
        Self::build(Some(name.into()), ObserverOptions::default(), Body::Sync(Box::new(body)), Rc::new(SystemClock))
    }

    pub fn new_async(body: impl FnMut(AbortToken) -> BoxFuture<Option<CleanupFn>> + 'static) -> Self {
        Self::build(None, ObserverOptions::default(), Body::Async(Box::new(body)), Rc::new(SystemClock))
    }

    pub fn new_async_with_options(
        options: ObserverOptions,
        body: impl FnMut(AbortToken) -> BoxFuture<Option<CleanupFn>> + 'static,
    ) -> Self {
        Self::build(None, options, Body::Async(Box::new(body)), Rc::new(SystemClock))
    }

    #[cfg(test)]
    pub(crate) fn with_clock(
        options: ObserverOptions,
        clock: Rc<dyn Clock>,
        body: impl FnMut() -> Option<CleanupFn> + 'static,
    ) -> Self {
        Self::build(None, options, Body::Sync(Box::new(body)), clock)
    }

    fn build(name: Option<String>, options: ObserverOptions, body: Body, clock: Rc<dyn Clock>) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<ObserverInner>| ObserverInner {
            id: NodeId::next(),
            name: name.clone(),
            options,
            body: RefCell::new(body),
            deps: RefCell::new(Vec::new()),
            cleanup: RefCell::new(None),
            disposed: StdCell::new(false),
            is_executing: StdCell::new(false),
            rerun_requested: StdCell::new(false),
            has_run: StdCell::new(false),
            written_this_run: RefCell::new(HashSet::new()),
            written_last_run: RefCell::new(HashSet::new()),
            exec_history: RefCell::new(VecDeque::new()),
            abort: RefCell::new(None),
            clock,
            self_weak: weak.clone(),
        });
        if let Some(name) = &name {
            crate::runtime::register_observer_name(name, inner.id);
        }
        LIVE_OBSERVERS.with(|t| {
            t.borrow_mut().insert(inner.id, inner.clone());
        });
        inner.clone().run(&[]);
        Self { inner }
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Dispose this observer: invoke its last cleanup, unsubscribe from
    /// every cell it reads, cancel any in-flight async body, and guarantee
    /// it never runs again even if already scheduled.
    pub fn dispose(&self) {
        self.inner.dispose_internal();
    }
}

impl Clone for Observer {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

pub fn observe(body: impl FnMut() -> Option<CleanupFn> + 'static) -> Observer {
    Observer::new(body)
}

pub fn observe_named(name: impl Into<String>, body: impl FnMut() -> Option<CleanupFn> + 'static) -> Observer {
    Observer::named(name, body)
}

pub fn observe_async(body: impl FnMut(AbortToken) -> BoxFuture<Option<CleanupFn>> + 'static) -> Observer {
    Observer::new_async(body)
}
