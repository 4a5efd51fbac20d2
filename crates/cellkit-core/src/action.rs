//! Actions — named, invocable functions with a concurrency policy (§4.6).

use std::cell::{Cell as StdCell, RefCell};
use std::rc::Rc;

use crate::error::ActionError;
use crate::id::NodeId;
use crate::observer::{AbortToken, BoxFuture};

/// Coordination policy applied across concurrent invocations of the same
/// [`Action`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Concurrency {
    /// Default for named actions: concurrent invocations queue and run one
    /// at a time, in call order.
    SerialQueue,
    /// Cancel any in-flight invocation's abort token and proceed
    /// immediately; the cancelled invocation resolves to
    /// `Err(ActionError::Cancelled)`.
    DropPrevious,
    /// Default for unnamed actions: invocations never coordinate and may
    /// run concurrently without bound.
    Unnamed,
}

type Body<Args, Out, E> = Box<dyn FnMut(Args, AbortToken) -> BoxFuture<Result<Out, E>>>;

struct ActionInner<Args, Out, E> {
    id: NodeId,
    name: Option<String>,
    concurrency: Concurrency,
    body: RefCell<Body<Args, Out, E>>,
    in_flight: RefCell<Option<AbortToken>>,
    current_ticket: StdCell<u64>,
    next_ticket: StdCell<u64>,
    notify: tokio::sync::Notify,
}

impl<Args, Out, E> ActionInner<Args, Out, E> {
    fn run_body(&self, args: Args, token: AbortToken) -> BoxFuture<Result<Out, E>> {
        (self.body.borrow_mut())(args, token)
    }

    async fn call_serial(&self, args: Args) -> Result<Out, ActionError<E>> {
        let ticket = self.next_ticket.get();
        self.next_ticket.set(ticket + 1);

        while self.current_ticket.get() != ticket {
            let notified = self.notify.notified();
            if self.current_ticket.get() == ticket {
                break;
            }
            notified.await;
        }

        let token = AbortToken::new();
        let result = self.run_body(args, token).await;
        self.current_ticket.set(ticket + 1);
        self.notify.notify_waiters();
        result.map_err(ActionError::Body)
    }

    async fn call_drop_previous(&self, args: Args) -> Result<Out, ActionError<E>> {
        if let Some(prev) = self.in_flight.borrow_mut().take() {
            prev.cancel();
        }
        let token = AbortToken::new();
        *self.in_flight.borrow_mut() = Some(token.clone());

        let body_fut = self.run_body(args, token.clone());
        let result = tokio::select! {
            _ = token.cancelled() => Err(ActionError::Cancelled),
            res = body_fut => res.map_err(ActionError::Body),
        };

        let mut slot = self.in_flight.borrow_mut();
        let is_current = slot.as_ref().is_some_and(|t| t.same_as(&token));
        if is_current {
            *slot = None;
        }
        result
    }

    async fn call_unnamed(&self, args: Args) -> Result<Out, ActionError<E>> {
        let token = AbortToken::new();
        self.run_body(args, token).await.map_err(ActionError::Body)
    }
}

/// A named, invocable function whose concurrent invocations are
/// coordinated per `Concurrency`. Cheap to clone; clones share the same
/// in-flight state.
pub struct Action<Args, Out, E> {
    inner: Rc<ActionInner<Args, Out, E>>,
}

impl<Args: 'static, Out: 'static, E: 'static> Action<Args, Out, E> {
    /// An unnamed action: `Concurrency::Unnamed`, no coordination.
    pub fn new(body: impl FnMut(Args, AbortToken) -> BoxFuture<Result<Out, E>> + 'static) -> Self {
        Self::build(None, Concurrency::Unnamed, body)
    }

    /// A named action: `Concurrency::SerialQueue` by default.
    pub fn named(name: impl Into<String>, body: impl FnMut(Args, AbortToken) -> BoxFuture<Result<Out, E>> + 'static) -> Self {
        Self::build(Some(name.into()), Concurrency::SerialQueue, body)
    }

    pub fn named_with_concurrency(
        name: impl Into<String>,
        concurrency: Concurrency,
        body: impl FnMut(Args, AbortToken) -> BoxFuture<Result<Out, E>> + 'static,
    ) -> Self {
        Self::build(Some(name.into()), concurrency, body)
    }

    fn build(
        name: Option<String>,
        concurrency: Concurrency,
        body: impl FnMut(Args, AbortToken) -> BoxFuture<Result<Out, E>> + 'static,
    ) -> Self {
        if let Some(name) = &name {
            crate::runtime::register_action_name(name);
        }
        Self {
            inner: Rc::new(ActionInner {
                id: NodeId::next(),
                name,
                concurrency,
                body: RefCell::new(Box::new(body)),
                in_flight: RefCell::new(None),
                current_ticket: StdCell::new(0),
                next_ticket: StdCell::new(0),
                notify: tokio::sync::Notify::new(),
            }),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Invoke the action under its configured concurrency policy.
    pub async fn call(&self, args: Args) -> Result<Out, ActionError<E>> {
        match self.inner.concurrency {
            Concurrency::SerialQueue => self.inner.call_serial(args).await,
            Concurrency::DropPrevious => self.inner.call_drop_previous(args).await,
            Concurrency::Unnamed => self.inner.call_unnamed(args).await,
        }
    }
}

impl<Args, Out, E> Clone for Action<Args, Out, E> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

/// Ergonomic constructor mirroring [`crate::observer::observe_named`].
pub fn action<Args: 'static, Out: 'static, E: 'static>(
    name: impl Into<String>,
    body: impl FnMut(Args, AbortToken) -> BoxFuture<Result<Out, E>> + 'static,
) -> Action<Args, Out, E> {
    Action::named(name, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Source;
    use std::rc::Rc as StdRc;

    #[tokio::test]
    async fn serial_queue_runs_in_call_order() {
        let order = StdRc::new(RefCell::new(Vec::<i32>::new()));
        let store = Source::new(0);
        let order2 = order.clone();
        let store2 = store.clone();
        let act: Action<i32, i32, ()> = Action::named("serial-test", move |x, _token| {
            let order3 = order2.clone();
            let store3 = store2.clone();
            Box::pin(async move {
                order3.borrow_mut().push(x);
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                store3.write(x);
                Ok(x)
            })
        });

        let (r1, r2, r3) = tokio::join!(act.call(1), act.call(2), act.call(3));
        assert_eq!(r1.unwrap(), 1);
        assert_eq!(r2.unwrap(), 2);
        assert_eq!(r3.unwrap(), 3);
        assert_eq!(*order.borrow(), vec![1, 2, 3]);
        assert_eq!(store.get(), 3);
    }

    #[tokio::test]
    async fn drop_previous_cancels_the_prior_invocation() {
        let store = Source::new(0);
        let store2 = store.clone();
        let act: Action<i32, i32, ()> = Action::named_with_concurrency("drop-prev-test", Concurrency::DropPrevious, move |x, token| {
            let store3 = store2.clone();
            Box::pin(async move {
                tokio::select! {
                    _ = token.cancelled() => Err(()),
                    _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {
                        store3.write(x);
                        Ok(x)
                    }
                }
            })
        });

        // join! polls `first` up to its suspension point (registering it as
        // in-flight) before `second` ever runs, so `second` observes and
        // cancels it deterministically.
        let (r1, r2) = tokio::join!(act.call(1), act.call(2));
        assert!(matches!(r1, Err(ActionError::Cancelled)));
        assert_eq!(r2.unwrap(), 2);
        assert_eq!(store.get(), 2);
    }
}
