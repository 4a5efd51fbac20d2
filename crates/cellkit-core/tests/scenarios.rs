//! End-to-end scenarios covering the core reactive engine's user-facing
//! contract, one test per scenario rather than a grid.

use std::cell::{Cell as StdCell, RefCell};
use std::rc::Rc;

use cellkit_core::{action, batch, observe, ActionError, Computed, Concurrency, Source};

#[test]
fn simple_counter() {
    let c = Source::new(0);
    let log = Rc::new(RefCell::new(Vec::new()));

    let c2 = c.clone();
    let doubled = Computed::new(move || c2.get() * 2);

    let log2 = log.clone();
    let doubled2 = doubled.clone();
    let _obs = observe(move || {
        log2.borrow_mut().push(doubled2.read());
        None
    });

    assert_eq!(*log.borrow(), vec![0]);

    c.write(5);
    assert_eq!(*log.borrow(), vec![0, 10]);

    batch(|| {
        c.write(6);
        c.write(7);
        c.write(8);
    });
    assert_eq!(*log.borrow(), vec![0, 10, 16]);
}

#[test]
fn sum_derived_notifies_on_every_distinct_recompute() {
    let a = Source::new(1);
    let b = Source::new(2);

    let a2 = a.clone();
    let b2 = b.clone();
    let sum = Computed::new(move || a2.get() + b2.get());

    let n = Rc::new(StdCell::new(0));
    let n2 = n.clone();
    let _unsub = sum.subscribe_raw(move || n2.set(n2.get() + 1));

    a.write(2);
    assert_eq!(sum.read(), 4);
    b.write(1);
    assert_eq!(sum.read(), 3);

    assert_eq!(n.get(), 2);
}

#[tokio::test]
async fn action_serial_queue_preserves_call_order() {
    let order = Rc::new(RefCell::new(Vec::new()));
    let store = Source::new(0);

    let order2 = order.clone();
    let store2 = store.clone();
    let f = action("counter-scenario", move |x: i32, _token| {
        let order3 = order2.clone();
        let store3 = store2.clone();
        Box::pin(async move {
            order3.borrow_mut().push(x);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            store3.write(x);
            Ok::<i32, ()>(x)
        })
    });

    let (r1, r2, r3) = tokio::join!(f.call(1), f.call(2), f.call(3));
    assert_eq!((r1.unwrap(), r2.unwrap(), r3.unwrap()), (1, 2, 3));
    assert_eq!(*order.borrow(), vec![1, 2, 3]);
    assert_eq!(store.get(), 3);
}

#[tokio::test]
async fn action_drop_previous_cancels_the_superseded_call() {
    let store = Source::new(0);
    let store2 = store.clone();
    let f = cellkit_core::Action::named_with_concurrency("drop-prev-scenario", Concurrency::DropPrevious, move |x: i32, token| {
        let store3 = store2.clone();
        Box::pin(async move {
            tokio::select! {
                _ = token.cancelled() => Err(()),
                _ = tokio::time::sleep(std::time::Duration::from_millis(30)) => {
                    store3.write(x);
                    Ok(x)
                }
            }
        })
    });

    let (r1, r2) = tokio::join!(f.call(1), f.call(2));
    assert!(matches!(r1, Err(ActionError::Cancelled)));
    assert_eq!(r2.unwrap(), 2);
    assert_eq!(store.get(), 2);
}

#[test]
fn observer_loop_prevention_ignores_its_own_write_but_not_others() {
    let a = Source::new(0);
    let b = Source::new(0);
    let runs = Rc::new(StdCell::new(0));

    let a2 = a.clone();
    let b2 = b.clone();
    let runs2 = runs.clone();
    let _obs = observe(move || {
        let _ = a2.get();
        let bv = b2.get();
        runs2.set(runs2.get() + 1);
        b2.update_in_place(|v| *v = bv + 1);
        None
    });
    assert_eq!(runs.get(), 1);

    b.write(100);
    assert_eq!(runs.get(), 1, "must not re-run chasing its own write");

    a.write(10);
    assert_eq!(runs.get(), 2, "must re-run when an unrelated cell changes");
}
