use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use coflow::{AnyPromise, Error, Promise};

#[test]
fn promise_settles_only_once() {
    let promise = Promise::new();
    promise.complete(1).unwrap();

    assert!(
        matches!(promise.complete(2), Err(Error::AlreadySettled)),
        "Second completion should be rejected"
    );
    assert!(matches!(promise.fail(Error::msg("late")), Err(Error::AlreadySettled)));
    assert_eq!(promise.result().unwrap().unwrap(), 1, "First value should stick");
}

#[test]
fn completion_callbacks_run_in_registration_order() {
    let order = Rc::new(RefCell::new(Vec::new()));
    let promise = Promise::<u8>::new();

    for id in 0..3 {
        let order = Rc::clone(&order);
        promise.register_on_complete(move |outcome| {
            order.borrow_mut().push((id, *outcome.as_ref().unwrap()));
        });
    }
    assert!(order.borrow().is_empty(), "Callbacks must wait for settlement");

    promise.complete(7).unwrap();
    assert_eq!(*order.borrow(), vec![(0, 7), (1, 7), (2, 7)]);
}

#[test]
fn late_registration_fires_immediately() {
    let promise = Promise::<u8>::from_error(Error::msg("boom"));
    let seen = Rc::new(RefCell::new(None));

    let slot = Rc::clone(&seen);
    promise.register_on_complete(move |outcome| {
        *slot.borrow_mut() = outcome.as_ref().err().map(ToString::to_string);
    });

    assert_eq!(seen.borrow().as_deref(), Some("boom"));
}

#[test]
fn dispose_runs_dispose_callbacks_only_while_pending() {
    let disposed = Rc::new(Cell::new(0));
    let pending = Promise::<()>::new();
    let settled = Promise::<()>::new();

    for promise in [&pending, &settled] {
        let disposed = Rc::clone(&disposed);
        promise.register_on_dispose(move || disposed.set(disposed.get() + 1));
    }
    settled.complete(()).unwrap();

    pending.dispose();
    settled.dispose();
    pending.dispose();

    assert_eq!(disposed.get(), 1, "Only the pending promise should fire");
    assert!(pending.is_disposed());
    assert!(!pending.is_settled());
    assert!(settled.completed(), "Disposing a settled promise keeps its outcome");
}

#[test]
fn disposed_promise_ignores_settlement() {
    let promise = Promise::<u8>::new();
    let completed = Rc::new(Cell::new(false));
    let flag = Rc::clone(&completed);
    promise.register_on_complete(move |_| flag.set(true));

    promise.dispose();
    assert!(promise.complete(3).is_ok(), "Completing a disposed promise is a no-op");
    assert!(!completed.get());
    assert!(promise.result().is_none());

    let late = Rc::new(Cell::new(false));
    let flag = Rc::clone(&late);
    promise.register_on_dispose(move || flag.set(true));
    assert!(late.get(), "Dispose callbacks registered late should fire");
}

#[test]
fn error_check_fires_when_outcome_is_inspected() {
    let checked = Rc::new(Cell::new(false));
    let promise = Promise::<u8>::new();
    let flag = Rc::clone(&checked);
    promise.register_on_error_check(move || flag.set(true));

    assert!(promise.error().is_none());
    assert!(!checked.get(), "Looking at a pending promise is not a check");

    promise.fail(Error::msg("inspected")).unwrap();
    assert!(promise.is_settled());
    assert!(AnyPromise::peek_error(&promise).is_some());
    assert!(!checked.get(), "Settlement state and peeking are not checks");

    assert!(promise.failed());
    assert!(checked.get());
    assert_eq!(promise.error().map(|error| error.to_string()).as_deref(), Some("inspected"));

    let again = Rc::new(Cell::new(false));
    let flag = Rc::clone(&again);
    promise.register_on_error_check(move || flag.set(true));
    assert!(again.get(), "Registering after a check fires immediately");
}

#[tokio::test]
async fn awaiting_a_settled_promise() {
    let promise = Promise::new();
    promise.complete("done".to_string()).unwrap();

    let result = promise.clone().await;
    assert_eq!(result.unwrap(), "done");
}

#[tokio::test]
async fn awaiting_a_disposed_promise() {
    let promise = Promise::<u8>::new();
    let awaited = promise.clone().into_future();
    promise.dispose();

    assert!(
        matches!(awaited.await, Err(Error::Disposed)),
        "Disposal should resolve the future with Disposed"
    );
}
