//! Single-assignment result cells and the handles used to wait on them.
//!
//! A [`Promise`] starts out pending and is settled exactly once, either with a
//! value, with an [`Error`], or by being disposed. Completion callbacks run
//! synchronously at the point of settlement; callbacks registered afterwards
//! run immediately with the outcome that is already known, so no waiter can
//! miss a result regardless of registration order.
//!
//! Promises are cheap `Rc` handles. They are meant to be shared between the
//! code that settles them and any number of waiters on the same thread.

use std::{
    cell::RefCell,
    fmt,
    future::IntoFuture,
    mem,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use futures::channel::oneshot;
use pin_project_lite::pin_project;

use crate::{Error, Outcome};

type CompleteCallback<T> = Box<dyn FnOnce(&Outcome<T>)>;
type Callback = Box<dyn FnOnce()>;

/// Something that owns resources which can be released early.
///
/// Disposal must be idempotent: calling it more than once has no further effect.
pub trait Disposable {
    /// Releases the resources held by this value.
    fn dispose(&self);
}

/// A type-erased view of a [`Promise`].
///
/// Thunks wait on promises of any output type through this trait. None of its
/// methods count as inspecting the outcome.
pub trait AnyPromise: Disposable {
    /// Returns `true` once the promise completed or failed.
    fn is_settled(&self) -> bool;

    /// Returns the failure, if any, without marking it as inspected.
    fn peek_error(&self) -> Option<Error>;

    /// Registers a callback receiving the failure (or `None` on success) once
    /// the promise settles.
    fn register_on_settled(&self, callback: Box<dyn FnOnce(Option<Error>)>);

    /// Registers the callback fired when a consumer first inspects the outcome.
    fn register_on_error_check(&self, callback: Box<dyn FnOnce()>);

    /// Returns another handle to the same promise.
    fn clone_handle(&self) -> Box<dyn AnyPromise>;
}

enum State<T> {
    Pending,
    Settled(Rc<Outcome<T>>),
    Disposed,
}

struct Inner<T> {
    state: State<T>,
    on_complete: Vec<CompleteCallback<T>>,
    on_dispose: Vec<Callback>,
    on_error_check: Option<Callback>,
    error_checked: bool,
}

/// A single-assignment result container with completion callbacks.
///
/// A `Promise` moves from pending to exactly one of completed, failed or
/// disposed. Clones share the same cell.
pub struct Promise<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T: 'static> Promise<T> {
    /// Creates a pending promise.
    #[must_use]
    pub fn new() -> Self {
        Promise {
            inner: Rc::new(RefCell::new(Inner {
                state: State::Pending,
                on_complete: Vec::new(),
                on_dispose: Vec::new(),
                on_error_check: None,
                error_checked: false,
            })),
        }
    }

    /// Creates a promise that is already completed with `value`.
    #[must_use]
    pub fn from_value(value: T) -> Self {
        let promise = Self::new();
        let _ = promise.complete(value);
        promise
    }

    /// Creates a promise that has already failed with `error`.
    #[must_use]
    pub fn from_error(error: Error) -> Self {
        let promise = Self::new();
        let _ = promise.fail(error);
        promise
    }

    /// Completes the promise with `value`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadySettled`] if the promise already completed or
    /// failed. Completing a disposed promise is silently ignored.
    pub fn complete(&self, value: T) -> Result<(), Error> {
        self.settle(Ok(value))
    }

    /// Fails the promise with `error`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadySettled`] if the promise already completed or
    /// failed. Failing a disposed promise is silently ignored.
    pub fn fail(&self, error: Error) -> Result<(), Error> {
        self.settle(Err(error))
    }

    /// Settles the promise with either a value or an error.
    ///
    /// All completion callbacks run before this method returns, in the order
    /// they were registered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadySettled`] if the promise already completed or
    /// failed.
    pub fn settle(&self, outcome: Outcome<T>) -> Result<(), Error> {
        let (outcome, callbacks, stale) = {
            let mut inner = self.inner.borrow_mut();
            match inner.state {
                State::Pending => {}
                State::Disposed => return Ok(()),
                State::Settled(_) => return Err(Error::AlreadySettled),
            }
            let outcome = Rc::new(outcome);
            inner.state = State::Settled(Rc::clone(&outcome));
            (
                outcome,
                mem::take(&mut inner.on_complete),
                mem::take(&mut inner.on_dispose),
            )
        };
        drop(stale);
        for callback in callbacks {
            callback(&outcome);
        }
        Ok(())
    }

    /// Disposes the promise.
    ///
    /// A pending promise becomes disposed and its dispose callbacks run. A
    /// promise that already settled only drops its registered callbacks.
    pub fn dispose(&self) {
        let (on_dispose, stale) = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            let stale = (
                mem::take(&mut inner.on_complete),
                inner.on_error_check.take(),
            );
            if matches!(inner.state, State::Pending) {
                inner.state = State::Disposed;
                (mem::take(&mut inner.on_dispose), stale)
            } else {
                inner.on_dispose.clear();
                (Vec::new(), stale)
            }
        };
        drop(stale);
        for callback in on_dispose {
            callback();
        }
    }

    /// Registers a callback that receives the outcome once the promise settles.
    ///
    /// If the promise already settled the callback runs before this method
    /// returns. Callbacks registered on a disposed promise never run.
    pub fn register_on_complete(&self, callback: impl FnOnce(&Outcome<T>) + 'static) {
        let outcome = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            match &inner.state {
                State::Pending => {
                    inner.on_complete.push(Box::new(callback));
                    return;
                }
                State::Settled(outcome) => Rc::clone(outcome),
                State::Disposed => return,
            }
        };
        callback(&outcome);
    }

    /// Registers a callback that runs if the promise is disposed while pending.
    ///
    /// Runs immediately if the promise is already disposed. The callback is
    /// dropped without running once the promise completes or fails.
    pub fn register_on_dispose(&self, callback: impl FnOnce() + 'static) {
        {
            let mut inner = self.inner.borrow_mut();
            match inner.state {
                State::Pending => {
                    inner.on_dispose.push(Box::new(callback));
                    return;
                }
                State::Settled(_) => return,
                State::Disposed => {}
            }
        }
        callback();
    }

    /// Sets the callback fired the first time a consumer inspects the outcome.
    ///
    /// There is a single slot: registering again replaces the previous callback.
    /// Runs immediately if the outcome was already inspected.
    pub fn register_on_error_check(&self, callback: impl FnOnce() + 'static) {
        {
            let mut inner = self.inner.borrow_mut();
            if !inner.error_checked {
                inner.on_error_check = Some(Box::new(callback));
                return;
            }
        }
        callback();
    }

    /// Returns `true` once the promise completed or failed.
    ///
    /// This does not count as inspecting the outcome.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self.inner.borrow().state, State::Settled(_))
    }

    /// Returns `true` if the promise was disposed before it settled.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        matches!(self.inner.borrow().state, State::Disposed)
    }

    /// Returns the shared outcome if the promise settled.
    pub fn outcome(&self) -> Option<Rc<Outcome<T>>> {
        let outcome = match &self.inner.borrow().state {
            State::Settled(outcome) => Some(Rc::clone(outcome)),
            _ => None,
        };
        if outcome.is_some() {
            self.mark_error_checked();
        }
        outcome
    }

    /// Returns `true` if the promise completed successfully.
    #[must_use]
    pub fn completed(&self) -> bool {
        self.outcome().is_some_and(|outcome| outcome.is_ok())
    }

    /// Returns `true` if the promise failed.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.outcome().is_some_and(|outcome| outcome.is_err())
    }

    /// Returns the failure, if the promise failed.
    pub fn error(&self) -> Option<Error> {
        self.outcome()
            .and_then(|outcome| (*outcome).as_ref().err().cloned())
    }

    /// Returns a copy of the outcome, if the promise settled.
    pub fn result(&self) -> Option<Outcome<T>>
    where
        T: Clone,
    {
        self.outcome().map(|outcome| (*outcome).clone())
    }

    pub(crate) fn peek_error(&self) -> Option<Error> {
        match &self.inner.borrow().state {
            State::Settled(outcome) => (**outcome).as_ref().err().cloned(),
            _ => None,
        }
    }

    fn mark_error_checked(&self) {
        let callback = {
            let mut inner = self.inner.borrow_mut();
            if inner.error_checked {
                return;
            }
            inner.error_checked = true;
            inner.on_error_check.take()
        };
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.inner.borrow().state {
            State::Pending => "pending",
            State::Settled(outcome) if outcome.is_ok() => "completed",
            State::Settled(_) => "failed",
            State::Disposed => "disposed",
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}

impl<T: 'static> Disposable for Promise<T> {
    fn dispose(&self) {
        Promise::dispose(self);
    }
}

impl<T: 'static> AnyPromise for Promise<T> {
    fn is_settled(&self) -> bool {
        Promise::is_settled(self)
    }

    fn peek_error(&self) -> Option<Error> {
        Promise::peek_error(self)
    }

    fn register_on_settled(&self, callback: Box<dyn FnOnce(Option<Error>)>) {
        self.register_on_complete(move |outcome| callback(outcome.as_ref().err().cloned()));
    }

    fn register_on_error_check(&self, callback: Box<dyn FnOnce()>) {
        Promise::register_on_error_check(self, callback);
    }

    fn clone_handle(&self) -> Box<dyn AnyPromise> {
        Box::new(self.clone())
    }
}

impl<T: Clone + 'static> IntoFuture for Promise<T> {
    type Output = Outcome<T>;
    type IntoFuture = Settled<T>;

    /// Bridges the promise into `async` code.
    ///
    /// Awaiting counts as inspecting the outcome. Resolves to
    /// `Err(Error::Disposed)` if the promise is disposed instead of settled.
    fn into_future(self) -> Settled<T> {
        let (sender, receiver) = oneshot::channel();
        self.mark_error_checked();
        self.register_on_complete(move |outcome| {
            let _ = sender.send(outcome.clone());
        });
        Settled { receiver }
    }
}

pin_project! {
    /// A future resolving to the outcome of a [`Promise`].
    ///
    /// Created by awaiting a promise. The promise itself still has to be
    /// settled by the scheduler that drives it.
    #[must_use = "futures do nothing unless polled or .awaited"]
    pub struct Settled<T> {
        #[pin]
        receiver: oneshot::Receiver<Outcome<T>>,
    }
}

impl<T> Future for Settled<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project()
            .receiver
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::Disposed)))
    }
}
