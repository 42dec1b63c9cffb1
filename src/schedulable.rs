//! Things a [`Scheduler`] knows how to drive.
//!
//! A [`Schedulable`] binds a driver to the promise the scheduler hands it and
//! returns a handle the scheduler can dispose when the promise is abandoned.
//! [`DynSchedulable`] is the object-safe form tasks use to yield nested work.
//!
//! The marker types at the bottom of this module are the control values a
//! dynamically typed task may produce; see [`DynamicTask`](crate::task::DynamicTask).

use std::any::Any;

use crate::{AnyPromise, Disposable, ExecutionPolicy, Promise, Scheduler};

/// A unit of work that can be started on a [`Scheduler`].
pub trait Schedulable: 'static {
    /// The value the work settles its promise with.
    type Output: 'static;

    /// Starts driving the work, settling `future` when it is done.
    ///
    /// The returned driver is disposed by the scheduler if `future` is
    /// abandoned under [`ExecutionPolicy::RunWhileFutureLives`].
    fn schedule(self, scheduler: &Scheduler, future: Promise<Self::Output>) -> Box<dyn Disposable>;
}

/// Object-safe form of [`Schedulable`] with the output type erased.
pub trait DynSchedulable {
    /// Starts the boxed schedulable and returns a handle to its promise.
    fn start_dyn(self: Box<Self>, scheduler: &Scheduler, policy: ExecutionPolicy) -> Box<dyn AnyPromise>;
}

impl<S: Schedulable> DynSchedulable for S {
    fn start_dyn(self: Box<Self>, scheduler: &Scheduler, policy: ExecutionPolicy) -> Box<dyn AnyPromise> {
        Box::new(scheduler.start(*self, policy))
    }
}

/// Requests an immediate re-queue, letting other pending work run first.
#[derive(Clone, Copy, Debug, Default)]
pub struct Yield;

/// Requests a resume once the scheduler has finished its current tick.
#[derive(Clone, Copy, Debug, Default)]
pub struct WaitForNextStep;

/// Asks the thunk's next-value callback for a promise to wait on.
pub struct NextValue(pub Box<dyn Any>);

/// Ends the task with a value.
#[derive(Clone, Debug)]
pub struct TaskResult<T>(pub T);
