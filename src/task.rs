//! Defines the `Task` trait and the control values a task yields.
//!
//! A task is a resumable producer of [`Yielded`] values. Each resumption
//! either yields the next control value, reports that the sequence is
//! exhausted, or fails. The [`Thunk`](crate::Thunk) driving the task decides
//! from each yielded value what to wait on before resuming it again.
//!
//! Any iterator over `Result<Yielded<T>, Error>` is a task, so hand-written
//! state machines and `std::iter::from_fn` closures both work:
//!
//! ```
//! # use coflow::{Error, Scheduler, Thunk, Yielded};
//! let scheduler = Scheduler::new();
//! let steps: Vec<Result<Yielded<i32>, Error>> = vec![Ok(Yielded::Yield), Ok(Yielded::Result(42))];
//! let result = scheduler.block_on(Thunk::new(steps.into_iter()));
//! assert_eq!(result.unwrap(), 42);
//! ```

use std::{any::Any, fmt, marker::PhantomData};

use crate::{
    AnyPromise, Error, Promise, Thunk,
    schedulable::{self, DynSchedulable, NextValue, Schedulable, TaskResult},
};

/// A resumable sequence of control values.
pub trait Task {
    /// The value the task finishes with.
    type Output: 'static;

    /// Resumes the task once.
    ///
    /// Returns `None` when the sequence is exhausted, `Some(Err(_))` when the
    /// task failed and `Some(Ok(_))` with the next control value otherwise.
    fn resume(&mut self) -> Option<Result<Yielded<Self::Output>, Error>>;

    /// A human readable name used in logs and errors.
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_owned()
    }
}

impl<I, T> Task for I
where
    I: Iterator<Item = Result<Yielded<T>, Error>>,
    T: 'static,
{
    type Output = T;

    fn resume(&mut self) -> Option<Result<Yielded<T>, Error>> {
        self.next()
    }
}

/// Object-safe form of [`Task`] used to yield a nested, not yet wrapped task.
pub trait DynTask {
    /// Wraps the task in a [`Thunk`] so it can be started.
    fn into_schedulable(self: Box<Self>) -> Box<dyn DynSchedulable>;
}

impl<K> DynTask for K
where
    K: Task + 'static,
    K::Output: Default,
{
    fn into_schedulable(self: Box<Self>) -> Box<dyn DynSchedulable> {
        Box::new(Thunk::new(*self))
    }
}

/// A control value yielded by a task.
///
/// Every kind of instruction a task can give its thunk has its own arm.
pub enum Yielded<T> {
    /// Resume on the next tick without waiting on anything.
    Nothing,

    /// Let other pending work run for one tick, then resume.
    Yield,

    /// Resume after the scheduler finishes its current tick.
    WaitForNextStep,

    /// Start nested work and resume when it settles. A failure of the nested
    /// work fails this task.
    Schedulable(Box<dyn DynSchedulable>),

    /// Wrap a nested task in a thunk, then behave like `Schedulable`.
    Sequence(Box<dyn DynTask>),

    /// Ask the thunk's next-value callback for a promise to wait on. A failure
    /// of that promise is left for the task to inspect.
    NextValue(Box<dyn Any>),

    /// Wait on a promise. If it fails, this task fails with the same error.
    Future(Box<dyn AnyPromise>),

    /// Finish the task with a value.
    Result(T),
}

impl<T> Yielded<T> {
    /// Waits on `promise`.
    pub fn wait<U: 'static>(promise: &Promise<U>) -> Self {
        Yielded::Future(Box::new(promise.clone()))
    }

    /// Starts `schedulable` as nested work and waits on it.
    pub fn schedule(schedulable: impl Schedulable) -> Self {
        Yielded::Schedulable(Box::new(schedulable))
    }

    /// Runs `task` as a nested task and waits on it.
    pub fn sequence<K>(task: K) -> Self
    where
        K: Task + 'static,
        K::Output: Default,
    {
        Yielded::Sequence(Box::new(task))
    }

    /// Passes `payload` to the next-value callback.
    pub fn next_value(payload: impl Any) -> Self {
        Yielded::NextValue(Box::new(payload))
    }

    /// Short name of the control value kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Yielded::Nothing => "nothing",
            Yielded::Yield => "yield",
            Yielded::WaitForNextStep => "wait-for-next-step",
            Yielded::Schedulable(_) => "schedulable",
            Yielded::Sequence(_) => "sequence",
            Yielded::NextValue(_) => "next-value",
            Yielded::Future(_) => "future",
            Yielded::Result(_) => "result",
        }
    }
}

impl<T: 'static> Yielded<T> {
    /// Converts a type-erased value into a control value.
    ///
    /// Recognizes `()`, the markers from [`schedulable`], `TaskResult<T>` and
    /// boxed `dyn AnyPromise`, `dyn DynSchedulable` and `dyn DynTask` values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedYieldValue`] naming `task` for anything else.
    pub fn from_dynamic(value: Box<dyn Any>, task: &str) -> Result<Self, Error> {
        if value.is::<()>() {
            return Ok(Yielded::Nothing);
        }
        if value.is::<schedulable::Yield>() {
            return Ok(Yielded::Yield);
        }
        if value.is::<schedulable::WaitForNextStep>() {
            return Ok(Yielded::WaitForNextStep);
        }
        let value = match value.downcast::<NextValue>() {
            Ok(next) => return Ok(Yielded::NextValue(next.0)),
            Err(value) => value,
        };
        let value = match value.downcast::<TaskResult<T>>() {
            Ok(result) => return Ok(Yielded::Result(result.0)),
            Err(value) => value,
        };
        let value = match value.downcast::<Box<dyn AnyPromise>>() {
            Ok(promise) => return Ok(Yielded::Future(*promise)),
            Err(value) => value,
        };
        let value = match value.downcast::<Box<dyn DynSchedulable>>() {
            Ok(schedulable) => return Ok(Yielded::Schedulable(*schedulable)),
            Err(value) => value,
        };
        match value.downcast::<Box<dyn DynTask>>() {
            Ok(task) => Ok(Yielded::Sequence(*task)),
            Err(_) => Err(Error::UnsupportedYieldValue {
                task: task.to_owned(),
            }),
        }
    }
}

impl<T> fmt::Debug for Yielded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Yielded::{}", self.kind())
    }
}

/// A task producing type-erased values, converted with [`Yielded::from_dynamic`].
///
/// Useful when control values come from code that cannot name `Yielded<T>`,
/// such as an embedded script. A value of an unrecognized kind fails the task
/// with [`Error::UnsupportedYieldValue`].
pub struct DynamicTask<I, T> {
    name: String,
    values: I,
    _output: PhantomData<fn() -> T>,
}

impl<I, T> DynamicTask<I, T>
where
    I: Iterator<Item = Result<Box<dyn Any>, Error>>,
{
    /// Creates a task named `name` over `values`.
    pub fn new(name: impl Into<String>, values: I) -> Self {
        Self {
            name: name.into(),
            values,
            _output: PhantomData,
        }
    }
}

impl<I, T> Task for DynamicTask<I, T>
where
    I: Iterator<Item = Result<Box<dyn Any>, Error>>,
    T: 'static,
{
    type Output = T;

    fn resume(&mut self) -> Option<Result<Yielded<T>, Error>> {
        let value = self.values.next()?;
        Some(value.and_then(|value| Yielded::from_dynamic(value, &self.name)))
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}
