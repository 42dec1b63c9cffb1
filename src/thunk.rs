//! Drives a [`Task`] one step at a time.
//!
//! A `Thunk` owns a task, the promise it settles when the task finishes and at
//! most one wake condition: the promise the task is currently waiting on. Each
//! step resumes the task once and interprets the yielded [`Yielded`] value to
//! decide what to wait on next. Steps are always queued on the scheduler, never
//! called directly, so a cascade of settled promises can not recurse into the
//! task.
//!
//! Wake conditions come in two flavours. A *propagating* one (a yielded
//! promise or nested task) fails the thunk as soon as it fails. A *discarding*
//! one (a promise handed out by the next-value callback) only wakes the thunk
//! and leaves the failure for the task to inspect.
//!
//! A failed propagating wake condition whose outcome nobody inspected is never
//! silently dropped: when it is replaced, or when the next step begins, the
//! thunk fails with that error instead of carrying on.

use std::{
    any::Any,
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

use crate::{
    AnyPromise, Disposable, Error, ExecutionPolicy, Outcome, Promise, Schedulable, Scheduler,
    Task, Yielded,
    scheduler::WeakScheduler,
    schedulable::DynSchedulable,
};

type NextValueCallback = Rc<dyn Fn(Box<dyn Any>) -> Option<Box<dyn AnyPromise>>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WakeMode {
    Propagating,
    Discarding,
}

struct WakeCondition {
    promise: Box<dyn AnyPromise>,
    mode: WakeMode,
    // Set once a consumer inspects the outcome of `promise`.
    checked: Rc<Cell<bool>>,
}

struct ThunkInner<T> {
    name: String,
    task: Option<Box<dyn Task<Output = T>>>,
    future: Option<Promise<T>>,
    scheduler: Option<WeakScheduler>,
    wake: Option<WakeCondition>,
    previous: Option<WakeCondition>,
    // Bumped for every new wake condition so late wake-ups can be told apart.
    generation: u64,
    on_next_value: Option<NextValueCallback>,
    disposed: bool,
}

/// Drives a task's sequence of control values on a [`Scheduler`].
///
/// A thunk is started with [`Scheduler::start`]; the promise returned from
/// there settles with the task's result. Once that promise settles the task
/// and any wake condition are released.
pub struct Thunk<T> {
    inner: Rc<RefCell<ThunkInner<T>>>,
}

impl<T: Default + 'static> Thunk<T> {
    /// Wraps `task` in a new thunk.
    pub fn new(task: impl Task<Output = T> + 'static) -> Self {
        Thunk {
            inner: Rc::new(RefCell::new(ThunkInner {
                name: task.name(),
                task: Some(Box::new(task)),
                future: None,
                scheduler: None,
                wake: None,
                previous: None,
                generation: 0,
                on_next_value: None,
                disposed: false,
            })),
        }
    }

    /// Overrides the name used in logs and errors.
    pub fn named(self, name: impl Into<String>) -> Self {
        self.inner.borrow_mut().name = name.into();
        self
    }

    /// Sets the callback that turns [`Yielded::NextValue`] payloads into
    /// promises to wait on.
    ///
    /// Returning `None` resumes the task on the next tick.
    pub fn on_next_value(
        self,
        callback: impl Fn(Box<dyn Any>) -> Option<Box<dyn AnyPromise>> + 'static,
    ) -> Self {
        self.inner.borrow_mut().on_next_value = Some(Rc::new(callback));
        self
    }

    /// The name of the driven task.
    #[must_use]
    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    /// Returns `true` once the thunk released its task.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.borrow().disposed
    }

    /// Cancels the thunk.
    ///
    /// Disposes the active wake condition, which cascades into whatever it
    /// represents, drops the task and disposes the thunk's promise if it is
    /// still pending. Calling it again has no effect.
    pub fn dispose(&self) {
        let (wake, task, future, name) = {
            let mut inner = self.inner.borrow_mut();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            inner.previous = None;
            inner.on_next_value = None;
            (
                inner.wake.take(),
                inner.task.take(),
                inner.future.take(),
                inner.name.clone(),
            )
        };
        log::debug!("disposing task {name}");
        if let Some(wake) = wake {
            wake.promise.dispose();
        }
        drop(task);
        if let Some(future) = future {
            future.dispose();
        }
    }

    fn scheduler(&self) -> Option<Scheduler> {
        self.inner
            .borrow()
            .scheduler
            .as_ref()
            .and_then(WeakScheduler::upgrade)
    }

    fn queue_step(&self) {
        let Some(scheduler) = self.scheduler() else {
            return;
        };
        let this = self.clone();
        scheduler.queue_work_item(move || this.step());
    }

    fn step(&self) {
        let mut task = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            if inner.disposed {
                return;
            }
            let Some(task) = inner.task.take() else {
                return;
            };
            if let Some(wake) = inner.wake.take() {
                inner.previous = Some(wake);
            }
            task
        };

        if self.check_for_discarded_error() {
            return;
        }

        log::trace!("resuming task {}", self.name());
        let resumed = task.resume();

        let mut inner = self.inner.borrow_mut();
        if inner.disposed {
            // Disposed while the task was running.
            drop(inner);
            drop(task);
            return;
        }
        inner.task = Some(task);
        drop(inner);

        match resumed {
            None => self.complete_with(T::default()),
            Some(Err(error)) => self.abort(error),
            Some(Ok(value)) => self.schedule_next_step(value),
        }
    }

    fn schedule_next_step(&self, value: Yielded<T>) {
        if self.check_for_discarded_error() {
            return;
        }
        log::trace!("task {} yielded {}", self.name(), value.kind());

        match value {
            Yielded::Nothing | Yielded::Yield => self.queue_step(),
            Yielded::WaitForNextStep => {
                if let Some(scheduler) = self.scheduler() {
                    let this = self.clone();
                    scheduler.add_step_listener(move || this.queue_step());
                }
            }
            Yielded::Schedulable(schedulable) => self.wait_on_schedulable(schedulable),
            Yielded::Sequence(task) => self.wait_on_schedulable(task.into_schedulable()),
            Yielded::NextValue(payload) => {
                let callback = self.inner.borrow().on_next_value.clone();
                match callback.and_then(|callback| callback(payload)) {
                    Some(promise) => {
                        self.wait_on(promise, WakeMode::Discarding);
                    }
                    None => self.queue_step(),
                }
            }
            Yielded::Future(promise) => {
                self.wait_on(promise, WakeMode::Propagating);
            }
            Yielded::Result(value) => self.complete_with(value),
        }
    }

    fn wait_on_schedulable(&self, schedulable: Box<dyn DynSchedulable>) {
        let Some(scheduler) = self.scheduler() else {
            return;
        };
        let promise = schedulable.start_dyn(&scheduler, ExecutionPolicy::RunWhileFutureLives);
        // Work started here has no other owner.
        if !self.wait_on(promise.clone_handle(), WakeMode::Propagating) {
            promise.dispose();
        }
    }

    // Returns `false` if the thunk aborted or was disposed instead of waiting.
    // The promise is left untouched in that case.
    fn wait_on(&self, promise: Box<dyn AnyPromise>, mode: WakeMode) -> bool {
        let Some(generation) = self.set_wake_condition(promise.clone_handle(), mode) else {
            return false;
        };
        let this = self.clone();
        promise.register_on_settled(Box::new(move |failure| {
            this.on_wake_settled(generation, mode, failure);
        }));
        true
    }

    // Returns the generation of the new wake condition, or `None` if the
    // thunk was aborted or disposed instead.
    fn set_wake_condition(&self, promise: Box<dyn AnyPromise>, mode: WakeMode) -> Option<u64> {
        {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            if let Some(wake) = inner.wake.take() {
                inner.previous = Some(wake);
            }
        }
        if self.check_for_discarded_error() {
            return None;
        }

        let checked = Rc::new(Cell::new(false));
        let flag = Rc::clone(&checked);
        promise.register_on_error_check(Box::new(move || flag.set(true)));

        let mut inner = self.inner.borrow_mut();
        if inner.disposed {
            return None;
        }
        inner.generation += 1;
        inner.wake = Some(WakeCondition {
            promise,
            mode,
            checked,
        });
        Some(inner.generation)
    }

    fn on_wake_settled(&self, generation: u64, mode: WakeMode, failure: Option<Error>) {
        if let (WakeMode::Propagating, Some(error)) = (mode, failure) {
            self.abort(error);
            return;
        }

        let current = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            if inner.disposed || inner.generation != generation {
                false
            } else {
                if let Some(wake) = inner.wake.take() {
                    inner.previous = Some(wake);
                }
                true
            }
        };
        if current {
            self.queue_step();
        }
    }

    fn check_for_discarded_error(&self) -> bool {
        let discarded = {
            let mut inner = self.inner.borrow_mut();
            let error = match &inner.previous {
                Some(wake) if wake.mode == WakeMode::Propagating && !wake.checked.get() => {
                    wake.promise.peek_error()
                }
                _ => None,
            };
            if error.is_some() {
                inner.previous = None;
            }
            error
        };
        match discarded {
            Some(error) => {
                log::warn!(
                    "task {} discarded a failed wake condition: {error}",
                    self.name()
                );
                self.abort(error);
                true
            }
            None => false,
        }
    }

    fn complete_with(&self, value: T) {
        if self.check_for_discarded_error() {
            return;
        }
        self.finish(Ok(value));
    }

    fn abort(&self, error: Error) {
        self.finish(Err(error));
    }

    fn finish(&self, outcome: Outcome<T>) {
        let (future, name) = {
            let mut inner = self.inner.borrow_mut();
            (inner.future.take(), inner.name.clone())
        };
        if let Some(future) = &future {
            match &outcome {
                Ok(_) => log::debug!("task {name} completed"),
                Err(error) => log::debug!("task {name} failed: {error}"),
            }
            let _ = future.settle(outcome);
        }
        self.dispose();
        if let Some(future) = future {
            future.dispose();
        }
    }
}

impl<T> Clone for Thunk<T> {
    fn clone(&self) -> Self {
        Thunk {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Default + 'static> Schedulable for Thunk<T> {
    type Output = T;

    /// Binds the thunk to `future` and queues its first step.
    ///
    /// A thunk runs its task once. Starting it again, through a clone for
    /// example, fails the new promise with [`Error::AlreadyStarted`] and leaves
    /// the running thunk alone.
    fn schedule(self, scheduler: &Scheduler, future: Promise<T>) -> Box<dyn Disposable> {
        let (disposed, started, name) = {
            let mut inner = self.inner.borrow_mut();
            let disposed = inner.disposed;
            let started = inner.scheduler.is_some();
            if !disposed && !started {
                inner.future = Some(future.clone());
                inner.scheduler = Some(scheduler.downgrade());
            }
            (disposed, started, inner.name.clone())
        };
        if disposed {
            future.dispose();
        } else if started {
            log::warn!("task {name} was started twice");
            let _ = future.fail(Error::AlreadyStarted { task: name });
            return Box::new(future);
        } else {
            self.queue_step();
        }
        Box::new(self)
    }
}

impl<T: Default + 'static> Disposable for Thunk<T> {
    fn dispose(&self) {
        Thunk::dispose(self);
    }
}

impl<T> fmt::Debug for Thunk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        let waiting_on = match &inner.wake {
            Some(wake) if wake.promise.is_settled() => "a settled promise",
            Some(_) => "a pending promise",
            None => "nothing",
        };
        write!(f, "<Task {} waiting on {waiting_on}>", inner.name)
    }
}
