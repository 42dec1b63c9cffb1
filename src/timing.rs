//! Timing utilities for scheduled work.
//!
//! Provides schedulables driven by the scheduler's timer heap. They let a
//! task sleep, postpone nested work, or bound how long nested work may take.
//! A deadline counts from the moment the schedulable is started, not from
//! when it was constructed.

use std::{
    cell::RefCell,
    rc::Rc,
    time::{Duration, Instant},
};

use crate::{
    Disposable, Error, ExecutionPolicy, Promise, Schedulable, Scheduler,
    scheduler::TimerHandle,
};

/// Completes with `()` once the given duration has elapsed.
///
/// Disposing the promise cancels the timer.
///
/// # Example
/// ```
/// # use std::time::Duration;
/// # use coflow::{Scheduler, timing::Sleep};
/// let scheduler = Scheduler::new();
/// scheduler.block_on(Sleep::new(Duration::from_millis(5))).unwrap();
/// ```
#[derive(Clone, Copy, Debug)]
#[must_use = "schedulables do nothing unless started"]
pub struct Sleep {
    duration: Duration,
}

impl Sleep {
    /// Creates a sleep lasting `duration`.
    pub fn new(duration: Duration) -> Self {
        Sleep { duration }
    }
}

impl Schedulable for Sleep {
    type Output = ();

    fn schedule(self, scheduler: &Scheduler, future: Promise<()>) -> Box<dyn Disposable> {
        let timer = scheduler.add_timer(Instant::now() + self.duration, move || {
            let _ = future.complete(());
        });
        Box::new(timer)
    }
}

/// Starts the inner schedulable only after a delay.
///
/// The promise settles with whatever the inner work settles with. Disposing it
/// before the delay elapsed means the inner work never starts.
///
/// A more convenient way to construct this is the
/// [`delay()`](crate::task_ext::SchedulableExt::delay) operator.
#[must_use = "schedulables do nothing unless started"]
pub struct Delay<S> {
    schedulable: S,
    delay: Duration,
}

impl<S> Delay<S> {
    /// Delays `schedulable` by `delay`.
    pub fn new(schedulable: S, delay: Duration) -> Self {
        Delay { schedulable, delay }
    }

    /// Consumes the `Delay` and returns the inner schedulable.
    pub fn inner(self) -> S {
        self.schedulable
    }
}

struct DelayDriver<T> {
    timer: TimerHandle,
    started: Rc<RefCell<Option<Promise<T>>>>,
}

impl<T: 'static> Disposable for DelayDriver<T> {
    fn dispose(&self) {
        self.timer.cancel();
        let started = self.started.borrow_mut().take();
        if let Some(inner) = started {
            inner.dispose();
        }
    }
}

impl<S> Schedulable for Delay<S>
where
    S: Schedulable,
    S::Output: Clone,
{
    type Output = S::Output;

    fn schedule(self, scheduler: &Scheduler, future: Promise<S::Output>) -> Box<dyn Disposable> {
        let started = Rc::new(RefCell::new(None));
        let weak = scheduler.downgrade();
        let schedulable = self.schedulable;
        let timer = scheduler.add_timer(Instant::now() + self.delay, {
            let started = Rc::clone(&started);
            move || {
                let Some(scheduler) = weak.upgrade() else {
                    return;
                };
                let inner = scheduler.start(schedulable, ExecutionPolicy::RunWhileFutureLives);
                inner.register_on_complete(move |outcome| {
                    let _ = future.settle(outcome.clone());
                });
                *started.borrow_mut() = Some(inner);
            }
        });
        Box::new(DelayDriver { timer, started })
    }
}

/// Bounds how long the inner schedulable may run.
///
/// If the inner work does not settle within the time limit it is disposed and
/// the promise fails with [`Error::TimedOut`]. Otherwise the inner outcome is
/// forwarded unchanged.
///
/// For a more ergonomic way to create a timeout, consider using the
/// [`timeout()`](crate::task_ext::SchedulableExt::timeout) operator.
#[must_use = "schedulables do nothing unless started"]
pub struct Timeout<S> {
    schedulable: S,
    time_limit: Duration,
}

impl<S> Timeout<S> {
    /// Limits `schedulable` to `time_limit`.
    pub fn new(schedulable: S, time_limit: Duration) -> Self {
        Timeout {
            schedulable,
            time_limit,
        }
    }

    /// Consumes the `Timeout` and returns the inner schedulable.
    pub fn inner(self) -> S {
        self.schedulable
    }
}

struct TimeoutDriver<T> {
    timer: TimerHandle,
    inner: Promise<T>,
}

impl<T: 'static> Disposable for TimeoutDriver<T> {
    fn dispose(&self) {
        self.timer.cancel();
        self.inner.dispose();
    }
}

impl<S> Schedulable for Timeout<S>
where
    S: Schedulable,
    S::Output: Clone,
{
    type Output = S::Output;

    fn schedule(self, scheduler: &Scheduler, future: Promise<S::Output>) -> Box<dyn Disposable> {
        let time_limit = self.time_limit;
        let inner = scheduler.start(self.schedulable, ExecutionPolicy::RunWhileFutureLives);

        let timer = scheduler.add_timer(Instant::now() + time_limit, {
            let inner = inner.clone();
            let future = future.clone();
            move || {
                if inner.is_settled() {
                    return;
                }
                log::debug!("timed out after {time_limit:?}");
                inner.dispose();
                let _ = future.fail(Error::TimedOut(time_limit));
            }
        });

        inner.register_on_complete({
            let timer = timer.clone();
            move |outcome| {
                timer.cancel();
                let _ = future.settle(outcome.clone());
            }
        });

        Box::new(TimeoutDriver { timer, inner })
    }
}
