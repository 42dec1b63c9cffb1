//! Provides the `Scheduler` that owns the run loop tasks are driven on.
//!
//! A scheduler holds a FIFO queue of work items, a list of one-shot step
//! listeners and a heap of timers. Everything runs on the thread that owns the
//! scheduler: work items execute strictly one after another, each to
//! completion, and no two steps of any task ever overlap.
//!
//! The loop advances in ticks. A tick first moves expired timers into the
//! queue, then runs the work items that were queued when the tick began, and
//! finally fires the step listeners registered before that point. Work queued
//! during a tick runs in the next one.
//!
//! Independent schedulers share no state, so parallelism is achieved by
//! running one scheduler per thread.

use std::{
    cell::{Cell, RefCell},
    cmp::Ordering,
    collections::{BinaryHeap, VecDeque},
    fmt, mem,
    rc::{Rc, Weak},
    thread,
    time::{Duration, Instant},
};

use crate::{Disposable, Error, Outcome, Promise, Schedulable, Task, Thunk};

type WorkItem = Box<dyn FnOnce()>;

/// Decides what happens to a started schedulable when its promise is disposed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutionPolicy {
    /// Disposing the returned promise tears down the running work.
    #[default]
    RunWhileFutureLives,

    /// The work keeps running even if nobody awaits the promise anymore.
    /// Failures are reported through the `log` facade.
    RunAsBackgroundTask,
}

/// Configuration for a [`Scheduler`].
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// # use coflow::SchedulerBuilder;
/// let scheduler = SchedulerBuilder::new()
///     .name("io")
///     .idle_poll_interval(Duration::from_millis(5))
///     .build();
/// assert_eq!(scheduler.name(), "io");
/// ```
#[derive(Clone, Debug)]
pub struct SchedulerBuilder {
    name: String,
    queue_capacity: usize,
    idle_poll_interval: Duration,
}

impl SchedulerBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            name: "scheduler".to_owned(),
            queue_capacity: 16,
            idle_poll_interval: Duration::from_millis(1),
        }
    }

    /// Sets the name used in log records emitted by the scheduler.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the initial capacity of the work-item queue.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets how long the run loop sleeps between ticks when only step
    /// listeners are pending, such as I/O operations polling for readiness.
    pub fn idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll_interval = interval;
        self
    }

    /// Builds the scheduler.
    #[must_use]
    pub fn build(self) -> Scheduler {
        Scheduler {
            inner: Rc::new(SchedulerInner {
                name: self.name,
                idle_poll_interval: self.idle_poll_interval,
                work_items: RefCell::new(VecDeque::with_capacity(self.queue_capacity)),
                step_listeners: RefCell::new(Vec::new()),
                timers: RefCell::new(BinaryHeap::new()),
                timer_sequence: Cell::new(0),
                ticks: Cell::new(0),
            }),
        }
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// Ordered so that a `BinaryHeap` pops the earliest deadline first, with
// insertion order breaking ties.
struct TimerEntry {
    deadline: Instant,
    sequence: u64,
    action: WorkItem,
    cancelled: Rc<Cell<bool>>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}

impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Cancels a timer registered with [`Scheduler::add_timer`].
#[derive(Clone, Debug)]
pub struct TimerHandle {
    cancelled: Rc<Cell<bool>>,
}

impl TimerHandle {
    /// Prevents the timer's action from running. Has no effect once it fired.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    /// Returns `true` if the timer was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

impl Disposable for TimerHandle {
    fn dispose(&self) {
        self.cancel();
    }
}

struct SchedulerInner {
    name: String,
    idle_poll_interval: Duration,
    work_items: RefCell<VecDeque<WorkItem>>,
    step_listeners: RefCell<Vec<WorkItem>>,
    timers: RefCell<BinaryHeap<TimerEntry>>,
    timer_sequence: Cell<u64>,
    ticks: Cell<u64>,
}

/// A single-threaded cooperative run loop.
///
/// `Scheduler` is a cheap handle: clones refer to the same queue. It is
/// neither `Send` nor `Sync`.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

#[derive(Clone)]
pub(crate) struct WeakScheduler {
    inner: Weak<SchedulerInner>,
}

impl WeakScheduler {
    pub(crate) fn upgrade(&self) -> Option<Scheduler> {
        self.inner.upgrade().map(|inner| Scheduler { inner })
    }
}

impl Scheduler {
    /// Creates a scheduler with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        SchedulerBuilder::new().build()
    }

    /// Returns a builder for a customized scheduler.
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// The name given to this scheduler.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Appends a deferred action to the work-item queue.
    ///
    /// Actions run in the order they were queued, each to completion before
    /// the next starts.
    pub fn queue_work_item(&self, action: impl FnOnce() + 'static) {
        self.inner.work_items.borrow_mut().push_back(Box::new(action));
    }

    /// Registers a one-shot action fired at the end of the current tick.
    ///
    /// The listener runs after the batch of work items the tick started with
    /// and before any work queued during the tick. Listeners registered while
    /// listeners are firing wait for the next tick.
    pub fn add_step_listener(&self, action: impl FnOnce() + 'static) {
        self.inner.step_listeners.borrow_mut().push(Box::new(action));
    }

    /// Queues `action` once `deadline` has passed.
    pub fn add_timer(&self, deadline: Instant, action: impl FnOnce() + 'static) -> TimerHandle {
        let cancelled = Rc::new(Cell::new(false));
        let sequence = self.inner.timer_sequence.get();
        self.inner.timer_sequence.set(sequence + 1);
        self.inner.timers.borrow_mut().push(TimerEntry {
            deadline,
            sequence,
            action: Box::new(action),
            cancelled: Rc::clone(&cancelled),
        });
        TimerHandle { cancelled }
    }

    /// Starts a schedulable and returns the promise it will settle.
    ///
    /// Under [`ExecutionPolicy::RunWhileFutureLives`] disposing the returned
    /// promise tears the running work down.
    pub fn start<S: Schedulable>(&self, schedulable: S, policy: ExecutionPolicy) -> Promise<S::Output> {
        let future = Promise::new();
        log::debug!(
            "[{}] starting {} ({policy:?})",
            self.inner.name,
            std::any::type_name::<S>()
        );
        let driver = schedulable.schedule(self, future.clone());
        match policy {
            ExecutionPolicy::RunWhileFutureLives => {
                future.register_on_dispose(move || driver.dispose());
            }
            ExecutionPolicy::RunAsBackgroundTask => {
                let name = self.inner.name.clone();
                future.register_on_complete(move |outcome| {
                    if let Err(error) = outcome {
                        log::error!("[{name}] background task failed: {error}");
                    }
                });
            }
        }
        future
    }

    /// Wraps `task` in a [`Thunk`] and starts it with the default policy.
    pub fn spawn<K>(&self, task: K) -> Promise<K::Output>
    where
        K: Task + 'static,
        K::Output: Default,
    {
        self.start(Thunk::new(task), ExecutionPolicy::default())
    }

    /// Runs one tick and returns the number of work items executed.
    pub fn tick(&self) -> usize {
        self.fire_expired_timers();

        let batch = self.inner.work_items.borrow().len();
        let mut executed = 0;
        while executed < batch {
            let Some(item) = self.inner.work_items.borrow_mut().pop_front() else {
                break;
            };
            item();
            executed += 1;
        }

        let listeners = mem::take(&mut *self.inner.step_listeners.borrow_mut());
        for listener in listeners {
            listener();
        }

        self.inner.ticks.set(self.inner.ticks.get() + 1);
        log::trace!("[{}] tick ran {executed} work items", self.inner.name);
        executed
    }

    /// The number of ticks run so far.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.inner.ticks.get()
    }

    /// Returns `true` if no work items, step listeners or live timers remain.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.inner.work_items.borrow().is_empty()
            && self.inner.step_listeners.borrow().is_empty()
            && self.next_deadline().is_none()
    }

    /// Ticks until no work items or step listeners remain.
    ///
    /// Pending timers are not waited for.
    pub fn run_until_idle(&self) {
        while !self.inner.work_items.borrow().is_empty()
            || !self.inner.step_listeners.borrow().is_empty()
        {
            self.tick();
        }
    }

    /// Ticks until `promise` settles or is disposed.
    ///
    /// When nothing is runnable the loop sleeps until the next timer, or for
    /// the idle poll interval while step listeners are pending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Stalled`] if the promise is still pending but the
    /// scheduler has nothing left that could settle it.
    pub fn run_until_settled<T: 'static>(&self, promise: &Promise<T>) -> Result<(), Error> {
        loop {
            if promise.is_settled() || promise.is_disposed() {
                return Ok(());
            }
            if self.tick() > 0 || !self.inner.work_items.borrow().is_empty() {
                continue;
            }
            if promise.is_settled() || promise.is_disposed() {
                continue;
            }
            if !self.inner.step_listeners.borrow().is_empty() {
                thread::sleep(self.inner.idle_poll_interval);
                continue;
            }
            match self.next_deadline() {
                Some(deadline) => {
                    thread::sleep(deadline.saturating_duration_since(Instant::now()));
                }
                None => {
                    log::warn!("[{}] stalled with a pending promise", self.inner.name);
                    return Err(Error::Stalled);
                }
            }
        }
    }

    /// Starts `schedulable` and runs the loop until its promise settles.
    ///
    /// # Errors
    ///
    /// Returns the failure of the schedulable, [`Error::Disposed`] if its
    /// promise was disposed, or [`Error::Stalled`] if it can never settle.
    pub fn block_on<S>(&self, schedulable: S) -> Outcome<S::Output>
    where
        S: Schedulable,
        S::Output: Clone,
    {
        let promise = self.start(schedulable, ExecutionPolicy::default());
        self.run_until_settled(&promise)?;
        promise.result().unwrap_or(Err(Error::Disposed))
    }

    pub(crate) fn downgrade(&self) -> WeakScheduler {
        WeakScheduler {
            inner: Rc::downgrade(&self.inner),
        }
    }

    fn fire_expired_timers(&self) {
        let now = Instant::now();
        loop {
            let entry = {
                let mut timers = self.inner.timers.borrow_mut();
                match timers.peek() {
                    Some(entry) if entry.deadline <= now => timers.pop(),
                    _ => None,
                }
            };
            let Some(entry) = entry else {
                break;
            };
            if !entry.cancelled.get() {
                self.inner.work_items.borrow_mut().push_back(entry.action);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        let mut timers = self.inner.timers.borrow_mut();
        while timers.peek().is_some_and(|entry| entry.cancelled.get()) {
            timers.pop();
        }
        timers.peek().map(|entry| entry.deadline)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.inner.name)
            .field("work_items", &self.inner.work_items.borrow().len())
            .field("step_listeners", &self.inner.step_listeners.borrow().len())
            .field("timers", &self.inner.timers.borrow().len())
            .field("ticks", &self.inner.ticks.get())
            .finish()
    }
}
