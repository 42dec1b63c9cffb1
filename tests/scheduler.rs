use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::{Duration, Instant},
};

use coflow::{
    Disposable, Error, ExecutionPolicy, Promise, Schedulable, Scheduler, Thunk, Yielded,
};

fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn FnOnce()>) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let push = {
        let log = Rc::clone(&log);
        move |entry: &'static str| -> Box<dyn FnOnce()> {
            let log = Rc::clone(&log);
            Box::new(move || log.borrow_mut().push(entry))
        }
    };
    (log, push)
}

#[test]
fn work_items_run_in_fifo_order() {
    let scheduler = Scheduler::new();
    let (log, push) = recorder();

    scheduler.queue_work_item(push("a"));
    scheduler.queue_work_item(push("b"));
    scheduler.queue_work_item(push("c"));

    assert_eq!(scheduler.tick(), 3, "All queued items should run in one tick");
    assert_eq!(*log.borrow(), ["a", "b", "c"]);
}

#[test]
fn work_queued_during_a_tick_runs_in_the_next_one() {
    let scheduler = Scheduler::new();
    let (log, push) = recorder();

    let inner = scheduler.clone();
    let later = push("later");
    scheduler.queue_work_item(move || inner.queue_work_item(later));
    scheduler.queue_work_item(push("now"));

    assert_eq!(scheduler.tick(), 2);
    assert_eq!(*log.borrow(), ["now"]);
    assert_eq!(scheduler.tick(), 1);
    assert_eq!(*log.borrow(), ["now", "later"]);
}

#[test]
fn step_listeners_fire_after_the_tick_batch() {
    let scheduler = Scheduler::new();
    let (log, push) = recorder();

    scheduler.add_step_listener(push("listener"));
    scheduler.queue_work_item(push("work"));
    let inner = scheduler.clone();
    let nested = push("nested listener");
    scheduler.add_step_listener(move || inner.add_step_listener(nested));

    scheduler.tick();
    assert_eq!(*log.borrow(), ["work", "listener"]);

    scheduler.tick();
    assert_eq!(
        *log.borrow(),
        ["work", "listener", "nested listener"],
        "Listeners added while firing should wait a tick"
    );
}

#[test]
fn run_until_idle_drains_everything() {
    let scheduler = Scheduler::new();
    let count = Rc::new(Cell::new(0));

    fn requeue(scheduler: Scheduler, count: Rc<Cell<u32>>) {
        count.set(count.get() + 1);
        if count.get() < 5 {
            let next = scheduler.clone();
            scheduler.queue_work_item(move || requeue(next, count));
        }
    }
    let inner = scheduler.clone();
    let counter = Rc::clone(&count);
    scheduler.queue_work_item(move || requeue(inner, counter));

    scheduler.run_until_idle();
    assert_eq!(count.get(), 5);
    assert_eq!(scheduler.tick_count(), 5);
    assert!(scheduler.is_idle());
}

#[test]
fn timers_fire_in_deadline_order() {
    let scheduler = Scheduler::new();
    let (log, push) = recorder();
    let now = Instant::now();

    scheduler.add_timer(now + Duration::from_millis(10), push("second"));
    scheduler.add_timer(now, push("first"));
    let cancelled = scheduler.add_timer(now, push("cancelled"));
    cancelled.cancel();

    let done = Promise::<()>::new();
    let signal = done.clone();
    scheduler.add_timer(now + Duration::from_millis(20), move || {
        signal.complete(()).unwrap();
    });

    scheduler.run_until_settled(&done).unwrap();
    assert_eq!(*log.borrow(), ["first", "second"]);
    assert!(now.elapsed() >= Duration::from_millis(20));
}

#[test]
fn run_until_settled_reports_a_stall() {
    let scheduler = Scheduler::new();
    let never = Promise::<()>::new();

    assert!(
        matches!(scheduler.run_until_settled(&never), Err(Error::Stalled)),
        "Nothing can settle the promise"
    );
}

#[test]
fn builder_configures_the_scheduler() {
    let scheduler = Scheduler::builder()
        .name("render")
        .queue_capacity(4)
        .idle_poll_interval(Duration::from_millis(2))
        .build();

    assert_eq!(scheduler.name(), "render");
    assert!(scheduler.is_idle());
    assert_eq!(scheduler.tick(), 0);
}

struct Flagged {
    disposed: Rc<Cell<bool>>,
}

struct FlagDriver(Rc<Cell<bool>>);

impl Disposable for FlagDriver {
    fn dispose(&self) {
        self.0.set(true);
    }
}

impl Schedulable for Flagged {
    type Output = u8;

    fn schedule(self, _scheduler: &Scheduler, _future: Promise<u8>) -> Box<dyn Disposable> {
        Box::new(FlagDriver(self.disposed))
    }
}

#[test]
fn disposing_the_promise_tears_down_the_driver() {
    let scheduler = Scheduler::new();
    let disposed = Rc::new(Cell::new(false));

    let promise = scheduler.start(
        Flagged { disposed: Rc::clone(&disposed) },
        ExecutionPolicy::RunWhileFutureLives,
    );
    promise.dispose();
    assert!(disposed.get(), "Driver should be disposed with the promise");
}

#[test]
fn background_tasks_outlive_their_promise() {
    let scheduler = Scheduler::new();
    let disposed = Rc::new(Cell::new(false));

    let promise = scheduler.start(
        Flagged { disposed: Rc::clone(&disposed) },
        ExecutionPolicy::RunAsBackgroundTask,
    );
    promise.dispose();
    assert!(!disposed.get(), "Background work must keep running");
}

#[test]
fn background_task_failure_still_settles_its_promise() {
    let scheduler = Scheduler::new();
    let steps: Vec<Result<Yielded<u8>, Error>> = vec![Ok(Yielded::Yield), Err(Error::msg("oops"))];

    let promise = scheduler.start(Thunk::new(steps.into_iter()), ExecutionPolicy::RunAsBackgroundTask);
    scheduler.run_until_idle();

    assert_eq!(promise.error().unwrap().to_string(), "oops");
}

#[test]
fn block_on_returns_the_task_result() {
    let scheduler = Scheduler::new();
    let steps: Vec<Result<Yielded<&str>, Error>> = vec![Ok(Yielded::Nothing), Ok(Yielded::Result("ok"))];

    assert_eq!(scheduler.block_on(Thunk::new(steps.into_iter())).unwrap(), "ok");
}
