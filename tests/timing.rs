use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::{Duration, Instant},
};

use coflow::{
    Error, ExecutionPolicy, Scheduler, Thunk, Yielded,
    task_ext::SchedulableExt,
    timing::{Delay, Sleep, Timeout},
};

type Step<T> = Result<Yielded<T>, Error>;

fn returning(value: u32) -> Thunk<u32> {
    let steps: Vec<Step<u32>> = vec![Ok(Yielded::Yield), Ok(Yielded::Result(value))];
    Thunk::new(steps.into_iter())
}

#[test]
fn sleep_waits_at_least_its_duration() {
    let scheduler = Scheduler::new();
    let started = Instant::now();

    scheduler.block_on(Sleep::new(Duration::from_millis(15))).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(15), "Sleep returned too early");
}

#[test]
fn sleeps_complete_in_deadline_order() {
    let scheduler = Scheduler::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    let slow = scheduler.start(Sleep::new(Duration::from_millis(20)), ExecutionPolicy::default());
    let fast = scheduler.start(Sleep::new(Duration::from_millis(5)), ExecutionPolicy::default());
    for (name, promise) in [("slow", &slow), ("fast", &fast)] {
        let order = Rc::clone(&order);
        promise.register_on_complete(move |_| order.borrow_mut().push(name));
    }

    scheduler.run_until_settled(&slow).unwrap();
    assert_eq!(*order.borrow(), ["fast", "slow"]);
}

#[test]
fn task_can_sleep_between_steps() {
    let scheduler = Scheduler::new();
    let started = Instant::now();
    let steps: Vec<Step<&str>> = vec![
        Ok(Yielded::schedule(Sleep::new(Duration::from_millis(10)))),
        Ok(Yielded::Result("rested")),
    ];

    assert_eq!(scheduler.block_on(Thunk::new(steps.into_iter())).unwrap(), "rested");
    assert!(started.elapsed() >= Duration::from_millis(10));
}

#[test]
fn timeout_passes_through_a_quick_result() {
    let scheduler = Scheduler::new();

    let result = scheduler.block_on(returning(5).timeout(Duration::from_secs(5)));
    assert_eq!(result.unwrap(), 5, "Task should finish before the timeout");
    assert!(scheduler.is_idle(), "Timeout timer should be cancelled");
}

#[test]
fn timeout_fails_slow_work_and_cancels_it() {
    let scheduler = Scheduler::new();
    let started = Instant::now();

    let result = scheduler.block_on(Timeout::new(
        Sleep::new(Duration::from_secs(10)),
        Duration::from_millis(20),
    ));

    assert!(
        matches!(result, Err(Error::TimedOut(limit)) if limit == Duration::from_millis(20)),
        "Slow work should time out"
    );
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(scheduler.is_idle(), "Inner sleep should be cancelled");
}

#[test]
fn timeout_forwards_inner_failures() {
    let scheduler = Scheduler::new();
    let steps: Vec<Step<u8>> = vec![Err(Error::msg("broken"))];

    let error = scheduler
        .block_on(Thunk::new(steps.into_iter()).timeout(Duration::from_secs(1)))
        .unwrap_err();
    assert_eq!(error.to_string(), "broken");
}

#[test]
fn delay_postpones_the_start() {
    let scheduler = Scheduler::new();
    let started = Instant::now();
    let ran_after = Rc::new(Cell::new(None));

    let seen = Rc::clone(&ran_after);
    let task = std::iter::from_fn(move || -> Option<Step<u32>> {
        seen.set(Some(started.elapsed()));
        Some(Ok(Yielded::Result(8)))
    });

    let result = scheduler.block_on(Thunk::new(task).delay(Duration::from_millis(15)));
    assert_eq!(result.unwrap(), 8);
    assert!(ran_after.get().unwrap() >= Duration::from_millis(15), "Task started too early");
}

#[test]
fn disposed_delay_never_starts() {
    let scheduler = Scheduler::new();
    let ran = Rc::new(Cell::new(false));

    let flag = Rc::clone(&ran);
    let task = std::iter::from_fn(move || -> Option<Step<()>> {
        flag.set(true);
        None
    });
    let promise = scheduler.start(
        Delay::new(Thunk::new(task), Duration::from_millis(10)),
        ExecutionPolicy::default(),
    );

    promise.dispose();
    assert!(scheduler.is_idle(), "Delay timer should be cancelled");
    assert!(matches!(scheduler.run_until_settled(&promise), Ok(())));
    assert!(!ran.get());
}

#[test]
fn inner_schedulable_is_recoverable() {
    let delayed = Delay::new(Sleep::new(Duration::from_millis(1)), Duration::from_secs(1));
    let limited = Timeout::new(delayed.inner(), Duration::from_secs(1));

    let scheduler = Scheduler::new();
    scheduler.block_on(limited.inner()).unwrap();
}
