use std::time::{Duration, Instant};

use coflow::{Error, Scheduler, Sleep, Thunk, Yielded, task_ext::SchedulableExt};

fn main() {
    let scheduler = Scheduler::new();
    let started = Instant::now();

    // Starts 30ms late, then finishes right away.
    let steps: Vec<Result<Yielded<&str>, Error>> = vec![Ok(Yielded::Result("delayed"))];
    let delayed = Thunk::new(steps.into_iter()).delay(Duration::from_millis(30));
    let value = scheduler.block_on(delayed).unwrap();
    println!("{value} after {:?}", started.elapsed());

    // Finishes well inside its time limit.
    let quick = Sleep::new(Duration::from_millis(5)).timeout(Duration::from_millis(100));
    match scheduler.block_on(quick) {
        Ok(()) => println!("Quick sleep finished in time"),
        Err(error) => println!("Quick sleep failed: {error}"),
    }

    // Takes too long and gets cancelled.
    let started = Instant::now();
    let slow = Sleep::new(Duration::from_secs(10)).timeout(Duration::from_millis(40));
    match scheduler.block_on(slow) {
        Ok(()) => println!("Slow sleep finished"),
        Err(Error::TimedOut(limit)) => {
            println!("Slow sleep timed out after {limit:?} ({:?} elapsed)", started.elapsed())
        }
        Err(error) => println!("Slow sleep failed: {error}"),
    }

    assert!(scheduler.is_idle(), "Cancelled sleep should leave no timer behind");
}
