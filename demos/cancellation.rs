use std::time::Duration;

use coflow::{Error, Promise, Scheduler, Sleep, Thunk, Yielded};

fn main() {
    let scheduler = Scheduler::new();
    let never = Promise::<u32>::new();

    // Nested three levels deep: outer -> middle -> inner, inner waits forever.
    let inner = Thunk::new(std::iter::once::<Result<Yielded<u32>, Error>>(Ok(Yielded::wait(&never))))
        .named("inner");
    let middle = Thunk::new(std::iter::once::<Result<Yielded<()>, Error>>(Ok(Yielded::schedule(
        inner.clone(),
    ))))
    .named("middle");

    let nested = middle.clone();
    let steps: Vec<Result<Yielded<()>, Error>> = vec![
        Ok(Yielded::schedule(Sleep::new(Duration::from_millis(10)))),
        Ok(Yielded::schedule(nested)),
    ];
    let outer = scheduler.spawn(steps.into_iter());

    // Runs until the inner task is parked on a promise nobody completes.
    while !scheduler.is_idle() {
        scheduler.tick();
        std::thread::sleep(Duration::from_millis(1));
    }
    println!("Inner task disposed before cancel: {}", inner.is_disposed());

    // Disposing the outer result reaches every nested level.
    outer.dispose();
    println!("Middle task disposed: {}", middle.is_disposed());
    println!("Inner task disposed: {}", inner.is_disposed());
    println!("Awaited promise disposed: {}", never.is_disposed());

    // Disposing again is harmless.
    outer.dispose();
    println!("Scheduler idle: {}", scheduler.is_idle());
}
