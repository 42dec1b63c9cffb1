use std::time::{Duration, Instant};

use coflow::{Error, Promise, Scheduler, Task, Yielded};

// Counts a few ticks, then waits for a value produced by a timer.
struct Greeter {
    step: u32,
    name: Promise<&'static str>,
}

impl Task for Greeter {
    type Output = String;

    fn resume(&mut self) -> Option<Result<Yielded<String>, Error>> {
        self.step += 1;
        match self.step {
            1..=3 => {
                println!("Greeter tick {}", self.step);
                Some(Ok(Yielded::Yield))
            }
            4 => {
                println!("Greeter waiting for a name");
                Some(Ok(Yielded::wait(&self.name)))
            }
            _ => {
                let name = match self.name.result()? {
                    Ok(name) => name,
                    Err(error) => return Some(Err(error)),
                };
                Some(Ok(Yielded::Result(format!("Hello, {name}!"))))
            }
        }
    }

    fn name(&self) -> String {
        "greeter".to_owned()
    }
}

fn main() {
    let scheduler = Scheduler::new();
    let name = Promise::new();

    // Another task keeps running while the greeter waits.
    let mut ticks = 0;
    let counter = scheduler.spawn(std::iter::from_fn(move || -> Option<Result<Yielded<u32>, Error>> {
        ticks += 1;
        println!("Counter tick {ticks}");
        if ticks < 6 {
            Some(Ok(Yielded::Yield))
        } else {
            Some(Ok(Yielded::Result(ticks)))
        }
    }));

    let greeting = scheduler.spawn(Greeter {
        step: 0,
        name: name.clone(),
    });

    let source = name.clone();
    let _timer = scheduler.add_timer(Instant::now() + Duration::from_millis(50), move || {
        println!("Timer fired");
        let _ = source.complete("coflow");
    });

    scheduler.run_until_settled(&greeting).unwrap();
    scheduler.run_until_settled(&counter).unwrap();

    println!("{}", greeting.result().unwrap().unwrap());
    println!("Counter finished after {} ticks", counter.result().unwrap().unwrap());
}
