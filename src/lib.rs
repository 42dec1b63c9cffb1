//! Cooperative, single-threaded task scheduling built on promises.
//!
//! `coflow` runs long-lived logic as tasks: resumable sequences of control
//! values that are driven one step at a time on a [`Scheduler`]. Between two
//! steps a task waits on something, like a [`Promise`] settling, nested work
//! finishing or the scheduler finishing its current tick. Because everything
//! runs on one thread, no two steps ever overlap and no locking is needed.
//!
//! Features include:
//! - A [`Promise`] type: a single-assignment result cell with completion,
//!   dispose and error-check callbacks that can also be `.await`ed
//! - A [`Scheduler`] with a FIFO work-item queue, end-of-tick step listeners
//!   and timers
//! - A [`Thunk`] that drives a [`Task`] and makes sure a failure it waited on is
//!   never silently dropped
//! - Time-based schedulables like [`Sleep`], [`Delay`] and [`Timeout`]
//! - A [`StreamAdapter`] exposing non-blocking sockets as promise-returning reads
//!   and writes
//!
//! ```
//! # use coflow::{Error, Promise, Scheduler, Yielded};
//! let scheduler = Scheduler::new();
//! let input = Promise::<u32>::new();
//!
//! let mut waited = false;
//! let signal = input.clone();
//! let doubled = scheduler.spawn(std::iter::from_fn(move || -> Option<Result<Yielded<u32>, Error>> {
//!     if !waited {
//!         waited = true;
//!         return Some(Ok(Yielded::wait(&signal)));
//!     }
//!     let value = signal.result()?.ok()?;
//!     Some(Ok(Yielded::Result(value * 2)))
//! }));
//!
//! scheduler.run_until_idle();
//! input.complete(21).unwrap();
//! scheduler.run_until_idle();
//! assert_eq!(doubled.result().unwrap().unwrap(), 42);
//! ```

pub mod error;
pub mod future;
pub mod io;
pub mod schedulable;
pub mod scheduler;
pub mod task;
pub mod task_ext;
pub mod thunk;
pub mod timing;

pub use error::{Error, Outcome};
pub use future::{AnyPromise, Disposable, Promise, Settled};
pub use io::{AdapterConfig, AsyncDataSource, AsyncDataWriter, ByteStream, SharedBuffer, StreamAdapter};
pub use schedulable::{DynSchedulable, Schedulable};
pub use scheduler::{ExecutionPolicy, Scheduler, SchedulerBuilder, TimerHandle};
pub use task::{DynTask, DynamicTask, Task, Yielded};
pub use task_ext::SchedulableExt;
pub use thunk::Thunk;
pub use timing::{Delay, Sleep, Timeout};
