//! Operators for composing schedulables with time.

use std::time::Duration;

use crate::{
    Schedulable,
    timing::{Delay, Timeout},
};

/// Time-based combinators available on every [`Schedulable`].
///
/// # Example
/// ```
/// # use std::time::Duration;
/// # use coflow::{Error, Scheduler, SchedulableExt, timing::Sleep};
/// let scheduler = Scheduler::new();
/// let slow = Sleep::new(Duration::from_secs(30))
///     .delay(Duration::from_millis(1))
///     .timeout(Duration::from_millis(10));
/// assert!(matches!(scheduler.block_on(slow), Err(Error::TimedOut(_))));
/// ```
pub trait SchedulableExt: Schedulable + Sized {
    /// Starts this schedulable once `delay` has passed.
    fn delay(self, delay: Duration) -> Delay<Self> {
        Delay::new(self, delay)
    }

    /// Fails with [`Error::TimedOut`](crate::Error::TimedOut) and cancels this
    /// schedulable unless it settles within `time_limit`.
    fn timeout(self, time_limit: Duration) -> Timeout<Self> {
        Timeout::new(self, time_limit)
    }
}

impl<S: Schedulable> SchedulableExt for S {}
