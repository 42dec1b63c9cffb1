//! Error type shared by promises, the scheduler, thunks and I/O adapters.

use std::{fmt, io, sync::Arc, time::Duration};

/// The settled outcome of a [`Promise`](crate::Promise).
pub type Outcome<T> = Result<T, Error>;

/// Errors produced while scheduling and driving tasks.
///
/// `Error` is cheap to clone so the same failure can be handed to every
/// waiter registered on a promise.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    /// A promise that already completed or failed was settled again.
    #[error("the promise has already been settled")]
    AlreadySettled,

    /// A task yielded a value that has no recognized kind.
    #[error("task {task} yielded a value the scheduler does not support")]
    UnsupportedYieldValue { task: String },

    /// The stream behind an I/O adapter has disconnected.
    #[error("the operation failed because the stream has disconnected")]
    Disconnected,

    /// The outbound buffer of an I/O adapter is full.
    #[error("the operation failed because the stream's send buffer is full")]
    BufferFull,

    /// A schedulable that drives a single run was started a second time.
    #[error("the task {task} has already been started")]
    AlreadyStarted { task: String },

    /// The promise was disposed before it settled.
    #[error("the promise was disposed before it settled")]
    Disposed,

    /// A scheduled operation did not settle within its time limit.
    #[error("the operation timed out after {0:?}")]
    TimedOut(Duration),

    /// The scheduler ran out of work while a promise was still pending.
    #[error("the scheduler has no more work but the promise is still pending")]
    Stalled,

    /// An I/O operation failed.
    #[error(transparent)]
    Io(Arc<io::Error>),

    /// An error raised by task code.
    #[error(transparent)]
    Task(Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wraps an arbitrary error raised by task code.
    pub fn task(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Task(Arc::new(error))
    }

    /// Creates a task error from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Error::Task(Arc::new(Message(message.into())))
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Io(Arc::new(error))
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}
