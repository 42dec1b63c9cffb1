//! Promise-based reads and writes over non-blocking byte streams.
//!
//! [`AsyncDataSource`] and [`AsyncDataWriter`] describe the contract tasks use
//! to wait on I/O: every operation returns a [`Promise`] that settles once the
//! bytes moved. [`StreamAdapter`] implements both over any non-blocking
//! [`ByteStream`], such as a `TcpStream`.
//!
//! An operation that can finish right away settles its promise before
//! returning. Otherwise it is retried from a step listener on every tick of
//! the scheduler until it finishes, or until the waiter disposes the promise.
//!
//! ```
//! # use std::{cell::RefCell, io::Cursor, rc::Rc};
//! # use coflow::{AdapterConfig, AsyncDataSource, Scheduler, StreamAdapter};
//! let scheduler = Scheduler::new();
//! let adapter = StreamAdapter::new(&scheduler, Cursor::new(b"hello".to_vec()))
//!     .with_config(AdapterConfig::new().throw_on_disconnect(false));
//! let buffer = Rc::new(RefCell::new(vec![0; 8]));
//!
//! let read = adapter.read(&buffer, 0, 8);
//! assert_eq!(read.result().unwrap().unwrap(), 5);
//! assert_eq!(&buffer.borrow()[..5], b"hello");
//!
//! // The end of the stream reads as zero bytes instead of failing.
//! let read = adapter.read(&buffer, 0, 8);
//! assert_eq!(read.result().unwrap().unwrap(), 0);
//! assert!(adapter.is_end_of_stream());
//! ```

use std::{
    cell::{Cell, RefCell},
    fmt,
    io::{self, Cursor, Read, Write},
    net::{Shutdown, TcpStream},
    rc::Rc,
};

use crate::{Disposable, Error, Promise, Scheduler, scheduler::WeakScheduler};

/// A byte buffer shared between an I/O operation and the task waiting on it.
pub type SharedBuffer = Rc<RefCell<Vec<u8>>>;

/// A source of bytes read asynchronously.
pub trait AsyncDataSource {
    /// Reads up to `count` bytes into `buffer[offset..offset + count]`.
    ///
    /// The promise completes with the number of bytes read.
    fn read(&self, buffer: &SharedBuffer, offset: usize, count: usize) -> Promise<usize>;

    /// Returns `true` once the source reported the end of its data.
    fn is_end_of_stream(&self) -> bool;
}

/// A sink bytes are written to asynchronously.
pub trait AsyncDataWriter {
    /// Writes all of `buffer[offset..offset + count]`.
    fn write(&self, buffer: &SharedBuffer, offset: usize, count: usize) -> Promise<()>;
}

/// A stream a [`StreamAdapter`] can drive.
///
/// Reads and writes are expected to return `ErrorKind::WouldBlock` instead of
/// blocking the thread.
pub trait ByteStream: Read + Write {
    /// Shuts the stream down in both directions.
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteStream for TcpStream {
    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

// Leaves the socket open for its owner once the adapter is gone.
impl ByteStream for &TcpStream {}

impl<T> ByteStream for Cursor<T> where Cursor<T>: Read + Write {}

/// How a [`StreamAdapter`] reports a closed peer and a full send buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdapterConfig {
    throw_on_disconnect: bool,
    throw_on_full_send_buffer: bool,
}

impl AdapterConfig {
    /// Both conditions fail the operation by default.
    pub fn new() -> Self {
        Self {
            throw_on_disconnect: true,
            throw_on_full_send_buffer: true,
        }
    }

    /// When set, reaching the end of the stream fails with
    /// [`Error::Disconnected`]. Otherwise reads complete with `0`.
    pub fn throw_on_disconnect(mut self, throw: bool) -> Self {
        self.throw_on_disconnect = throw;
        self
    }

    /// When set, a write that would block before sending anything fails with
    /// [`Error::BufferFull`]. Otherwise, or once part of the data went out, it
    /// is retried until the stream accepts the rest.
    pub fn throw_on_full_send_buffer(mut self, throw: bool) -> Self {
        self.throw_on_full_send_buffer = throw;
        self
    }

    /// Whether a closed peer fails the operation.
    pub fn throws_on_disconnect(&self) -> bool {
        self.throw_on_disconnect
    }

    /// Whether a write that would block before sending anything fails instead of waiting.
    pub fn throws_on_full_send_buffer(&self) -> bool {
        self.throw_on_full_send_buffer
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self::new()
    }
}

enum Progress<T> {
    Done(T),
    Disconnected,
    WouldBlock(usize),
}

struct AdapterInner<S: ByteStream> {
    stream: RefCell<Option<S>>,
    config: Cell<AdapterConfig>,
    connected: Cell<bool>,
    scheduler: WeakScheduler,
}

impl<S: ByteStream> AdapterInner<S> {
    fn shutdown(&self) {
        let Some(mut stream) = self.stream.borrow_mut().take() else {
            return;
        };
        self.connected.set(false);
        if let Err(error) = stream.shutdown() {
            log::debug!("stream shutdown failed: {error}");
        }
    }

    fn try_read(
        &self,
        buffer: &SharedBuffer,
        offset: usize,
        count: usize,
    ) -> Result<Progress<usize>, Error> {
        let mut stream = self.stream.borrow_mut();
        let stream = stream.as_mut().ok_or(Error::Disposed)?;
        // The waiter may have resized the buffer since the last attempt.
        let mut buffer = buffer.borrow_mut();
        check_range(buffer.len(), offset, count)?;
        if !self.connected.get() {
            return Ok(Progress::Disconnected);
        }
        loop {
            match stream.read(&mut buffer[offset..offset + count]) {
                Ok(0) if count > 0 => return Ok(Progress::Disconnected),
                Ok(read) => return Ok(Progress::Done(read)),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Progress::WouldBlock(0));
                }
                Err(error) if is_disconnect(&error) => return Ok(Progress::Disconnected),
                Err(error) => return Err(error.into()),
            }
        }
    }

    // `written` bytes of the range already went out on an earlier attempt.
    fn try_write(
        &self,
        buffer: &SharedBuffer,
        offset: usize,
        count: usize,
        mut written: usize,
    ) -> Result<Progress<()>, Error> {
        let mut stream = self.stream.borrow_mut();
        let stream = stream.as_mut().ok_or(Error::Disposed)?;
        let buffer = buffer.borrow();
        check_range(buffer.len(), offset, count)?;
        if !self.connected.get() {
            return Ok(Progress::Disconnected);
        }
        while written < count {
            match stream.write(&buffer[offset + written..offset + count]) {
                Ok(0) => return Ok(Progress::Disconnected),
                Ok(n) => written += n,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Progress::WouldBlock(written));
                }
                Err(error) if is_disconnect(&error) => return Ok(Progress::Disconnected),
                Err(error) => return Err(error.into()),
            }
        }
        Ok(Progress::Done(()))
    }

    // Settles `promise` for a closed peer according to the configuration.
    fn disconnected<T: 'static>(&self, promise: &Promise<T>, value: T) {
        if self.connected.replace(false) {
            log::debug!("peer disconnected");
        }
        if self.config.get().throw_on_disconnect {
            let _ = promise.fail(Error::Disconnected);
        } else {
            let _ = promise.complete(value);
        }
    }

    fn retry<T: 'static>(&self, promise: &Promise<T>, action: impl FnOnce() + 'static) {
        match self.scheduler.upgrade() {
            Some(scheduler) => scheduler.add_step_listener(action),
            None => promise.dispose(),
        }
    }
}

impl<S: ByteStream> Drop for AdapterInner<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

fn check_range(len: usize, offset: usize, count: usize) -> Result<(), Error> {
    match offset.checked_add(count) {
        Some(end) if end <= len => Ok(()),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("range {offset}+{count} is out of bounds for a buffer of {len} bytes"),
        )
        .into()),
    }
}

/// Adapts a non-blocking [`ByteStream`] to [`AsyncDataSource`] and
/// [`AsyncDataWriter`].
///
/// `StreamAdapter` is a cheap handle; clones share the stream. The stream is
/// shut down when the adapter is disposed or the last handle is dropped.
///
/// # Examples
///
/// ```no_run
/// # use std::{cell::RefCell, net::TcpStream, rc::Rc};
/// # use coflow::{AsyncDataWriter, Scheduler, StreamAdapter};
/// let scheduler = Scheduler::new();
/// let adapter = StreamAdapter::tcp(&scheduler, TcpStream::connect("127.0.0.1:8080")?)?;
/// let buffer = Rc::new(RefCell::new(b"ping".to_vec()));
/// let sent = adapter.write(&buffer, 0, 4);
/// scheduler.run_until_settled(&sent)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct StreamAdapter<S: ByteStream> {
    inner: Rc<AdapterInner<S>>,
}

impl StreamAdapter<TcpStream> {
    /// Switches `stream` to non-blocking mode and wraps it.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket can not be made non-blocking.
    pub fn tcp(scheduler: &Scheduler, stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self::new(scheduler, stream))
    }
}

impl<S: ByteStream + 'static> StreamAdapter<S> {
    /// Wraps a stream that is already in non-blocking mode.
    pub fn new(scheduler: &Scheduler, stream: S) -> Self {
        StreamAdapter {
            inner: Rc::new(AdapterInner {
                stream: RefCell::new(Some(stream)),
                config: Cell::new(AdapterConfig::default()),
                connected: Cell::new(true),
                scheduler: scheduler.downgrade(),
            }),
        }
    }

    /// Replaces the adapter's configuration.
    pub fn with_config(self, config: AdapterConfig) -> Self {
        self.inner.config.set(config);
        self
    }

    /// The current configuration.
    #[must_use]
    pub fn config(&self) -> AdapterConfig {
        self.inner.config.get()
    }

    /// Returns `false` once the peer closed the stream or the adapter was
    /// disposed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.get()
    }

    /// Shuts the stream down and releases it.
    ///
    /// Operations still waiting for the stream fail with [`Error::Disposed`]
    /// on their next attempt.
    pub fn dispose(&self) {
        self.inner.shutdown();
    }

    fn poll_read(
        inner: Rc<AdapterInner<S>>,
        buffer: SharedBuffer,
        offset: usize,
        count: usize,
        promise: Promise<usize>,
    ) {
        if promise.is_disposed() {
            return;
        }
        match inner.try_read(&buffer, offset, count) {
            Ok(Progress::Done(read)) => {
                let _ = promise.complete(read);
            }
            Ok(Progress::Disconnected) => inner.disconnected(&promise, 0),
            Ok(Progress::WouldBlock(_)) => {
                let retry = Rc::clone(&inner);
                let waiter = promise.clone();
                inner.retry(&promise, move || {
                    Self::poll_read(retry, buffer, offset, count, waiter);
                });
            }
            Err(error) => {
                let _ = promise.fail(error);
            }
        }
    }

    fn poll_write(
        inner: Rc<AdapterInner<S>>,
        buffer: SharedBuffer,
        offset: usize,
        count: usize,
        written: usize,
        promise: Promise<()>,
    ) {
        if promise.is_disposed() {
            return;
        }
        match inner.try_write(&buffer, offset, count, written) {
            Ok(Progress::Done(())) => {
                let _ = promise.complete(());
            }
            Ok(Progress::Disconnected) => inner.disconnected(&promise, ()),
            // Once part of the range went out the rest has to follow.
            Ok(Progress::WouldBlock(0)) if inner.config.get().throw_on_full_send_buffer => {
                let _ = promise.fail(Error::BufferFull);
            }
            Ok(Progress::WouldBlock(written)) => {
                log::trace!("send buffer full after {written} of {count} bytes");
                let retry = Rc::clone(&inner);
                let waiter = promise.clone();
                inner.retry(&promise, move || {
                    Self::poll_write(retry, buffer, offset, count, written, waiter);
                });
            }
            Err(error) => {
                let _ = promise.fail(error);
            }
        }
    }
}

impl<S: ByteStream + 'static> AsyncDataSource for StreamAdapter<S> {
    fn read(&self, buffer: &SharedBuffer, offset: usize, count: usize) -> Promise<usize> {
        let promise = Promise::new();
        let buffer = Rc::clone(buffer);
        Self::poll_read(Rc::clone(&self.inner), buffer, offset, count, promise.clone());
        promise
    }

    fn is_end_of_stream(&self) -> bool {
        !self.inner.connected.get()
    }
}

impl<S: ByteStream + 'static> AsyncDataWriter for StreamAdapter<S> {
    fn write(&self, buffer: &SharedBuffer, offset: usize, count: usize) -> Promise<()> {
        let promise = Promise::new();
        let buffer = Rc::clone(buffer);
        Self::poll_write(Rc::clone(&self.inner), buffer, offset, count, 0, promise.clone());
        promise
    }
}

impl<S: ByteStream + 'static> Disposable for StreamAdapter<S> {
    fn dispose(&self) {
        StreamAdapter::dispose(self);
    }
}

impl<S: ByteStream> Clone for StreamAdapter<S> {
    fn clone(&self) -> Self {
        StreamAdapter {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S: ByteStream> fmt::Debug for StreamAdapter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamAdapter")
            .field("connected", &self.inner.connected.get())
            .field("config", &self.inner.config.get())
            .finish()
    }
}
