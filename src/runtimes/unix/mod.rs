//! The descriptor-backed stream runtime.
//!
//! Streams of this runtime wrap a non-blocking descriptor registered
//! with the Tokio reactor through [`AsyncFd`]. That single
//! registration is the readiness waiter of the stream: awaited reads
//! wait on it for readability, and awaited writes wait on it for
//! writability before flushing the write queue from its head. No task
//! is spawned, any current-thread runtime can drive the streams.
//!
//! Unlike the [memory] runtime, a timeout while waiting for the
//! descriptor is fatal: the stream is freed and every pending
//! operation fails with [`StreamError::Timeout`].
//!
//! [memory]: crate::runtimes::memory

mod duplex;
mod readable;
mod writable;

use std::{
    cell::RefCell,
    io,
    net::{Shutdown, TcpStream},
    os::unix::{io::AsRawFd, net::UnixStream},
    rc::Rc,
};

use log::{debug, warn};
use tokio::io::unix::AsyncFd;

use crate::{
    coroutines::{read::ReadEngine, write::WriteQueue},
    io::StreamState,
    StreamError,
};

pub use self::{duplex::DuplexPipe, readable::ReadablePipe, writable::WritablePipe};

/// Default amount of bytes read from a descriptor at once.
pub const DEFAULT_CAPACITY: usize = 8 * 1024;

/// Descriptor whose write direction can be shut down on its own.
pub trait HalfClose {
    fn shutdown_write(&self) -> io::Result<()>;
}

impl HalfClose for UnixStream {
    fn shutdown_write(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}

impl HalfClose for TcpStream {
    fn shutdown_write(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}

/// Creates a connected pair of non-blocking Unix sockets.
pub fn pair() -> io::Result<(DuplexPipe<UnixStream>, DuplexPipe<UnixStream>)> {
    let (left, right) = UnixStream::pair()?;
    left.set_nonblocking(true)?;
    right.set_nonblocking(true)?;
    debug!(
        "create socket pair ({}, {})",
        left.as_raw_fd(),
        right.as_raw_fd()
    );
    Ok((DuplexPipe::new(left)?, DuplexPipe::new(right)?))
}

type Shared<T> = Rc<RefCell<Pipe<T>>>;

/// State shared by the handles of one descriptor.
struct Pipe<T: AsRawFd> {
    state: StreamState,
    /// Released once the stream is closed.
    io: Option<Rc<AsyncFd<T>>>,
    reader: ReadEngine,
    capacity: usize,
    queue: WriteQueue,
    /// Write side ended: no new write is accepted, queued writes are
    /// still flushed.
    ended: bool,
    shutdown: Option<fn(&T) -> io::Result<()>>,
}

impl<T: AsRawFd> Pipe<T> {
    fn new(io: T, state: StreamState, capacity: usize) -> io::Result<Self> {
        let io = AsyncFd::new(io)?;
        debug!("register descriptor {} ({state:?})", io.as_raw_fd());

        Ok(Self {
            state,
            io: Some(Rc::new(io)),
            reader: ReadEngine::with_capacity(capacity),
            capacity,
            queue: WriteQueue::new(),
            ended: false,
            shutdown: None,
        })
    }

    fn shared(self) -> Shared<T> {
        Rc::new(RefCell::new(self))
    }

    fn is_open(&self) -> bool {
        self.state.is_open()
    }

    fn is_readable(&self) -> bool {
        self.state.is_readable()
    }

    fn is_writable(&self) -> bool {
        self.state.is_writable() && !self.ended
    }

    /// Applies the transitions made possible by the current buffers:
    /// closes the read side once drained, the write side once ended
    /// and flushed, and releases the descriptor once both are closed.
    fn settle(&mut self) {
        if self.state.is_readable() && self.reader.is_drained() {
            debug!("read side drained");
            self.state = self.state.without_read();
        }

        if self.ended && self.queue.is_empty() && self.state.is_writable() {
            debug!("write side flushed");
            self.state = self.state.without_write();

            if self.state.is_open() {
                self.shutdown_write();
            }
        }

        if !self.state.is_open() {
            self.release();
        }
    }

    fn shutdown_write(&self) {
        let (Some(shutdown), Some(io)) = (self.shutdown, &self.io) else {
            return;
        };

        if let Err(err) = shutdown(io.get_ref()) {
            warn!("cannot shut down write side: {err}");
        }
    }

    /// Closes both sides and fails every pending operation with the
    /// given error.
    fn free(&mut self, err: StreamError) {
        if self.state.is_open() {
            match &err {
                StreamError::Closed => debug!("close stream"),
                err => warn!("free stream: {err}"),
            }
        }

        self.state = StreamState::Closed;
        self.reader.close(err.clone());
        self.queue.fail_all(&err);
        self.release();
    }

    fn release(&mut self) {
        if let Some(io) = self.io.take() {
            debug!("release descriptor {}", io.as_raw_fd());
        }
    }
}
