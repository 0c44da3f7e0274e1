use std::{
    future::Future,
    io::{self, Read, Write},
    os::unix::io::AsRawFd,
    time::Duration,
};

use crate::{
    io::{Readable, Stream, StreamState, Writable},
    Result, StreamError,
};

use super::{readable, writable, HalfClose, Pipe, Shared, DEFAULT_CAPACITY};

/// Duplex stream over a non-blocking socket.
///
/// Ending the write side shuts the socket down for writing once the
/// queue is flushed, while the read side stays usable until the peer
/// ends its own.
pub struct DuplexPipe<T: AsRawFd> {
    pipe: Shared<T>,
}

impl<T> DuplexPipe<T>
where
    T: HalfClose + AsRawFd + 'static,
    for<'a> &'a T: Read + Write,
{
    /// Registers the given socket, which must be in non-blocking mode.
    pub fn new(io: T) -> io::Result<Self> {
        Self::with_capacity(io, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(io: T, capacity: usize) -> io::Result<Self> {
        let mut pipe = Pipe::new(io, StreamState::Open, capacity.max(1))?;
        pipe.shutdown = Some(<T as HalfClose>::shutdown_write);

        Ok(Self {
            pipe: pipe.shared(),
        })
    }

    pub fn state(&self) -> StreamState {
        self.pipe.borrow().state
    }
}

impl<T: AsRawFd> Stream for DuplexPipe<T> {
    fn is_open(&self) -> bool {
        self.pipe.borrow().is_open()
    }

    fn close(&self) {
        self.pipe.borrow_mut().free(StreamError::Closed);
    }
}

impl<T> Readable for DuplexPipe<T>
where
    T: AsRawFd + 'static,
    for<'a> &'a T: Read,
{
    fn read(
        &self,
        length: usize,
        delimiter: Option<u8>,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Vec<u8>>> {
        readable::read(&self.pipe, length, delimiter, timeout)
    }

    fn is_readable(&self) -> bool {
        self.pipe.borrow().is_readable()
    }

    fn cancel_read(&self, reason: impl ToString) -> bool {
        readable::cancel(&self.pipe, reason)
    }
}

impl<T> Writable for DuplexPipe<T>
where
    T: AsRawFd + 'static,
    for<'a> &'a T: Write,
{
    fn write(
        &self,
        data: &[u8],
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<usize>> {
        writable::write(&self.pipe, data, timeout)
    }

    fn end(&self, data: &[u8], timeout: Option<Duration>) -> impl Future<Output = Result<usize>> {
        writable::end(&self.pipe, data, timeout)
    }

    fn ready(&self, timeout: Option<Duration>) -> impl Future<Output = Result<usize>> {
        writable::ready(&self.pipe, timeout)
    }

    fn is_writable(&self) -> bool {
        self.pipe.borrow().is_writable()
    }
}
