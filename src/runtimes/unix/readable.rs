use std::{
    cell::RefCell,
    future::Future,
    io::{self, Read},
    os::unix::io::AsRawFd,
    rc::{Rc, Weak},
    time::Duration,
};

use log::{debug, trace, warn};
use tokio::{
    io::unix::AsyncFd,
    sync::oneshot,
    time::{self, Instant},
};

use crate::{
    coroutines::read::ReadRequest,
    io::{deadline, ReadBound, Readable, Stream, StreamState},
    pending::{CancelGuard, Outcome},
    Result, StreamError,
};

use super::{Pipe, Shared, DEFAULT_CAPACITY};

pub(super) fn read<T>(
    pipe: &Shared<T>,
    length: usize,
    delimiter: Option<u8>,
    timeout: Option<Duration>,
) -> impl Future<Output = Result<Vec<u8>>>
where
    T: AsRawFd + 'static,
    for<'a> &'a T: Read,
{
    let bound = ReadBound::new(length, delimiter);
    let timeout = deadline(timeout).map(|timeout| (Instant::now() + timeout, timeout));
    let mut inner = pipe.borrow_mut();

    let outcome = match inner.reader.request(bound) {
        Ok(ReadRequest::Ready(bytes)) => {
            inner.settle();
            Outcome::Settled(Ok(bytes))
        }
        Ok(ReadRequest::Pending(id, rx)) => Outcome::pending(rx, forget(pipe, id)),
        Err(err) => Outcome::Settled(Err(err)),
    };

    drop(inner);
    let pipe = Rc::downgrade(pipe);

    async move {
        match outcome {
            Outcome::Settled(result) => result,
            Outcome::Pending(rx, guard) => drive(pipe, rx, guard, timeout).await,
        }
    }
}

pub(super) fn cancel<T: AsRawFd>(pipe: &Shared<T>, reason: impl ToString) -> bool {
    let err = StreamError::cancelled(reason);
    pipe.borrow_mut().reader.cancel(err)
}

fn forget<T: AsRawFd>(pipe: &Shared<T>, id: u64) -> impl FnOnce() {
    let pipe = Rc::downgrade(pipe);

    move || {
        let Some(pipe) = pipe.upgrade() else {
            return;
        };

        match pipe.try_borrow_mut() {
            Ok(mut inner) => {
                inner.reader.abandon(id);
            }
            Err(_) => warn!("stream busy, cannot discard read {id}"),
        };
    }
}

/// Feeds the read engine from the descriptor until the pending read
/// settles.
///
/// Waiting for readability past the deadline is fatal to the stream.
async fn drive<T, F>(
    pipe: Weak<RefCell<Pipe<T>>>,
    mut rx: oneshot::Receiver<Result<Vec<u8>>>,
    mut guard: CancelGuard<F>,
    timeout: Option<(Instant, Duration)>,
) -> Result<Vec<u8>>
where
    T: AsRawFd,
    for<'a> &'a T: Read,
    F: FnOnce(),
{
    loop {
        let Some((io, capacity)) = descriptor(&pipe) else {
            // the stream was released, the request settled with it
            guard.disarm();
            return (&mut rx).await.unwrap_or(Err(StreamError::Closed));
        };

        let filled = tokio::select! {
            biased;
            result = &mut rx => {
                guard.disarm();
                return result.unwrap_or(Err(StreamError::Closed));
            }
            filled = fill(&io, capacity, timeout) => filled,
        };

        let Some(pipe) = pipe.upgrade() else {
            continue;
        };

        let mut inner = pipe.borrow_mut();

        match filled {
            Ok(bytes) if bytes.is_empty() => {
                debug!("end of stream on descriptor {}", io.as_raw_fd());
                inner.reader.finish();
                inner.settle();
            }
            Ok(bytes) => {
                trace!("read {} bytes from descriptor {}", bytes.len(), io.as_raw_fd());
                inner.reader.feed(&bytes);
            }
            Err(err) => inner.free(err),
        }
    }
}

fn descriptor<T: AsRawFd>(pipe: &Weak<RefCell<Pipe<T>>>) -> Option<(Rc<AsyncFd<T>>, usize)> {
    let pipe = pipe.upgrade()?;
    let inner = pipe.borrow();
    let io = inner.io.clone()?;
    Some((io, inner.capacity))
}

/// Reads at most `capacity` bytes once the descriptor is readable.
///
/// Resolves with an empty chunk at the end of the stream.
async fn fill<T>(
    io: &AsyncFd<T>,
    capacity: usize,
    timeout: Option<(Instant, Duration)>,
) -> Result<Vec<u8>>
where
    T: AsRawFd,
    for<'a> &'a T: Read,
{
    let mut chunk = vec![0; capacity];

    loop {
        let mut guard = match timeout {
            None => io.readable().await?,
            Some((deadline, timeout)) => time::timeout_at(deadline, io.readable())
                .await
                .map_err(|_| StreamError::Timeout(timeout))??,
        };

        match guard.try_io(|io| io.get_ref().read(&mut chunk)) {
            Ok(Ok(n)) => {
                chunk.truncate(n);
                return Ok(chunk);
            }
            Ok(Err(err)) if err.kind() == io::ErrorKind::Interrupted => continue,
            Ok(Err(err)) => return Err(err.into()),
            Err(_would_block) => continue,
        }
    }
}

/// Read-only stream over a non-blocking descriptor.
///
/// Bytes are read from the descriptor only while a read is pending,
/// at most `capacity` bytes at once. The stream closes once the
/// descriptor reached its end and every buffered byte has been read.
pub struct ReadablePipe<T: AsRawFd> {
    pipe: Shared<T>,
}

impl<T> ReadablePipe<T>
where
    T: AsRawFd + 'static,
    for<'a> &'a T: Read,
{
    /// Registers the given descriptor, which must be in non-blocking
    /// mode.
    pub fn new(io: T) -> io::Result<Self> {
        Self::with_capacity(io, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(io: T, capacity: usize) -> io::Result<Self> {
        let pipe = Pipe::new(io, StreamState::Draining, capacity.max(1))?;
        Ok(Self {
            pipe: pipe.shared(),
        })
    }

    /// Returns the amount of bytes read from the descriptor but not
    /// consumed yet.
    pub fn buffered(&self) -> usize {
        self.pipe.borrow().reader.len()
    }
}

impl<T: AsRawFd> Stream for ReadablePipe<T> {
    fn is_open(&self) -> bool {
        self.pipe.borrow().is_open()
    }

    fn close(&self) {
        self.pipe.borrow_mut().free(StreamError::Closed);
    }
}

impl<T> Readable for ReadablePipe<T>
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
        read(&self.pipe, length, delimiter, timeout)
    }

    fn is_readable(&self) -> bool {
        self.pipe.borrow().is_readable()
    }

    fn cancel_read(&self, reason: impl ToString) -> bool {
        cancel(&self.pipe, reason)
    }
}
