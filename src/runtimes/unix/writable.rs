use std::{
    cell::RefCell,
    future::Future,
    io::{self, Write},
    os::unix::io::AsRawFd,
    rc::{Rc, Weak},
    time::Duration,
};

use log::{debug, trace, warn};
use tokio::{
    io::unix::{AsyncFd, AsyncFdReadyGuard},
    sync::oneshot,
    time,
};

use crate::{
    coroutines::write::{Sink, WriteSubmission},
    io::{deadline, Stream, StreamState, Writable},
    pending::{CancelGuard, Outcome},
    Result, StreamError,
};

use super::{Pipe, Shared, DEFAULT_CAPACITY};

/// Writes straight to the descriptor, without waiting for
/// writability.
struct Direct<'a, T: AsRawFd> {
    io: &'a AsyncFd<T>,
}

impl<T> Sink for Direct<'_, T>
where
    T: AsRawFd,
    for<'a> &'a T: Write,
{
    fn transfer(&mut self, bytes: &[u8]) -> Result<usize> {
        match self.io.get_ref().write(bytes) {
            Ok(0) => Err(write_zero()),
            Ok(n) => Ok(n),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(err) => Err(err.into()),
        }
    }
}

/// Writes to the descriptor after a writability signal.
struct Ready<'a, 'b, T: AsRawFd> {
    guard: &'a mut AsyncFdReadyGuard<'b, T>,
}

impl<T> Sink for Ready<'_, '_, T>
where
    T: AsRawFd,
    for<'a> &'a T: Write,
{
    fn transfer(&mut self, bytes: &[u8]) -> Result<usize> {
        match self.guard.try_io(|io| io.get_ref().write(bytes)) {
            Ok(Ok(0)) => Err(write_zero()),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(err)) => Err(err.into()),
            Err(_would_block) => Ok(0),
        }
    }
}

fn write_zero() -> StreamError {
    io::Error::new(io::ErrorKind::WriteZero, "failed to write to stream").into()
}

fn submit<T>(
    pipe: &Shared<T>,
    data: &[u8],
    timeout: Option<Duration>,
) -> Outcome<usize, impl FnOnce()>
where
    T: AsRawFd + 'static,
    for<'a> &'a T: Write,
{
    let mut inner = pipe.borrow_mut();

    let io = match &inner.io {
        Some(io) if inner.is_writable() => io.clone(),
        _ => return Outcome::Settled(Err(StreamError::Unwritable)),
    };

    let mut sink = Direct { io: &io };
    let submitted = inner.queue.submit(data, deadline(timeout), &mut sink);

    match submitted {
        Ok(WriteSubmission::Done(n)) => Outcome::Settled(Ok(n)),
        Ok(WriteSubmission::Queued(id, rx)) => Outcome::pending(rx, forget(pipe, id)),
        Err(err) => {
            inner.free(err.clone());
            Outcome::Settled(Err(err))
        }
    }
}

pub(super) fn write<T>(
    pipe: &Shared<T>,
    data: &[u8],
    timeout: Option<Duration>,
) -> impl Future<Output = Result<usize>>
where
    T: AsRawFd + 'static,
    for<'a> &'a T: Write,
{
    let outcome = submit(pipe, data, timeout);
    drive(pipe, outcome)
}

pub(super) fn end<T>(
    pipe: &Shared<T>,
    data: &[u8],
    timeout: Option<Duration>,
) -> impl Future<Output = Result<usize>>
where
    T: AsRawFd + 'static,
    for<'a> &'a T: Write,
{
    let outcome = submit(pipe, data, timeout);
    let mut inner = pipe.borrow_mut();

    if inner.is_writable() {
        debug!("end of writes, {} queued", inner.queue.len());
        inner.ended = true;
        inner.settle();
    }

    drop(inner);
    drive(pipe, outcome)
}

pub(super) fn ready<T>(
    pipe: &Shared<T>,
    timeout: Option<Duration>,
) -> impl Future<Output = Result<usize>>
where
    T: AsRawFd + 'static,
    for<'a> &'a T: Write,
{
    let mut inner = pipe.borrow_mut();

    let outcome = if !inner.is_writable() || inner.io.is_none() {
        Outcome::Settled(Err(StreamError::Unwritable))
    } else {
        let (id, rx) = inner.queue.push(Vec::new(), 0, deadline(timeout));
        Outcome::pending(rx, forget(pipe, id))
    };

    drop(inner);
    drive(pipe, outcome)
}

/// Discards a queued write whose future went away.
///
/// A write already partially sent stays queued, and is flushed by
/// the next awaited write of the stream: dropping it would tear the
/// byte stream.
fn forget<T: AsRawFd>(pipe: &Shared<T>, id: u64) -> impl FnOnce() {
    let pipe = Rc::downgrade(pipe);

    move || {
        let Some(pipe) = pipe.upgrade() else {
            return;
        };

        let Ok(mut inner) = pipe.try_borrow_mut() else {
            warn!("stream busy, cannot discard write {id}");
            return;
        };

        let started = inner
            .queue
            .head()
            .is_some_and(|head| head.id() == id && head.is_started());

        if started {
            debug!("write {id} partially sent, keep it queued");
        } else if inner.queue.remove(id).is_some() {
            inner.settle();
        }
    }
}

fn drive<T, F>(pipe: &Shared<T>, outcome: Outcome<usize, F>) -> impl Future<Output = Result<usize>>
where
    T: AsRawFd + 'static,
    for<'a> &'a T: Write,
    F: FnOnce(),
{
    let pipe = Rc::downgrade(pipe);

    async move {
        match outcome {
            Outcome::Settled(result) => result,
            Outcome::Pending(rx, guard) => flush(pipe, rx, guard).await,
        }
    }
}

/// Flushes the queue on every writability signal, until the given
/// entry settles.
///
/// Any awaited write drives the queue from its head, so entries left
/// behind by dropped futures are flushed as well. Each wait is
/// bounded by the timeout of the head entry, and elapsing it frees
/// the stream.
async fn flush<T, F>(
    pipe: Weak<RefCell<Pipe<T>>>,
    mut rx: oneshot::Receiver<Result<usize>>,
    mut guard: CancelGuard<F>,
) -> Result<usize>
where
    T: AsRawFd,
    for<'a> &'a T: Write,
    F: FnOnce(),
{
    loop {
        let Some((io, timeout)) = head(&pipe) else {
            // the entry left the queue, it settled on its way out
            guard.disarm();
            return (&mut rx).await.unwrap_or(Err(StreamError::Closed));
        };

        let waited = tokio::select! {
            biased;
            result = &mut rx => {
                guard.disarm();
                return result.unwrap_or(Err(StreamError::Closed));
            }
            waited = writable(&io, timeout) => waited,
        };

        let Some(pipe) = pipe.upgrade() else {
            continue;
        };

        let mut inner = pipe.borrow_mut();

        let flushed = match waited {
            Ok(mut ready) => inner.queue.flush(&mut Ready { guard: &mut ready }),
            Err(err) => Err(err),
        };

        match flushed {
            Ok(n) => {
                trace!("{n} queued writes complete");
                inner.settle();
            }
            Err(err) => inner.free(err),
        }
    }
}

fn head<T: AsRawFd>(
    pipe: &Weak<RefCell<Pipe<T>>>,
) -> Option<(Rc<AsyncFd<T>>, Option<Duration>)> {
    let pipe = pipe.upgrade()?;
    let inner = pipe.borrow();
    let io = inner.io.clone()?;
    let timeout = inner.queue.head()?.timeout();
    Some((io, timeout))
}

async fn writable<T: AsRawFd>(
    io: &AsyncFd<T>,
    timeout: Option<Duration>,
) -> Result<AsyncFdReadyGuard<'_, T>> {
    let guard = match timeout {
        None => io.writable().await?,
        Some(timeout) => time::timeout(timeout, io.writable())
            .await
            .map_err(|_| StreamError::Timeout(timeout))??,
    };

    Ok(guard)
}

/// Write-only stream over a non-blocking descriptor.
///
/// Writes are first attempted directly. Whatever the descriptor does
/// not accept is queued, and flushed on writability while a write of
/// the stream is awaited.
pub struct WritablePipe<T: AsRawFd> {
    pipe: Shared<T>,
}

impl<T> WritablePipe<T>
where
    T: AsRawFd + 'static,
    for<'a> &'a T: Write,
{
    /// Registers the given descriptor, which must be in non-blocking
    /// mode.
    pub fn new(io: T) -> io::Result<Self> {
        let pipe = Pipe::new(io, StreamState::WriteOnly, DEFAULT_CAPACITY)?;
        Ok(Self {
            pipe: pipe.shared(),
        })
    }

    /// Returns the amount of writes not flushed yet.
    pub fn queued(&self) -> usize {
        self.pipe.borrow().queue.len()
    }
}

impl<T: AsRawFd> Stream for WritablePipe<T> {
    fn is_open(&self) -> bool {
        self.pipe.borrow().is_open()
    }

    fn close(&self) {
        self.pipe.borrow_mut().free(StreamError::Closed);
    }
}

impl<T> Writable for WritablePipe<T>
where
    T: AsRawFd + 'static,
    for<'a> &'a T: Write,
{
    fn write(
        &self,
        data: &[u8],
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<usize>> {
        write(&self.pipe, data, timeout)
    }

    fn end(&self, data: &[u8], timeout: Option<Duration>) -> impl Future<Output = Result<usize>> {
        end(&self.pipe, data, timeout)
    }

    fn ready(&self, timeout: Option<Duration>) -> impl Future<Output = Result<usize>> {
        ready(&self.pipe, timeout)
    }

    fn is_writable(&self) -> bool {
        self.pipe.borrow().is_writable()
    }
}
