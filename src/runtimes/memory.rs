//! The in-memory stream runtime.
//!
//! A [`MemoryStream`] is a duplex stream whose write side feeds its
//! own read side. Writes complete as soon as their bytes reach the
//! read buffer, unless the buffer holds at least the high-water mark,
//! in which case they queue until reads drain the buffer below it.

use std::{
    cell::RefCell,
    future::Future,
    rc::{Rc, Weak},
    time::Duration,
};

use log::{debug, trace, warn};

use crate::{
    coroutines::{
        read::{ReadEngine, ReadRequest},
        write::{Sink, WriteQueue, WriteSubmission},
    },
    io::{ReadBound, Readable, Stream, StreamState, Writable},
    pending::Outcome,
    Result, StreamError,
};

/// Write sink of a memory stream: the read buffer itself.
struct Backlog<'a> {
    reader: &'a mut ReadEngine,
    hwm: usize,
}

impl Sink for Backlog<'_> {
    fn transfer(&mut self, bytes: &[u8]) -> Result<usize> {
        if !self.is_ready() {
            return Ok(0);
        }

        self.reader.feed(bytes);
        Ok(bytes.len())
    }

    fn is_ready(&self) -> bool {
        self.hwm == 0 || self.reader.len() < self.hwm
    }
}

#[derive(Debug, Default)]
struct Memory {
    state: StreamState,
    reader: ReadEngine,
    queue: WriteQueue,
    hwm: usize,
}

impl Memory {
    /// Releases queued writes while the buffer is below the
    /// high-water mark.
    fn flush(&mut self) {
        let Self {
            reader, queue, hwm, ..
        } = self;

        let mut backlog = Backlog { reader, hwm: *hwm };

        if let Err(err) = queue.flush(&mut backlog) {
            warn!("cannot flush memory stream: {err}");
        }

        self.settle();
    }

    /// Closes the stream once the write side ended and every byte
    /// has been read.
    fn settle(&mut self) {
        if self.state != StreamState::Draining || !self.queue.is_empty() {
            return;
        }

        self.reader.finish();

        if self.reader.is_drained() {
            debug!("memory stream drained, close it");
            self.state = StreamState::Closed;
        }
    }

    fn close(&mut self, err: StreamError) {
        if self.state != StreamState::Closed {
            debug!("close memory stream: {err}");
            self.state = StreamState::Closed;
        }

        self.reader.close(err.clone());
        self.queue.fail_all(&err);
    }
}

/// In-memory duplex stream with an optional high-water mark.
///
/// Handles are cheap to clone and share the same stream, so one task
/// can write while another reads.
#[derive(Clone, Debug, Default)]
pub struct MemoryStream {
    inner: Rc<RefCell<Memory>>,
}

impl MemoryStream {
    /// Creates a stream without high-water mark: writes never queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stream whose writes queue while `hwm` or more bytes
    /// are buffered. A `hwm` of `0` disables backpressure.
    pub fn with_high_water_mark(hwm: usize) -> Self {
        debug!("create memory stream with high-water mark of {hwm} bytes");
        let memory = Memory {
            hwm,
            ..Default::default()
        };

        Self {
            inner: Rc::new(RefCell::new(memory)),
        }
    }

    pub fn high_water_mark(&self) -> usize {
        self.inner.borrow().hwm
    }

    /// Returns the amount of bytes written but not read yet.
    pub fn buffered(&self) -> usize {
        self.inner.borrow().reader.len()
    }

    pub fn state(&self) -> StreamState {
        self.inner.borrow().state
    }

    fn submit(&self, data: &[u8], timeout: Option<Duration>) -> Outcome<usize, impl FnOnce()> {
        let mut inner = self.inner.borrow_mut();

        if !inner.state.is_writable() {
            return Outcome::Settled(Err(StreamError::Unwritable));
        }

        let Memory {
            reader, queue, hwm, ..
        } = &mut *inner;

        let mut backlog = Backlog { reader, hwm: *hwm };

        match queue.submit(data, timeout, &mut backlog) {
            Ok(WriteSubmission::Done(n)) => Outcome::Settled(Ok(n)),
            Ok(WriteSubmission::Queued(id, rx)) => {
                debug!("high-water mark reached, write {id} waits");
                Outcome::pending(rx, self.forget_write(id))
            }
            Err(err) => Outcome::Settled(Err(err)),
        }
    }

    fn forget_read(&self, id: u64) -> impl FnOnce() {
        let inner = Rc::downgrade(&self.inner);
        move || with_memory(inner, |memory| memory.reader.abandon(id))
    }

    fn forget_write(&self, id: u64) -> impl FnOnce() {
        let inner = Rc::downgrade(&self.inner);

        move || {
            with_memory(inner, |memory| {
                if memory.queue.remove(id).is_some() {
                    memory.settle();
                }
            })
        }
    }
}

fn with_memory<T>(inner: Weak<RefCell<Memory>>, f: impl FnOnce(&mut Memory) -> T) {
    let Some(inner) = inner.upgrade() else {
        return;
    };

    match inner.try_borrow_mut() {
        Ok(mut memory) => {
            f(&mut *memory);
        }
        Err(_) => warn!("memory stream busy, cannot discard pending request"),
    };
}

impl Stream for MemoryStream {
    fn is_open(&self) -> bool {
        self.inner.borrow().state.is_open()
    }

    fn close(&self) {
        self.inner.borrow_mut().close(StreamError::Closed);
    }
}

impl Readable for MemoryStream {
    fn read(
        &self,
        length: usize,
        delimiter: Option<u8>,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Vec<u8>>> {
        let bound = ReadBound::new(length, delimiter);
        let mut inner = self.inner.borrow_mut();

        let outcome = match inner.reader.request(bound) {
            Ok(ReadRequest::Ready(bytes)) => {
                inner.flush();
                Outcome::Settled(Ok(bytes))
            }
            Ok(ReadRequest::Pending(id, rx)) => Outcome::pending(rx, self.forget_read(id)),
            Err(err) => Outcome::Settled(Err(err)),
        };

        drop(inner);
        outcome.wait(timeout)
    }

    fn is_readable(&self) -> bool {
        self.inner.borrow().state.is_readable()
    }

    fn cancel_read(&self, reason: impl ToString) -> bool {
        let err = StreamError::cancelled(reason);
        self.inner.borrow_mut().reader.cancel(err)
    }
}

impl Writable for MemoryStream {
    fn write(
        &self,
        data: &[u8],
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<usize>> {
        trace!("write {} bytes to memory stream", data.len());
        self.submit(data, timeout).wait(timeout)
    }

    fn end(&self, data: &[u8], timeout: Option<Duration>) -> impl Future<Output = Result<usize>> {
        trace!("end memory stream with {} bytes", data.len());
        let outcome = self.submit(data, timeout);

        let mut inner = self.inner.borrow_mut();

        if inner.state.is_writable() {
            inner.state = inner.state.without_write();
            debug!("memory stream write side closed");
            inner.settle();
        }

        drop(inner);
        outcome.wait(timeout)
    }

    fn ready(&self, timeout: Option<Duration>) -> impl Future<Output = Result<usize>> {
        let mut inner = self.inner.borrow_mut();

        let outcome = if !inner.state.is_writable() {
            Outcome::Settled(Err(StreamError::Unwritable))
        } else if inner.queue.is_empty() && (inner.hwm == 0 || inner.reader.len() < inner.hwm) {
            Outcome::Settled(Ok(0))
        } else {
            let (id, rx) = inner.queue.push(Vec::new(), 0, timeout);
            Outcome::pending(rx, self.forget_write(id))
        };

        drop(inner);
        outcome.wait(timeout)
    }

    fn is_writable(&self) -> bool {
        self.inner.borrow().state.is_writable()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time;

    use crate::{
        io::{delimiter, Readable, Stream, StreamState, Writable},
        StreamError,
    };

    use super::MemoryStream;

    #[tokio::test]
    async fn write_then_read() {
        let _ = env_logger::try_init();

        let stream = MemoryStream::new();

        assert_eq!(stream.write(b"abcdef", None).await.unwrap(), 6);
        assert_eq!(stream.read(0, None, None).await.unwrap(), b"abcdef");
        assert_eq!(stream.buffered(), 0);
    }

    #[tokio::test]
    async fn read_length() {
        let _ = env_logger::try_init();

        let stream = MemoryStream::new();
        stream.write(b"abcdef", None).await.unwrap();

        assert_eq!(stream.read(4, None, None).await.unwrap(), b"abcd");
        assert_eq!(stream.read(0, None, None).await.unwrap(), b"ef");
    }

    #[tokio::test]
    async fn read_delimiter_first_byte_only() {
        let _ = env_logger::try_init();

        let stream = MemoryStream::new();
        stream.write(b"abcdefgh", None).await.unwrap();

        let chunk = stream.read(0, delimiter("efg"), None).await.unwrap();
        assert_eq!(chunk, b"abcde");

        stream.write(b"eee", None).await.unwrap();
        let chunk = stream.read(0, delimiter("e"), None).await.unwrap();
        assert_eq!(chunk, b"fghe");
    }

    #[tokio::test]
    async fn pending_read_resolves_on_write() {
        let _ = env_logger::try_init();

        let stream = MemoryStream::new();
        let read = stream.read(0, Some(b'\n'), None);

        stream.write(b"hello", None).await.unwrap();
        stream.write(b" world\nrest", None).await.unwrap();

        assert_eq!(read.await.unwrap(), b"hello world\n");
        assert_eq!(stream.buffered(), 4);
    }

    #[tokio::test]
    async fn second_read_is_busy() {
        let _ = env_logger::try_init();

        let stream = MemoryStream::new();
        let first = stream.read(0, None, None);

        let err = stream.read(0, None, None).await.unwrap_err();
        assert_eq!(err, StreamError::Busy);

        stream.write(b"abc", None).await.unwrap();
        assert_eq!(first.await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn close_fails_pending_read() {
        let _ = env_logger::try_init();

        let stream = MemoryStream::new();
        let read = stream.read(0, None, None);

        stream.close();

        assert_eq!(read.await.unwrap_err(), StreamError::Closed);
        assert_eq!(
            stream.read(0, None, None).await.unwrap_err(),
            StreamError::Unreadable
        );
        assert_eq!(
            stream.write(b"a", None).await.unwrap_err(),
            StreamError::Unwritable
        );
        assert!(!stream.is_open());

        // closing twice is harmless
        stream.close();
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[tokio::test]
    async fn cancel_read_with_reason() {
        let _ = env_logger::try_init();

        let stream = MemoryStream::new();
        let read = stream.read(0, None, None);

        assert!(stream.cancel_read("changed my mind"));
        assert_eq!(
            read.await.unwrap_err(),
            StreamError::Cancelled("changed my mind".into())
        );

        let read = stream.read(0, None, None);
        stream.write(b"later", None).await.unwrap();
        assert_eq!(read.await.unwrap(), b"later");
        assert!(stream.is_open());
    }

    #[tokio::test]
    async fn dropped_read_frees_the_slot() {
        let _ = env_logger::try_init();

        let stream = MemoryStream::new();
        drop(stream.read(0, None, None));

        stream.write(b"kept", None).await.unwrap();
        assert_eq!(stream.read(0, None, None).await.unwrap(), b"kept");
    }

    #[tokio::test]
    async fn empty_and_zero_writes() {
        let _ = env_logger::try_init();

        let stream = MemoryStream::new();
        stream.write(b"x", None).await.unwrap();

        assert_eq!(stream.write(b"", None).await.unwrap(), 0);
        assert_eq!(stream.buffered(), 1);

        assert_eq!(stream.write(b"0", None).await.unwrap(), 1);
        assert_eq!(stream.read(0, None, None).await.unwrap(), b"x0");
    }

    #[tokio::test]
    async fn end_drains_then_closes() {
        let _ = env_logger::try_init();

        let stream = MemoryStream::new();
        stream.write(b"abc", None).await.unwrap();

        let end = stream.end(b"def", None);
        assert!(!stream.is_writable());
        assert!(stream.is_readable());
        assert_eq!(end.await.unwrap(), 3);
        assert_eq!(stream.state(), StreamState::Draining);

        assert_eq!(stream.read(2, None, None).await.unwrap(), b"ab");
        assert!(stream.is_open());

        assert_eq!(stream.read(0, None, None).await.unwrap(), b"cdef");
        assert!(!stream.is_open());
        assert!(!stream.is_readable());

        assert_eq!(
            stream.end(b"", None).await.unwrap_err(),
            StreamError::Unwritable
        );
    }

    #[tokio::test]
    async fn end_with_pending_read_and_no_data() {
        let _ = env_logger::try_init();

        let stream = MemoryStream::new();
        let read = stream.read(0, None, None);

        assert_eq!(stream.end(b"", None).await.unwrap(), 0);
        assert_eq!(read.await.unwrap_err(), StreamError::Closed);
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[tokio::test]
    async fn end_with_pending_delimited_read() {
        let _ = env_logger::try_init();

        let stream = MemoryStream::new();
        let read = stream.read(0, Some(b';'), None);

        assert_eq!(stream.end(b"no delimiter", None).await.unwrap(), 12);
        assert_eq!(read.await.unwrap(), b"no delimiter");
        assert!(!stream.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn high_water_mark_holds_writes() {
        let _ = env_logger::try_init();

        let stream = MemoryStream::with_high_water_mark(4);

        assert_eq!(stream.write(b"abcdef", None).await.unwrap(), 6);

        let second = stream.write(b"gh", None);
        tokio::pin!(second);

        let waited = time::timeout(Duration::from_secs(1), &mut second).await;
        assert!(waited.is_err(), "write should wait for the buffer to drain");
        assert_eq!(stream.buffered(), 6);

        assert_eq!(stream.read(2, None, None).await.unwrap(), b"ab");
        let waited = time::timeout(Duration::from_secs(1), &mut second).await;
        assert!(waited.is_err(), "buffer is still at the high-water mark");

        assert_eq!(stream.read(1, None, None).await.unwrap(), b"c");
        assert_eq!(second.await.unwrap(), 2);
        assert_eq!(stream.read(0, None, None).await.unwrap(), b"defgh");
    }

    #[tokio::test]
    async fn queued_writes_keep_order() {
        let _ = env_logger::try_init();

        let stream = MemoryStream::with_high_water_mark(1);
        stream.write(b"a", None).await.unwrap();

        let b = stream.write(b"b", None);
        let c = stream.write(b"c", None);

        assert_eq!(stream.read(0, None, None).await.unwrap(), b"a");
        assert_eq!(stream.read(0, None, None).await.unwrap(), b"b");
        assert_eq!(stream.read(0, None, None).await.unwrap(), b"c");

        assert_eq!(b.await.unwrap(), 1);
        assert_eq!(c.await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn read_timeout_keeps_stream_open() {
        let _ = env_logger::try_init();

        let stream = MemoryStream::new();
        let timeout = Duration::from_millis(100);

        let err = stream.read(0, None, Some(timeout)).await.unwrap_err();
        assert_eq!(err, StreamError::Timeout(timeout));
        assert!(stream.is_open());

        stream.write(b"abc", None).await.unwrap();
        assert_eq!(stream.read(0, None, Some(timeout)).await.unwrap(), b"abc");
    }

    #[tokio::test(start_paused = true)]
    async fn write_timeout_keeps_stream_open() {
        let _ = env_logger::try_init();

        let stream = MemoryStream::with_high_water_mark(2);
        let timeout = Duration::from_millis(100);

        stream.write(b"ab", None).await.unwrap();

        let err = stream.write(b"cd", Some(timeout)).await.unwrap_err();
        assert_eq!(err, StreamError::Timeout(timeout));
        assert!(stream.is_writable());

        assert_eq!(stream.read(0, None, None).await.unwrap(), b"ab");
        assert_eq!(stream.write(b"ef", Some(timeout)).await.unwrap(), 2);
        assert_eq!(stream.read(0, None, None).await.unwrap(), b"ef");
    }

    #[tokio::test]
    async fn close_fails_queued_writes() {
        let _ = env_logger::try_init();

        let stream = MemoryStream::with_high_water_mark(1);
        stream.write(b"a", None).await.unwrap();

        let queued = stream.write(b"b", None);
        stream.close();

        assert_eq!(queued.await.unwrap_err(), StreamError::Closed);
    }

    #[tokio::test]
    async fn end_waits_for_queued_data() {
        let _ = env_logger::try_init();

        let stream = MemoryStream::with_high_water_mark(1);
        stream.write(b"a", None).await.unwrap();

        let end = stream.end(b"b", None);
        assert!(!stream.is_writable());

        assert_eq!(stream.read(0, None, None).await.unwrap(), b"a");
        assert_eq!(end.await.unwrap(), 1);
        assert!(stream.is_open());

        assert_eq!(stream.read(0, None, None).await.unwrap(), b"b");
        assert!(!stream.is_open());
    }

    #[tokio::test]
    async fn ready_waits_for_high_water_mark() {
        let _ = env_logger::try_init();

        let stream = MemoryStream::with_high_water_mark(2);
        assert_eq!(stream.ready(None).await.unwrap(), 0);

        stream.write(b"ab", None).await.unwrap();
        let ready = stream.ready(None);

        assert_eq!(stream.read(1, None, None).await.unwrap(), b"a");
        assert_eq!(ready.await.unwrap(), 0);
        assert_eq!(stream.buffered(), 1);
    }
}
