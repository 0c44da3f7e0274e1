//! Stream capabilities shared by every stream implementation.
//!
//! A stream exposes a read side ([`Readable`]), a write side
//! ([`Writable`]) or both. Operations are submitted eagerly: the
//! synchronous part of a call (state checks, queueing, half-close)
//! happens when the method is called, and the returned future only
//! waits for the outcome. Dropping that future cancels the pending
//! request without closing the stream.

use std::{future::Future, time::Duration};

use crate::Result;

/// Lifecycle of a stream.
///
/// `Draining` is the half-closed state reached after
/// [`Writable::end`]: buffered bytes stay readable, and the stream
/// becomes `Closed` once they have all been read.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum StreamState {
    /// Both sides are usable.
    #[default]
    Open,

    /// The write side is closed, the read side drains.
    Draining,

    /// The read side is closed, the write side is usable.
    WriteOnly,

    /// Both sides are closed and the resource is released.
    Closed,
}

impl StreamState {
    pub fn is_readable(self) -> bool {
        matches!(self, Self::Open | Self::Draining)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, Self::Open | Self::WriteOnly)
    }

    pub fn is_open(self) -> bool {
        self != Self::Closed
    }

    /// Returns the state reached once the write side closes.
    pub fn without_write(self) -> Self {
        match self {
            Self::Open | Self::Draining => Self::Draining,
            Self::WriteOnly | Self::Closed => Self::Closed,
        }
    }

    /// Returns the state reached once the read side closes.
    pub fn without_read(self) -> Self {
        match self {
            Self::Open | Self::WriteOnly => Self::WriteOnly,
            Self::Draining | Self::Closed => Self::Closed,
        }
    }
}

/// Bound of a single read.
///
/// A `length` of `0` means unbounded. When both a length and a
/// delimiter are set, the read completes on whichever is reached
/// first.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReadBound {
    pub length: usize,
    pub delimiter: Option<u8>,
}

impl ReadBound {
    pub fn new(length: usize, delimiter: Option<u8>) -> Self {
        Self { length, delimiter }
    }

    pub fn is_unbounded(&self) -> bool {
        self.length == 0 && self.delimiter.is_none()
    }

    /// Returns `true` if the given chunk ends with the delimiter.
    pub fn is_delimited(&self, chunk: &[u8]) -> bool {
        matches!((self.delimiter, chunk.last()), (Some(d), Some(last)) if d == *last)
    }
}

/// Reduces a delimiter to the single byte streams match on.
///
/// Only the first byte is kept: `delimiter("efg")` is the same
/// delimiter as `delimiter("e")`. This is not a multi-byte scan, see
/// [`crate::pipe::read_until`] for that.
pub fn delimiter(bytes: impl AsRef<[u8]>) -> Option<u8> {
    bytes.as_ref().first().copied()
}

/// Normalizes a timeout: a zero duration means no deadline.
pub(crate) fn deadline(timeout: Option<Duration>) -> Option<Duration> {
    timeout.filter(|timeout| !timeout.is_zero())
}

/// Common capability of every stream.
pub trait Stream {
    /// Returns `true` until the stream is fully closed.
    fn is_open(&self) -> bool;

    /// Closes both sides, fails every pending operation with
    /// [`crate::StreamError::Closed`] and releases the resource.
    ///
    /// Closing is idempotent.
    fn close(&self);
}

/// Read side of a stream.
pub trait Readable: Stream {
    /// Reads bytes from the stream.
    ///
    /// Resolves with at most `length` bytes (`0` = unbounded), or up to
    /// and including the first `delimiter` byte. At most one read can
    /// be pending at a time: a second one fails with
    /// [`crate::StreamError::Busy`].
    fn read(
        &self,
        length: usize,
        delimiter: Option<u8>,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Vec<u8>>>;

    /// Returns `true` while bytes can still be read.
    fn is_readable(&self) -> bool;

    /// Rejects the pending read, if any, with
    /// [`crate::StreamError::Cancelled`].
    ///
    /// Returns `false` if no read was pending.
    fn cancel_read(&self, reason: impl ToString) -> bool;

    /// Pipes this stream into the given sink, see [`crate::pipe::pipe`].
    fn pipe<'a, W: Writable>(
        &'a self,
        sink: &'a W,
        end: bool,
        length: usize,
        delimiter: Option<u8>,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<usize>> + 'a
    where
        Self: Sized,
    {
        crate::pipe::pipe(self, sink, end, length, delimiter, timeout)
    }
}

/// Write side of a stream.
pub trait Writable: Stream {
    /// Writes bytes to the stream.
    ///
    /// Writes are flushed in call order. Empty data resolves with `0`
    /// without touching the stream.
    fn write(&self, data: &[u8], timeout: Option<Duration>)
        -> impl Future<Output = Result<usize>>;

    /// Writes the given bytes then closes the write side.
    ///
    /// The write side is closed as soon as this method returns, even
    /// if the final write is still pending.
    fn end(&self, data: &[u8], timeout: Option<Duration>) -> impl Future<Output = Result<usize>>;

    /// Resolves with `0` once the stream is ready to accept more data,
    /// without sending any.
    fn ready(&self, timeout: Option<Duration>) -> impl Future<Output = Result<usize>>;

    /// Returns `true` while bytes can still be written.
    fn is_writable(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{deadline, delimiter, ReadBound, StreamState};

    #[test]
    fn delimiter_keeps_first_byte() {
        assert_eq!(delimiter("efg"), delimiter("e"));
        assert_eq!(delimiter(b"\n"), Some(b'\n'));
        assert_eq!(delimiter(""), None);
    }

    #[test]
    fn zero_timeout_means_no_deadline() {
        assert_eq!(deadline(Some(Duration::ZERO)), None);
        assert_eq!(deadline(None), None);
        assert_eq!(
            deadline(Some(Duration::from_secs(1))),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn half_close_transitions() {
        let state = StreamState::Open.without_write();
        assert_eq!(state, StreamState::Draining);
        assert!(state.is_readable());
        assert!(!state.is_writable());
        assert_eq!(state.without_read(), StreamState::Closed);

        let state = StreamState::Open.without_read();
        assert_eq!(state, StreamState::WriteOnly);
        assert!(state.is_writable());
        assert!(state.is_open());
        assert_eq!(state.without_write(), StreamState::Closed);
    }

    #[test]
    fn delimited_chunk() {
        let bound = ReadBound::new(0, Some(b';'));
        assert!(bound.is_delimited(b"a;"));
        assert!(!bound.is_delimited(b"a;b"));
        assert!(!bound.is_delimited(b""));
        assert!(!ReadBound::default().is_delimited(b";"));
    }
}
