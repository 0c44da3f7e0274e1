//! Stream errors.

use std::{io, time::Duration};

use thiserror::Error;

/// Result alias used by every stream operation.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors delivered to the caller awaiting a read or a write.
///
/// Only [`StreamError::Io`] and, for descriptor-backed streams,
/// [`StreamError::Timeout`] are fatal to the stream itself. Every
/// other variant affects the one operation it is returned to.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum StreamError {
    /// A read was requested while another one is still pending.
    #[error("Stream busy: a read is already pending")]
    Busy,

    /// The read side of the stream is closed.
    #[error("Stream is no longer readable")]
    Unreadable,

    /// The write side of the stream is closed.
    #[error("Stream is no longer writable")]
    Unwritable,

    /// The stream closed while the operation was pending.
    #[error("Stream closed")]
    Closed,

    /// The operation did not complete before its deadline.
    #[error("Stream operation timed out after {0:?}")]
    Timeout(Duration),

    /// The operation was cancelled by the caller.
    #[error("Stream operation cancelled: {0}")]
    Cancelled(String),

    /// The underlying descriptor failed.
    #[error("Stream I/O failure: {message}")]
    Io { kind: io::ErrorKind, message: String },

    /// The stream ended before the expected amount of bytes.
    #[error("Unexpected EOF, expected to read {missing}/{expected} more bytes")]
    UnexpectedEof { missing: usize, expected: usize },

    /// An argument given to a stream operation is not valid.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl StreamError {
    pub fn cancelled(reason: impl ToString) -> Self {
        Self::Cancelled(reason.to_string())
    }

    /// Returns `true` for [`StreamError::Io`] failures.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::StreamError;

    #[test]
    fn io_error_keeps_system_text() {
        let err = io::Error::new(io::ErrorKind::BrokenPipe, "Broken pipe (os error 32)");
        let err = StreamError::from(err);

        assert!(err.is_io());
        assert_eq!(
            err.to_string(),
            "Stream I/O failure: Broken pipe (os error 32)"
        );
    }

    #[test]
    fn cancelled_keeps_reason() {
        let err = StreamError::cancelled("shutdown");
        assert_eq!(err, StreamError::Cancelled("shutdown".into()));
    }
}
