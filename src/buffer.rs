//! Growable FIFO byte buffer.

use std::fmt;

use thiserror::Error;

/// Errors that can occur when consuming a [`ByteBuffer`].
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum BufferError {
    #[error("Cannot consume {requested} bytes, only {available} available")]
    Underflow { requested: usize, available: usize },
}

/// Growable byte store with append-at-tail and consume-at-head
/// discipline.
///
/// Consumed bytes are not moved on every call: the head offset
/// advances and the storage is compacted once the dead prefix grows
/// larger than the live bytes.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct ByteBuffer {
    bytes: Vec<u8>,
    head: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            head: 0,
        }
    }

    /// Returns the amount of bytes that can still be consumed.
    pub fn len(&self) -> usize {
        self.bytes.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the live bytes, head first.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[self.head..]
    }

    /// Appends the given bytes at the tail of the buffer.
    ///
    /// No size limit is enforced here: limits are a policy of the
    /// stream owning the buffer.
    pub fn append(&mut self, bytes: &[u8]) {
        if self.is_empty() {
            self.bytes.clear();
            self.head = 0;
        }

        self.bytes.extend_from_slice(bytes);
    }

    /// Removes and returns the first `n` bytes of the buffer.
    pub fn consume(&mut self, n: usize) -> Result<Vec<u8>, BufferError> {
        let available = self.len();

        if n > available {
            return Err(BufferError::Underflow {
                requested: n,
                available,
            });
        }

        let end = self.head + n;
        let bytes = self.bytes[self.head..end].to_vec();
        self.head = end;
        self.compact();

        Ok(bytes)
    }

    /// Removes and returns every live byte.
    pub fn take_all(&mut self) -> Vec<u8> {
        let bytes = self.bytes.split_off(self.head);
        self.bytes.clear();
        self.head = 0;
        bytes
    }

    /// Returns the offset of the first occurrence of `byte`, counted
    /// from the head.
    pub fn index_of(&self, byte: u8) -> Option<usize> {
        memchr::memchr(byte, self.as_slice())
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.head = 0;
    }

    fn compact(&mut self) {
        if self.head == self.bytes.len() {
            self.bytes.clear();
            self.head = 0;
        } else if self.head > self.len() {
            self.bytes.drain(..self.head);
            self.head = 0;
        }
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("len", &self.len())
            .field("capacity", &self.bytes.capacity())
            .finish()
    }
}

impl From<&[u8]> for ByteBuffer {
    fn from(bytes: &[u8]) -> Self {
        let mut buffer = Self::with_capacity(bytes.len());
        buffer.append(bytes);
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::{BufferError, ByteBuffer};

    #[test]
    fn append_then_consume() {
        let mut buffer = ByteBuffer::new();
        assert!(buffer.is_empty());

        buffer.append(b"hello world");
        assert_eq!(buffer.len(), 11);

        assert_eq!(buffer.consume(6).unwrap(), b"hello ");
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.as_slice(), b"world");

        buffer.append(b"!");
        assert_eq!(buffer.take_all(), b"world!");
        assert!(buffer.is_empty());
    }

    #[test]
    fn consume_more_than_available() {
        let mut buffer = ByteBuffer::from(&b"abc"[..]);

        assert_eq!(
            buffer.consume(4),
            Err(BufferError::Underflow {
                requested: 4,
                available: 3,
            })
        );

        assert_eq!(buffer.as_slice(), b"abc");
    }

    #[test]
    fn consume_zero() {
        let mut buffer = ByteBuffer::from(&b"abc"[..]);
        assert_eq!(buffer.consume(0).unwrap(), b"");
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn index_of_is_relative_to_head() {
        let mut buffer = ByteBuffer::from(&b"a,b,c"[..]);
        assert_eq!(buffer.index_of(b','), Some(1));

        buffer.consume(2).unwrap();
        assert_eq!(buffer.index_of(b','), Some(1));
        assert_eq!(buffer.index_of(b'a'), None);
    }

    #[test]
    fn compaction_keeps_order() {
        let mut buffer = ByteBuffer::new();

        for chunk in [&b"0123"[..], b"4567", b"89"] {
            buffer.append(chunk);
            buffer.consume(3).unwrap();
        }

        assert_eq!(buffer.as_slice(), b"9");
    }
}
