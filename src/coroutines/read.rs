//! I/O-free read engine: a byte buffer and a single pending read.

use log::{debug, trace};
use tokio::sync::oneshot;

use crate::{buffer::ByteBuffer, io::ReadBound, Result, StreamError};

/// Outcome of a read request.
#[derive(Debug)]
pub enum ReadRequest {
    /// The buffer already satisfied the bound.
    Ready(Vec<u8>),

    /// The read waits for more bytes. The id identifies the request
    /// for [`ReadEngine::abandon`].
    Pending(u64, oneshot::Receiver<Result<Vec<u8>>>),
}

#[derive(Debug)]
struct PendingRead {
    id: u64,
    bound: ReadBound,
    tx: oneshot::Sender<Result<Vec<u8>>>,
}

/// I/O-free read engine.
///
/// Owns the stream's [`ByteBuffer`] and at most one pending read.
/// Bytes are fed by the stream runtime, and the pending read is
/// re-checked against its bound after every feed.
#[derive(Debug)]
pub struct ReadEngine {
    buffer: ByteBuffer,
    pending: Option<PendingRead>,
    /// More bytes may still be fed.
    open: bool,
    next_id: u64,
}

impl ReadEngine {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: ByteBuffer::with_capacity(capacity),
            pending: None,
            open: true,
            next_id: 0,
        }
    }

    pub fn buffer(&self) -> &ByteBuffer {
        &self.buffer
    }

    /// Returns the amount of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Returns `true` while bytes are buffered or may still be fed.
    pub fn is_readable(&self) -> bool {
        self.open || !self.buffer.is_empty()
    }

    /// Returns `true` once no byte will ever be delivered again.
    pub fn is_drained(&self) -> bool {
        !self.is_readable()
    }

    /// Submits a read.
    pub fn request(&mut self, bound: ReadBound) -> Result<ReadRequest> {
        if self.pending.is_some() {
            return Err(StreamError::Busy);
        }

        if let Some(bytes) = self.take(bound) {
            debug!("read {} buffered bytes", bytes.len());
            return Ok(ReadRequest::Ready(bytes));
        }

        if !self.open {
            return Err(StreamError::Unreadable);
        }

        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = oneshot::channel();
        trace!("break: need more bytes to satisfy {bound:?}");
        self.pending = Some(PendingRead { id, bound, tx });

        Ok(ReadRequest::Pending(id, rx))
    }

    /// Appends bytes to the buffer and resumes the pending read.
    pub fn feed(&mut self, bytes: &[u8]) {
        trace!("feed {} bytes", bytes.len());
        self.buffer.append(bytes);
        self.resume();
    }

    /// Marks the end of the input: bytes still buffered remain
    /// deliverable, and a pending read with nothing left to deliver
    /// fails with [`StreamError::Closed`].
    pub fn finish(&mut self) {
        if self.open {
            debug!("no more bytes will be fed ({} buffered)", self.buffer.len());
            self.open = false;
        }

        self.resume();
    }

    /// Discards the buffer and fails the pending read with the given
    /// error.
    pub fn close(&mut self, err: StreamError) {
        self.open = false;
        self.buffer.clear();

        if let Some(pending) = self.pending.take() {
            debug!("fail pending read: {err}");
            let _ = pending.tx.send(Err(err));
        }
    }

    /// Fails the pending read with the given error, leaving the buffer
    /// untouched.
    pub fn cancel(&mut self, err: StreamError) -> bool {
        match self.pending.take() {
            Some(pending) => {
                debug!("cancel pending read: {err}");
                let _ = pending.tx.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Forgets the pending read if it matches the given id.
    ///
    /// Used when the awaiting side went away: nothing is sent.
    pub fn abandon(&mut self, id: u64) -> bool {
        match &self.pending {
            Some(pending) if pending.id == id => {
                trace!("abandon pending read {id}");
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    fn resume(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        if pending.tx.is_closed() {
            trace!("drop pending read {}: receiver gone", pending.id);
            return;
        }

        if let Some(bytes) = self.take(pending.bound) {
            debug!("resume pending read with {} bytes", bytes.len());
            let _ = pending.tx.send(Ok(bytes));
        } else if !self.open {
            debug!("fail pending read: nothing left to read");
            let _ = pending.tx.send(Err(StreamError::Closed));
        } else {
            self.pending = Some(pending);
        }
    }

    /// Takes the prefix satisfying the bound, if any.
    fn take(&mut self, bound: ReadBound) -> Option<Vec<u8>> {
        let len = self.buffer.len();

        if len == 0 {
            return None;
        }

        let limit = match bound.length {
            0 => len,
            length => length.min(len),
        };

        let n = match bound.delimiter {
            None => limit,
            Some(delimiter) => match self.buffer.index_of(delimiter) {
                Some(i) if i < limit => i + 1,
                Some(_) => limit,
                None if !self.open => limit,
                None if bound.length > 0 && len >= bound.length => limit,
                None => return None,
            },
        };

        self.buffer.consume(n).ok()
    }
}

impl Default for ReadEngine {
    fn default() -> Self {
        Self::new()
    }
}
