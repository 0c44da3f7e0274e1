//! I/O-free FIFO write queue.
//!
//! The queue does not know how bytes reach the sink: every flush
//! takes a [`Sink`], whose transfer attempt hands a slice over and
//! returns how many bytes were accepted.

use std::{collections::VecDeque, time::Duration};

use log::{debug, trace};
use tokio::sync::oneshot;

use crate::{Result, StreamError};

/// Transfer attempt used by the [`WriteQueue`].
pub trait Sink {
    /// Hands bytes to the sink and returns how many were accepted.
    ///
    /// Accepting `0` bytes means the sink cannot take more for now.
    fn transfer(&mut self, bytes: &[u8]) -> Result<usize>;

    /// Returns `true` if the sink may accept bytes right now.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Outcome of a write submission.
#[derive(Debug)]
pub enum WriteSubmission {
    /// The sink accepted every byte.
    Done(usize),

    /// Some bytes were queued. The id identifies the entry for
    /// [`WriteQueue::remove`].
    Queued(u64, oneshot::Receiver<Result<usize>>),
}

/// Pending write request.
#[derive(Debug)]
pub struct WriteEntry {
    id: u64,
    /// Bytes still to be sent.
    data: Vec<u8>,
    /// Offset of the first unsent byte of `data`.
    offset: usize,
    /// Bytes of this request already accepted by the sink.
    written: usize,
    timeout: Option<Duration>,
    tx: oneshot::Sender<Result<usize>>,
}

impl WriteEntry {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns the bytes still to be sent.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.offset..]
    }

    /// Returns `true` if part of the entry already reached the sink,
    /// either directly at submission or during a flush.
    pub fn is_started(&self) -> bool {
        self.written > 0
    }

    fn resolve(self, result: Result<usize>) {
        let _ = self.tx.send(result);
    }
}

/// FIFO queue of pending writes.
///
/// Entries are always serviced from the head, and a partially sent
/// head entry stays at the head until it is complete, so a later
/// write never overtakes an earlier one.
#[derive(Debug, Default)]
pub struct WriteQueue {
    entries: VecDeque<WriteEntry>,
    next_id: u64,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn head(&self) -> Option<&WriteEntry> {
        self.entries.front()
    }

    /// Submits a write.
    ///
    /// If the queue is empty, the data is first handed to the sink
    /// through the transfer attempt. Whatever the sink did not accept
    /// is queued as a new entry.
    pub fn submit(
        &mut self,
        data: &[u8],
        timeout: Option<Duration>,
        sink: &mut impl Sink,
    ) -> Result<WriteSubmission> {
        if data.is_empty() {
            return Ok(WriteSubmission::Done(0));
        }

        let mut written = 0;

        if self.entries.is_empty() && sink.is_ready() {
            while written < data.len() {
                match sink.transfer(&data[written..])? {
                    0 => break,
                    n => written += n,
                }
            }

            if written == data.len() {
                debug!("wrote {written} bytes directly");
                return Ok(WriteSubmission::Done(written));
            }
        }

        let (id, rx) = self.push(data[written..].to_vec(), written, timeout);
        Ok(WriteSubmission::Queued(id, rx))
    }

    /// Queues an entry without attempting any transfer.
    ///
    /// An empty entry resolves with `written` once it reaches the head
    /// during a flush.
    pub fn push(
        &mut self,
        data: Vec<u8>,
        written: usize,
        timeout: Option<Duration>,
    ) -> (u64, oneshot::Receiver<Result<usize>>) {
        let id = self.next_id;
        self.next_id += 1;

        trace!(
            "break: queue write {id} ({} bytes left, {written} written)",
            data.len()
        );

        let (tx, rx) = oneshot::channel();
        self.entries.push_back(WriteEntry {
            id,
            data,
            offset: 0,
            written,
            timeout,
            tx,
        });

        (id, rx)
    }

    /// Flushes entries from the head until the sink stops accepting
    /// bytes or the queue is empty.
    ///
    /// An empty entry resolves as soon as it reaches the head while
    /// the sink is ready. Returns the amount of completed entries. A
    /// transfer error is returned as is and leaves the head entry in
    /// place: the caller decides whether the error is fatal.
    pub fn flush(&mut self, sink: &mut impl Sink) -> Result<usize> {
        let mut completed = 0;

        while let Some(entry) = self.entries.front_mut() {
            if !sink.is_ready() {
                trace!("break: sink not ready for write {}", entry.id);
                break;
            }

            if !entry.remaining().is_empty() {
                let n = sink.transfer(entry.remaining())?;

                if n == 0 {
                    trace!("break: sink not ready for write {}", entry.id);
                    break;
                }

                entry.offset += n;
                entry.written += n;

                if !entry.remaining().is_empty() {
                    debug!("wrote {n} bytes of write {}, keep it at head", entry.id);
                    continue;
                }
            }

            if let Some(entry) = self.entries.pop_front() {
                debug!("write {} complete ({} bytes)", entry.id, entry.written);
                let written = entry.written;
                entry.resolve(Ok(written));
                completed += 1;
            }
        }

        Ok(completed)
    }

    /// Removes the entry with the given id.
    pub fn remove(&mut self, id: u64) -> Option<WriteEntry> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        trace!("remove write {id} from queue");
        self.entries.remove(index)
    }

    /// Removes the entry with the given id and fails it.
    pub fn fail(&mut self, id: u64, err: StreamError) -> bool {
        match self.remove(id) {
            Some(entry) => {
                entry.resolve(Err(err));
                true
            }
            None => false,
        }
    }

    /// Fails every entry with the given error, head first.
    pub fn fail_all(&mut self, err: &StreamError) {
        if !self.entries.is_empty() {
            debug!("fail {} queued writes: {err}", self.entries.len());
        }

        for entry in self.entries.drain(..) {
            entry.resolve(Err(err.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Result, StreamError};

    use super::{Sink, WriteQueue, WriteSubmission};

    /// Sink accepting a limited amount of bytes.
    #[derive(Default)]
    struct Budget {
        bytes: Vec<u8>,
        budget: usize,
    }

    impl Budget {
        fn unlimited() -> Self {
            Self {
                bytes: Vec::new(),
                budget: usize::MAX,
            }
        }
    }

    impl Sink for Budget {
        fn transfer(&mut self, bytes: &[u8]) -> Result<usize> {
            let n = bytes.len().min(self.budget);
            self.bytes.extend_from_slice(&bytes[..n]);
            self.budget -= n;
            Ok(n)
        }
    }

    struct Broken;

    impl Sink for Broken {
        fn transfer(&mut self, _: &[u8]) -> Result<usize> {
            Err(StreamError::Closed)
        }
    }

    #[test]
    fn empty_write_skips_sink() {
        let _ = env_logger::try_init();

        let mut queue = WriteQueue::new();
        let submission = queue.submit(b"", None, &mut Broken).unwrap();

        assert!(matches!(submission, WriteSubmission::Done(0)));
        assert!(queue.is_empty());
    }

    #[test]
    fn direct_write() {
        let _ = env_logger::try_init();

        let mut sink = Budget::unlimited();
        let mut queue = WriteQueue::new();
        let submission = queue.submit(b"0", None, &mut sink).unwrap();

        assert!(matches!(submission, WriteSubmission::Done(1)));
        assert_eq!(sink.bytes, b"0");
    }

    #[test]
    fn partial_write_resumes_in_order() {
        let _ = env_logger::try_init();

        let mut sink = Budget {
            budget: 2,
            ..Default::default()
        };

        let mut queue = WriteQueue::new();

        let WriteSubmission::Queued(_, mut first) = queue.submit(b"abcd", None, &mut sink).unwrap()
        else {
            unreachable!("write should be queued");
        };

        // the queue is not empty, the sink is not even tried
        let WriteSubmission::Queued(_, mut second) =
            queue.submit(b"ef", None, &mut Broken).unwrap()
        else {
            unreachable!("write should be queued");
        };

        assert_eq!(queue.head().unwrap().remaining(), b"cd");
        assert!(queue.head().unwrap().is_started());

        sink.budget = 3;
        assert_eq!(queue.flush(&mut sink).unwrap(), 1);
        assert_eq!(first.try_recv().unwrap().unwrap(), 4);
        assert!(second.try_recv().is_err());

        sink.budget = usize::MAX;
        assert_eq!(queue.flush(&mut sink).unwrap(), 1);
        assert_eq!(second.try_recv().unwrap().unwrap(), 2);
        assert_eq!(sink.bytes, b"abcdef");
        assert!(queue.is_empty());
    }

    #[test]
    fn empty_entry_resolves_at_head() {
        let _ = env_logger::try_init();

        let mut queue = WriteQueue::new();
        let (_, mut rx) = queue.push(Vec::new(), 0, None);

        assert_eq!(queue.flush(&mut Broken).unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap().unwrap(), 0);
    }

    #[test]
    fn transfer_error_keeps_head() {
        let _ = env_logger::try_init();

        let mut queue = WriteQueue::new();
        let (_, mut rx) = queue.push(b"abc".to_vec(), 0, None);

        let err = queue.flush(&mut Broken).unwrap_err();

        assert_eq!(err, StreamError::Closed);
        assert_eq!(queue.len(), 1);
        assert!(rx.try_recv().is_err());

        queue.fail_all(&StreamError::Closed);
        assert_eq!(rx.try_recv().unwrap().unwrap_err(), StreamError::Closed);
    }

    #[test]
    fn remove_by_id() {
        let _ = env_logger::try_init();

        let mut queue = WriteQueue::new();
        let (first, _) = queue.push(b"a".to_vec(), 0, None);
        let (second, mut rx) = queue.push(b"b".to_vec(), 0, None);

        assert!(queue.fail(second, StreamError::cancelled("nope")));
        assert_eq!(
            rx.try_recv().unwrap().unwrap_err(),
            StreamError::cancelled("nope")
        );

        assert!(queue.remove(first).is_some());
        assert!(queue.remove(first).is_none());
        assert!(queue.is_empty());
    }
}
