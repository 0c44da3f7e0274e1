//! Stream composition: piping a readable stream into a writable one,
//! and reading helpers built on top of bounded reads.

use std::time::Duration;

use log::{debug, trace};

use crate::{
    io::{ReadBound, Readable, Writable},
    Result, StreamError,
};

/// Pipes bytes from `source` into `sink`.
///
/// Reads are bounded by `length` (`0` = unbounded) and `delimiter`,
/// and every chunk read is written to the sink before the next read.
/// The transfer stops once the source is no longer readable, the
/// sink is no longer writable, a chunk ends with the delimiter, or
/// `length` bytes went through. Resolves with the amount of bytes
/// written.
///
/// When `end` is `true`, the sink is ended after the transfer, and
/// also when the transfer fails. Dropping the returned future stops
/// the transfer and leaves the sink as it is.
pub async fn pipe<R, W>(
    source: &R,
    sink: &W,
    end: bool,
    length: usize,
    delimiter: Option<u8>,
    timeout: Option<Duration>,
) -> Result<usize>
where
    R: Readable,
    W: Writable,
{
    if !sink.is_writable() {
        return Err(StreamError::Unwritable);
    }

    let bound = ReadBound::new(length, delimiter);

    match transfer(source, sink, bound, timeout).await {
        Ok(total) => {
            debug!("piped {total} bytes");

            if end && sink.is_writable() {
                sink.end(&[], timeout).await?;
            }

            Ok(total)
        }
        Err(err) => {
            debug!("pipe failed: {err}");

            if end && sink.is_writable() {
                // the write side closes when `end` is called
                drop(sink.end(&[], timeout));
            }

            Err(err)
        }
    }
}

async fn transfer<R, W>(
    source: &R,
    sink: &W,
    bound: ReadBound,
    timeout: Option<Duration>,
) -> Result<usize>
where
    R: Readable,
    W: Writable,
{
    let mut total = 0;
    let mut remaining = bound.length;

    while source.is_readable() && sink.is_writable() {
        trace!("pipe: read up to {remaining} bytes");
        let chunk = source.read(remaining, bound.delimiter, timeout).await?;
        total += sink.write(&chunk, timeout).await?;

        if bound.is_delimited(&chunk) {
            trace!("pipe: delimiter reached");
            break;
        }

        if bound.length > 0 {
            remaining = remaining.saturating_sub(chunk.len());

            if remaining == 0 {
                trace!("pipe: length reached");
                break;
            }
        }
    }

    Ok(total)
}

/// Reads exactly `length` bytes.
///
/// Fails with [`StreamError::UnexpectedEof`] if the stream ends
/// before.
pub async fn read_to<R>(stream: &R, length: usize, timeout: Option<Duration>) -> Result<Vec<u8>>
where
    R: Readable,
{
    let mut buffer = Vec::with_capacity(length);

    while buffer.len() < length {
        let missing = length - buffer.len();
        trace!("{missing} remaining bytes to read");

        match stream.read(missing, None, timeout).await {
            Ok(chunk) => buffer.extend(chunk),
            Err(StreamError::Closed | StreamError::Unreadable) => {
                return Err(StreamError::UnexpectedEof {
                    missing,
                    expected: length,
                });
            }
            Err(err) => return Err(err),
        }
    }

    Ok(buffer)
}

/// Reads until the given needle is found, needle included.
///
/// Unlike a delimited read, the needle may span several bytes. Stops
/// early once `max_length` bytes have been read (`0` = unbounded) or
/// the stream ends, and resolves with what has been read so far.
pub async fn read_until<R>(
    stream: &R,
    needle: &[u8],
    max_length: usize,
    timeout: Option<Duration>,
) -> Result<Vec<u8>>
where
    R: Readable,
{
    let Some(&last) = needle.last() else {
        return Err(StreamError::InvalidArgument("empty needle".into()));
    };

    let mut buffer = Vec::new();

    while stream.is_readable() && (max_length == 0 || buffer.len() < max_length) {
        let length = max_length.saturating_sub(buffer.len());

        let chunk = match stream.read(length, Some(last), timeout).await {
            Ok(chunk) => chunk,
            Err(StreamError::Closed) => break,
            Err(err) => return Err(err),
        };

        buffer.extend_from_slice(&chunk);

        if buffer.ends_with(needle) {
            debug!("found needle after {} bytes", buffer.len());
            break;
        }
    }

    Ok(buffer)
}

/// Reads until the stream ends, or until `max_length` bytes have
/// been read (`0` = unbounded).
pub async fn read_all<R>(stream: &R, max_length: usize, timeout: Option<Duration>) -> Result<Vec<u8>>
where
    R: Readable,
{
    let mut buffer = Vec::new();

    while stream.is_readable() && (max_length == 0 || buffer.len() < max_length) {
        let length = max_length.saturating_sub(buffer.len());

        match stream.read(length, None, timeout).await {
            Ok(chunk) => buffer.extend(chunk),
            Err(StreamError::Closed) => break,
            Err(err) => return Err(err),
        }
    }

    Ok(buffer)
}
