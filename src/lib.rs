#![cfg_attr(docsrs, feature(doc_cfg))]

//! Buffered, backpressured byte streams for single-threaded async
//! runtimes.
//!
//! Streams are handles over a shared state, driven by a Tokio
//! current-thread runtime. Every operation is submitted eagerly: the
//! synchronous part happens at call time (which keeps writes in call
//! order), and the returned future only waits for the outcome.
//!
//! The crate is split into I/O-free [coroutines] (a read engine and a
//! FIFO write queue) and [runtimes] driving them:
//!
//! - [`MemoryStream`]: an in-memory duplex stream with an optional
//!   high-water mark,
//! - `ReadablePipe`, `WritablePipe` and `DuplexPipe`: non-blocking
//!   descriptors registered with the Tokio reactor (requires the
//!   `unix` cargo feature).
//!
//! Streams compose with [`pipe`](pipe::pipe) and the reading helpers
//! of the [pipe] module.
//!
//! ```rust
//! use io_pipe_stream::{Readable, Writable, MemoryStream};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let stream = MemoryStream::new();
//! stream.write(b"hello\nworld", None).await.unwrap();
//!
//! let line = stream.read(0, Some(b'\n'), None).await.unwrap();
//! assert_eq!(line, b"hello\n");
//! # }
//! ```

pub mod buffer;
pub mod coroutines;
mod error;
pub mod io;
mod pending;
pub mod pipe;
pub mod runtimes;

#[doc(inline)]
pub use crate::{
    error::{Result, StreamError},
    io::{Readable, Stream, StreamState, Writable},
    runtimes::memory::MemoryStream,
};
