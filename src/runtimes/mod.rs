//! Collection of stream runtimes.
//!
//! A runtime owns the I/O side of a stream: it feeds the [read
//! engine] and flushes the [write queue] of the [coroutines], and
//! exposes the result through the [`Readable`] and [`Writable`]
//! capabilities.
//!
//! If you miss a runtime matching your requirements, you can easily
//! implement your own by taking example on the existing ones. PRs are
//! welcomed!
//!
//! [read engine]: crate::coroutines::read::ReadEngine
//! [write queue]: crate::coroutines::write::WriteQueue
//! [coroutines]: crate::coroutines
//! [`Readable`]: crate::io::Readable
//! [`Writable`]: crate::io::Writable

pub mod memory;
#[cfg(all(unix, feature = "unix"))]
pub mod unix;
