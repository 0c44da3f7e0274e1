//! Collection of I/O-free stream state machines.
//!
//! The engines hold the buffering and queueing discipline of a
//! stream, and never perform I/O themselves: bytes are fed to them,
//! and the sink is reached through a transfer attempt given by the
//! caller. The [runtimes] drive them against real sinks and sources.
//!
//! [runtimes]: crate::runtimes

pub mod read;
pub mod write;
