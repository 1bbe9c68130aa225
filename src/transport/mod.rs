//! Transport module - bridges between streams and tokio I/O.
//!
//! Provides:
//! - [`readable_from_async_read`]: a Readable fed by an `AsyncRead`
//! - [`writable_from_async_write`]: a Writable draining into an `AsyncWrite`
//!
//! I/O runs on local tasks, so the adapters must be used inside a
//! `tokio::task::LocalSet`, with the scheduler driven by
//! [`Scheduler::run`](crate::Scheduler::run).

mod async_io;

pub use async_io::{readable_from_async_read, writable_from_async_write};
