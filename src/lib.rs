//! # wirestream
//!
//! Event-driven byte streams with backpressure: [`Readable`], [`Writable`],
//! [`Duplex`] and [`Transform`].
//!
//! Producers generate data incrementally by pushing into a Readable;
//! consumers absorb it through a Writable's low-level writer hook. `pipe`
//! wires the two together, pausing the source while the destination is
//! saturated and resuming it on `drain`.
//!
//! ## Architecture
//!
//! - **Single-threaded**: stream handles are `Rc`-based and `!Send`. All
//!   state changes happen on one logical thread.
//! - **Deferred work**: continuations run on an explicit [`Scheduler`]
//!   (microtasks and macrotasks). Completion callbacks never run inside the
//!   `write`/`end` call that triggered them.
//! - **Async I/O**: the [`transport`] adapters connect streams to tokio
//!   `AsyncRead`/`AsyncWrite` objects on a `LocalSet`.
//!
//! ## Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use wirestream::{Chunk, Readable, ReadableOptions, Scheduler, Writable, WritableOptions};
//!
//! let scheduler = Scheduler::new();
//! let source = Readable::new(&scheduler, ReadableOptions::new());
//!
//! let sink_data = Rc::new(RefCell::new(Vec::new()));
//! let d = sink_data.clone();
//! let s = scheduler.clone();
//! let sink = Writable::new(
//!     &scheduler,
//!     WritableOptions::new().with_do_write(move |chunk, _, callback| {
//!         d.borrow_mut().push(chunk);
//!         s.defer(move || callback.ok());
//!         Ok(())
//!     }),
//! );
//!
//! source.pipe(&sink);
//! source.push(Some(Chunk::from("hello")));
//! source.push(None);
//! scheduler.run_until_idle().unwrap();
//!
//! assert_eq!(*sink_data.borrow(), vec![Chunk::from("hello")]);
//! assert!(sink.writable_finished());
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod scheduler;
pub mod transport;

mod backpressure;
mod buffer;
mod duplex;
mod lifecycle;
mod readable;
mod transform;
mod writable;

pub use backpressure::DEFAULT_HIGH_WATER_MARK;
pub use codec::{Chunk, Encoding};
pub use config::StreamConfig;
pub use duplex::{Duplex, DuplexOptions};
pub use error::{Result, StreamError};
pub use events::{Event, EventBus, EventKind, ListenerId};
pub use lifecycle::StreamId;
pub use readable::{ReadHook, Readable, ReadableOptions, WriteStream};
pub use scheduler::{ExternalOp, Scheduler};
pub use transform::{FlushHook, Transform, TransformHook, TransformOptions};
pub use writable::{
    Callback, Completion, FinalHook, InitHook, TransformCallback, Writable, WritableOptions,
    WriteCallback, WriteHook, WritevHook,
};
