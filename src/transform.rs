//! Transform - a Duplex whose writes are converted into readable output.
//!
//! Every written chunk goes through `doTransform`, which may push any number
//! of output chunks to the read side and completes through its callback.
//! `doTransform` is the low-level writer of the write half, so transforms run
//! one at a time, in write order, under the write half's backpressure.
//!
//! After `end()`, once the last transform completed, `doFlush` runs once to
//! emit trailing output; only after its callback does the read side reach end
//! of production.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use wirestream::{Chunk, EventKind, Scheduler, Transform, TransformOptions};
//!
//! let scheduler = Scheduler::new();
//! let upper = Transform::new(
//!     &scheduler,
//!     TransformOptions::new()
//!         .with_do_transform(|_, chunk, _, callback| {
//!             let text = chunk.to_text_lossy().to_uppercase();
//!             callback.done(Some(Chunk::from(text)));
//!             Ok(())
//!         })
//!         .with_do_flush(|_, callback| {
//!             callback.done(Some(Chunk::from("!")));
//!             Ok(())
//!         }),
//! );
//!
//! let out = Rc::new(RefCell::new(String::new()));
//! let o = out.clone();
//! upper.on(EventKind::Data, move |event| {
//!     if let Some(chunk) = event.data() {
//!         o.borrow_mut().push_str(&chunk.to_text_lossy());
//!     }
//! });
//!
//! upper.write("hello");
//! upper.end();
//! scheduler.run_until_idle().unwrap();
//! assert_eq!(*out.borrow(), "HELLO!");
//! ```

use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use crate::codec::{Chunk, Encoding};
use crate::config::StreamConfig;
use crate::duplex::Duplex;
use crate::error::{Result, StreamError};
use crate::events::EventBus;
use crate::lifecycle::{repeat_reporter, CloseGate, StreamId};
use crate::readable::{Readable, ReadableOptions, WriteStream};
use crate::scheduler::Scheduler;
use crate::writable::{
    Completion, InitHook, TransformCallback, Writable, WritableOptions, WriteCallback,
};

/// Conversion hook: `doTransform(output, chunk, encoding, callback)`.
///
/// `output` is the read side; the hook may push to it directly, or hand one
/// output chunk to `callback`.
pub type TransformHook = Rc<dyn Fn(&Readable, Chunk, Encoding, TransformCallback) -> Result<()>>;

/// Trailing-output hook: `doFlush(output, callback)`.
pub type FlushHook = Rc<dyn Fn(&Readable, TransformCallback) -> Result<()>>;

/// Options for creating a [`Transform`].
#[derive(Clone, Default)]
pub struct TransformOptions {
    pub config: StreamConfig,
    pub do_initialize: Option<InitHook>,
    pub do_transform: Option<TransformHook>,
    pub do_flush: Option<FlushHook>,
}

impl TransformOptions {
    /// Create default options without hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the configuration of both sides.
    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the high-water mark of both sides.
    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.config.high_water_mark = high_water_mark;
        self
    }

    /// Set the output encoding and the default write encoding.
    pub fn with_encoding(mut self, encoding: Option<Encoding>) -> Self {
        self.config.encoding = encoding;
        self
    }

    /// Set the initializer, run once at construction.
    pub fn with_do_initialize<F>(mut self, do_initialize: F) -> Self
    where
        F: Fn(WriteCallback) -> Result<()> + 'static,
    {
        self.do_initialize = Some(Rc::new(do_initialize));
        self
    }

    /// Set the conversion hook.
    pub fn with_do_transform<F>(mut self, do_transform: F) -> Self
    where
        F: Fn(&Readable, Chunk, Encoding, TransformCallback) -> Result<()> + 'static,
    {
        self.do_transform = Some(Rc::new(do_transform));
        self
    }

    /// Set the trailing-output hook.
    pub fn with_do_flush<F>(mut self, do_flush: F) -> Self
    where
        F: Fn(&Readable, TransformCallback) -> Result<()> + 'static,
    {
        self.do_flush = Some(Rc::new(do_flush));
        self
    }
}

impl fmt::Debug for TransformOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformOptions")
            .field("config", &self.config)
            .field("do_initialize", &self.do_initialize.is_some())
            .field("do_transform", &self.do_transform.is_some())
            .field("do_flush", &self.do_flush.is_some())
            .finish()
    }
}

/// A Duplex that converts what is written into what is read.
#[derive(Clone)]
pub struct Transform {
    duplex: Duplex,
}

impl Transform {
    /// Create a Transform; `end()` ends the read side only after `doFlush`.
    pub fn new(scheduler: &Scheduler, options: TransformOptions) -> Self {
        // Output only enters through push, so the read hook has nothing to do.
        let readable_options = ReadableOptions::new()
            .with_config(options.config.clone())
            .with_do_read(|_, _| Ok(()));

        // Write hooks push into the read half, so it is built first.
        let bus = EventBus::new();
        let gate = CloseGate::pair();
        let readable = Readable::build(scheduler.clone(), bus.clone(), gate.clone(), readable_options);

        let writable_options = WritableOptions {
            config: options.config,
            do_initialize: options.do_initialize,
            do_write: Some(Rc::new(transform_writer(
                readable.clone(),
                options.do_transform,
                scheduler.clone(),
            ))),
            do_writev: None,
            do_final: Some(Rc::new(flush_finalizer(
                readable.clone(),
                options.do_flush,
                scheduler.clone(),
            ))),
        };
        let writable = Writable::build(scheduler.clone(), bus, gate, writable_options);

        Self {
            duplex: Duplex::from_halves(readable, writable, false),
        }
    }
}

/// Write hook that runs `doTransform` and pushes its output.
fn transform_writer(
    output: Readable,
    do_transform: Option<TransformHook>,
    scheduler: Scheduler,
) -> impl Fn(Chunk, Encoding, WriteCallback) -> Result<()> + 'static {
    move |chunk: Chunk, encoding: Encoding, callback: WriteCallback| {
        let Some(do_transform) = &do_transform else {
            return Err(StreamError::TransformNotImplemented);
        };

        let out = output.clone();
        let completion: TransformCallback = Completion::new(
            move |result: Result<Option<Chunk>>| match result {
                Ok(produced) => {
                    if let Some(chunk) = produced {
                        out.push(Some(chunk));
                    }
                    callback.ok();
                }
                Err(err) => callback.fail(err),
            },
            repeat_reporter(output.events(), &scheduler, output.id()),
        );

        if let Err(err) = do_transform(&output, chunk, encoding, completion.clone()) {
            if completion.is_called() {
                tracing::warn!(stream = ?output.id(), error = %err, "transform hook failed after completing");
            } else {
                completion.fail(err);
            }
        }
        Ok(())
    }
}

/// Final hook that runs `doFlush`, then ends the read side.
fn flush_finalizer(
    output: Readable,
    do_flush: Option<FlushHook>,
    scheduler: Scheduler,
) -> impl Fn(WriteCallback) -> Result<()> + 'static {
    move |callback: WriteCallback| {
        let out = output.clone();
        let on_flushed = move |result: Result<Option<Chunk>>| match result {
            Ok(produced) => {
                if let Some(chunk) = produced {
                    out.push(Some(chunk));
                }
                out.push(None);
                callback.ok();
            }
            Err(err) => callback.fail(err),
        };

        let Some(do_flush) = &do_flush else {
            on_flushed(Ok(None));
            return Ok(());
        };

        tracing::trace!(stream = ?output.id(), "flushing transform");
        let completion: TransformCallback = Completion::new(
            on_flushed,
            repeat_reporter(output.events(), &scheduler, output.id()),
        );
        if let Err(err) = do_flush(&output, completion.clone()) {
            if completion.is_called() {
                tracing::warn!(stream = ?output.id(), error = %err, "flush hook failed after completing");
            } else {
                completion.fail(err);
            }
        }
        Ok(())
    }
}

impl Deref for Transform {
    type Target = Duplex;

    fn deref(&self) -> &Duplex {
        &self.duplex
    }
}

impl WriteStream for Transform {
    fn stream_id(&self) -> StreamId {
        self.duplex.stream_id()
    }

    fn write_chunk(&self, chunk: Chunk) -> bool {
        self.duplex.write_chunk(chunk)
    }

    fn end_stream(&self) {
        self.duplex.end_stream();
    }

    fn events(&self) -> &EventBus {
        WriteStream::events(&self.duplex)
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Transform").field(&self.duplex).finish()
    }
}
