//! Duplex - one Readable and one Writable behind a single handle.
//!
//! Both halves share one [`EventBus`] and one close gate: a listener sees
//! read-side and write-side events on the same registry, and `close` is
//! emitted once, after each side ended, finished or errored. An error on one
//! side leaves the other side running.
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use wirestream::{Chunk, Duplex, DuplexOptions, EventKind, Scheduler};
//!
//! let scheduler = Scheduler::new();
//! let s = scheduler.clone();
//! let duplex = Duplex::new(
//!     &scheduler,
//!     DuplexOptions::new()
//!         .with_do_read(|_, _| Ok(()))
//!         .with_do_write(move |_, _, callback| {
//!             s.defer(move || callback.ok());
//!             Ok(())
//!         }),
//! );
//!
//! let closes = Rc::new(Cell::new(0));
//! let c = closes.clone();
//! duplex.on(EventKind::Close, move |_| c.set(c.get() + 1));
//! duplex.on(EventKind::Data, |_| {});
//!
//! duplex.push(Some(Chunk::from("in")));
//! duplex.write("out");
//! duplex.end();
//! scheduler.run_until_idle().unwrap();
//!
//! assert!(duplex.readable_ended());
//! assert!(duplex.writable_finished());
//! assert_eq!(closes.get(), 1);
//! ```

use std::fmt;
use std::rc::Rc;

use crate::codec::{Chunk, Encoding};
use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::events::{Event, EventBus, EventKind, ListenerId};
use crate::lifecycle::{CloseGate, StreamId};
use crate::readable::{ReadHook, Readable, ReadableOptions, WriteStream};
use crate::scheduler::Scheduler;
use crate::writable::{
    Callback, FinalHook, InitHook, Writable, WritableOptions, WriteCallback, WriteHook, WritevHook,
};

/// Options for creating a [`Duplex`].
#[derive(Clone, Default)]
pub struct DuplexOptions {
    /// Shared by both halves.
    pub config: StreamConfig,
    /// Run once at construction.
    pub do_initialize: Option<InitHook>,
    pub do_read: Option<ReadHook>,
    pub do_write: Option<WriteHook>,
    pub do_writev: Option<WritevHook>,
    pub do_final: Option<FinalHook>,
}

impl DuplexOptions {
    /// Create default options without hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the configuration of both halves.
    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the high-water mark of both halves.
    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.config.high_water_mark = high_water_mark;
        self
    }

    /// Set the read encoding and the default write encoding.
    pub fn with_encoding(mut self, encoding: Option<Encoding>) -> Self {
        self.config.encoding = encoding;
        self
    }

    /// Set the initializer.
    pub fn with_do_initialize<F>(mut self, do_initialize: F) -> Self
    where
        F: Fn(WriteCallback) -> Result<()> + 'static,
    {
        self.do_initialize = Some(Rc::new(do_initialize));
        self
    }

    /// Set the producer hook of the read side.
    pub fn with_do_read<F>(mut self, do_read: F) -> Self
    where
        F: Fn(&Readable, usize) -> Result<()> + 'static,
    {
        self.do_read = Some(Rc::new(do_read));
        self
    }

    /// Set the low-level writer of the write side.
    pub fn with_do_write<F>(mut self, do_write: F) -> Self
    where
        F: Fn(Chunk, Encoding, WriteCallback) -> Result<()> + 'static,
    {
        self.do_write = Some(Rc::new(do_write));
        self
    }

    /// Set the batch writer of the write side.
    pub fn with_do_writev<F>(mut self, do_writev: F) -> Self
    where
        F: Fn(Vec<Chunk>, WriteCallback) -> Result<()> + 'static,
    {
        self.do_writev = Some(Rc::new(do_writev));
        self
    }

    /// Set the finalizer of the write side.
    pub fn with_do_final<F>(mut self, do_final: F) -> Self
    where
        F: Fn(WriteCallback) -> Result<()> + 'static,
    {
        self.do_final = Some(Rc::new(do_final));
        self
    }

    fn split(self) -> (ReadableOptions, WritableOptions) {
        let readable = ReadableOptions {
            config: self.config.clone(),
            do_read: self.do_read,
            do_initialize: None,
        };
        let writable = WritableOptions {
            config: self.config,
            do_initialize: self.do_initialize,
            do_write: self.do_write,
            do_writev: self.do_writev,
            do_final: self.do_final,
        };
        (readable, writable)
    }
}

impl fmt::Debug for DuplexOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuplexOptions")
            .field("config", &self.config)
            .field("do_initialize", &self.do_initialize.is_some())
            .field("do_read", &self.do_read.is_some())
            .field("do_write", &self.do_write.is_some())
            .field("do_writev", &self.do_writev.is_some())
            .field("do_final", &self.do_final.is_some())
            .finish()
    }
}

/// A readable and writable stream sharing one event bus and lifecycle.
#[derive(Clone)]
pub struct Duplex {
    readable: Readable,
    writable: Writable,
    /// `end()` also ends the read side.
    ends_readable: bool,
}

impl Duplex {
    /// Create a Duplex whose `end()` ends both sides.
    pub fn new(scheduler: &Scheduler, options: DuplexOptions) -> Self {
        let (readable, writable) = options.split();
        let bus = EventBus::new();
        let gate = CloseGate::pair();
        Self::from_halves(
            Readable::build(scheduler.clone(), bus.clone(), gate.clone(), readable),
            Writable::build(scheduler.clone(), bus, gate, writable),
            true,
        )
    }

    /// Join halves built on one bus and one paired close gate.
    pub(crate) fn from_halves(readable: Readable, writable: Writable, ends_readable: bool) -> Self {
        Self {
            readable,
            writable,
            ends_readable,
        }
    }

    /// The read half.
    pub fn readable_half(&self) -> &Readable {
        &self.readable
    }

    /// The write half.
    pub fn writable_half(&self) -> &Writable {
        &self.writable
    }

    /// The shared event bus.
    pub fn events(&self) -> &EventBus {
        self.readable.events()
    }

    // Read side

    pub fn push(&self, chunk: Option<Chunk>) -> bool {
        self.readable.push(chunk)
    }

    pub fn read(&self, size: Option<usize>) -> Option<Chunk> {
        self.readable.read(size)
    }

    pub fn pause(&self) -> bool {
        self.readable.pause()
    }

    pub fn resume(&self) -> bool {
        self.readable.resume()
    }

    pub fn is_paused(&self) -> bool {
        self.readable.is_paused()
    }

    pub fn set_encoding(&self, name: &str) -> Result<()> {
        self.readable.set_encoding(name)
    }

    pub fn pipe<W>(&self, destination: &W) -> W
    where
        W: WriteStream + Clone + 'static,
    {
        self.readable.pipe(destination)
    }

    pub fn unpipe<W>(&self, destination: &W) -> bool
    where
        W: WriteStream + ?Sized,
    {
        self.readable.unpipe(destination)
    }

    pub fn unpipe_all(&self) -> usize {
        self.readable.unpipe_all()
    }

    // Write side

    pub fn write(&self, chunk: impl Into<Chunk>) -> bool {
        self.writable.write(chunk)
    }

    pub fn write_with(
        &self,
        chunk: Chunk,
        encoding: Option<Encoding>,
        callback: Option<Callback>,
    ) -> bool {
        self.writable.write_with(chunk, encoding, callback)
    }

    pub fn end(&self) -> &Self {
        self.end_with(None, None, None)
    }

    /// End the write side and, for a plain Duplex, the read side.
    pub fn end_with(
        &self,
        chunk: Option<Chunk>,
        encoding: Option<Encoding>,
        callback: Option<Callback>,
    ) -> &Self {
        let first = !self.writable.writable_ended();
        self.writable.end_with(chunk, encoding, callback);
        if first && self.ends_readable {
            self.readable.push(None);
        }
        self
    }

    pub fn cork(&self) {
        self.writable.cork();
    }

    pub fn uncork(&self) {
        self.writable.uncork();
    }

    pub fn set_default_encoding(&self, name: &str) -> Result<()> {
        self.writable.set_default_encoding(name)
    }

    // Shared

    /// Register a listener on the shared bus, with the Readable's mode switches.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Event) + 'static,
    {
        self.readable.on(kind, listener)
    }

    pub fn once<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Event) + 'static,
    {
        self.readable.once(kind, listener)
    }

    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.readable.off(kind, id)
    }

    /// Destroy both halves; `error` and `close` are emitted once.
    pub fn destroy(&self, err: Option<StreamError>) {
        self.readable.destroy(err);
        self.writable.destroy(None);
    }

    pub fn readable(&self) -> bool {
        self.readable.readable()
    }

    pub fn readable_length(&self) -> usize {
        self.readable.readable_length()
    }

    pub fn readable_high_water_mark(&self) -> usize {
        self.readable.readable_high_water_mark()
    }

    pub fn readable_flowing(&self) -> Option<bool> {
        self.readable.readable_flowing()
    }

    pub fn readable_encoding(&self) -> Option<Encoding> {
        self.readable.readable_encoding()
    }

    pub fn readable_ended(&self) -> bool {
        self.readable.readable_ended()
    }

    pub fn writable(&self) -> bool {
        self.writable.writable()
    }

    pub fn writable_length(&self) -> usize {
        self.writable.writable_length()
    }

    pub fn writable_high_water_mark(&self) -> usize {
        self.writable.writable_high_water_mark()
    }

    pub fn writable_need_drain(&self) -> bool {
        self.writable.writable_need_drain()
    }

    pub fn writable_corked(&self) -> usize {
        self.writable.writable_corked()
    }

    pub fn writable_ended(&self) -> bool {
        self.writable.writable_ended()
    }

    pub fn writable_finished(&self) -> bool {
        self.writable.writable_finished()
    }

    /// The first error of either half.
    pub fn errored(&self) -> Option<StreamError> {
        self.readable.errored().or_else(|| self.writable.errored())
    }

    pub fn closed(&self) -> bool {
        self.readable.closed()
    }

    pub fn destroyed(&self) -> bool {
        self.readable.destroyed() && self.writable.destroyed()
    }
}

impl WriteStream for Duplex {
    fn stream_id(&self) -> StreamId {
        self.writable.id()
    }

    fn write_chunk(&self, chunk: Chunk) -> bool {
        self.writable.write_with(chunk, None, None)
    }

    fn end_stream(&self) {
        self.end();
    }

    fn events(&self) -> &EventBus {
        self.writable.events()
    }
}

impl fmt::Debug for Duplex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Duplex")
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn echo_duplex(scheduler: &Scheduler) -> Duplex {
        let s = scheduler.clone();
        Duplex::new(
            scheduler,
            DuplexOptions::new()
                .with_do_read(|_, _| Ok(()))
                .with_do_write(move |_, _, callback| {
                    s.defer(move || callback.ok());
                    Ok(())
                }),
        )
    }

    #[test]
    fn test_halves_share_bus() {
        let scheduler = Scheduler::new();
        let duplex = echo_duplex(&scheduler);
        assert!(duplex
            .readable_half()
            .events()
            .same_bus(duplex.writable_half().events()));
        assert_ne!(duplex.readable_half().id(), duplex.writable_half().id());
    }

    #[test]
    fn test_one_listener_sees_both_sides() {
        let scheduler = Scheduler::new();
        let duplex = echo_duplex(&scheduler);
        let log = Rc::new(RefCell::new(Vec::new()));
        for kind in [EventKind::Data, EventKind::End, EventKind::Finish, EventKind::Close] {
            let l = log.clone();
            duplex.on(kind, move |event| l.borrow_mut().push(event.kind()));
        }

        duplex.push(Some(Chunk::from("x")));
        duplex.write("y");
        duplex.end();
        scheduler.run_until_idle().unwrap();

        let log = log.borrow();
        assert!(log.contains(&EventKind::Data));
        assert!(log.contains(&EventKind::End));
        assert!(log.contains(&EventKind::Finish));
        assert_eq!(log.iter().filter(|k| **k == EventKind::Close).count(), 1);
        assert_eq!(log.last(), Some(&EventKind::Close));
    }

    #[test]
    fn test_close_waits_for_both_halves() {
        let scheduler = Scheduler::new();
        let duplex = echo_duplex(&scheduler);
        duplex.writable_half().end();
        scheduler.run_until_idle().unwrap();
        assert!(duplex.writable_finished());
        assert!(!duplex.closed());

        duplex.push(None);
        scheduler.run_until_idle().unwrap();
        assert!(duplex.readable_ended());
        assert!(duplex.closed());
    }

    #[test]
    fn test_read_error_keeps_write_side() {
        let scheduler = Scheduler::new();
        let s = scheduler.clone();
        let duplex = Duplex::new(
            &scheduler,
            DuplexOptions::new()
                .with_do_read(|_, _| Err(StreamError::other("read failed")))
                .with_do_write(move |_, _, callback| {
                    s.defer(move || callback.ok());
                    Ok(())
                }),
        );
        let log = Rc::new(RefCell::new(Vec::new()));
        for kind in [EventKind::Error, EventKind::Finish, EventKind::Close] {
            let l = log.clone();
            duplex.on(kind, move |event| l.borrow_mut().push(event.kind()));
        }
        duplex.on(EventKind::Data, |_| {});

        scheduler.run_until_idle().unwrap();
        assert_eq!(*log.borrow(), vec![EventKind::Error]);
        assert!(duplex.writable());
        assert!(!duplex.closed());

        assert!(duplex.write("a"));
        duplex.writable_half().end();
        scheduler.run_until_idle().unwrap();
        assert_eq!(
            *log.borrow(),
            vec![EventKind::Error, EventKind::Finish, EventKind::Close]
        );
        assert!(duplex.writable_finished());
        assert!(duplex.closed());
    }

    #[test]
    fn test_initializer_runs_once_at_construction() {
        let scheduler = Scheduler::new();
        let inits = Rc::new(std::cell::Cell::new(0));
        let i = inits.clone();
        let duplex = Duplex::new(
            &scheduler,
            DuplexOptions::new()
                .with_do_initialize(move |callback| {
                    i.set(i.get() + 1);
                    callback.ok();
                    Ok(())
                })
                .with_do_read(|_, _| Ok(())),
        );
        assert_eq!(inits.get(), 1);

        duplex.on(EventKind::Data, |_| {});
        scheduler.run_until_idle().unwrap();
        assert_eq!(inits.get(), 1);
    }

    #[test]
    fn test_destroy_emits_once() {
        let scheduler = Scheduler::new();
        let duplex = echo_duplex(&scheduler);
        let log = Rc::new(RefCell::new(Vec::new()));
        for kind in [EventKind::Error, EventKind::Close] {
            let l = log.clone();
            duplex.on(kind, move |event| l.borrow_mut().push(event.kind()));
        }

        duplex.destroy(Some(StreamError::other("reset")));
        scheduler.run_until_idle().unwrap();
        assert_eq!(*log.borrow(), vec![EventKind::Error, EventKind::Close]);
        assert!(duplex.destroyed());
        assert!(!duplex.write("late"));
    }

    #[test]
    fn test_accessors_forwarded() {
        let scheduler = Scheduler::new();
        let duplex = Duplex::new(
            &scheduler,
            DuplexOptions::new()
                .with_high_water_mark(8)
                .with_do_write(|_, _, _| Ok(())),
        );
        duplex.cork();
        duplex.write("abc");
        assert_eq!(duplex.writable_length(), 3);
        assert_eq!(duplex.writable_corked(), 1);
        assert_eq!(duplex.writable_high_water_mark(), 8);
        assert_eq!(duplex.readable_high_water_mark(), 8);
        assert!(duplex.writable());
    }
}
