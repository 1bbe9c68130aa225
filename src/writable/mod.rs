//! Writable - a byte sink with ordered writes and backpressure.
//!
//! Writes are handed to a caller-supplied low-level writer (`doWrite`, or
//! `doWritev` for batches). At most one dispatch is in flight at a time;
//! everything else waits in a FIFO queue, so the writer observes chunks in
//! the order `write` was called.
//!
//! # Lifecycle
//!
//! ```text
//! writable ─► corked (queuing) ─► flushing ─► ending ─► finished ─► closed
//!     │                                          │
//!     └──────────── errored / destroyed ─────────┴──────────────► closed
//! ```
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use wirestream::{EventKind, Scheduler, Writable, WritableOptions};
//!
//! let scheduler = Scheduler::new();
//! let written = Rc::new(RefCell::new(Vec::new()));
//!
//! let w = written.clone();
//! let s = scheduler.clone();
//! let writable = Writable::new(
//!     &scheduler,
//!     WritableOptions::new().with_do_write(move |chunk, _encoding, callback| {
//!         w.borrow_mut().push(chunk.to_text_lossy().into_owned());
//!         s.defer(move || callback.ok());
//!         Ok(())
//!     }),
//! );
//!
//! let finished = Rc::new(RefCell::new(false));
//! let f = finished.clone();
//! writable.on(EventKind::Finish, move |_| *f.borrow_mut() = true);
//!
//! writable.write("a");
//! writable.write("b");
//! writable.end();
//! scheduler.run_until_idle().unwrap();
//!
//! assert_eq!(*written.borrow(), vec!["a", "b"]);
//! assert!(*finished.borrow());
//! ```

mod callback;
mod queue;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub use callback::{Completion, TransformCallback, WriteCallback};
use queue::{WriteQueue, WriteRequest};

use crate::backpressure::Backpressure;
use crate::codec::{Chunk, Encoding};
use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::events::{Event, EventBus, EventKind, ListenerId};
use crate::lifecycle::{
    deliver_error, deliver_error_later, emit_close, repeat_reporter, run_initializer, CloseGate,
    Side, StreamId,
};
use crate::readable::WriteStream;
use crate::scheduler::Scheduler;

/// User callback of `write_with`/`end_with`.
pub type Callback = Box<dyn FnOnce(Result<()>)>;

/// Low-level writer: `doWrite(chunk, encoding, callback)`.
pub type WriteHook = Rc<dyn Fn(Chunk, Encoding, WriteCallback) -> Result<()>>;

/// Batch writer: `doWritev(chunks, callback)`.
pub type WritevHook = Rc<dyn Fn(Vec<Chunk>, WriteCallback) -> Result<()>>;

/// Finalizer: `doFinal(callback)`, run once before `finish`.
pub type FinalHook = Rc<dyn Fn(WriteCallback) -> Result<()>>;

/// Initializer: `doInitialize(callback)`.
///
/// A Writable runs it once at construction, a Readable on its first
/// subscription. A failure is emitted as `error`.
pub type InitHook = Rc<dyn Fn(WriteCallback) -> Result<()>>;

/// Options for creating a [`Writable`].
#[derive(Clone, Default)]
pub struct WritableOptions {
    /// Watermark and default encoding.
    pub config: StreamConfig,
    pub do_initialize: Option<InitHook>,
    pub do_write: Option<WriteHook>,
    pub do_writev: Option<WritevHook>,
    pub do_final: Option<FinalHook>,
}

impl WritableOptions {
    /// Create default options without hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the high-water mark.
    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.config.high_water_mark = high_water_mark;
        self
    }

    /// Set the initializer, run once by `Writable::new`.
    pub fn with_do_initialize<F>(mut self, do_initialize: F) -> Self
    where
        F: Fn(WriteCallback) -> Result<()> + 'static,
    {
        self.do_initialize = Some(Rc::new(do_initialize));
        self
    }

    /// Set the low-level writer.
    pub fn with_do_write<F>(mut self, do_write: F) -> Self
    where
        F: Fn(Chunk, Encoding, WriteCallback) -> Result<()> + 'static,
    {
        self.do_write = Some(Rc::new(do_write));
        self
    }

    /// Set the batch writer used when more than one write is queued.
    pub fn with_do_writev<F>(mut self, do_writev: F) -> Self
    where
        F: Fn(Vec<Chunk>, WriteCallback) -> Result<()> + 'static,
    {
        self.do_writev = Some(Rc::new(do_writev));
        self
    }

    /// Set the finalizer run after the last write and before `finish`.
    pub fn with_do_final<F>(mut self, do_final: F) -> Self
    where
        F: Fn(WriteCallback) -> Result<()> + 'static,
    {
        self.do_final = Some(Rc::new(do_final));
        self
    }
}

impl fmt::Debug for WritableOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritableOptions")
            .field("config", &self.config)
            .field("do_initialize", &self.do_initialize.is_some())
            .field("do_write", &self.do_write.is_some())
            .field("do_writev", &self.do_writev.is_some())
            .field("do_final", &self.do_final.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinalState {
    Pending,
    Running,
    Done,
}

struct WritableState {
    backpressure: Backpressure,
    default_encoding: Encoding,
    corked: usize,
    queue: WriteQueue,
    /// A dispatch is in flight with the low-level writer.
    writing: bool,
    writable: bool,
    /// `end()` was called.
    ending: bool,
    finished: bool,
    finish_scheduled: bool,
    final_state: FinalState,
    errored: Option<StreamError>,
    destroyed: bool,
    end_callbacks: Vec<Callback>,
}

impl WritableState {
    fn is_failed(&self) -> bool {
        self.destroyed || self.errored.is_some()
    }
}

struct WritableInner {
    id: StreamId,
    state: RefCell<WritableState>,
    bus: EventBus,
    scheduler: Scheduler,
    do_write: Option<WriteHook>,
    do_writev: Option<WritevHook>,
    do_final: Option<FinalHook>,
    gate: CloseGate,
}

/// Handle to a writable byte stream.
///
/// Cloning the handle shares the stream.
#[derive(Clone)]
pub struct Writable {
    inner: Rc<WritableInner>,
}

/// Outcome of admitting a write.
enum Admission {
    Dispatch(WriteRequest),
    Queued,
    Rejected(StreamError, Option<Callback>, bool),
}

impl Writable {
    /// Create a standalone Writable.
    pub fn new(scheduler: &Scheduler, options: WritableOptions) -> Self {
        Self::build(scheduler.clone(), EventBus::new(), CloseGate::single(), options)
    }

    pub(crate) fn build(
        scheduler: Scheduler,
        bus: EventBus,
        gate: CloseGate,
        options: WritableOptions,
    ) -> Self {
        let state = WritableState {
            backpressure: Backpressure::new(options.config.high_water_mark),
            default_encoding: options.config.encoding.unwrap_or_default(),
            corked: 0,
            queue: WriteQueue::new(),
            writing: false,
            writable: true,
            ending: false,
            finished: false,
            finish_scheduled: false,
            final_state: FinalState::Pending,
            errored: None,
            destroyed: false,
            end_callbacks: Vec::new(),
        };
        let inner = WritableInner {
            id: StreamId::next(),
            state: RefCell::new(state),
            bus,
            scheduler,
            do_write: options.do_write,
            do_writev: options.do_writev,
            do_final: options.do_final,
            gate,
        };
        let this = Self {
            inner: Rc::new(inner),
        };
        if let Some(do_initialize) = &options.do_initialize {
            let inner = &this.inner;
            run_initializer(do_initialize, &inner.bus, &inner.scheduler, inner.id);
        }
        this
    }

    /// Identity of this stream.
    pub fn id(&self) -> StreamId {
        self.inner.id
    }

    /// The event bus of this stream.
    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Write a chunk with the default encoding.
    ///
    /// Returns `false` once the unflushed byte count reaches the high-water
    /// mark; the caller should wait for `drain` before writing more.
    pub fn write(&self, chunk: impl Into<Chunk>) -> bool {
        self.write_with(chunk.into(), None, None)
    }

    /// Write a chunk with an explicit encoding and completion callback.
    ///
    /// The callback always runs after this call returns. Writing after `end`
    /// fails the callback and emits `error` with [`StreamError::WriteAfterEnd`].
    pub fn write_with(
        &self,
        chunk: Chunk,
        encoding: Option<Encoding>,
        callback: Option<Callback>,
    ) -> bool {
        let (admission, below) = {
            let mut st = self.inner.state.borrow_mut();
            if st.destroyed {
                (Admission::Rejected(StreamError::Destroyed, callback, false), false)
            } else if st.ending {
                (Admission::Rejected(StreamError::WriteAfterEnd, callback, true), false)
            } else if let Some(err) = st.errored.clone() {
                (Admission::Rejected(err, callback, false), false)
            } else {
                let encoding = encoding.unwrap_or(st.default_encoding);
                let request = WriteRequest::new(chunk, encoding, callback);
                let below = st.backpressure.reserve(request.len);
                if !st.writing && st.corked == 0 && st.queue.is_empty() {
                    st.writing = true;
                    (Admission::Dispatch(request), below)
                } else {
                    st.queue.push_back(request);
                    (Admission::Queued, below)
                }
            }
        };

        match admission {
            Admission::Dispatch(request) => self.dispatch(vec![request]),
            Admission::Queued => {}
            Admission::Rejected(err, callback, emit) => self.reject(err, callback, emit),
        }
        below
    }

    /// Fail a rejected call after the current turn.
    fn reject(&self, err: StreamError, callback: Option<Callback>, emit: bool) {
        tracing::debug!(stream = ?self.inner.id, error = %err, "write rejected");
        if let Some(callback) = callback {
            let err = err.clone();
            self.inner.scheduler.defer_task(move || callback(Err(err)));
        }
        if emit {
            deliver_error_later(&self.inner.bus, &self.inner.scheduler, err);
        }
    }

    /// Hand a batch to the low-level writer. `writing` must already be set.
    fn dispatch(&self, requests: Vec<WriteRequest>) {
        let len: usize = requests.iter().map(|request| request.len).sum();
        let mut callbacks = Vec::with_capacity(requests.len());
        let mut batch = Vec::with_capacity(requests.len());
        for request in requests {
            callbacks.push(request.callback);
            batch.push((request.chunk, request.encoding));
        }

        let this = self.clone();
        let completion = WriteCallback::new(
            move |result| {
                let stream = this.clone();
                this.inner
                    .scheduler
                    .defer(move || stream.on_write_complete(result, len, callbacks));
            },
            self.repeat_reporter(),
        );

        tracing::trace!(
            stream = ?self.inner.id,
            chunks = batch.len(),
            bytes = len,
            "dispatching write"
        );
        let result = match (&self.inner.do_write, &self.inner.do_writev) {
            (Some(do_write), _) if batch.len() == 1 => match batch.pop() {
                Some((chunk, encoding)) => do_write(chunk, encoding, completion.clone()),
                None => Ok(()),
            },
            (_, Some(do_writev)) => {
                let chunks = batch.into_iter().map(|(chunk, _)| chunk).collect();
                do_writev(chunks, completion.clone())
            }
            _ => Err(StreamError::WriteNotImplemented),
        };

        if let Err(err) = result {
            if completion.is_called() {
                tracing::warn!(stream = ?self.inner.id, error = %err, "write hook failed after completing");
            } else {
                completion.fail(err);
            }
        }
    }

    fn repeat_reporter(&self) -> impl Fn() + 'static {
        repeat_reporter(&self.inner.bus, &self.inner.scheduler, self.inner.id)
    }

    fn on_write_complete(&self, result: Result<()>, len: usize, callbacks: Vec<Option<Callback>>) {
        {
            let mut st = self.inner.state.borrow_mut();
            st.writing = false;
            st.backpressure.release(len);
        }

        match result {
            Ok(()) => {
                for callback in callbacks.into_iter().flatten() {
                    callback(Ok(()));
                }
                self.after_write();
            }
            Err(err) => {
                for callback in callbacks.into_iter().flatten() {
                    callback(Err(err.clone()));
                }
                self.fail(err);
            }
        }
    }

    fn after_write(&self) {
        self.flush_queue();

        let drain = {
            let mut st = self.inner.state.borrow_mut();
            !st.writing
                && !st.ending
                && !st.is_failed()
                && st.queue.is_empty()
                && st.backpressure.take_drain()
        };
        if drain {
            tracing::trace!(stream = ?self.inner.id, "drain");
            self.inner.bus.emit(&Event::Drain);
        }
        self.maybe_finish();
    }

    /// Dispatch queued requests if nothing is in flight and not corked.
    ///
    /// With a batch writer and more than one queued request, the whole queue
    /// goes out as one `doWritev` call.
    fn flush_queue(&self) {
        let batch = {
            let mut st = self.inner.state.borrow_mut();
            if st.writing || st.corked > 0 || st.queue.is_empty() || st.is_failed() {
                return;
            }
            st.writing = true;
            if self.inner.do_writev.is_some() && st.queue.len() > 1 {
                st.queue.drain_all()
            } else {
                st.queue.pop_front().into_iter().collect()
            }
        };
        self.dispatch(batch);
    }

    /// Error the stream from deferred context: fail pending work, emit
    /// `error`, then `close` once the close gate opens.
    fn fail(&self, err: StreamError) {
        let (queued, end_callbacks) = {
            let mut st = self.inner.state.borrow_mut();
            if st.is_failed() {
                tracing::debug!(stream = ?self.inner.id, error = %err, "ignoring error on failed stream");
                return;
            }
            st.errored = Some(err.clone());
            st.writable = false;
            st.backpressure.reset();
            (st.queue.drain_all(), std::mem::take(&mut st.end_callbacks))
        };

        tracing::debug!(stream = ?self.inner.id, error = %err, "writable errored");
        for callback in queued.into_iter().filter_map(|request| request.callback) {
            callback(Err(err.clone()));
        }
        for callback in end_callbacks {
            callback(Err(err.clone()));
        }
        deliver_error(&self.inner.bus, &self.inner.scheduler, err);
        if self.inner.gate.arrive(Side::Write) {
            emit_close(&self.inner.bus, self.inner.id);
        }
    }

    /// Hold writes in the queue until the matching `uncork`.
    pub fn cork(&self) {
        self.inner.state.borrow_mut().corked += 1;
    }

    /// Release one `cork`; the last one flushes the queue.
    pub fn uncork(&self) {
        let flush = {
            let mut st = self.inner.state.borrow_mut();
            if st.corked == 0 {
                return;
            }
            st.corked -= 1;
            st.corked == 0
        };
        if flush {
            self.flush_queue();
            self.maybe_finish();
        }
    }

    /// Signal that no more data will be written.
    pub fn end(&self) -> &Self {
        self.end_with(None, None, None)
    }

    /// Optionally write a last chunk, then finish.
    ///
    /// `callback` runs after `finish`, or with the error if the stream fails
    /// first. Calling `end` twice, or after `finish`, fails the callback and
    /// emits `error` without running finalization again.
    pub fn end_with(
        &self,
        chunk: Option<Chunk>,
        encoding: Option<Encoding>,
        callback: Option<Callback>,
    ) -> &Self {
        let rejection = {
            let st = self.inner.state.borrow();
            if st.finished {
                Some((StreamError::AlreadyFinished, true))
            } else if st.ending {
                Some((StreamError::WriteAfterEnd, true))
            } else if st.destroyed {
                Some((StreamError::Destroyed, false))
            } else {
                st.errored.clone().map(|err| (err, false))
            }
        };
        if let Some((err, emit)) = rejection {
            self.reject(err, callback, emit);
            return self;
        }

        if let Some(chunk) = chunk {
            self.write_with(chunk, encoding, None);
        }

        {
            let mut st = self.inner.state.borrow_mut();
            st.ending = true;
            st.writable = false;
            st.corked = 0;
            st.backpressure.cancel_drain();
            if let Some(callback) = callback {
                st.end_callbacks.push(callback);
            }
        }
        tracing::debug!(stream = ?self.inner.id, "writable ending");

        self.flush_queue();
        self.maybe_finish();
        self
    }

    fn maybe_finish(&self) {
        let run_final = {
            let mut st = self.inner.state.borrow_mut();
            if !st.ending
                || st.finished
                || st.finish_scheduled
                || st.writing
                || !st.queue.is_empty()
                || st.is_failed()
            {
                return;
            }
            match st.final_state {
                FinalState::Running => return,
                FinalState::Pending if self.inner.do_final.is_some() => {
                    st.final_state = FinalState::Running;
                    true
                }
                FinalState::Pending | FinalState::Done => {
                    st.final_state = FinalState::Done;
                    st.finish_scheduled = true;
                    false
                }
            }
        };

        if run_final {
            self.run_final();
        } else {
            let this = self.clone();
            self.inner.scheduler.defer_task(move || this.finish());
        }
    }

    fn run_final(&self) {
        let Some(do_final) = self.inner.do_final.clone() else {
            return;
        };
        let this = self.clone();
        let completion = WriteCallback::new(
            move |result| {
                let stream = this.clone();
                this.inner
                    .scheduler
                    .defer(move || stream.on_final_complete(result));
            },
            self.repeat_reporter(),
        );

        tracing::trace!(stream = ?self.inner.id, "running final hook");
        if let Err(err) = do_final(completion.clone()) {
            if !completion.is_called() {
                completion.fail(err);
            }
        }
    }

    fn on_final_complete(&self, result: Result<()>) {
        match result {
            Ok(()) => {
                self.inner.state.borrow_mut().final_state = FinalState::Done;
                self.maybe_finish();
            }
            Err(err) => self.fail(err),
        }
    }

    fn finish(&self) {
        let callbacks = {
            let mut st = self.inner.state.borrow_mut();
            if st.finished || st.is_failed() {
                return;
            }
            st.finished = true;
            std::mem::take(&mut st.end_callbacks)
        };

        tracing::debug!(stream = ?self.inner.id, "writable finished");
        self.inner.bus.emit(&Event::Finish);
        for callback in callbacks {
            callback(Ok(()));
        }

        if self.inner.gate.arrive(Side::Write) {
            let bus = self.inner.bus.clone();
            let id = self.inner.id;
            self.inner.scheduler.defer(move || emit_close(&bus, id));
        }
    }

    /// Destroy the stream: fail queued writes with [`StreamError::Destroyed`]
    /// and emit `error` (if given) then `close`.
    pub fn destroy(&self, err: Option<StreamError>) {
        let (queued, end_callbacks) = {
            let mut st = self.inner.state.borrow_mut();
            if st.destroyed {
                return;
            }
            st.destroyed = true;
            st.writable = false;
            if let Some(err) = &err {
                st.errored.get_or_insert_with(|| err.clone());
            }
            st.backpressure.reset();
            (st.queue.drain_all(), std::mem::take(&mut st.end_callbacks))
        };
        tracing::debug!(stream = ?self.inner.id, "writable destroyed");

        let this = self.clone();
        self.inner.scheduler.defer(move || {
            for callback in queued.into_iter().filter_map(|request| request.callback) {
                callback(Err(StreamError::Destroyed));
            }
            for callback in end_callbacks {
                callback(Err(StreamError::Destroyed));
            }
            if let Some(err) = err {
                deliver_error(&this.inner.bus, &this.inner.scheduler, err);
            }
            if this.inner.gate.force() {
                emit_close(&this.inner.bus, this.inner.id);
            }
        });
    }

    /// Set the encoding used when `write` is given no encoding.
    ///
    /// Unknown names are rejected without changing the stream.
    pub fn set_default_encoding(&self, name: &str) -> Result<()> {
        let encoding: Encoding = name.parse()?;
        self.inner.state.borrow_mut().default_encoding = encoding;
        Ok(())
    }

    /// Register a listener.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Event) + 'static,
    {
        self.inner.bus.on(kind, listener)
    }

    /// Register a listener removed after its first delivery.
    pub fn once<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Event) + 'static,
    {
        self.inner.bus.once(kind, listener)
    }

    /// Remove a listener. Returns `true` if it was registered.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.inner.bus.off(kind, id)
    }

    /// Check if `write` would be accepted.
    pub fn writable(&self) -> bool {
        self.inner.state.borrow().writable
    }

    /// Bytes accepted but not yet completed by the low-level writer.
    pub fn writable_length(&self) -> usize {
        self.inner.state.borrow().backpressure.pending()
    }

    pub fn writable_high_water_mark(&self) -> usize {
        self.inner.state.borrow().backpressure.high_water_mark()
    }

    /// Check if a `drain` is owed to the caller.
    pub fn writable_need_drain(&self) -> bool {
        self.inner.state.borrow().backpressure.need_drain()
    }

    /// Current cork depth.
    pub fn writable_corked(&self) -> usize {
        self.inner.state.borrow().corked
    }

    /// Check if `end` was called.
    pub fn writable_ended(&self) -> bool {
        self.inner.state.borrow().ending
    }

    /// Check if `finish` was emitted.
    pub fn writable_finished(&self) -> bool {
        self.inner.state.borrow().finished
    }

    pub fn errored(&self) -> Option<StreamError> {
        self.inner.state.borrow().errored.clone()
    }

    /// Check if `close` is due or was emitted.
    pub fn closed(&self) -> bool {
        self.inner.gate.is_closed()
    }

    pub fn destroyed(&self) -> bool {
        self.inner.state.borrow().destroyed
    }
}

impl WriteStream for Writable {
    fn stream_id(&self) -> StreamId {
        self.inner.id
    }

    fn write_chunk(&self, chunk: Chunk) -> bool {
        self.write_with(chunk, None, None)
    }

    fn end_stream(&self) {
        self.end();
    }

    fn events(&self) -> &EventBus {
        &self.inner.bus
    }
}

impl fmt::Debug for Writable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Writable");
        debug.field("id", &self.inner.id);
        if let Ok(st) = self.inner.state.try_borrow() {
            debug
                .field("length", &st.backpressure.pending())
                .field("queued", &st.queue.len())
                .field("writing", &st.writing)
                .field("corked", &st.corked)
                .field("ending", &st.ending)
                .field("finished", &st.finished);
        }
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    type Log = Rc<RefCell<Vec<String>>>;

    /// Writable whose writer logs each chunk and completes on the next microtask.
    fn logging_writable(scheduler: &Scheduler, options: WritableOptions) -> (Writable, Log) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        let s = scheduler.clone();
        let options = options.with_do_write(move |chunk, _, callback| {
            l.borrow_mut().push(format!("write:{}", chunk.to_text_lossy()));
            s.defer(move || callback.ok());
            Ok(())
        });
        let writable = Writable::new(scheduler, options);
        for kind in [EventKind::Drain, EventKind::Finish, EventKind::Close, EventKind::Error] {
            let l = log.clone();
            writable.on(kind, move |event| l.borrow_mut().push(event.kind().to_string()));
        }
        (writable, log)
    }

    #[test]
    fn test_write_end_order() {
        let scheduler = Scheduler::new();
        let (writable, log) = logging_writable(&scheduler, WritableOptions::new());

        assert!(writable.write("a"));
        assert!(writable.write("b"));
        writable.end();
        assert!(writable.writable_ended());
        assert!(!writable.writable());
        scheduler.run_until_idle().unwrap();

        assert_eq!(*log.borrow(), vec!["write:a", "write:b", "finish", "close"]);
        assert!(writable.writable_finished());
        assert!(writable.closed());
    }

    #[test]
    fn test_single_write_in_flight() {
        let scheduler = Scheduler::new();
        let in_flight = Rc::new(Cell::new(0));
        let max_in_flight = Rc::new(Cell::new(0));

        let (i, m, s) = (in_flight.clone(), max_in_flight.clone(), scheduler.clone());
        let writable = Writable::new(
            &scheduler,
            WritableOptions::new().with_do_write(move |_, _, callback| {
                i.set(i.get() + 1);
                m.set(m.get().max(i.get()));
                let i = i.clone();
                s.defer_task(move || {
                    i.set(i.get() - 1);
                    callback.ok();
                });
                Ok(())
            }),
        );

        for _ in 0..5 {
            writable.write("x");
        }
        scheduler.run_until_idle().unwrap();
        assert_eq!(max_in_flight.get(), 1);
        assert_eq!(writable.writable_length(), 0);
    }

    #[test]
    fn test_backpressure_and_drain() {
        let scheduler = Scheduler::new();
        let (writable, log) =
            logging_writable(&scheduler, WritableOptions::new().with_high_water_mark(4));

        assert!(writable.write("ab"));
        assert!(!writable.write("cd"));
        assert!(writable.writable_need_drain());
        assert_eq!(writable.writable_length(), 4);
        scheduler.run_until_idle().unwrap();

        assert_eq!(*log.borrow(), vec!["write:ab", "write:cd", "drain"]);
        assert!(!writable.writable_need_drain());
    }

    #[test]
    fn test_callback_runs_after_write_returns() {
        let scheduler = Scheduler::new();
        let writable = Writable::new(
            &scheduler,
            WritableOptions::new().with_do_write(|_, _, callback| {
                callback.ok();
                Ok(())
            }),
        );

        let done = Rc::new(Cell::new(false));
        let d = done.clone();
        writable.write_with(Chunk::from("x"), None, Some(Box::new(move |r| d.set(r.is_ok()))));
        assert!(!done.get());
        scheduler.run_until_idle().unwrap();
        assert!(done.get());
    }

    #[test]
    fn test_cork_batches_with_writev() {
        let scheduler = Scheduler::new();
        let batches = Rc::new(RefCell::new(Vec::new()));
        let b = batches.clone();
        let s = scheduler.clone();
        let writable = Writable::new(
            &scheduler,
            WritableOptions::new()
                .with_do_write(|_, _, callback| {
                    callback.ok();
                    Ok(())
                })
                .with_do_writev(move |chunks, callback| {
                    b.borrow_mut().push(chunks.len());
                    s.defer(move || callback.ok());
                    Ok(())
                }),
        );

        writable.cork();
        writable.cork();
        writable.write("a");
        writable.write("b");
        writable.write("c");
        writable.uncork();
        assert_eq!(writable.writable_corked(), 1);
        assert!(batches.borrow().is_empty());

        writable.uncork();
        scheduler.run_until_idle().unwrap();
        assert_eq!(*batches.borrow(), vec![3]);
    }

    #[test]
    fn test_uncork_without_writev_flushes_one_at_a_time() {
        let scheduler = Scheduler::new();
        let (writable, log) = logging_writable(&scheduler, WritableOptions::new());

        writable.cork();
        writable.write("a");
        writable.write("b");
        scheduler.run_until_idle().unwrap();
        assert!(log.borrow().is_empty());

        writable.uncork();
        scheduler.run_until_idle().unwrap();
        assert_eq!(*log.borrow(), vec!["write:a", "write:b"]);
    }

    #[test]
    fn test_write_after_end() {
        let scheduler = Scheduler::new();
        let (writable, log) = logging_writable(&scheduler, WritableOptions::new());
        writable.end();

        let failed = Rc::new(RefCell::new(None));
        let f = failed.clone();
        let ret = writable.write_with(
            Chunk::from("late"),
            None,
            Some(Box::new(move |r| *f.borrow_mut() = r.err())),
        );
        assert!(!ret);
        assert!(failed.borrow().is_none());

        scheduler.run_until_idle().unwrap();
        assert!(matches!(*failed.borrow(), Some(StreamError::WriteAfterEnd)));
        assert!(log.borrow().contains(&"error".to_string()));
        assert!(!log.borrow().contains(&"write:late".to_string()));
    }

    #[test]
    fn test_end_twice_is_rejected() {
        let scheduler = Scheduler::new();
        let (writable, log) = logging_writable(&scheduler, WritableOptions::new());
        writable.end();
        writable.end();
        scheduler.run_until_idle().unwrap();

        let finishes = log.borrow().iter().filter(|e| *e == "finish").count();
        assert_eq!(finishes, 1);
        assert!(log.borrow().contains(&"error".to_string()));
        assert!(writable.errored().is_none());
    }

    #[test]
    fn test_end_after_finish_without_listener_is_uncaught() {
        let scheduler = Scheduler::new();
        let writable = Writable::new(&scheduler, WritableOptions::new());
        writable.end();
        scheduler.run_until_idle().unwrap();
        assert!(writable.writable_finished());

        writable.end();
        let err = scheduler.run_until_idle().unwrap_err();
        assert!(matches!(err, StreamError::AlreadyFinished));
        assert_eq!(err.code(), Some(10200036));
    }

    #[test]
    fn test_writer_error_fails_queue() {
        let scheduler = Scheduler::new();
        let s = scheduler.clone();
        let writable = Writable::new(
            &scheduler,
            WritableOptions::new().with_do_write(move |_, _, callback| {
                s.defer(move || callback.fail(StreamError::other("disk full")));
                Ok(())
            }),
        );
        let events = Rc::new(RefCell::new(Vec::new()));
        for kind in [EventKind::Error, EventKind::Close, EventKind::Finish] {
            let e = events.clone();
            writable.on(kind, move |event| e.borrow_mut().push(event.kind()));
        }

        let results = Rc::new(RefCell::new(Vec::new()));
        for chunk in ["a", "b"] {
            let r = results.clone();
            writable.write_with(
                Chunk::from(chunk),
                None,
                Some(Box::new(move |res| r.borrow_mut().push(res.is_err()))),
            );
        }
        writable.end();
        scheduler.run_until_idle().unwrap();

        assert_eq!(*results.borrow(), vec![true, true]);
        assert_eq!(*events.borrow(), vec![EventKind::Error, EventKind::Close]);
        assert!(!writable.write("c"));
    }

    #[test]
    fn test_initializer_runs_at_construction() {
        let scheduler = Scheduler::new();
        let inits = Rc::new(Cell::new(0));
        let i = inits.clone();
        let (writable, log) = logging_writable(
            &scheduler,
            WritableOptions::new().with_do_initialize(move |callback| {
                i.set(i.get() + 1);
                callback.fail(StreamError::other("offline"));
                Ok(())
            }),
        );
        assert_eq!(inits.get(), 1);

        assert!(writable.write("a"));
        scheduler.run_until_idle().unwrap();
        assert_eq!(*log.borrow(), vec!["write:a", "error"]);
        assert!(writable.errored().is_none());
        assert!(writable.writable());
        assert_eq!(inits.get(), 1);
    }

    #[test]
    fn test_missing_writer() {
        let scheduler = Scheduler::new();
        let writable = Writable::new(&scheduler, WritableOptions::new());
        writable.write("x");
        let err = scheduler.run_until_idle().unwrap_err();
        assert_eq!(err.code(), Some(10200035));
    }

    #[test]
    fn test_final_hook_runs_before_finish() {
        let scheduler = Scheduler::new();
        let s = scheduler.clone();
        let finals = Rc::new(Cell::new(0));
        let f = finals.clone();
        let (writable, log) = logging_writable(
            &scheduler,
            WritableOptions::new().with_do_final(move |callback| {
                f.set(f.get() + 1);
                s.defer(move || callback.ok());
                Ok(())
            }),
        );

        writable.write("a");
        writable.end();
        scheduler.run_until_idle().unwrap();
        assert_eq!(finals.get(), 1);
        assert_eq!(*log.borrow(), vec!["write:a", "finish", "close"]);
    }

    #[test]
    fn test_multiple_callback_reported_once() {
        let scheduler = Scheduler::new();
        let s = scheduler.clone();
        let writable = Writable::new(
            &scheduler,
            WritableOptions::new().with_do_write(move |_, _, callback| {
                let again = callback.clone();
                s.defer(move || {
                    callback.ok();
                    again.ok();
                });
                Ok(())
            }),
        );
        let errors = Rc::new(RefCell::new(Vec::new()));
        let e = errors.clone();
        writable.on(EventKind::Error, move |event| {
            e.borrow_mut().push(event.error().and_then(|err| err.code()));
        });
        let completions = Rc::new(Cell::new(0));
        let c = completions.clone();
        writable.write_with(
            Chunk::from("x"),
            None,
            Some(Box::new(move |_| c.set(c.get() + 1))),
        );
        scheduler.run_until_idle().unwrap();

        assert_eq!(*errors.borrow(), vec![Some(10200037)]);
        assert_eq!(completions.get(), 1);
        assert_eq!(writable.writable_length(), 0);
    }

    #[test]
    fn test_destroy_fails_queued_writes() {
        let scheduler = Scheduler::new();
        let writable = Writable::new(
            &scheduler,
            WritableOptions::new().with_do_write(|_, _, _| Ok(())),
        );
        let results = Rc::new(RefCell::new(Vec::new()));
        for chunk in ["in-flight", "queued"] {
            let r = results.clone();
            writable.write_with(
                Chunk::from(chunk),
                None,
                Some(Box::new(move |res| r.borrow_mut().push(res.err()))),
            );
        }

        writable.destroy(None);
        scheduler.run_until_idle().unwrap();
        assert_eq!(results.borrow().len(), 1);
        assert!(matches!(results.borrow()[0], Some(StreamError::Destroyed)));
        assert!(writable.destroyed());
        assert!(writable.closed());
    }

    #[test]
    fn test_set_default_encoding() {
        let scheduler = Scheduler::new();
        let writable = Writable::new(&scheduler, WritableOptions::new());
        assert!(writable.set_default_encoding("utf-8").is_ok());
        let err = writable.set_default_encoding("ascii").unwrap_err();
        assert_eq!(err.code(), Some(401));
    }
}
