//! Readable - a pull/push hybrid byte source.
//!
//! A Readable holds a byte buffer filled by [`Readable::push`] and drained by
//! [`Readable::read`] or, in flowing mode, by `data` events. More data is
//! requested from the producer through the `doRead` hook whenever the buffer
//! runs below the high-water mark.
//!
//! # Modes
//!
//! ```text
//!                 on(Data)                    on(Readable)
//!   (no consumer) ────────► flowing ◄───────► paused (pull via read())
//!                             │   ▲ resume()
//!                     pause() ▼   │
//!                            paused
//! ```
//!
//! Subscribing is not side-effect free: a `data` listener switches the stream
//! into flowing mode and starts production, a `readable` listener switches it
//! out of flowing mode and requests one batch.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use wirestream::{Chunk, EventKind, Readable, ReadableOptions, Scheduler};
//!
//! let scheduler = Scheduler::new();
//! let readable = Readable::new(
//!     &scheduler,
//!     ReadableOptions::new().with_do_read(|stream, _size| {
//!         stream.push(Some(Chunk::from("hello")));
//!         stream.push(None);
//!         Ok(())
//!     }),
//! );
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let s = seen.clone();
//! readable.on(EventKind::Data, move |event| {
//!     if let Some(chunk) = event.data() {
//!         s.borrow_mut().push(chunk.to_text_lossy().into_owned());
//!     }
//! });
//!
//! scheduler.run_until_idle().unwrap();
//! assert_eq!(*seen.borrow(), vec!["hello"]);
//! assert!(readable.readable_ended());
//! ```

mod pipe;

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

pub use pipe::WriteStream;
use pipe::PipeRegistration;

use crate::backpressure::Watermark;
use crate::buffer::ByteQueue;
use crate::codec::{Chunk, Encoding, Utf8Decoder};
use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::events::{Event, EventBus, EventKind, ListenerId};
use crate::lifecycle::{deliver_error, emit_close, run_initializer, CloseGate, Side, StreamId};
use crate::scheduler::Scheduler;
use crate::writable::{InitHook, WriteCallback};

/// Producer hook: `doRead(stream, requested_size)`.
///
/// Expected to call [`Readable::push`] zero or more times, now or later. An
/// `Err` errors the stream.
pub type ReadHook = Rc<dyn Fn(&Readable, usize) -> Result<()>>;

/// Options for creating a [`Readable`].
#[derive(Clone, Default)]
pub struct ReadableOptions {
    /// Watermark and encoding.
    pub config: StreamConfig,
    /// Producer hook.
    pub do_read: Option<ReadHook>,
    /// Initializer, run on the first subscription.
    pub do_initialize: Option<InitHook>,
}

impl ReadableOptions {
    /// Create default options without a producer hook.
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

    /// Set the encoding; `None` makes `read` return raw bytes.
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

    /// Set the producer hook.
    pub fn with_do_read<F>(mut self, do_read: F) -> Self
    where
        F: Fn(&Readable, usize) -> Result<()> + 'static,
    {
        self.do_read = Some(Rc::new(do_read));
        self
    }
}

impl fmt::Debug for ReadableOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadableOptions")
            .field("config", &self.config)
            .field("do_read", &self.do_read.is_some())
            .field("do_initialize", &self.do_initialize.is_some())
            .finish()
    }
}

struct ReadableState {
    buffer: ByteQueue,
    watermark: Watermark,
    encoding: Option<Encoding>,
    decoder: Utf8Decoder,
    /// `None` until a consumer picks a mode.
    flowing: Option<bool>,
    /// Explicitly paused by `pause()` or by a saturated pipe destination.
    paused: bool,
    readable: bool,
    /// `push(None)` was received.
    ended: bool,
    end_emitted: bool,
    end_scheduled: bool,
    tick_scheduled: bool,
    /// A `doRead` request is outstanding; cleared by the next `push`.
    reading: bool,
    /// `doInitialize` ran, or there is none.
    initialized: bool,
    errored: Option<StreamError>,
    destroyed: bool,
    pipes: Vec<PipeRegistration>,
}

impl ReadableState {
    fn new(config: &StreamConfig) -> Self {
        Self {
            buffer: ByteQueue::new(),
            watermark: Watermark::new(config.high_water_mark),
            encoding: config.encoding,
            decoder: Utf8Decoder::new(),
            flowing: None,
            paused: false,
            readable: true,
            ended: false,
            end_emitted: false,
            end_scheduled: false,
            tick_scheduled: false,
            reading: false,
            initialized: false,
            errored: None,
            destroyed: false,
            pipes: Vec::new(),
        }
    }

    fn is_failed(&self) -> bool {
        self.destroyed || self.errored.is_some()
    }
}

struct ReadableInner {
    id: StreamId,
    state: RefCell<ReadableState>,
    bus: EventBus,
    scheduler: Scheduler,
    do_read: Option<ReadHook>,
    do_initialize: Option<InitHook>,
    gate: CloseGate,
}

/// Handle to a readable byte stream.
///
/// Cloning the handle shares the stream.
#[derive(Clone)]
pub struct Readable {
    inner: Rc<ReadableInner>,
}

impl Readable {
    /// Create a standalone Readable.
    pub fn new(scheduler: &Scheduler, options: ReadableOptions) -> Self {
        Self::build(scheduler.clone(), EventBus::new(), CloseGate::single(), options)
    }

    pub(crate) fn build(
        scheduler: Scheduler,
        bus: EventBus,
        gate: CloseGate,
        options: ReadableOptions,
    ) -> Self {
        let inner = ReadableInner {
            id: StreamId::next(),
            state: RefCell::new(ReadableState::new(&options.config)),
            bus,
            scheduler,
            do_read: options.do_read,
            do_initialize: options.do_initialize,
            gate,
        };
        Self {
            inner: Rc::new(inner),
        }
    }

    fn from_weak(weak: &Weak<ReadableInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn downgrade(&self) -> Weak<ReadableInner> {
        Rc::downgrade(&self.inner)
    }

    /// Identity of this stream.
    pub fn id(&self) -> StreamId {
        self.inner.id
    }

    /// The event bus of this stream.
    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Append a chunk to the buffer, or signal end of production with `None`.
    ///
    /// Returns `true` while the buffer is under the high-water mark. Always
    /// returns `false` for `None` and on an errored or destroyed stream.
    pub fn push(&self, chunk: Option<Chunk>) -> bool {
        let mut st = self.inner.state.borrow_mut();
        if st.is_failed() {
            return false;
        }
        st.reading = false;

        match chunk {
            Some(chunk) => {
                if st.ended {
                    drop(st);
                    self.error_stream(StreamError::PushAfterEof);
                    return false;
                }
                let progress = !chunk.is_empty();
                if progress {
                    let encoding = st.encoding.unwrap_or_default();
                    st.buffer.push(&chunk.encode(encoding));
                }
                let below = st.watermark.is_below(st.buffer.len());
                drop(st);
                // An empty chunk only clears the outstanding request.
                if progress {
                    self.schedule_tick();
                }
                below
            }
            None => {
                if st.ended {
                    return false;
                }
                st.ended = true;
                drop(st);
                tracing::trace!(stream = ?self.inner.id, "end of production");
                self.schedule_tick();
                false
            }
        }
    }

    /// Take bytes from the front of the buffer.
    ///
    /// With `None` all buffered bytes are returned. If `size` exceeds what is
    /// buffered, the buffered bytes are returned in flowing mode or at end of
    /// stream, otherwise `None` and more data is requested.
    ///
    /// Without a `doRead` hook the first call errors the stream.
    pub fn read(&self, size: Option<usize>) -> Option<Chunk> {
        if self.inner.do_read.is_none() {
            let first = {
                let mut st = self.inner.state.borrow_mut();
                if st.readable && !st.is_failed() {
                    st.readable = false;
                    st.errored = Some(StreamError::ReadNotImplemented);
                    true
                } else {
                    false
                }
            };
            if first {
                self.schedule_failure(StreamError::ReadNotImplemented);
            }
            return None;
        }
        if self.inner.state.borrow().is_failed() {
            return None;
        }
        self.read_inner(size)
    }

    fn read_inner(&self, size: Option<usize>) -> Option<Chunk> {
        let chunk = {
            let mut st = self.inner.state.borrow_mut();
            if let Some(size) = size {
                if st.watermark.grow_to_fit(size) {
                    tracing::trace!(
                        stream = ?self.inner.id,
                        high_water_mark = st.watermark.high(),
                        "high-water mark raised"
                    );
                }
            }

            let available = st.buffer.len();
            let want = match size {
                Some(size) if size > available => {
                    if st.flowing == Some(true) || st.ended {
                        available
                    } else {
                        0
                    }
                }
                Some(size) => size,
                None => available,
            };

            if want == 0 {
                None
            } else {
                let bytes = st.buffer.take_front(want);
                match st.encoding {
                    Some(_) => {
                        let text = st.decoder.decode(&bytes);
                        (!text.is_empty()).then_some(Chunk::Text(text))
                    }
                    None => Some(Chunk::Bytes(bytes)),
                }
            }
        };

        if let Some(chunk) = &chunk {
            self.inner.bus.emit(&Event::Data(chunk.clone()));
        }

        let wants_more = {
            let st = self.inner.state.borrow();
            !st.paused && !st.ended && st.watermark.is_below(st.buffer.len())
        };
        if wants_more {
            self.request_more();
        }
        self.maybe_end();
        chunk
    }

    /// Invoke `doRead` unless a request is already outstanding.
    fn request_more(&self) {
        let Some(do_read) = self.inner.do_read.clone() else {
            return;
        };
        let size = {
            let mut st = self.inner.state.borrow_mut();
            if st.reading || st.ended || st.is_failed() {
                return;
            }
            st.reading = true;
            st.watermark.high()
        };

        tracing::trace!(stream = ?self.inner.id, size, "requesting data");
        if let Err(err) = do_read(self, size) {
            self.error_stream(err);
        }
    }

    fn schedule_tick(&self) {
        {
            let mut st = self.inner.state.borrow_mut();
            if st.tick_scheduled {
                return;
            }
            st.tick_scheduled = true;
        }
        let this = self.clone();
        self.inner.scheduler.defer(move || this.tick());
    }

    /// Deferred continuation of `push`, `resume` and mode switches.
    fn tick(&self) {
        let (flowing, paused, has_data, ended) = {
            let mut st = self.inner.state.borrow_mut();
            st.tick_scheduled = false;
            if st.is_failed() {
                return;
            }
            (st.flowing, st.paused, !st.buffer.is_empty(), st.ended)
        };

        match flowing {
            Some(true) if !paused => {
                self.read_inner(None);
            }
            Some(false) if !paused => {
                if has_data || ended {
                    self.inner.bus.emit(&Event::Readable);
                }
                let wants_more = {
                    let st = self.inner.state.borrow();
                    !st.ended && st.watermark.is_below(st.buffer.len())
                };
                if wants_more {
                    self.request_more();
                }
            }
            _ => {}
        }
        self.maybe_end();
    }

    fn maybe_end(&self) {
        {
            let mut st = self.inner.state.borrow_mut();
            if !st.ended
                || !st.buffer.is_empty()
                || st.end_emitted
                || st.end_scheduled
                || st.is_failed()
            {
                return;
            }
            st.end_scheduled = true;
        }
        let this = self.clone();
        self.inner.scheduler.defer(move || this.emit_end());
    }

    fn emit_end(&self) {
        let tail = {
            let mut st = self.inner.state.borrow_mut();
            if st.end_emitted || st.is_failed() {
                return;
            }
            st.end_emitted = true;
            st.readable = false;
            st.decoder.flush()
        };

        if !tail.is_empty() {
            self.inner.bus.emit(&Event::Data(Chunk::Text(tail)));
        }
        tracing::debug!(stream = ?self.inner.id, "readable ended");
        self.inner.bus.emit(&Event::End);

        if self.inner.gate.arrive(Side::Read) {
            let bus = self.inner.bus.clone();
            let id = self.inner.id;
            self.inner.scheduler.defer(move || emit_close(&bus, id));
        }
    }

    /// Mark the stream errored and deliver `error`, deferred. `close` follows
    /// once every side sharing the close gate is done.
    pub(crate) fn error_stream(&self, err: StreamError) {
        {
            let mut st = self.inner.state.borrow_mut();
            if st.is_failed() {
                tracing::debug!(stream = ?self.inner.id, error = %err, "ignoring error on failed stream");
                return;
            }
            st.errored = Some(err.clone());
            st.readable = false;
        }
        tracing::debug!(stream = ?self.inner.id, error = %err, "readable errored");
        self.schedule_failure(err);
    }

    fn schedule_failure(&self, err: StreamError) {
        let this = self.clone();
        self.inner.scheduler.defer(move || {
            deliver_error(&this.inner.bus, &this.inner.scheduler, err);
            if this.inner.gate.arrive(Side::Read) {
                emit_close(&this.inner.bus, this.inner.id);
            }
        });
    }

    /// Destroy the stream: drop buffered data, unpipe every destination and
    /// emit `error` (if given) then `close`.
    pub fn destroy(&self, err: Option<StreamError>) {
        {
            let mut st = self.inner.state.borrow_mut();
            if st.destroyed {
                return;
            }
            st.destroyed = true;
            st.readable = false;
            st.buffer.clear();
            if let Some(err) = &err {
                st.errored.get_or_insert_with(|| err.clone());
            }
        }
        tracing::debug!(stream = ?self.inner.id, "readable destroyed");
        self.unpipe_all();

        let this = self.clone();
        self.inner.scheduler.defer(move || {
            if let Some(err) = err {
                deliver_error(&this.inner.bus, &this.inner.scheduler, err);
            }
            if this.inner.gate.force() {
                emit_close(&this.inner.bus, this.inner.id);
            }
        });
    }

    /// Stop flowing. Returns the resulting pause flag (`true`).
    pub fn pause(&self) -> bool {
        let changed = {
            let mut st = self.inner.state.borrow_mut();
            let changed = !st.paused;
            st.paused = true;
            st.flowing = Some(false);
            changed
        };
        if changed {
            tracing::trace!(stream = ?self.inner.id, "paused");
            self.inner.bus.emit(&Event::Pause);
        }
        true
    }

    /// Switch to flowing mode. Returns the resulting pause flag (`false`).
    pub fn resume(&self) -> bool {
        let changed = {
            let mut st = self.inner.state.borrow_mut();
            let changed = st.paused || st.flowing != Some(true);
            st.paused = false;
            st.flowing = Some(true);
            changed
        };
        if changed {
            tracing::trace!(stream = ?self.inner.id, "resumed");
            self.inner.bus.emit(&Event::Resume);
        }
        self.schedule_tick();
        false
    }

    /// Check if the stream was paused.
    pub fn is_paused(&self) -> bool {
        self.inner.state.borrow().paused
    }

    /// Set the encoding used to decode `read` results.
    ///
    /// Unknown names are rejected without changing the stream.
    pub fn set_encoding(&self, name: &str) -> Result<()> {
        let encoding: Encoding = name.parse()?;
        self.inner.state.borrow_mut().encoding = Some(encoding);
        Ok(())
    }

    /// Register a listener, applying the mode switch of `data` and `readable`.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Event) + 'static,
    {
        let id = self.inner.bus.on(kind, listener);
        self.after_subscribe(kind);
        id
    }

    /// Register a listener removed after its first delivery.
    pub fn once<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Event) + 'static,
    {
        let id = self.inner.bus.once(kind, listener);
        self.after_subscribe(kind);
        id
    }

    /// Remove a listener. Returns `true` if it was registered.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let removed = self.inner.bus.off(kind, id);
        if removed {
            self.after_unsubscribe(kind);
        }
        removed
    }

    fn after_subscribe(&self, kind: EventKind) {
        self.initialize();
        let start = {
            let mut st = self.inner.state.borrow_mut();
            match kind {
                EventKind::Data => {
                    if st.paused || self.inner.bus.has_listeners(EventKind::Readable) {
                        false
                    } else {
                        st.flowing = Some(true);
                        true
                    }
                }
                EventKind::Readable => {
                    st.flowing = Some(false);
                    true
                }
                _ => false,
            }
        };
        if start {
            self.schedule_tick();
        }
    }

    fn initialize(&self) {
        let Some(do_initialize) = &self.inner.do_initialize else {
            return;
        };
        if std::mem::replace(&mut self.inner.state.borrow_mut().initialized, true) {
            return;
        }
        let inner = &self.inner;
        run_initializer(do_initialize, &inner.bus, &inner.scheduler, inner.id);
    }

    fn after_unsubscribe(&self, kind: EventKind) {
        if kind != EventKind::Readable
            || self.inner.bus.has_listeners(EventKind::Readable)
            || !self.inner.bus.has_listeners(EventKind::Data)
        {
            return;
        }
        let resume = {
            let mut st = self.inner.state.borrow_mut();
            if st.paused {
                false
            } else {
                st.flowing = Some(true);
                true
            }
        };
        if resume {
            self.schedule_tick();
        }
    }

    /// Check if data can still be read.
    pub fn readable(&self) -> bool {
        self.inner.state.borrow().readable
    }

    /// Number of buffered bytes.
    pub fn readable_length(&self) -> usize {
        self.inner.state.borrow().buffer.len()
    }

    /// Current high-water mark.
    pub fn readable_high_water_mark(&self) -> usize {
        self.inner.state.borrow().watermark.high()
    }

    /// Flow mode: `None` before a consumer picked one.
    pub fn readable_flowing(&self) -> Option<bool> {
        self.inner.state.borrow().flowing
    }

    /// Encoding of `read` results, `None` for raw bytes.
    pub fn readable_encoding(&self) -> Option<Encoding> {
        self.inner.state.borrow().encoding
    }

    /// Check if `end` was emitted.
    pub fn readable_ended(&self) -> bool {
        self.inner.state.borrow().end_emitted
    }

    /// The error this stream failed with, if any.
    pub fn errored(&self) -> Option<StreamError> {
        self.inner.state.borrow().errored.clone()
    }

    /// Check if `close` is due or was emitted.
    pub fn closed(&self) -> bool {
        self.inner.gate.is_closed()
    }

    /// Check if the stream was destroyed.
    pub fn destroyed(&self) -> bool {
        self.inner.state.borrow().destroyed
    }
}

impl fmt::Debug for Readable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Readable");
        debug.field("id", &self.inner.id);
        if let Ok(st) = self.inner.state.try_borrow() {
            debug
                .field("length", &st.buffer.len())
                .field("flowing", &st.flowing)
                .field("paused", &st.paused)
                .field("ended", &st.ended)
                .field("pipes", &st.pipes.len());
        }
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn record(stream: &Readable, kinds: &[EventKind]) -> Rc<RefCell<Vec<String>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        for &kind in kinds {
            let l = log.clone();
            stream.on(kind, move |event| {
                let entry = match event.data() {
                    Some(chunk) => format!("data:{}", chunk.to_text_lossy()),
                    None => event.kind().to_string(),
                };
                l.borrow_mut().push(entry);
            });
        }
        log
    }

    #[test]
    fn test_push_then_read() {
        let scheduler = Scheduler::new();
        let readable = Readable::new(&scheduler, ReadableOptions::new().with_do_read(|_, _| Ok(())));

        assert!(readable.push(Some(Chunk::from("hello world"))));
        assert_eq!(readable.readable_length(), 11);

        assert_eq!(readable.read(Some(5)), Some(Chunk::from("hello")));
        assert_eq!(readable.readable_length(), 6);
        assert_eq!(readable.read(None), Some(Chunk::from(" world")));
        assert_eq!(readable.read(None), None);
    }

    #[test]
    fn test_read_more_than_buffered_when_paused() {
        let scheduler = Scheduler::new();
        let requests = Rc::new(Cell::new(0));
        let r = requests.clone();
        let readable = Readable::new(
            &scheduler,
            ReadableOptions::new().with_do_read(move |_, _| {
                r.set(r.get() + 1);
                Ok(())
            }),
        );

        readable.push(Some(Chunk::from("abc")));
        assert_eq!(readable.read(Some(10)), None);
        assert_eq!(readable.readable_length(), 3);
        assert_eq!(requests.get(), 1);
    }

    #[test]
    fn test_read_remainder_at_end() {
        let scheduler = Scheduler::new();
        let readable = Readable::new(&scheduler, ReadableOptions::new().with_do_read(|_, _| Ok(())));
        readable.push(Some(Chunk::from("abc")));
        readable.push(None);
        assert_eq!(readable.read(Some(10)), Some(Chunk::from("abc")));
    }

    #[test]
    fn test_push_returns_false_at_high_water_mark() {
        let scheduler = Scheduler::new();
        let readable = Readable::new(&scheduler, ReadableOptions::new().with_high_water_mark(4));
        assert!(readable.push(Some(Chunk::from("abc"))));
        assert!(!readable.push(Some(Chunk::from("d"))));
        assert!(!readable.push(None));
    }

    #[test]
    fn test_watermark_grows_to_power_of_two() {
        let scheduler = Scheduler::new();
        let readable = Readable::new(
            &scheduler,
            ReadableOptions::new()
                .with_high_water_mark(16)
                .with_do_read(|_, _| Ok(())),
        );
        readable.read(Some(100));
        assert_eq!(readable.readable_high_water_mark(), 128);
    }

    #[test]
    fn test_read_without_hook_errors_once() {
        let scheduler = Scheduler::new();
        let readable = Readable::new(&scheduler, ReadableOptions::new());
        let log = record(&readable, &[EventKind::Error, EventKind::Close]);

        assert_eq!(readable.read(None), None);
        assert_eq!(readable.read(None), None);
        assert!(!readable.readable());
        scheduler.run_until_idle().unwrap();

        assert_eq!(*log.borrow(), vec!["error", "close"]);
        assert_eq!(readable.errored().and_then(|e| e.code()), Some(10200038));
    }

    #[test]
    fn test_data_listener_starts_flowing() {
        let scheduler = Scheduler::new();
        let readable = Readable::new(&scheduler, ReadableOptions::new());
        readable.push(Some(Chunk::from("a")));
        readable.push(Some(Chunk::from("b")));
        readable.push(None);

        let log = record(&readable, &[EventKind::Data, EventKind::End, EventKind::Close]);
        assert_eq!(readable.readable_flowing(), Some(true));
        scheduler.run_until_idle().unwrap();

        assert_eq!(*log.borrow(), vec!["data:ab", "end", "close"]);
        assert!(readable.readable_ended());
        assert!(readable.closed());
    }

    #[test]
    fn test_readable_listener_pull_mode() {
        let scheduler = Scheduler::new();
        let produced = Rc::new(Cell::new(false));
        let p = produced.clone();
        let readable = Readable::new(
            &scheduler,
            ReadableOptions::new().with_do_read(move |stream, _| {
                if !p.replace(true) {
                    stream.push(Some(Chunk::from("pulled")));
                    stream.push(None);
                }
                Ok(())
            }),
        );

        let got = Rc::new(RefCell::new(Vec::new()));
        let g = got.clone();
        let r = readable.clone();
        readable.on(EventKind::Readable, move |_| {
            while let Some(chunk) = r.read(None) {
                g.borrow_mut().push(chunk);
            }
        });
        assert_eq!(readable.readable_flowing(), Some(false));

        scheduler.run_until_idle().unwrap();
        assert_eq!(*got.borrow(), vec![Chunk::from("pulled")]);
        assert!(readable.readable_ended());
    }

    #[test]
    fn test_pause_and_resume() {
        let scheduler = Scheduler::new();
        let readable = Readable::new(&scheduler, ReadableOptions::new());
        let log = record(
            &readable,
            &[EventKind::Data, EventKind::Pause, EventKind::Resume],
        );

        assert!(readable.pause());
        assert!(readable.pause());
        readable.push(Some(Chunk::from("x")));
        scheduler.run_until_idle().unwrap();
        assert_eq!(*log.borrow(), vec!["pause"]);
        assert_eq!(readable.readable_length(), 1);

        assert!(!readable.resume());
        scheduler.run_until_idle().unwrap();
        assert_eq!(*log.borrow(), vec!["pause", "resume", "data:x"]);
    }

    #[test]
    fn test_resume_on_empty_buffer_requests_data() {
        let scheduler = Scheduler::new();
        let requests = Rc::new(RefCell::new(Vec::new()));
        let r = requests.clone();
        let readable = Readable::new(
            &scheduler,
            ReadableOptions::new()
                .with_high_water_mark(64)
                .with_do_read(move |_, size| {
                    r.borrow_mut().push(size);
                    Ok(())
                }),
        );

        assert!(!readable.resume());
        assert!(requests.borrow().is_empty());

        scheduler.run_until_idle().unwrap();
        assert_eq!(*requests.borrow(), vec![64]);
        assert_eq!(readable.readable_flowing(), Some(true));
    }

    #[test]
    fn test_empty_push_does_not_spin() {
        let scheduler = Scheduler::new();
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        let readable = Readable::new(
            &scheduler,
            ReadableOptions::new().with_do_read(move |stream, _| {
                c.set(c.get() + 1);
                stream.push(Some(Chunk::from("")));
                Ok(())
            }),
        );
        let log = record(&readable, &[EventKind::Data]);

        scheduler.run_until_idle().unwrap();
        assert_eq!(calls.get(), 1);
        assert!(log.borrow().is_empty());

        readable.push(Some(Chunk::from("late")));
        scheduler.run_until_idle().unwrap();
        assert_eq!(*log.borrow(), vec!["data:late"]);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_initializer_runs_on_first_subscription() {
        let scheduler = Scheduler::new();
        let inits = Rc::new(Cell::new(0));
        let i = inits.clone();
        let readable = Readable::new(
            &scheduler,
            ReadableOptions::new().with_do_initialize(move |callback| {
                i.set(i.get() + 1);
                callback.fail(StreamError::other("not ready"));
                Ok(())
            }),
        );
        assert_eq!(inits.get(), 0);

        let log = record(&readable, &[EventKind::Error]);
        readable.on(EventKind::Data, |_| {});
        assert_eq!(inits.get(), 1);

        scheduler.run_until_idle().unwrap();
        assert_eq!(*log.borrow(), vec!["error"]);
        assert!(readable.errored().is_none());
        assert!(readable.readable());
    }

    #[test]
    fn test_push_after_eof() {
        let scheduler = Scheduler::new();
        let readable = Readable::new(&scheduler, ReadableOptions::new());
        readable.push(None);
        assert!(!readable.push(Some(Chunk::from("late"))));
        assert_eq!(readable.readable_length(), 0);

        let err = scheduler.run_until_idle().unwrap_err();
        assert!(matches!(err, StreamError::PushAfterEof));
    }

    #[test]
    fn test_errored_stream_ignores_push_and_read() {
        let scheduler = Scheduler::new();
        let readable = Readable::new(
            &scheduler,
            ReadableOptions::new().with_do_read(|_, _| Err(StreamError::other("source failed"))),
        );
        let log = record(&readable, &[EventKind::Error, EventKind::Close]);

        readable.push(Some(Chunk::from("a")));
        assert_eq!(readable.read(Some(1)), Some(Chunk::from("a")));
        scheduler.run_until_idle().unwrap();

        assert_eq!(*log.borrow(), vec!["error", "close"]);
        assert!(!readable.push(Some(Chunk::from("b"))));
        assert_eq!(readable.read(None), None);
    }

    #[test]
    fn test_set_encoding() {
        let scheduler = Scheduler::new();
        let readable = Readable::new(
            &scheduler,
            ReadableOptions::new()
                .with_encoding(None)
                .with_do_read(|_, _| Ok(())),
        );
        readable.push(Some(Chunk::from("ab")));
        assert_eq!(readable.read(Some(1)), Some(Chunk::Bytes(bytes::Bytes::from_static(b"a"))));

        assert!(readable.set_encoding("latin1").is_err());
        assert_eq!(readable.readable_encoding(), None);

        readable.set_encoding("UTF-8").unwrap();
        assert_eq!(readable.read(None), Some(Chunk::Text("b".to_string())));
    }

    #[test]
    fn test_split_multibyte_text() {
        let scheduler = Scheduler::new();
        let readable = Readable::new(&scheduler, ReadableOptions::new().with_do_read(|_, _| Ok(())));
        readable.push(Some(Chunk::from("é!")));

        assert_eq!(readable.read(Some(1)), None);
        assert_eq!(readable.read(Some(2)), Some(Chunk::from("é!")));
    }

    #[test]
    fn test_destroy() {
        let scheduler = Scheduler::new();
        let readable = Readable::new(&scheduler, ReadableOptions::new());
        let log = record(&readable, &[EventKind::Error, EventKind::Close]);
        readable.push(Some(Chunk::from("dropped")));

        readable.destroy(Some(StreamError::other("gone")));
        readable.destroy(None);
        scheduler.run_until_idle().unwrap();

        assert_eq!(*log.borrow(), vec!["error", "close"]);
        assert!(readable.destroyed());
        assert_eq!(readable.readable_length(), 0);
        assert!(!readable.push(Some(Chunk::from("more"))));
    }
}
