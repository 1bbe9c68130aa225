//! Identity, close bookkeeping and error delivery shared by all streams.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, StreamError};
use crate::events::{Event, EventBus, EventKind};
use crate::scheduler::Scheduler;
use crate::writable::{Completion, InitHook, WriteCallback};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a stream half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    pub(crate) fn next() -> Self {
        StreamId(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// One half of a stream, as seen by its [`CloseGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Read,
    Write,
}

impl Side {
    fn bit(self) -> u8 {
        match self {
            Side::Read => 0b01,
            Side::Write => 0b10,
        }
    }
}

/// Decides when `close` is emitted.
///
/// A standalone stream has one half; a Duplex has two halves sharing one
/// gate. A half arrives when it ends, finishes or errors, and `close` fires
/// once every half arrived. Destroy closes immediately.
#[derive(Debug, Clone)]
pub(crate) struct CloseGate {
    inner: Rc<GateInner>,
}

#[derive(Debug)]
struct GateInner {
    halves: u32,
    /// Bit set of arrived sides.
    arrived: Cell<u8>,
    closed: Cell<bool>,
}

impl CloseGate {
    pub(crate) fn single() -> Self {
        Self::with_halves(1)
    }

    pub(crate) fn pair() -> Self {
        Self::with_halves(2)
    }

    fn with_halves(halves: u32) -> Self {
        Self {
            inner: Rc::new(GateInner {
                halves,
                arrived: Cell::new(0),
                closed: Cell::new(false),
            }),
        }
    }

    /// `side` is done. Returns `true` if `close` should be emitted now.
    ///
    /// A side arriving twice counts once.
    pub(crate) fn arrive(&self, side: Side) -> bool {
        if self.inner.closed.get() {
            return false;
        }
        let arrived = self.inner.arrived.get() | side.bit();
        self.inner.arrived.set(arrived);
        if arrived.count_ones() >= self.inner.halves {
            self.inner.closed.set(true);
            return true;
        }
        false
    }

    /// Close regardless of the other half. Returns `true` if `close` should be emitted now.
    pub(crate) fn force(&self) -> bool {
        !self.inner.closed.replace(true)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }
}

/// Deliver an error raised in deferred context.
///
/// With an `error` listener the error is emitted; without one it is handed to
/// the scheduler as uncaught, so it surfaces from `run_until_idle` instead of
/// vanishing.
pub(crate) fn deliver_error(bus: &EventBus, scheduler: &Scheduler, err: StreamError) {
    if bus.has_listeners(EventKind::Error) {
        tracing::debug!(error = %err, "emitting stream error");
        bus.emit(&Event::Error(err));
    } else {
        scheduler.report_uncaught(err);
    }
}

/// Deliver an error after the current turn.
pub(crate) fn deliver_error_later(bus: &EventBus, scheduler: &Scheduler, err: StreamError) {
    let bus = bus.clone();
    let sched = scheduler.clone();
    scheduler.defer_task(move || deliver_error(&bus, &sched, err));
}

/// Listener for a completion invoked more than once.
pub(crate) fn repeat_reporter(bus: &EventBus, scheduler: &Scheduler, id: StreamId) -> impl Fn() + 'static {
    let bus = bus.clone();
    let scheduler = scheduler.clone();
    move || {
        tracing::warn!(stream = ?id, "completion callback invoked more than once");
        deliver_error_later(&bus, &scheduler, StreamError::MultipleCallback);
    }
}

/// Run a `doInitialize` hook.
///
/// A failure reported by the hook or through its callback is delivered as
/// `error` after the current turn; the stream stays usable.
pub(crate) fn run_initializer(
    hook: &InitHook,
    bus: &EventBus,
    scheduler: &Scheduler,
    id: StreamId,
) {
    let report_bus = bus.clone();
    let report_scheduler = scheduler.clone();
    let callback: WriteCallback = Completion::new(
        move |result: Result<()>| {
            if let Err(err) = result {
                tracing::debug!(stream = ?id, error = %err, "initialization failed");
                deliver_error_later(&report_bus, &report_scheduler, err);
            }
        },
        repeat_reporter(bus, scheduler, id),
    );

    tracing::trace!(stream = ?id, "initializing");
    if let Err(err) = hook(callback.clone()) {
        if callback.is_called() {
            tracing::warn!(stream = ?id, error = %err, "initialize hook failed after completing");
        } else {
            callback.fail(err);
        }
    }
}

/// Emit `close` on a bus. Callers decide via [`CloseGate`] whether it is due.
pub(crate) fn emit_close(bus: &EventBus, id: StreamId) {
    tracing::debug!(stream = ?id, "stream closed");
    bus.emit(&Event::Close);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_gate() {
        let gate = CloseGate::single();
        assert!(!gate.is_closed());
        assert!(gate.arrive(Side::Write));
        assert!(gate.is_closed());
        assert!(!gate.arrive(Side::Write));
        assert!(!gate.force());
    }

    #[test]
    fn test_pair_gate_waits_for_both_halves() {
        let gate = CloseGate::pair();
        assert!(!gate.arrive(Side::Read));
        assert!(!gate.is_closed());
        assert!(gate.arrive(Side::Write));
        assert!(!gate.arrive(Side::Read));
    }

    #[test]
    fn test_pair_gate_counts_a_side_once() {
        let gate = CloseGate::pair();
        assert!(!gate.arrive(Side::Read));
        assert!(!gate.arrive(Side::Read));
        assert!(!gate.is_closed());
        assert!(gate.arrive(Side::Write));
    }

    #[test]
    fn test_force_closes_once() {
        let gate = CloseGate::pair();
        assert!(gate.force());
        assert!(!gate.force());
        assert!(!gate.arrive(Side::Read));
    }

    #[test]
    fn test_initializer_failure_is_emitted_later() {
        let bus = EventBus::new();
        let scheduler = Scheduler::new();
        let errors = Rc::new(Cell::new(0));
        let e = errors.clone();
        bus.on(EventKind::Error, move |_| e.set(e.get() + 1));

        let hook: InitHook = Rc::new(|callback: WriteCallback| -> Result<()> {
            callback.fail(StreamError::other("no device"));
            Ok(())
        });
        run_initializer(&hook, &bus, &scheduler, StreamId::next());
        assert_eq!(errors.get(), 0);

        scheduler.run_until_idle().unwrap();
        assert_eq!(errors.get(), 1);
    }

    #[test]
    fn test_initializer_hook_error() {
        let bus = EventBus::new();
        let scheduler = Scheduler::new();
        let hook: InitHook =
            Rc::new(|_: WriteCallback| -> Result<()> { Err(StreamError::other("refused")) });
        run_initializer(&hook, &bus, &scheduler, StreamId::next());

        let err = scheduler.run_until_idle().unwrap_err();
        assert_eq!(err.to_string(), "refused");
    }

    #[test]
    fn test_stream_ids_unique() {
        let a = StreamId::next();
        let b = StreamId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_deliver_error_without_listener_is_uncaught() {
        let bus = EventBus::new();
        let scheduler = Scheduler::new();
        deliver_error(&bus, &scheduler, StreamError::MultipleCallback);
        assert!(matches!(
            scheduler.take_uncaught(),
            Some(StreamError::MultipleCallback)
        ));
    }

    #[test]
    fn test_deliver_error_with_listener() {
        let bus = EventBus::new();
        let scheduler = Scheduler::new();
        let seen = Rc::new(Cell::new(false));
        let s = seen.clone();
        bus.on(EventKind::Error, move |event| {
            s.set(matches!(event.error(), Some(StreamError::WriteAfterEnd)));
        });

        deliver_error(&bus, &scheduler, StreamError::WriteAfterEnd);
        assert!(seen.get());
        assert!(scheduler.take_uncaught().is_none());
    }
}
