//! Pipe relations between a Readable and its destinations.
//!
//! A pipe installs three listeners: `data` and `end` on the source, `drain` on
//! the destination. They are recorded per destination so `unpipe` removes
//! exactly that relation and nothing else.

use crate::codec::Chunk;
use crate::events::{Event, EventBus, EventKind, ListenerId};
use crate::lifecycle::StreamId;

use super::Readable;

/// Destination of a pipe.
///
/// Implemented by every stream with a write side.
pub trait WriteStream {
    /// Identity of the write side.
    fn stream_id(&self) -> StreamId;

    /// Write a chunk with default encoding and no callback.
    ///
    /// Returns `false` when the destination is saturated.
    fn write_chunk(&self, chunk: Chunk) -> bool;

    /// End the write side.
    fn end_stream(&self);

    /// Bus carrying the destination's `drain`, `pipe` and `unpipe` events.
    fn events(&self) -> &EventBus;
}

/// Listeners installed for one destination.
pub(super) struct PipeRegistration {
    destination: StreamId,
    destination_bus: EventBus,
    data: ListenerId,
    end: ListenerId,
    drain: ListenerId,
}

impl Readable {
    /// Forward this stream's data into `destination`.
    ///
    /// The source pauses when `destination` reports saturation and resumes on
    /// its `drain`. When the source ends, `destination` is ended. Returns the
    /// destination for chaining.
    pub fn pipe<W>(&self, destination: &W) -> W
    where
        W: WriteStream + Clone + 'static,
    {
        let source = self.downgrade();
        let dest = destination.clone();
        let data = self.inner.bus.on(EventKind::Data, move |event| {
            let Some(chunk) = event.data() else {
                return;
            };
            if !dest.write_chunk(chunk.clone()) {
                if let Some(source) = Readable::from_weak(&source) {
                    tracing::trace!(stream = ?source.id(), "pipe destination saturated");
                    source.pause();
                }
            }
        });

        let dest = destination.clone();
        let end = self
            .inner
            .bus
            .on(EventKind::End, move |_| dest.end_stream());

        let source = self.downgrade();
        let drain = destination.events().on(EventKind::Drain, move |_| {
            if let Some(source) = Readable::from_weak(&source) {
                if source.is_paused() {
                    source.resume();
                }
            }
        });

        self.inner.state.borrow_mut().pipes.push(PipeRegistration {
            destination: destination.stream_id(),
            destination_bus: destination.events().clone(),
            data,
            end,
            drain,
        });
        tracing::debug!(
            source = ?self.inner.id,
            destination = ?destination.stream_id(),
            "pipe"
        );

        if self.is_paused() {
            self.resume();
        } else {
            self.after_subscribe(EventKind::Data);
        }
        destination.events().emit(&Event::Pipe(self.clone()));
        destination.clone()
    }

    /// Remove the pipe relation to `destination`.
    ///
    /// Returns `false` if this stream was not piped into it.
    pub fn unpipe<W>(&self, destination: &W) -> bool
    where
        W: WriteStream + ?Sized,
    {
        let id = destination.stream_id();
        let registration = {
            let mut st = self.inner.state.borrow_mut();
            let Some(idx) = st.pipes.iter().position(|reg| reg.destination == id) else {
                return false;
            };
            st.pipes.remove(idx)
        };
        self.detach(registration);
        true
    }

    /// Remove every pipe relation. Returns how many were removed.
    pub fn unpipe_all(&self) -> usize {
        let registrations = std::mem::take(&mut self.inner.state.borrow_mut().pipes);
        let count = registrations.len();
        for registration in registrations {
            self.detach(registration);
        }
        count
    }

    /// Number of destinations this stream is piped into.
    pub fn pipe_count(&self) -> usize {
        self.inner.state.borrow().pipes.len()
    }

    fn detach(&self, registration: PipeRegistration) {
        self.inner.bus.off(EventKind::Data, registration.data);
        self.inner.bus.off(EventKind::End, registration.end);
        registration
            .destination_bus
            .off(EventKind::Drain, registration.drain);

        tracing::debug!(
            source = ?self.inner.id,
            destination = ?registration.destination,
            "unpipe"
        );

        {
            let mut st = self.inner.state.borrow_mut();
            if st.pipes.is_empty() && !self.inner.bus.has_listeners(EventKind::Data) {
                st.flowing = Some(false);
            }
        }
        registration
            .destination_bus
            .emit(&Event::Unpipe(self.clone()));
    }
}
