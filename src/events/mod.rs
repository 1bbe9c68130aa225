//! Observable stream events.
//!
//! Every stream owns (or, for a Duplex, shares) an [`EventBus`]. Events are
//! identified by [`EventKind`] and delivered as an [`Event`] value carrying
//! the payload of that kind.

mod bus;

use std::fmt;
use std::str::FromStr;

pub use bus::{EventBus, Listener, ListenerId};

use crate::codec::Chunk;
use crate::error::StreamError;
use crate::readable::Readable;

/// Name of an observable event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Data was read from a Readable.
    Data,
    /// A Readable delivered its last byte.
    End,
    /// The stream failed.
    Error,
    /// The stream released its resources; nothing follows.
    Close,
    /// Data (or end of data) is available to `read()`.
    Readable,
    /// A Readable was paused.
    Pause,
    /// A Readable was resumed.
    Resume,
    /// A Writable's backlog cleared after `write` returned `false`.
    Drain,
    /// A Writable flushed everything after `end()`.
    Finish,
    /// A Readable was piped into this Writable.
    Pipe,
    /// A Readable was unpiped from this Writable.
    Unpipe,
}

impl EventKind {
    /// Event name as used by listeners registering by name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Data => "data",
            EventKind::End => "end",
            EventKind::Error => "error",
            EventKind::Close => "close",
            EventKind::Readable => "readable",
            EventKind::Pause => "pause",
            EventKind::Resume => "resume",
            EventKind::Drain => "drain",
            EventKind::Finish => "finish",
            EventKind::Pipe => "pipe",
            EventKind::Unpipe => "unpipe",
        }
    }
}

impl FromStr for EventKind {
    type Err = StreamError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let kind = match name {
            "data" => EventKind::Data,
            "end" => EventKind::End,
            "error" => EventKind::Error,
            "close" => EventKind::Close,
            "readable" => EventKind::Readable,
            "pause" => EventKind::Pause,
            "resume" => EventKind::Resume,
            "drain" => EventKind::Drain,
            "finish" => EventKind::Finish,
            "pipe" => EventKind::Pipe,
            "unpipe" => EventKind::Unpipe,
            other => {
                return Err(StreamError::InvalidArgument(format!(
                    "unknown event name: {other}"
                )))
            }
        };
        Ok(kind)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event with its payload.
#[derive(Debug, Clone)]
pub enum Event {
    Data(Chunk),
    End,
    Error(StreamError),
    Close,
    Readable,
    Pause,
    Resume,
    Drain,
    Finish,
    /// Carries the source that was piped in.
    Pipe(Readable),
    /// Carries the source that was unpiped.
    Unpipe(Readable),
}

impl Event {
    /// Kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Data(_) => EventKind::Data,
            Event::End => EventKind::End,
            Event::Error(_) => EventKind::Error,
            Event::Close => EventKind::Close,
            Event::Readable => EventKind::Readable,
            Event::Pause => EventKind::Pause,
            Event::Resume => EventKind::Resume,
            Event::Drain => EventKind::Drain,
            Event::Finish => EventKind::Finish,
            Event::Pipe(_) => EventKind::Pipe,
            Event::Unpipe(_) => EventKind::Unpipe,
        }
    }

    /// Payload of a `data` event.
    pub fn data(&self) -> Option<&Chunk> {
        match self {
            Event::Data(chunk) => Some(chunk),
            _ => None,
        }
    }

    /// Payload of an `error` event.
    pub fn error(&self) -> Option<&StreamError> {
        match self {
            Event::Error(err) => Some(err),
            _ => None,
        }
    }
}
