//! Error types for wirestream.

use std::sync::Arc;

use thiserror::Error;

/// Main error type for all stream operations.
///
/// The type is `Clone` because a single error is delivered to every `error`
/// listener of a stream and to every pending write callback. I/O errors are
/// shared behind an `Arc` for that reason.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// I/O error raised by an async transport adapter.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// Configuration could not be parsed.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Invalid argument passed to a stream operation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Encoding name outside the supported set.
    #[error("Unknown encoding: {0}")]
    UnknownEncoding(String),

    /// `read()` was called on a Readable without a `doRead` hook.
    #[error("The doRead() method is not implemented")]
    ReadNotImplemented,

    /// A write was dispatched on a Writable without `doWrite`/`doWritev`.
    #[error("The doWrite() method is not implemented")]
    WriteNotImplemented,

    /// A Transform was written to without a `doTransform` hook.
    #[error("The doTransform() method is not implemented")]
    TransformNotImplemented,

    /// A completion callback fired more than once.
    #[error("Callback called multiple times")]
    MultipleCallback,

    /// `write()` or a second `end()` after `end()`.
    #[error("write after end")]
    WriteAfterEnd,

    /// `end()` after the stream already emitted `finish`.
    #[error("stream already finished")]
    AlreadyFinished,

    /// `push()` of data after end-of-production was signaled.
    #[error("stream.push() after EOF")]
    PushAfterEof,

    /// Operation on a destroyed stream.
    #[error("Cannot call write after a stream was destroyed")]
    Destroyed,

    /// Failure reported by a user hook.
    #[error("{0}")]
    Other(String),
}

impl StreamError {
    /// Build an error carrying a free-form message, for use inside hooks.
    pub fn other(message: impl Into<String>) -> Self {
        StreamError::Other(message.into())
    }

    /// Stable numeric code of this failure, if it has one.
    pub fn code(&self) -> Option<u32> {
        match self {
            StreamError::InvalidArgument(_) | StreamError::UnknownEncoding(_) => Some(401),
            StreamError::WriteNotImplemented => Some(10200035),
            StreamError::WriteAfterEnd | StreamError::AlreadyFinished => Some(10200036),
            StreamError::MultipleCallback => Some(10200037),
            StreamError::ReadNotImplemented => Some(10200038),
            StreamError::TransformNotImplemented => Some(10200039),
            StreamError::Io(_)
            | StreamError::Config(_)
            | StreamError::PushAfterEof
            | StreamError::Destroyed
            | StreamError::Other(_) => None,
        }
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Config(err.to_string())
    }
}

/// Result type alias using StreamError.
pub type Result<T> = std::result::Result<T, StreamError>;
