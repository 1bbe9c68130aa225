//! Byte queue backing a Readable.
//!
//! Uses `bytes::BytesMut` so that consuming from the front is a zero-copy
//! `split_to`. Producers append at the back; consumers take from the front.
//! Nothing else mutates the queue.

use bytes::{Bytes, BytesMut};

/// Initial capacity of a stream buffer.
const INITIAL_CAPACITY: usize = 16 * 1024;

/// Ordered byte buffer, append-only at the back, consumed from the front.
#[derive(Debug)]
pub(crate) struct ByteQueue {
    /// Buffered bytes.
    buffer: BytesMut,
}

impl ByteQueue {
    /// Create an empty queue.
    pub(crate) fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Append bytes at the back.
    pub(crate) fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Take up to `len` bytes from the front.
    pub(crate) fn take_front(&mut self, len: usize) -> Bytes {
        let len = len.min(self.buffer.len());
        self.buffer.split_to(len).freeze()
    }

    /// Number of buffered bytes.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the queue is empty.
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop all buffered bytes.
    pub(crate) fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for ByteQueue {
    fn default() -> Self {
        Self::new()
    }
}
