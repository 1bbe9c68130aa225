//! Pending-write queue of a Writable.

use std::collections::VecDeque;

use crate::codec::{Chunk, Encoding};

use super::Callback;

/// A write accepted by `write` but not yet dispatched.
pub(crate) struct WriteRequest {
    pub(crate) chunk: Chunk,
    pub(crate) encoding: Encoding,
    /// Encoded byte length, counted against the high-water mark.
    pub(crate) len: usize,
    pub(crate) callback: Option<Callback>,
}

impl WriteRequest {
    pub(crate) fn new(chunk: Chunk, encoding: Encoding, callback: Option<Callback>) -> Self {
        let len = chunk.encoded_len(encoding);
        Self {
            chunk,
            encoding,
            len,
            callback,
        }
    }
}

/// FIFO of write requests.
#[derive(Default)]
pub(crate) struct WriteQueue {
    requests: VecDeque<WriteRequest>,
}

impl WriteQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_back(&mut self, request: WriteRequest) {
        self.requests.push_back(request);
    }

    pub(crate) fn pop_front(&mut self) -> Option<WriteRequest> {
        self.requests.pop_front()
    }

    /// Take every queued request, oldest first.
    pub(crate) fn drain_all(&mut self) -> Vec<WriteRequest> {
        self.requests.drain(..).collect()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.requests.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
