//! Watermark and backpressure accounting.
//!
//! A Readable uses [`Watermark`] to decide whether its buffer is still under
//! the high-water mark. A Writable uses [`Backpressure`] to track the bytes
//! accepted by `write` but not yet flushed by the low-level writer, and to
//! remember whether a `drain` is owed to the caller.
//!
//! # Configuration
//!
//! - `high_water_mark`: byte threshold (default: 16384)

/// Default high-water mark in bytes.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16 * 1024;

/// Byte-count threshold of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Watermark {
    high: usize,
}

impl Watermark {
    /// Create a watermark; zero falls back to the default.
    pub(crate) fn new(high: usize) -> Self {
        let high = if high == 0 {
            DEFAULT_HIGH_WATER_MARK
        } else {
            high
        };
        Self { high }
    }

    /// Current threshold.
    #[inline]
    pub(crate) fn high(&self) -> usize {
        self.high
    }

    /// Check if `len` buffered bytes are under the threshold.
    #[inline]
    pub(crate) fn is_below(&self, len: usize) -> bool {
        len < self.high
    }

    /// Grow to the next power of two if a single request exceeds the threshold.
    ///
    /// Returns `true` if the threshold changed.
    pub(crate) fn grow_to_fit(&mut self, request: usize) -> bool {
        if request <= self.high {
            return false;
        }
        self.high = request.checked_next_power_of_two().unwrap_or(usize::MAX);
        true
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::new(DEFAULT_HIGH_WATER_MARK)
    }
}

/// Unflushed-byte accounting for a Writable.
#[derive(Debug, Clone)]
pub(crate) struct Backpressure {
    /// Bytes accepted but not yet completed by the low-level writer.
    pending: usize,
    /// Threshold for the `write` return value.
    watermark: Watermark,
    /// A `write` returned `false` and no `drain` has been emitted since.
    need_drain: bool,
}

impl Backpressure {
    /// Create accounting with the given high-water mark.
    pub(crate) fn new(high_water_mark: usize) -> Self {
        Self {
            pending: 0,
            watermark: Watermark::new(high_water_mark),
            need_drain: false,
        }
    }

    /// Account for `len` newly accepted bytes.
    ///
    /// Returns `true` if the cumulative unflushed count is still under the
    /// high-water mark. Returning `false` arms the drain signal.
    pub(crate) fn reserve(&mut self, len: usize) -> bool {
        self.pending = self.pending.saturating_add(len);
        let below = self.watermark.is_below(self.pending);
        if !below {
            self.need_drain = true;
        }
        below
    }

    /// Release `len` bytes after the low-level writer completed them.
    #[inline]
    pub(crate) fn release(&mut self, len: usize) {
        self.pending = self.pending.saturating_sub(len);
    }

    /// Take the drain signal: `true` at most once per saturation episode.
    pub(crate) fn take_drain(&mut self) -> bool {
        if self.need_drain && self.pending == 0 {
            self.need_drain = false;
            return true;
        }
        false
    }

    /// Forget the drain signal without emitting it (used on `end`).
    pub(crate) fn cancel_drain(&mut self) {
        self.need_drain = false;
    }

    /// Reset the pending count (queued writes were dropped).
    pub(crate) fn reset(&mut self) {
        self.pending = 0;
        self.need_drain = false;
    }

    /// Get current pending byte count.
    #[inline]
    pub(crate) fn pending(&self) -> usize {
        self.pending
    }

    /// Check if a drain is owed.
    #[inline]
    pub(crate) fn need_drain(&self) -> bool {
        self.need_drain
    }

    /// Get the high-water mark.
    #[inline]
    pub(crate) fn high_water_mark(&self) -> usize {
        self.watermark.high()
    }
}

impl Default for Backpressure {
    fn default() -> Self {
        Self::new(DEFAULT_HIGH_WATER_MARK)
    }
}
