//! Text codec and streaming UTF-8 decoder.

use bytes::Bytes;
use encoding_rs::{CoderResult, Decoder, UTF_8};

use super::Encoding;

/// One-shot conversion of text into bytes.
pub struct TextCodec;

impl TextCodec {
    /// Encode text into bytes.
    #[inline]
    pub fn encode(text: &str, encoding: Encoding) -> Bytes {
        match encoding {
            Encoding::Utf8 => Bytes::copy_from_slice(text.as_bytes()),
        }
    }

    /// Length of `text` once encoded.
    #[inline]
    pub fn encoded_len(text: &str, encoding: Encoding) -> usize {
        match encoding {
            Encoding::Utf8 => text.len(),
        }
    }
}

/// Streaming UTF-8 decoder.
///
/// Bytes of an incomplete trailing sequence are held back and prepended to the
/// next input, so text split at an arbitrary byte offset decodes correctly.
/// Invalid sequences become U+FFFD.
pub struct Utf8Decoder {
    decoder: Decoder,
}

impl Utf8Decoder {
    /// Create a new decoder.
    pub fn new() -> Self {
        Self {
            decoder: UTF_8.new_decoder_without_bom_handling(),
        }
    }

    /// Decode the next piece of input.
    pub fn decode(&mut self, input: &[u8]) -> String {
        self.decode_to_string(input, false)
    }

    /// Flush held-back bytes at end of input and reset the decoder.
    pub fn flush(&mut self) -> String {
        let tail = self.decode_to_string(&[], true);
        self.decoder = UTF_8.new_decoder_without_bom_handling();
        tail
    }

    fn decode_to_string(&mut self, mut input: &[u8], last: bool) -> String {
        let mut out = String::new();
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(input.len())
                .unwrap_or(input.len() + 4);
            out.reserve(needed);
            let (result, read, _) = self.decoder.decode_to_string(input, &mut out, last);
            input = &input[read..];
            match result {
                CoderResult::InputEmpty => return out,
                CoderResult::OutputFull => continue,
            }
        }
    }
}

impl Default for Utf8Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Utf8Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Utf8Decoder").finish_non_exhaustive()
    }
}
