//! Codec module - conversion between text and bytes.
//!
//! This module provides the byte codec the stream engine relies on:
//!
//! - [`Encoding`] - the supported text encodings (UTF-8 only)
//! - [`Chunk`] - a payload unit, either raw bytes or text
//! - [`TextCodec`] - one-shot text-to-bytes conversion
//! - [`Utf8Decoder`] - streaming decoder that keeps split multi-byte sequences
//!
//! # Example
//!
//! ```
//! use wirestream::codec::{Chunk, Encoding, TextCodec, Utf8Decoder};
//!
//! let bytes = TextCodec::encode("héllo", Encoding::Utf8);
//! assert_eq!(bytes.len(), TextCodec::encoded_len("héllo", Encoding::Utf8));
//!
//! // A two-byte character split across reads is held until complete.
//! let mut decoder = Utf8Decoder::new();
//! assert_eq!(decoder.decode(&bytes[..2]), "h");
//! assert_eq!(decoder.decode(&bytes[2..]), "éllo");
//!
//! let chunk = Chunk::from("hello");
//! assert_eq!(chunk.byte_len(), 5);
//! ```

mod chunk;
mod encoding;
mod text;

pub use chunk::Chunk;
pub use encoding::{Encoding, DEFAULT_ENCODING};
pub use text::{TextCodec, Utf8Decoder};
