//! Payload unit carried through streams.

use std::borrow::Cow;

use bytes::Bytes;

use super::{Encoding, TextCodec};

/// A unit of data written to or read from a stream.
///
/// Text chunks are measured and buffered by their encoded byte length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Raw bytes.
    Bytes(Bytes),
    /// Text, encoded with the stream's encoding when buffered.
    Text(String),
}

impl Chunk {
    /// Encoded length in bytes.
    #[inline]
    pub fn byte_len(&self) -> usize {
        match self {
            Chunk::Bytes(bytes) => bytes.len(),
            Chunk::Text(text) => text.len(),
        }
    }

    /// Check if the chunk carries no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.byte_len() == 0
    }

    /// Encoded length in bytes under `encoding`.
    #[inline]
    pub fn encoded_len(&self, encoding: Encoding) -> usize {
        match self {
            Chunk::Bytes(bytes) => bytes.len(),
            Chunk::Text(text) => TextCodec::encoded_len(text, encoding),
        }
    }

    /// Encode into bytes; byte chunks are returned as-is.
    pub fn encode(&self, encoding: Encoding) -> Bytes {
        match self {
            Chunk::Bytes(bytes) => bytes.clone(),
            Chunk::Text(text) => TextCodec::encode(text, encoding),
        }
    }

    /// Borrow the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Chunk::Bytes(bytes) => bytes,
            Chunk::Text(text) => text.as_bytes(),
        }
    }

    /// Borrow the text, if this is a text chunk.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Chunk::Text(text) => Some(text),
            Chunk::Bytes(_) => None,
        }
    }

    /// View the chunk as text, replacing invalid UTF-8 sequences.
    pub fn to_text_lossy(&self) -> Cow<'_, str> {
        match self {
            Chunk::Text(text) => Cow::Borrowed(text),
            Chunk::Bytes(bytes) => String::from_utf8_lossy(bytes),
        }
    }

    /// Convert into encoded bytes (zero-copy for text and byte chunks alike).
    pub fn into_bytes(self) -> Bytes {
        match self {
            Chunk::Bytes(bytes) => bytes,
            Chunk::Text(text) => Bytes::from(text),
        }
    }
}

impl From<&str> for Chunk {
    fn from(text: &str) -> Self {
        Chunk::Text(text.to_string())
    }
}

impl From<String> for Chunk {
    fn from(text: String) -> Self {
        Chunk::Text(text)
    }
}

impl From<Bytes> for Chunk {
    fn from(bytes: Bytes) -> Self {
        Chunk::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(bytes: Vec<u8>) -> Self {
        Chunk::Bytes(Bytes::from(bytes))
    }
}

impl From<&[u8]> for Chunk {
    fn from(bytes: &[u8]) -> Self {
        Chunk::Bytes(Bytes::copy_from_slice(bytes))
    }
}

/// Compares encoded bytes, so a text chunk equals a byte chunk with the same content.
impl PartialEq<&str> for Chunk {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&[u8]> for Chunk {
    fn eq(&self, other: &&[u8]) -> bool {
        self.as_bytes() == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_length_is_encoded_length() {
        let chunk = Chunk::from("日本");
        assert_eq!(chunk.byte_len(), 6);
        assert!(!chunk.is_empty());
    }

    #[test]
    fn test_into_bytes_zero_copy() {
        let original = Bytes::from_static(b"static data");
        let chunk = Chunk::from(original.clone());
        let bytes = chunk.into_bytes();
        assert_eq!(bytes.as_ptr(), original.as_ptr());
    }

    #[test]
    fn test_compare_with_str() {
        assert_eq!(Chunk::from("abc"), "abc");
        assert_eq!(Chunk::from(b"abc".to_vec()), "abc");
        assert_ne!(Chunk::from("abc"), "abd");
    }

    #[test]
    fn test_encode_with_encoding() {
        let chunk = Chunk::from("é");
        assert_eq!(chunk.encoded_len(Encoding::Utf8), 2);
        assert_eq!(&chunk.encode(Encoding::Utf8)[..], "é".as_bytes());

        let raw = Bytes::from_static(b"raw");
        assert_eq!(Chunk::from(raw.clone()).encode(Encoding::Utf8).as_ptr(), raw.as_ptr());
    }

    #[test]
    fn test_lossy_text() {
        let chunk = Chunk::from(vec![b'a', 0xFF]);
        assert_eq!(chunk.to_text_lossy(), "a\u{FFFD}");
        assert_eq!(chunk.as_text(), None);
    }
}
