//! Supported text encodings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Name of the default encoding.
pub const DEFAULT_ENCODING: &str = "utf8";

/// Text encoding used to convert string chunks to bytes and back.
///
/// Only the UTF-8 family is supported. Names are matched case-insensitively
/// and both `utf8` and `utf-8` are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Encoding {
    /// UTF-8.
    #[default]
    Utf8,
}

impl Encoding {
    /// Canonical name of the encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Utf8 => DEFAULT_ENCODING,
        }
    }
}

impl FromStr for Encoding {
    type Err = StreamError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            _ => Err(StreamError::UnknownEncoding(name.to_string())),
        }
    }
}

impl TryFrom<String> for Encoding {
    type Error = StreamError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

impl From<Encoding> for String {
    fn from(encoding: Encoding) -> Self {
        encoding.as_str().to_string()
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
