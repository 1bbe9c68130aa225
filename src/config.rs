//! Stream construction settings.
//!
//! [`StreamConfig`] holds the plain-data part of a stream's options and can
//! be loaded from JSON. The hook-carrying option structs
//! ([`ReadableOptions`](crate::ReadableOptions),
//! [`WritableOptions`](crate::WritableOptions), ...) embed one.
//!
//! # Example
//!
//! ```
//! use wirestream::config::StreamConfig;
//! use wirestream::codec::Encoding;
//!
//! let config = StreamConfig::from_json(r#"{ "highWaterMark": 1024, "encoding": "UTF-8" }"#).unwrap();
//! assert_eq!(config.high_water_mark, 1024);
//! assert_eq!(config.encoding, Some(Encoding::Utf8));
//!
//! let defaults = StreamConfig::from_json("{}").unwrap();
//! assert_eq!(defaults, StreamConfig::default());
//! ```

use serde::{Deserialize, Serialize};

use crate::backpressure::DEFAULT_HIGH_WATER_MARK;
use crate::codec::Encoding;
use crate::error::Result;

/// Plain-data stream settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamConfig {
    /// Byte threshold for backpressure (default: 16384; zero means default).
    pub high_water_mark: usize,
    /// Text encoding (default: `utf8`).
    ///
    /// For a Readable, `None` makes `read` return raw bytes instead of text.
    /// For a Writable, `None` means the default encoding.
    pub encoding: Option<Encoding>,
}

impl StreamConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the high-water mark.
    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = high_water_mark;
        self
    }

    /// Set the encoding.
    pub fn with_encoding(mut self, encoding: Option<Encoding>) -> Self {
        self.encoding = encoding;
        self
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            encoding: Some(Encoding::Utf8),
        }
    }
}
