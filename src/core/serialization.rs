//! # Serialization Formats
//!
//! Payload encodings used by the typed request/response helpers.
//!
//! The framing engine itself only moves opaque bytes. Handlers that want to
//! exchange typed values pick a [`SerializationFormat`] per method; the same
//! format is used for the request body and every success chunk.
//!
//! ## Formats
//! - **Bincode**: compact binary encoding (default)
//! - **JSON**: human-readable, useful for debugging and interop
//!
//! ## Usage
//! ```rust
//! use reqresp_core::core::serialization::SerializationFormat;
//!
//! let format = SerializationFormat::Json;
//! let mut buf = Vec::new();
//! format.encode_into(&("ping", 7u32), &mut buf).unwrap();
//! let (word, n): (String, u32) = format.decode(&buf).unwrap();
//! assert_eq!((word.as_str(), n), ("ping", 7));
//! ```

use crate::error::{ProtocolError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::str::FromStr;

/// Supported payload serialization formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializationFormat {
    /// Binary compact format (default, fastest)
    #[default]
    Bincode,
    /// Human-readable JSON format (debugging, interop)
    Json,
}

impl SerializationFormat {
    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            SerializationFormat::Bincode => "bincode",
            SerializationFormat::Json => "json",
        }
    }

    /// Serialize `value`, appending the bytes to `buf`
    pub fn encode_into<T>(self, value: &T, buf: &mut Vec<u8>) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        match self {
            SerializationFormat::Bincode => bincode::serialize_into(buf, value)
                .map_err(|e| ProtocolError::SerializeError(e.to_string())),
            SerializationFormat::Json => serde_json::to_writer(buf, value)
                .map_err(|e| ProtocolError::SerializeError(e.to_string())),
        }
    }

    /// Serialize `value` into a fresh buffer
    pub fn encode<T>(self, value: &T) -> Result<Vec<u8>>
    where
        T: Serialize + ?Sized,
    {
        let mut buf = Vec::new();
        self.encode_into(value, &mut buf)?;
        Ok(buf)
    }

    /// Deserialize a value from `data`
    pub fn decode<T: DeserializeOwned>(self, data: &[u8]) -> Result<T> {
        match self {
            SerializationFormat::Bincode => bincode::deserialize(data)
                .map_err(|e| ProtocolError::DeserializeError(e.to_string())),
            SerializationFormat::Json => serde_json::from_slice(data)
                .map_err(|e| ProtocolError::DeserializeError(e.to_string())),
        }
    }
}

impl FromStr for SerializationFormat {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bincode" => Ok(SerializationFormat::Bincode),
            "json" => Ok(SerializationFormat::Json),
            other => Err(ProtocolError::ConfigError(format!(
                "Unknown serialization format: '{other}' (expected 'bincode' or 'json')"
            ))),
        }
    }
}
