//! # Error Types
//!
//! Error handling for the request/response core.
//!
//! This module defines every failure the framing engine can report, from raw
//! I/O errors to protocol violations committed by a remote peer.
//!
//! ## Error Categories
//! - **Validation Errors**: malformed length prefix, oversized request, codec
//!   limit failures. These are collapsed into the single validation error
//!   handed to a request handler.
//! - **Budget Errors**: a reader tried to pull more bytes than the computed
//!   read budget allows, or a decoder produced more than the declared length.
//! - **Response Errors**: serialization and write failures, unknown result
//!   codes, oversized response chunks.
//! - **Lifecycle Errors**: the stream was force-closed by its context.
//!
//! Errors that have to travel through `AsyncRead`/`AsyncWrite` are wrapped in
//! an [`std::io::Error`] and can be recovered with [`ProtocolError::from_io`].
//!
//! ## Example Usage
//! ```rust
//! use reqresp_core::error::{ProtocolError, Result};
//!
//! fn check_len(declared: u64, limit: u64) -> Result<u64> {
//!     if declared > limit {
//!         return Err(ProtocolError::OversizedRequest { declared, limit });
//!     }
//!     Ok(declared)
//! }
//!
//! assert!(check_len(10_000, 84).is_err());
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Router lock errors
    pub const ERR_ROUTER_WRITE_LOCK: &str = "Failed to acquire write lock on router";
    pub const ERR_ROUTER_READ_LOCK: &str = "Failed to acquire read lock on router";

    /// Snappy framing errors
    pub const ERR_SNAPPY_MISSING_IDENTIFIER: &str = "snappy stream does not start with identifier";
    pub const ERR_SNAPPY_BAD_IDENTIFIER: &str = "invalid snappy stream identifier";
    pub const ERR_SNAPPY_CHUNK_TOO_LARGE: &str = "snappy chunk exceeds maximum block size";
    pub const ERR_SNAPPY_RESERVED_CHUNK: &str = "unsupported unskippable snappy chunk";

    /// Response chunk errors
    pub const ERR_EMPTY_STREAM_MARKER: &str = "malformed stream marker after empty chunk";
}

// ProtocolError is the primary error type for all request/response operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Malformed length prefix: {0}")]
    MalformedPrefix(String),

    #[error("request length {declared} exceeds request size limit {limit}")]
    OversizedRequest { declared: u64, limit: u64 },

    #[error("Compression limit error: {0}")]
    CodecLimit(String),

    #[error("Read budget of {0} bytes exceeded")]
    ReadBudgetExceeded(u64),

    #[error("Decoded payload is longer than its declared length of {0} bytes")]
    PayloadTooLong(u64),

    #[error("Response chunk of {size} bytes exceeds limit {limit}")]
    OversizedResponse { size: u64, limit: u64 },

    #[error("Unknown result code: {0}")]
    UnknownResultCode(u8),

    #[error("Decompression failed: {0}")]
    DecompressionFailure(String),

    #[error("Stream closed")]
    StreamClosed,

    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Wrap this error in an [`io::Error`] of the given kind so it can be
    /// returned from `AsyncRead`/`AsyncWrite` implementations.
    pub fn into_io(self, kind: io::ErrorKind) -> io::Error {
        io::Error::new(kind, self)
    }

    /// Recover a protocol error previously wrapped with [`ProtocolError::into_io`].
    pub fn from_io(err: &io::Error) -> Option<&ProtocolError> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<ProtocolError>())
    }

    /// Whether the I/O error was caused by a read past the read budget.
    pub fn is_budget_exceeded(err: &io::Error) -> bool {
        matches!(
            Self::from_io(err),
            Some(ProtocolError::ReadBudgetExceeded(_))
        )
    }

    /// Whether the I/O error was caused by decoded data past a declared length.
    pub fn is_payload_too_long(err: &io::Error) -> bool {
        matches!(Self::from_io(err), Some(ProtocolError::PayloadTooLong(_)))
    }

    /// Whether the I/O error was caused by the stream being force-closed.
    pub fn is_stream_closed(err: &io::Error) -> bool {
        matches!(Self::from_io(err), Some(ProtocolError::StreamClosed))
    }

    /// True for the errors that make up a request validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ProtocolError::MalformedPrefix(_)
                | ProtocolError::OversizedRequest { .. }
                | ProtocolError::CodecLimit(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_wrapping_roundtrip() {
        let err = ProtocolError::ReadBudgetExceeded(130).into_io(io::ErrorKind::InvalidData);
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(ProtocolError::is_budget_exceeded(&err));
        assert!(!ProtocolError::is_stream_closed(&err));
    }

    #[test]
    fn test_plain_io_error_is_not_protocol_error() {
        let err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(ProtocolError::from_io(&err).is_none());
    }

    #[test]
    fn test_validation_classification() {
        assert!(ProtocolError::MalformedPrefix("eof".into()).is_validation());
        assert!(ProtocolError::OversizedRequest {
            declared: 10_000,
            limit: 84
        }
        .is_validation());
        assert!(!ProtocolError::StreamClosed.is_validation());
    }

    #[test]
    fn test_oversized_message() {
        let err = ProtocolError::OversizedRequest {
            declared: 10_000,
            limit: 84,
        };
        assert_eq!(
            err.to_string(),
            "request length 10000 exceeds request size limit 84"
        );
    }
}
