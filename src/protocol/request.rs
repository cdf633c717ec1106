//! # Request Framing
//!
//! A request is `[varint declared_len][payload, optionally compressed]`.
//!
//! The declared length comes from the peer and is only trusted as a reason to
//! reject. What may actually be read is governed by a two-phase read budget:
//! at most [`MAX_VARINT_LEN64`] bytes for the prefix, then a budget derived
//! from the raw-content policy limit (expanded by the codec's worst case when
//! compression is negotiated), or zero when the request was rejected.

use crate::core::limit::{DeclaredLengthReader, LimitedReader};
use crate::core::serialization::SerializationFormat;
use crate::core::varint::{encode_uvarint, read_uvarint, MAX_VARINT_LEN64};
use crate::error::{ProtocolError, Result};
use crate::utils::compression::{BoxedReader, SharedCompression};
use serde::Serialize;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

/// Read-ahead buffer placed between the stream and the budget counter.
pub const REQUEST_BUFFER_SIZE: usize = 2048;

/// Outcome of reading a request prefix.
pub struct RequestHeader {
    /// Length claimed by the peer. Zero when the prefix could not be decoded.
    pub request_len: u64,
    /// Bytes the body reader may consume from the stream.
    pub read_budget: u64,
    /// Set when the request was rejected. The reader then yields nothing.
    pub invalid_input: Option<ProtocolError>,
    /// Budgeted body reader, decompressing when a codec is configured. Decoded
    /// bytes past `request_len` fail with [`ProtocolError::PayloadTooLong`].
    pub reader: BoxedReader<'static>,
}

impl RequestHeader {
    pub fn is_valid(&self) -> bool {
        self.invalid_input.is_none()
    }
}

impl fmt::Debug for RequestHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHeader")
            .field("request_len", &self.request_len)
            .field("read_budget", &self.read_budget)
            .field("invalid_input", &self.invalid_input)
            .finish_non_exhaustive()
    }
}

/// Decode the length prefix of an incoming request and arm the body reader.
///
/// Validation failures never escape as errors: they are reported through
/// [`RequestHeader::invalid_input`] with a zero read budget, so the caller can
/// still answer the peer with an error chunk.
pub async fn decode_request_header<R>(
    stream: R,
    max_request_size: u64,
    compression: Option<&SharedCompression>,
) -> RequestHeader
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut reader = LimitedReader::new(
        BufReader::with_capacity(REQUEST_BUFFER_SIZE, stream),
        MAX_VARINT_LEN64 as u64,
    );

    let mut request_len = 0;
    let mut budget = max_request_size;
    let invalid_input = match read_uvarint(&mut reader).await {
        Err(e) => Some(e),
        Ok(declared) => {
            request_len = declared;
            if declared > max_request_size {
                Some(ProtocolError::OversizedRequest {
                    declared,
                    limit: max_request_size,
                })
            } else if let Some(compression) = compression {
                match compression.max_encoded_len(max_request_size) {
                    Ok(expanded) => {
                        budget = expanded;
                        None
                    }
                    Err(e) => Some(ProtocolError::CodecLimit(e.to_string())),
                }
            } else {
                None
            }
        }
    };

    if let Some(err) = &invalid_input {
        debug!(error = %err, "Rejecting request");
        budget = 0;
    }
    reader.set_limit(budget);

    let reader: BoxedReader<'static> = match compression {
        Some(compression) => Box::pin(DeclaredLengthReader::new(
            compression.decompress(Box::pin(reader)),
            request_len,
        )),
        None => Box::pin(reader),
    };

    RequestHeader {
        request_len,
        read_budget: budget,
        invalid_input,
        reader,
    }
}

/// Write a raw request payload and half-close the write side.
pub async fn write_raw_request<W>(
    writer: &mut W,
    payload: &[u8],
    compression: Option<&SharedCompression>,
) -> Result<()>
where
    W: AsyncWrite + Send + Unpin,
{
    let mut prefix = Vec::with_capacity(MAX_VARINT_LEN64);
    encode_uvarint(payload.len() as u64, &mut prefix);
    writer.write_all(&prefix).await?;

    match compression {
        Some(compression) => {
            let mut encoder = compression.compress(Box::pin(&mut *writer));
            encoder.write_all(payload).await?;
            encoder.shutdown().await?;
        }
        None => writer.write_all(payload).await?,
    }
    writer.shutdown().await?;
    Ok(())
}

/// Serialize `request` and send it with [`write_raw_request`].
pub async fn write_request<W, T>(
    writer: &mut W,
    request: &T,
    format: SerializationFormat,
    compression: Option<&SharedCompression>,
) -> Result<()>
where
    W: AsyncWrite + Send + Unpin,
    T: Serialize + ?Sized,
{
    let payload = format.encode(request)?;
    write_raw_request(writer, &payload, compression).await
}
