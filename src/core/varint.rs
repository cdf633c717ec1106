//! Unsigned LEB128 varints used for request and response length prefixes.

use crate::error::{ProtocolError, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Maximum number of bytes in a `u64` varint.
pub const MAX_VARINT_LEN64: usize = 10;

/// Append `value` to `buf` as an unsigned varint.
pub fn encode_uvarint(mut value: u64, buf: &mut Vec<u8>) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Number of bytes `value` occupies when varint encoded.
pub fn uvarint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Read one unsigned varint from `reader`, one byte at a time.
///
/// Never consumes more than [`MAX_VARINT_LEN64`] bytes. Premature end of
/// stream and encodings that overflow a `u64` are reported as
/// [`ProtocolError::MalformedPrefix`]; other I/O failures keep their cause in
/// the message.
pub async fn read_uvarint<R>(reader: &mut R) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut value: u64 = 0;
    let mut shift = 0u32;

    for i in 0..MAX_VARINT_LEN64 {
        let byte = reader
            .read_u8()
            .await
            .map_err(|e| ProtocolError::MalformedPrefix(e.to_string()))?;

        if byte < 0x80 {
            if i == MAX_VARINT_LEN64 - 1 && byte > 1 {
                return Err(ProtocolError::MalformedPrefix(
                    "varint overflows a 64-bit integer".to_string(),
                ));
            }
            return Ok(value | (u64::from(byte) << shift));
        }

        value |= u64::from(byte & 0x7f) << shift;
        shift += 7;
    }

    Err(ProtocolError::MalformedPrefix(
        "varint overflows a 64-bit integer".to_string(),
    ))
}
