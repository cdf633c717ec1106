//! # Compression Codecs
//!
//! Pluggable streaming compression for request bodies and response payloads.
//!
//! A codec is a stateless capability with a wire name, symmetric streaming
//! wrappers and a worst-case expansion bound. The framing layer relies on
//! [`Compression::max_encoded_len`] to size the read budget of compressed
//! requests, so an implementation must never under-estimate it.
//!
//! ## Snappy
//! [`Snappy`] speaks the snappy framing format: a stream identifier chunk,
//! then compressed (`0x00`) or uncompressed (`0x01`) chunks of at most 64 KiB
//! raw data, each carrying a masked CRC-32C of the raw bytes. Padding and
//! skippable chunks are ignored; reserved unskippable chunks are rejected.
//!
//! Encoding goes through `snap::write::FrameEncoder`. The reader consumes
//! exactly one chunk at a time from its source and hands each data chunk to
//! `snap::read::FrameDecoder`, so a compressed payload followed by unrelated
//! bytes on the same stream is safe to decode as long as the writer finalized
//! it.

use crate::error::{constants, ProtocolError, Result};
use bytes::Bytes;
use std::fmt;
use std::io::{self, Read as _, Write as _};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio_util::io::StreamReader;

/// Type-erased reader handed through the framing layer.
pub type BoxedReader<'a> = Pin<Box<dyn AsyncRead + Send + 'a>>;

/// Type-erased writer handed through the framing layer.
pub type BoxedWriter<'a> = Pin<Box<dyn AsyncWrite + Send + 'a>>;

/// Shared handle to a codec. `None` in an `Option<SharedCompression>` means
/// the raw, uncompressed variant of a protocol.
pub type SharedCompression = Arc<dyn Compression>;

/// Streaming compression capability.
pub trait Compression: fmt::Debug + Send + Sync + 'static {
    /// Wire name, appended to protocol identifiers as `base_name`.
    fn name(&self) -> &'static str;

    /// Wrap `writer` so that bytes written are compressed.
    ///
    /// Shutting the returned writer down finalizes the compressed stream and
    /// flushes it; the wrapped writer itself stays open.
    fn compress<'a>(&self, writer: BoxedWriter<'a>) -> BoxedWriter<'a>;

    /// Wrap `reader` so that bytes read are decompressed.
    fn decompress<'a>(&self, reader: BoxedReader<'a>) -> BoxedReader<'a>;

    /// Worst-case encoded size of `raw_len` input bytes.
    fn max_encoded_len(&self, raw_len: u64) -> Result<u64>;

    /// Bytes some encoders emit for an empty payload. A reader skips them
    /// after a zero-length chunk.
    fn empty_stream_marker(&self) -> &'static [u8] {
        &[]
    }
}

/// Resolve a codec by its configuration name. `"none"` (or an empty string)
/// selects no compression.
pub fn from_name(name: &str) -> Result<Option<SharedCompression>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "" | "none" => Ok(None),
        "snappy" => Ok(Some(Arc::new(Snappy))),
        other => Err(ProtocolError::ConfigError(format!(
            "Unknown compression: '{other}' (expected 'none' or 'snappy')"
        ))),
    }
}

/// Maximum raw bytes per snappy frame chunk.
pub const SNAPPY_MAX_BLOCK_SIZE: usize = 65_536;

const CHUNK_COMPRESSED: u8 = 0x00;
const CHUNK_UNCOMPRESSED: u8 = 0x01;
const CHUNK_PADDING: u8 = 0xfe;
const CHUNK_STREAM_IDENTIFIER: u8 = 0xff;
const STREAM_IDENTIFIER: [u8; 10] = [0xff, 0x06, 0x00, 0x00, b's', b'N', b'a', b'P', b'p', b'Y'];
const CHECKSUM_LEN: usize = 4;

/// Streaming snappy using the framing format.
#[derive(Debug, Clone, Copy, Default)]
pub struct Snappy;

impl Compression for Snappy {
    fn name(&self) -> &'static str {
        "snappy"
    }

    fn compress<'a>(&self, writer: BoxedWriter<'a>) -> BoxedWriter<'a> {
        Box::pin(SnappyWriter::new(writer))
    }

    fn decompress<'a>(&self, reader: BoxedReader<'a>) -> BoxedReader<'a> {
        let blocks = futures::stream::try_unfold(
            (reader, false),
            |(mut reader, mut seen_identifier)| async move {
                let block = read_snappy_block(&mut reader, &mut seen_identifier).await?;
                Ok::<_, io::Error>(block.map(|block| (block, (reader, seen_identifier))))
            },
        );
        Box::pin(StreamReader::new(Box::pin(blocks)))
    }

    fn max_encoded_len(&self, raw_len: u64) -> Result<u64> {
        let too_large = || {
            ProtocolError::CodecLimit(format!(
                "message length {raw_len} is too large to compress with snappy"
            ))
        };
        let len = usize::try_from(raw_len).map_err(|_| too_large())?;
        match snap::raw::max_compress_len(len) {
            0 => Err(too_large()),
            bound => Ok(bound as u64),
        }
    }

    fn empty_stream_marker(&self) -> &'static [u8] {
        &STREAM_IDENTIFIER
    }
}

fn snappy_error(msg: &'static str) -> io::Error {
    ProtocolError::DecompressionFailure(msg.to_string()).into_io(io::ErrorKind::InvalidData)
}

/// Decode a single data chunk. `frame` starts with the stream identifier so
/// snap's decoder accepts it; it verifies the checksum and block bounds.
fn decode_frame(frame: &[u8]) -> io::Result<Vec<u8>> {
    let mut data = Vec::new();
    snap::read::FrameDecoder::new(frame)
        .read_to_end(&mut data)
        .map_err(|e| {
            ProtocolError::DecompressionFailure(e.to_string()).into_io(io::ErrorKind::InvalidData)
        })?;
    Ok(data)
}

/// Read chunks until one carries data. `Ok(None)` marks a clean end of stream
/// at a chunk boundary.
async fn read_snappy_block(
    reader: &mut BoxedReader<'_>,
    seen_identifier: &mut bool,
) -> io::Result<Option<Bytes>> {
    let max_chunk_len = CHECKSUM_LEN + snap::raw::max_compress_len(SNAPPY_MAX_BLOCK_SIZE);

    loop {
        let mut header = [0u8; 4];
        if reader.read(&mut header[..1]).await? == 0 {
            return Ok(None);
        }
        reader.read_exact(&mut header[1..]).await?;
        let chunk_type = header[0];
        let len = u32::from_le_bytes([header[1], header[2], header[3], 0]) as usize;

        match chunk_type {
            CHUNK_STREAM_IDENTIFIER => {
                if len != STREAM_IDENTIFIER.len() - 4 {
                    return Err(snappy_error(constants::ERR_SNAPPY_BAD_IDENTIFIER));
                }
                let mut magic = [0u8; 6];
                reader.read_exact(&mut magic).await?;
                if magic != STREAM_IDENTIFIER[4..] {
                    return Err(snappy_error(constants::ERR_SNAPPY_BAD_IDENTIFIER));
                }
                *seen_identifier = true;
            }
            CHUNK_COMPRESSED | CHUNK_UNCOMPRESSED => {
                if !*seen_identifier {
                    return Err(snappy_error(constants::ERR_SNAPPY_MISSING_IDENTIFIER));
                }
                if len < CHECKSUM_LEN || len > max_chunk_len {
                    return Err(snappy_error(constants::ERR_SNAPPY_CHUNK_TOO_LARGE));
                }
                let body_start = STREAM_IDENTIFIER.len() + header.len();
                let mut frame = Vec::with_capacity(body_start + len);
                frame.extend_from_slice(&STREAM_IDENTIFIER);
                frame.extend_from_slice(&header);
                frame.resize(body_start + len, 0);
                reader.read_exact(&mut frame[body_start..]).await?;

                let data = decode_frame(&frame)?;
                if !data.is_empty() {
                    return Ok(Some(Bytes::from(data)));
                }
            }
            CHUNK_PADDING | 0x80..=0xfd => {
                let skipped =
                    tokio::io::copy(&mut (&mut *reader).take(len as u64), &mut tokio::io::sink())
                        .await?;
                if skipped != len as u64 {
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
            }
            _ => return Err(snappy_error(constants::ERR_SNAPPY_RESERVED_CHUNK)),
        }
    }
}

/// Feeds a `FrameEncoder` and drains its output into the wrapped writer.
struct SnappyWriter<'a> {
    inner: BoxedWriter<'a>,
    encoder: snap::write::FrameEncoder<Vec<u8>>,
    drained: usize,
}

impl<'a> SnappyWriter<'a> {
    fn new(inner: BoxedWriter<'a>) -> Self {
        Self {
            inner,
            encoder: snap::write::FrameEncoder::new(Vec::new()),
            drained: 0,
        }
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let encoded = self.encoder.get_mut();
        while self.drained < encoded.len() {
            let n = ready!(self
                .inner
                .as_mut()
                .poll_write(cx, &encoded[self.drained..]))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.drained += n;
        }
        encoded.clear();
        self.drained = 0;
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for SnappyWriter<'_> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        // At most one block per call keeps encoded output from piling up
        let n = data.len().min(SNAPPY_MAX_BLOCK_SIZE);
        this.encoder.write_all(&data[..n])?;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        this.encoder.flush()?;
        ready!(this.poll_drain(cx))?;
        this.inner.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_flush(cx)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::io::{Read as _, Write as _};
    use tokio::io::AsyncWriteExt;

    async fn compress_bytes(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut writer = Snappy.compress(Box::pin(&mut out));
            writer.write_all(data).await.unwrap();
            writer.shutdown().await.unwrap();
        }
        out
    }

    async fn decompress_bytes(data: &[u8]) -> io::Result<Vec<u8>> {
        let mut reader = Snappy.decompress(Box::pin(data));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await?;
        Ok(out)
    }

    #[tokio::test]
    async fn test_snappy_roundtrip_small() {
        let original = b"Hello, World! This is a test of snappy compression.";
        let compressed = compress_bytes(original).await;
        assert_eq!(&compressed[..10], &STREAM_IDENTIFIER);
        assert_eq!(decompress_bytes(&compressed).await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_snappy_roundtrip_multiple_blocks() {
        let original: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let compressed = compress_bytes(&original).await;
        assert_eq!(decompress_bytes(&compressed).await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_snappy_compresses_repetitive_data() {
        let original = vec![0u8; 10_000];
        let compressed = compress_bytes(&original).await;
        assert!(compressed.len() < 1_000);
        assert_eq!(compressed[10], CHUNK_COMPRESSED);
    }

    #[tokio::test]
    async fn test_output_matches_snap_frame_format() {
        let original: Vec<u8> = (0..150_000u32).map(|i| (i % 97) as u8).collect();
        let compressed = compress_bytes(&original).await;

        let mut decoded = Vec::new();
        snap::read::FrameDecoder::new(compressed.as_slice())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, original);
    }

    #[tokio::test]
    async fn test_reads_snap_frame_encoder_output() {
        let original = b"written by the synchronous frame encoder".repeat(40);
        let mut encoder = snap::write::FrameEncoder::new(Vec::new());
        encoder.write_all(&original).unwrap();
        let encoded = encoder.into_inner().unwrap();
        assert_eq!(decompress_bytes(&encoded).await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_empty_payload_writes_nothing() {
        let compressed = compress_bytes(&[]).await;
        assert!(compressed.is_empty());
        assert!(decompress_bytes(&compressed).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupted_checksum_rejected() {
        let mut compressed = compress_bytes(b"checksummed payload bytes").await;
        // First checksum byte sits right after the identifier and chunk header
        compressed[14] ^= 0xff;
        let err = decompress_bytes(&compressed).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_missing_identifier_rejected() {
        let compressed = compress_bytes(b"payload").await;
        let err = decompress_bytes(&compressed[10..]).await.unwrap_err();
        assert!(matches!(
            ProtocolError::from_io(&err),
            Some(ProtocolError::DecompressionFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_reserved_chunk_rejected() {
        let mut stream = STREAM_IDENTIFIER.to_vec();
        stream.extend_from_slice(&[0x02, 0x01, 0x00, 0x00, 0xaa]);
        assert!(decompress_bytes(&stream).await.is_err());
    }

    #[tokio::test]
    async fn test_padding_chunk_skipped() {
        let compressed = compress_bytes(b"after padding").await;
        let mut stream = STREAM_IDENTIFIER.to_vec();
        stream.extend_from_slice(&[CHUNK_PADDING, 0x03, 0x00, 0x00, 0, 0, 0]);
        stream.extend_from_slice(&compressed[10..]);
        assert_eq!(decompress_bytes(&stream).await.unwrap(), b"after padding");
    }

    #[tokio::test]
    async fn test_truncated_chunk_is_eof_error() {
        let compressed = compress_bytes(b"some bytes that will be cut").await;
        let err = decompress_bytes(&compressed[..compressed.len() - 3])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_reader_stops_at_chunk_boundary() {
        let mut stream = compress_bytes(b"first").await;
        stream.extend_from_slice(b"TRAILER");
        let mut source = stream.as_slice();
        {
            let mut reader = Snappy.decompress(Box::pin(&mut source));
            let mut out = [0u8; 5];
            reader.read_exact(&mut out).await.unwrap();
            assert_eq!(&out, b"first");
        }
        assert_eq!(source, b"TRAILER");
    }

    #[test]
    fn test_max_encoded_len() {
        assert_eq!(Snappy.max_encoded_len(84).unwrap(), 130);
        assert_eq!(Snappy.max_encoded_len(0).unwrap(), 32);
        assert!(Snappy.max_encoded_len(u64::from(u32::MAX) + 1).is_err());
        assert!(matches!(
            Snappy.max_encoded_len(u64::MAX),
            Err(ProtocolError::CodecLimit(_))
        ));
    }

    #[test]
    fn test_from_name() {
        assert!(from_name("none").unwrap().is_none());
        assert!(from_name("").unwrap().is_none());
        assert_eq!(from_name("Snappy").unwrap().unwrap().name(), "snappy");
        assert!(from_name("lz4").is_err());
    }
}
