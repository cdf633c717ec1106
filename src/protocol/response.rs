//! # Chunked Responses
//!
//! Every response chunk is framed as
//!
//! ```text
//! [result code (1)] [varint payload_len] [payload, optionally compressed]
//! ```
//!
//! The code byte and the varint are written raw. Only the payload goes
//! through the negotiated codec, and each chunk's compressed payload is
//! finalized before the next chunk begins, so a reader can decode chunks one
//! by one. Error chunks use the same framing with a short UTF-8 message as
//! payload.
//!
//! [`ResponseWriter`] is the responder side handed to handlers;
//! [`ResponseChunkReader`] is the requester side.

use crate::core::limit::{DeclaredLengthReader, LimitedReader};
use crate::core::serialization::SerializationFormat;
use crate::core::varint::{encode_uvarint, read_uvarint, MAX_VARINT_LEN64};
use crate::error::{constants, ProtocolError, Result};
use crate::utils::buffer_pool::BufferPool;
use crate::utils::compression::{BoxedWriter, SharedCompression};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf};

/// Longest error message carried by an error chunk, in bytes.
pub const MAX_ERROR_MESSAGE_LEN: usize = 256;

/// Status attached to every response chunk.
///
/// The wire values are fixed; codes not listed here are rejected on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResultCode {
    Success = 0,
    InvalidRequest = 1,
    ServerError = 2,
}

impl ResultCode {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            ResultCode::Success => "success",
            ResultCode::InvalidRequest => "invalid request",
            ResultCode::ServerError => "server error",
        }
    }
}

impl TryFrom<u8> for ResultCode {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(ResultCode::Success),
            1 => Ok(ResultCode::InvalidRequest),
            2 => Ok(ResultCode::ServerError),
            other => Err(ProtocolError::UnknownResultCode(other)),
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_byte())
    }
}

/// Cut `message` to [`MAX_ERROR_MESSAGE_LEN`] bytes, ending in `...` when
/// shortened, without splitting a UTF-8 character.
pub fn truncate_error_message(message: &str) -> Cow<'_, str> {
    if message.len() <= MAX_ERROR_MESSAGE_LEN {
        return Cow::Borrowed(message);
    }
    let mut end = MAX_ERROR_MESSAGE_LEN - 3;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    Cow::Owned(format!("{}...", &message[..end]))
}

/// Responder side of a stream: writes framed chunks.
pub struct ResponseWriter {
    inner: BoxedWriter<'static>,
    compression: Option<SharedCompression>,
    format: SerializationFormat,
    buffers: BufferPool,
    chunks_written: u64,
    write_failures: u64,
    closed: bool,
}

impl ResponseWriter {
    pub fn new(
        inner: BoxedWriter<'static>,
        compression: Option<SharedCompression>,
        format: SerializationFormat,
    ) -> Self {
        Self::with_pool(inner, compression, format, BufferPool::default())
    }

    /// Like [`ResponseWriter::new`], sharing serialization buffers with other writers.
    pub fn with_pool(
        inner: BoxedWriter<'static>,
        compression: Option<SharedCompression>,
        format: SerializationFormat,
        buffers: BufferPool,
    ) -> Self {
        Self {
            inner,
            compression,
            format,
            buffers,
            chunks_written: 0,
            write_failures: 0,
            closed: false,
        }
    }

    pub fn format(&self) -> SerializationFormat {
        self.format
    }

    pub fn chunks_written(&self) -> u64 {
        self.chunks_written
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }

    /// Serialize `payload` with the method's format and write it as one chunk.
    pub async fn write_response_chunk<T>(&mut self, code: ResultCode, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let mut buf = self.buffers.acquire();
        if let Err(e) = self.format.encode_into(payload, &mut buf) {
            self.write_failures += 1;
            return Err(e);
        }
        self.write_raw_response_chunk(code, &buf).await
    }

    /// Write a chunk whose payload a handler encoded itself.
    pub async fn write_raw_response_chunk(&mut self, code: ResultCode, payload: &[u8]) -> Result<()> {
        match self.write_chunk(code, payload).await {
            Ok(()) => {
                self.chunks_written += 1;
                Ok(())
            }
            Err(e) => {
                self.write_failures += 1;
                Err(e)
            }
        }
    }

    /// Write an error chunk carrying a short diagnostic message.
    pub async fn write_error_chunk(&mut self, code: ResultCode, message: &str) -> Result<()> {
        let message = truncate_error_message(message);
        self.write_raw_response_chunk(code, message.as_bytes()).await
    }

    async fn write_chunk(&mut self, code: ResultCode, payload: &[u8]) -> Result<()> {
        if self.closed {
            return Err(ProtocolError::StreamClosed);
        }

        let mut header = Vec::with_capacity(1 + MAX_VARINT_LEN64);
        header.push(code.as_byte());
        encode_uvarint(payload.len() as u64, &mut header);
        self.inner.write_all(&header).await?;

        match &self.compression {
            Some(compression) => {
                let mut encoder = compression.compress(Box::pin(&mut self.inner));
                encoder.write_all(payload).await?;
                encoder.shutdown().await?;
            }
            None => {
                self.inner.write_all(payload).await?;
                self.inner.flush().await?;
            }
        }
        Ok(())
    }

    /// Flush and half-close the response. Calling it again is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.shutdown().await?;
        Ok(())
    }
}

impl fmt::Debug for ResponseWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseWriter")
            .field("compression", &self.compression.as_ref().map(|c| c.name()))
            .field("format", &self.format)
            .field("chunks_written", &self.chunks_written)
            .field("closed", &self.closed)
            .finish()
    }
}

/// One decoded response chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseChunk {
    pub code: ResultCode,
    pub payload: Bytes,
}

impl ResponseChunk {
    pub fn is_success(&self) -> bool {
        self.code == ResultCode::Success
    }

    /// Deserialize a success payload.
    pub fn decode<T: DeserializeOwned>(&self, format: SerializationFormat) -> Result<T> {
        format.decode(&self.payload)
    }

    /// The payload read as an error message.
    pub fn error_message(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Requester side of a stream: reads framed chunks.
pub struct ResponseChunkReader<R> {
    inner: R,
    compression: Option<SharedCompression>,
    max_chunk_size: u64,
    after_empty_chunk: bool,
}

impl<R> ResponseChunkReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(inner: R, compression: Option<SharedCompression>, max_chunk_size: u64) -> Self {
        Self {
            inner,
            compression,
            max_chunk_size,
            after_empty_chunk: false,
        }
    }

    /// Read the next chunk. `Ok(None)` means the responder closed the stream
    /// cleanly between chunks.
    pub async fn read_chunk(&mut self) -> Result<Option<ResponseChunk>> {
        let Some(code) = self.read_code().await? else {
            return Ok(None);
        };

        let len = read_uvarint(&mut LimitedReader::new(
            &mut self.inner,
            MAX_VARINT_LEN64 as u64,
        ))
        .await?;
        if len > self.max_chunk_size {
            return Err(ProtocolError::OversizedResponse {
                size: len,
                limit: self.max_chunk_size,
            });
        }

        let payload = match &self.compression {
            Some(compression) => {
                let budget = compression.max_encoded_len(len)?;
                let sealed = AtomicBool::new(false);
                let source = SealedReader {
                    inner: LimitedReader::new(&mut self.inner, budget),
                    sealed: &sealed,
                };
                let mut decoder =
                    DeclaredLengthReader::new(compression.decompress(Box::pin(source)), len);
                let payload = read_declared(&mut decoder, len).await?;

                // Whatever the decoder still yields came from this chunk
                sealed.store(true, Ordering::Release);
                let mut extra = [0u8; 1];
                if let Err(e) = decoder.read(&mut extra).await {
                    if ProtocolError::is_payload_too_long(&e) {
                        return Err(ProtocolError::PayloadTooLong(len));
                    }
                    return Err(e.into());
                }
                self.after_empty_chunk = len == 0;
                payload
            }
            None => read_declared(&mut self.inner, len).await?,
        };

        Ok(Some(ResponseChunk {
            code,
            payload: Bytes::from(payload),
        }))
    }

    /// Read a result code. After an empty compressed chunk, a marker the
    /// peer's encoder wrote for the empty payload is skipped first.
    async fn read_code(&mut self) -> Result<Option<ResultCode>> {
        let mut code = [0u8; 1];
        if self.inner.read(&mut code).await? == 0 {
            return Ok(None);
        }

        let marker: &[u8] = match &self.compression {
            Some(compression) if self.after_empty_chunk => compression.empty_stream_marker(),
            _ => &[],
        };
        self.after_empty_chunk = false;
        if marker.first() == Some(&code[0]) {
            let mut rest = vec![0u8; marker.len() - 1];
            self.inner.read_exact(&mut rest).await?;
            if rest != marker[1..] {
                return Err(ProtocolError::DecompressionFailure(
                    constants::ERR_EMPTY_STREAM_MARKER.to_string(),
                ));
            }
            if self.inner.read(&mut code).await? == 0 {
                return Ok(None);
            }
        }

        ResultCode::try_from(code[0]).map(Some)
    }

    /// Read chunks until the responder closes the stream or `max_chunks` are read.
    pub async fn read_all(&mut self, max_chunks: usize) -> Result<Vec<ResponseChunk>> {
        let mut chunks = Vec::new();
        while chunks.len() < max_chunks {
            match self.read_chunk().await? {
                Some(chunk) => chunks.push(chunk),
                None => break,
            }
        }
        Ok(chunks)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Read exactly `len` bytes, growing the buffer only as bytes arrive.
async fn read_declared<R>(reader: R, len: u64) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut payload = Vec::new();
    reader.take(len).read_to_end(&mut payload).await?;
    if (payload.len() as u64) < len {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    Ok(payload)
}

/// Source under a chunk's decoder. Once sealed it reports EOF, so checking
/// the decoder for leftover data never pulls in the next chunk.
struct SealedReader<'a, R> {
    inner: R,
    sealed: &'a AtomicBool,
}

impl<R: AsyncRead + Unpin> AsyncRead for SealedReader<'_, R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.sealed.load(Ordering::Acquire) {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}
