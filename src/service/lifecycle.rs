//! # Stream Lifecycle
//!
//! Owns a stream from the moment a transport hands it over until it is
//! closed.
//!
//! Each stream gets a child of the context produced by the handler's
//! [`StreamContextFn`]. A watcher task waits for that context to end and then
//! force-closes the stream: the transport stream is dropped at once, so the
//! peer sees the end of the stream at the deadline, and any read or write the
//! handler is blocked on fails right away with [`ProtocolError::StreamClosed`].
//! A stream is closed exactly once, either by the watcher or after the
//! handler returns.

use crate::core::serialization::SerializationFormat;
use crate::error::ProtocolError;
use crate::protocol::handler::{PayloadRequest, RequestPayloadHandler};
use crate::protocol::request::{decode_request_header, RequestHeader};
use crate::protocol::response::ResponseWriter;
use crate::service::context::{DoneReason, StreamContextFn};
use crate::transport::{BoxedStream, PeerId, StreamHandler};
use crate::utils::buffer_pool::BufferPool;
use crate::utils::compression::SharedCompression;
use crate::utils::metrics::Metrics;
use futures::future::BoxFuture;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, instrument};

fn closed_error() -> io::Error {
    ProtocolError::StreamClosed.into_io(io::ErrorKind::BrokenPipe)
}

/// Holds the transport stream until it is closed.
type StreamSlot<S> = Mutex<Option<S>>;

fn lock_slot<S>(slot: &StreamSlot<S>) -> MutexGuard<'_, Option<S>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drops whatever stream a slot still holds.
trait ReleaseStream: Send + Sync {
    fn release(&self);
}

impl<S: Send> ReleaseStream for StreamSlot<S> {
    fn release(&self) {
        let stream = lock_slot(self).take();
        // Dropped outside the lock
        drop(stream);
    }
}

/// Closes a [`ClosableStream`] from another task.
#[derive(Clone)]
pub struct StreamCloser {
    token: CancellationToken,
    closed: Arc<AtomicBool>,
    slot: Arc<dyn ReleaseStream>,
}

impl StreamCloser {
    /// Close the stream and drop the transport stream underneath it. Only the
    /// first call does anything; it returns true.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.cancel();
        self.slot.release();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for StreamCloser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCloser")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// A stream whose pending and future I/O fails once its closer fires.
pub struct ClosableStream<S> {
    inner: Arc<StreamSlot<S>>,
    closer: StreamCloser,
    read_closed: Pin<Box<WaitForCancellationFutureOwned>>,
    write_closed: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<S: Send + 'static> ClosableStream<S> {
    pub fn new(inner: S) -> Self {
        let token = CancellationToken::new();
        let inner = Arc::new(Mutex::new(Some(inner)));
        Self {
            read_closed: Box::pin(token.clone().cancelled_owned()),
            write_closed: Box::pin(token.clone().cancelled_owned()),
            closer: StreamCloser {
                token,
                closed: Arc::new(AtomicBool::new(false)),
                slot: inner.clone(),
            },
            inner,
        }
    }
}

impl<S> ClosableStream<S> {
    pub fn closer(&self) -> StreamCloser {
        self.closer.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    /// The transport stream, unless the stream was already closed.
    pub fn into_inner(self) -> Option<S> {
        lock_slot(&self.inner).take()
    }
}

// Readers and writers register separate wakers so a blocked read and a
// blocked write on split halves are both woken by a close.
fn poll_closed(
    closer: &StreamCloser,
    wait: &mut Pin<Box<WaitForCancellationFutureOwned>>,
    cx: &mut Context<'_>,
) -> bool {
    closer.token.is_cancelled() || wait.as_mut().poll(cx).is_ready()
}

impl<S: AsyncRead + Unpin> AsyncRead for ClosableStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if poll_closed(&this.closer, &mut this.read_closed, cx) {
            return Poll::Ready(Err(closed_error()));
        }
        match lock_slot(&this.inner).as_mut() {
            Some(inner) => Pin::new(inner).poll_read(cx, buf),
            None => Poll::Ready(Err(closed_error())),
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ClosableStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if poll_closed(&this.closer, &mut this.write_closed, cx) {
            return Poll::Ready(Err(closed_error()));
        }
        match lock_slot(&this.inner).as_mut() {
            Some(inner) => Pin::new(inner).poll_write(cx, buf),
            None => Poll::Ready(Err(closed_error())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if poll_closed(&this.closer, &mut this.write_closed, cx) {
            return Poll::Ready(Err(closed_error()));
        }
        match lock_slot(&this.inner).as_mut() {
            Some(inner) => Pin::new(inner).poll_flush(cx),
            None => Poll::Ready(Err(closed_error())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        // Closing an already closed stream is a no-op
        if this.closer.is_closed() {
            return Poll::Ready(Ok(()));
        }
        match lock_slot(&this.inner).as_mut() {
            Some(inner) => Pin::new(inner).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

/// Serves one request/response protocol: frames each incoming stream, runs
/// the handler and closes the stream.
#[derive(Clone)]
pub struct ReqRespStreamHandler {
    handler: Arc<dyn RequestPayloadHandler>,
    ctx_fn: StreamContextFn,
    compression: Option<SharedCompression>,
    max_request_size: u64,
    format: SerializationFormat,
    metrics: Arc<Metrics>,
    buffers: BufferPool,
}

impl ReqRespStreamHandler {
    pub fn new(
        handler: Arc<dyn RequestPayloadHandler>,
        ctx_fn: StreamContextFn,
        compression: Option<SharedCompression>,
        max_request_size: u64,
        format: SerializationFormat,
    ) -> Self {
        Self {
            handler,
            ctx_fn,
            compression,
            max_request_size,
            format,
            metrics: Arc::new(Metrics::new()),
            buffers: BufferPool::default(),
        }
    }

    /// Record into a shared metrics collector.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_buffer_pool(mut self, buffers: BufferPool) -> Self {
        self.buffers = buffers;
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn compression(&self) -> Option<&SharedCompression> {
        self.compression.as_ref()
    }

    pub fn max_request_size(&self) -> u64 {
        self.max_request_size
    }

    /// Run one stream to completion.
    #[instrument(skip_all, fields(peer = %peer))]
    pub async fn serve_stream<S>(&self, peer: PeerId, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let ctx = (self.ctx_fn)().child();
        // Ends the watcher even if the handler panics
        let _ctx_guard = ctx.token().clone().drop_guard();
        self.metrics.stream_opened();

        let stream = ClosableStream::new(stream);
        let closer = stream.closer();

        let watcher = {
            let ctx = ctx.clone();
            let closer = closer.clone();
            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                let reason = ctx.done().await;
                if closer.close() {
                    metrics.stream_closed();
                    match reason {
                        DoneReason::DeadlineExceeded => metrics.stream_timed_out(),
                        DoneReason::Cancelled => metrics.stream_cancelled(),
                    }
                    debug!(?reason, "Stream force-closed");
                }
            })
        };

        let (read_half, write_half) = tokio::io::split(stream);
        let RequestHeader {
            request_len,
            invalid_input,
            mut reader,
            ..
        } = decode_request_header(read_half, self.max_request_size, self.compression.as_ref())
            .await;

        match &invalid_input {
            None => self.metrics.request_accepted(),
            Some(err) => {
                self.metrics.request_rejected();
                debug!(error = %err, request_len, "Invalid request");
            }
        }

        let mut writer = ResponseWriter::with_pool(
            Box::pin(write_half),
            self.compression.clone(),
            self.format,
            self.buffers.clone(),
        );

        self.handler
            .handle(PayloadRequest {
                ctx: ctx.clone(),
                peer,
                request_len,
                reader: &mut reader,
                writer: &mut writer,
                invalid_input,
                format: self.format,
            })
            .await;

        if let Err(e) = writer.close().await {
            debug!(error = %e, "Failed to close response writer");
        }
        self.metrics
            .chunks(writer.chunks_written(), writer.write_failures());

        if closer.close() {
            self.metrics.stream_closed();
        }
        ctx.cancel();
        if let Err(e) = watcher.await {
            debug!(error = %e, "Stream watcher failed");
        }
    }
}

impl StreamHandler for ReqRespStreamHandler {
    fn handle_stream(&self, peer: PeerId, stream: BoxedStream) -> BoxFuture<'static, ()> {
        let this = self.clone();
        Box::pin(async move { this.serve_stream(peer, stream).await })
    }
}

impl std::fmt::Debug for ReqRespStreamHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqRespStreamHandler")
            .field("compression", &self.compression.as_ref().map(|c| c.name()))
            .field("max_request_size", &self.max_request_size)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}
