//! Handler capability invoked once per accepted request.

use crate::core::serialization::SerializationFormat;
use crate::error::{ProtocolError, Result};
use crate::protocol::response::{ResponseWriter, ResultCode};
use crate::service::context::StreamContext;
use crate::transport::PeerId;
use crate::utils::compression::BoxedReader;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::io;
use tokio::io::AsyncReadExt;

/// Everything a handler gets for one request.
///
/// When `invalid_input` is set the request was rejected during framing and
/// `reader` yields nothing; the handler should answer with an error chunk.
pub struct PayloadRequest<'a> {
    pub ctx: StreamContext,
    pub peer: PeerId,
    pub request_len: u64,
    pub reader: &'a mut BoxedReader<'static>,
    pub writer: &'a mut ResponseWriter,
    pub invalid_input: Option<ProtocolError>,
    pub format: SerializationFormat,
}

impl PayloadRequest<'_> {
    /// Read exactly `request_len` payload bytes.
    ///
    /// The buffer grows with the bytes that actually arrive. A compressed body
    /// that decodes to more than `request_len` bytes is rejected.
    pub async fn read_request_bytes(&mut self) -> Result<Vec<u8>> {
        if let Some(err) = self.invalid_input.take() {
            return Err(err);
        }
        let mut payload = Vec::new();
        (&mut *self.reader)
            .take(self.request_len)
            .read_to_end(&mut payload)
            .await?;
        if (payload.len() as u64) < self.request_len {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }

        // Polled once, so a peer that keeps the stream open is not waited on
        let mut extra = [0u8; 1];
        if let Some(Err(e)) = self.reader.read(&mut extra).now_or_never() {
            if ProtocolError::is_payload_too_long(&e) {
                return Err(ProtocolError::PayloadTooLong(self.request_len));
            }
        }
        Ok(payload)
    }

    /// Read and deserialize the request payload.
    ///
    /// Returns the framing error instead when the request was rejected.
    pub async fn read_request<T: DeserializeOwned>(&mut self) -> Result<T> {
        let payload = self.read_request_bytes().await?;
        self.format.decode(&payload)
    }

    pub async fn write_response_chunk<T>(&mut self, code: ResultCode, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.writer.write_response_chunk(code, payload).await
    }

    pub async fn write_raw_response_chunk(&mut self, code: ResultCode, payload: &[u8]) -> Result<()> {
        self.writer.write_raw_response_chunk(code, payload).await
    }

    pub async fn write_error_chunk(&mut self, code: ResultCode, message: &str) -> Result<()> {
        self.writer.write_error_chunk(code, message).await
    }
}

/// Per-protocol request logic. The response writer is closed after
/// `handle` returns, whatever the outcome.
pub trait RequestPayloadHandler: Send + Sync + 'static {
    fn handle<'a>(&'a self, req: PayloadRequest<'a>) -> BoxFuture<'a, ()>;
}

impl<F> RequestPayloadHandler for F
where
    F: for<'a> Fn(PayloadRequest<'a>) -> BoxFuture<'a, ()> + Send + Sync + 'static,
{
    fn handle<'a>(&'a self, req: PayloadRequest<'a>) -> BoxFuture<'a, ()> {
        self(req)
    }
}

/// Adapt an async closure taking an owned request into a handler.
///
/// ```rust
/// use futures::FutureExt;
/// use reqresp_core::protocol::handler::handler_fn;
/// use reqresp_core::protocol::response::ResultCode;
///
/// let echo = handler_fn(|mut req| {
///     async move {
///         match req.read_request_bytes().await {
///             Ok(body) => {
///                 let _ = req.write_raw_response_chunk(ResultCode::Success, &body).await;
///             }
///             Err(e) => {
///                 let _ = req.write_error_chunk(ResultCode::InvalidRequest, &e.to_string()).await;
///             }
///         }
///     }
///     .boxed()
/// });
/// # let _ = echo;
/// ```
pub fn handler_fn<F>(f: F) -> F
where
    F: for<'a> Fn(PayloadRequest<'a>) -> BoxFuture<'a, ()> + Send + Sync + 'static,
{
    f
}

/// Run a typed request/response exchange: decode `Req`, answer with the
/// closure's `Resp` as a success chunk, or with an error chunk.
pub async fn respond_with<Req, Resp, F, Fut>(mut req: PayloadRequest<'_>, f: F) -> Result<()>
where
    Req: DeserializeOwned,
    Resp: Serialize,
    F: FnOnce(PeerId, Req) -> Fut,
    Fut: Future<Output = std::result::Result<Resp, String>>,
{
    let request: Req = match req.read_request().await {
        Ok(request) => request,
        Err(e) => {
            req.write_error_chunk(ResultCode::InvalidRequest, &e.to_string())
                .await?;
            return Err(e);
        }
    };
    match f(req.peer.clone(), request).await {
        Ok(resp) => req.write_response_chunk(ResultCode::Success, &resp).await,
        Err(message) => req.write_error_chunk(ResultCode::ServerError, &message).await,
    }
}
