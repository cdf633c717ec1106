//! Protocol identifiers and RPC method descriptions.

use crate::core::serialization::SerializationFormat;
use crate::error::Result;
use crate::protocol::handler::RequestPayloadHandler;
use crate::service::context::StreamContextFn;
use crate::service::lifecycle::ReqRespStreamHandler;
use crate::transport::StreamRegistry;
use crate::utils::compression::SharedCompression;
use crate::utils::metrics::Metrics;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Name a request/response contract is negotiated under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolId(Cow<'static, str>);

impl ProtocolId {
    pub const fn from_static(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(Cow::Owned(id.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier advertised for a codec: `base_codec`, or `base` unchanged
    /// without compression.
    pub fn with_compression(&self, compression: Option<&SharedCompression>) -> ProtocolId {
        match compression {
            Some(compression) => ProtocolId::new(format!("{}_{}", self.0, compression.name())),
            None => self.clone(),
        }
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ProtocolId {
    fn from(id: &'static str) -> Self {
        Self::from_static(id)
    }
}

impl From<String> for ProtocolId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl AsRef<str> for ProtocolId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A request/response method: protocol, payload format and size policy.
#[derive(Debug, Clone)]
pub struct RpcMethod {
    pub protocol: ProtocolId,
    pub format: SerializationFormat,
    /// Raw-content limit for requests.
    pub max_request_size: u64,
    /// Largest response chunk a requester accepts.
    pub max_response_chunk_size: u64,
}

impl RpcMethod {
    pub fn new(protocol: impl Into<ProtocolId>, max_request_size: u64) -> Self {
        Self {
            protocol: protocol.into(),
            format: SerializationFormat::default(),
            max_request_size,
            max_response_chunk_size: max_request_size,
        }
    }

    pub fn with_format(mut self, format: SerializationFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_max_response_chunk_size(mut self, limit: u64) -> Self {
        self.max_response_chunk_size = limit;
        self
    }

    pub fn protocol_id(&self, compression: Option<&SharedCompression>) -> ProtocolId {
        self.protocol.with_compression(compression)
    }

    pub fn make_stream_handler<H>(
        &self,
        ctx_fn: StreamContextFn,
        compression: Option<SharedCompression>,
        handler: H,
    ) -> ReqRespStreamHandler
    where
        H: RequestPayloadHandler,
    {
        ReqRespStreamHandler::new(
            Arc::new(handler),
            ctx_fn,
            compression,
            self.max_request_size,
            self.format,
        )
    }

    /// Build a stream handler and register it under the codec-specific
    /// protocol id. Returns the id the handler was registered under.
    pub fn register<H>(
        &self,
        registry: &dyn StreamRegistry,
        ctx_fn: StreamContextFn,
        compression: Option<SharedCompression>,
        metrics: Option<Arc<Metrics>>,
        handler: H,
    ) -> Result<ProtocolId>
    where
        H: RequestPayloadHandler,
    {
        let protocol = self.protocol_id(compression.as_ref());
        let mut stream_handler = self.make_stream_handler(ctx_fn, compression, handler);
        if let Some(metrics) = metrics {
            stream_handler = stream_handler.with_metrics(metrics);
        }
        registry.set_stream_handler(protocol.clone(), Arc::new(stream_handler))?;
        info!(protocol = %protocol, "Opened listener");
        Ok(protocol)
    }
}
