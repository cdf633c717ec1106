//! # Transport Layer
//!
//! The seam between the request/response core and whatever carries bytes.
//!
//! A transport accepts bidirectional streams from remote peers, works out
//! which protocol each stream speaks, and hands the stream to the
//! [`StreamHandler`] registered for that protocol.
//!
//! ## Components
//! - **Memory**: in-process duplex streams, for tests and embedding
//! - **TCP**: one stream per connection, protocol chosen by a short preamble
//!
//! ## Security
//! - Protocol negotiation reads a bounded preamble under a timeout
//! - Unknown protocols are refused before any request byte is read

pub mod memory;
pub mod tcp;

use crate::error::Result;
use crate::protocol::method::ProtocolId;
use futures::future::BoxFuture;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Any bidirectional byte stream a transport can hand over.
pub trait RawStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> RawStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedStream = Box<dyn RawStream>;

/// Identity of the remote end of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SocketAddr> for PeerId {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Receives the streams opened for one protocol.
pub trait StreamHandler: Send + Sync + 'static {
    fn handle_stream(&self, peer: PeerId, stream: BoxedStream) -> BoxFuture<'static, ()>;
}

/// Something streams can be registered against.
pub trait StreamRegistry: Send + Sync {
    /// Install `handler` for `protocol`, replacing any previous handler.
    fn set_stream_handler(&self, protocol: ProtocolId, handler: Arc<dyn StreamHandler>) -> Result<()>;

    /// Remove the handler for `protocol`. Returns whether one was installed.
    fn remove_stream_handler(&self, protocol: &ProtocolId) -> Result<bool>;
}
