//! In-process transport over `tokio::io::duplex` pipes.
//!
//! Opening a stream hands the server end to the registered handler on its
//! own task and gives the client end back to the caller.

use crate::error::Result;
use crate::protocol::dispatcher::Router;
use crate::protocol::method::ProtocolId;
use crate::transport::{PeerId, StreamHandler, StreamRegistry};
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tracing::debug;

/// Pipe capacity used when none is configured.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct MemoryTransport {
    router: Router,
    buffer_size: usize,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_router(Router::new())
    }

    pub fn with_router(router: Router) -> Self {
        Self {
            router,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Pipe capacity per direction. Small values make writes block until
    /// the other end reads.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Open a stream to the handler registered for `protocol`, as `peer`.
    ///
    /// The returned handle completes when the handler is done with the stream.
    pub fn open_stream(
        &self,
        peer: impl Into<PeerId>,
        protocol: &ProtocolId,
    ) -> Result<(DuplexStream, JoinHandle<()>)> {
        let peer = peer.into();
        let (client, server) = tokio::io::duplex(self.buffer_size);
        debug!(peer = %peer, protocol = %protocol, "Opening in-memory stream");
        let handle = self.router.dispatch(protocol, peer, Box::new(server))?;
        Ok((client, handle))
    }
}

impl StreamRegistry for MemoryTransport {
    fn set_stream_handler(&self, protocol: ProtocolId, handler: Arc<dyn StreamHandler>) -> Result<()> {
        self.router.set_stream_handler(protocol, handler)
    }

    fn remove_stream_handler(&self, protocol: &ProtocolId) -> Result<bool> {
        self.router.remove_stream_handler(protocol)
    }
}
