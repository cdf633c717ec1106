use crate::error::constants::{ERR_ROUTER_READ_LOCK, ERR_ROUTER_WRITE_LOCK};
use crate::error::{ProtocolError, Result};
use crate::protocol::method::ProtocolId;
use crate::transport::{BoxedStream, PeerId, StreamHandler, StreamRegistry};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type HandlerMap = HashMap<ProtocolId, Arc<dyn StreamHandler>>;

/// Routes incoming streams to the handler registered for their protocol.
/// Cheap to clone; clones share the routing table.
#[derive(Clone)]
pub struct Router {
    handlers: Arc<RwLock<HandlerMap>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Look up the handler for `protocol`.
    pub fn route(&self, protocol: &ProtocolId) -> Result<Option<Arc<dyn StreamHandler>>> {
        let handlers = self
            .handlers
            .read()
            .map_err(|_| ProtocolError::TransportError(ERR_ROUTER_READ_LOCK.to_string()))?;
        Ok(handlers.get(protocol).cloned())
    }

    pub fn supports(&self, protocol: &ProtocolId) -> bool {
        matches!(self.route(protocol), Ok(Some(_)))
    }

    /// Registered protocol ids, sorted.
    pub fn protocols(&self) -> Vec<ProtocolId> {
        let mut protocols: Vec<_> = self
            .handlers
            .read()
            .map(|handlers| handlers.keys().cloned().collect())
            .unwrap_or_default();
        protocols.sort();
        protocols
    }

    /// Spawn the registered handler for `protocol` on its own task.
    pub fn dispatch(
        &self,
        protocol: &ProtocolId,
        peer: PeerId,
        stream: BoxedStream,
    ) -> Result<JoinHandle<()>> {
        let handler = self.route(protocol)?.ok_or_else(|| {
            warn!(protocol = %protocol, peer = %peer, "No handler for protocol");
            ProtocolError::UnsupportedProtocol(protocol.to_string())
        })?;
        debug!(protocol = %protocol, peer = %peer, "Dispatching stream");
        Ok(tokio::spawn(handler.handle_stream(peer, stream)))
    }
}

impl StreamRegistry for Router {
    fn set_stream_handler(&self, protocol: ProtocolId, handler: Arc<dyn StreamHandler>) -> Result<()> {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::TransportError(ERR_ROUTER_WRITE_LOCK.to_string()))?;
        handlers.insert(protocol, handler);
        Ok(())
    }

    fn remove_stream_handler(&self, protocol: &ProtocolId) -> Result<bool> {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::TransportError(ERR_ROUTER_WRITE_LOCK.to_string()))?;
        Ok(handlers.remove(protocol).is_some())
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("protocols", &self.protocols())
            .finish()
    }
}
