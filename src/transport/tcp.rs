//! # TCP Transport
//!
//! One TCP connection carries one request/response stream.
//!
//! Before any request byte, the dialer names the protocol it wants:
//!
//! ```text
//! dialer   -> [varint id_len] [protocol id (UTF-8)]
//! listener -> [0x01 accept | 0x00 reject]
//! ```
//!
//! On accept the connection is handed to the stream handler registered for
//! that protocol; on reject it is closed.

use crate::config::ListenerConfig;
use crate::core::limit::LimitedReader;
use crate::core::varint::{encode_uvarint, read_uvarint, MAX_VARINT_LEN64};
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::Router;
use crate::protocol::method::ProtocolId;
use crate::transport::{PeerId, StreamHandler, StreamRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Longest protocol id accepted during negotiation.
pub const MAX_PROTOCOL_ID_LEN: u64 = 256;

const ACCEPT: u8 = 0x01;
const REJECT: u8 = 0x00;

/// TCP listener that routes each connection to a registered stream handler.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    router: Router,
    config: ListenerConfig,
}

impl TcpTransport {
    pub fn new(config: ListenerConfig) -> Self {
        Self::with_router(Router::new(), config)
    }

    pub fn with_router(router: Router, config: ListenerConfig) -> Self {
        Self { router, config }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Bind the configured listen address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.config.address).await?;
        Ok(listener)
    }

    /// Accept connections until `shutdown` is cancelled, then wait up to the
    /// shutdown timeout for open connections to finish.
    #[instrument(skip_all, fields(address = %self.config.address))]
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let max_connections = self.config.max_connections;
        let permits = Arc::new(Semaphore::new(max_connections));
        info!(
            local_addr = ?listener.local_addr().ok(),
            protocols = ?self.router.protocols(),
            "Listening"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutting down listener. Waiting for connections to close...");

                    let timeout = tokio::time::sleep(self.config.shutdown_timeout);
                    tokio::pin!(timeout);
                    loop {
                        let connections = max_connections - permits.available_permits();
                        if connections == 0 {
                            info!("All connections closed, shutting down");
                            break;
                        }
                        tokio::select! {
                            _ = &mut timeout => {
                                warn!(connections, "Shutdown timeout reached, forcing exit");
                                break;
                            }
                            _ = tokio::time::sleep(Duration::from_millis(100)) => {
                                debug!(connections, "Waiting for connections to close");
                            }
                        }
                    }
                    return Ok(());
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            let Ok(permit) = permits.clone().try_acquire_owned() else {
                                warn!(peer = %addr, max_connections, "Connection limit reached, dropping connection");
                                continue;
                            };
                            let router = self.router.clone();
                            let negotiation_timeout = self.config.negotiation_timeout;
                            tokio::spawn(async move {
                                let _permit = permit;
                                serve_connection(stream, PeerId::from(addr), router, negotiation_timeout).await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Error accepting connection");
                        }
                    }
                }
            }
        }
    }
}

impl StreamRegistry for TcpTransport {
    fn set_stream_handler(&self, protocol: ProtocolId, handler: Arc<dyn StreamHandler>) -> Result<()> {
        self.router.set_stream_handler(protocol, handler)
    }

    fn remove_stream_handler(&self, protocol: &ProtocolId) -> Result<bool> {
        self.router.remove_stream_handler(protocol)
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: PeerId,
    router: Router,
    negotiation_timeout: Duration,
) {
    let negotiated = tokio::time::timeout(
        negotiation_timeout,
        negotiate_inbound(&mut stream, &router),
    )
    .await;

    let (protocol, handler) = match negotiated {
        Ok(Ok(selected)) => selected,
        Ok(Err(e)) => {
            debug!(peer = %peer, error = %e, "Protocol negotiation failed");
            return;
        }
        Err(_) => {
            debug!(peer = %peer, "Protocol negotiation timed out");
            return;
        }
    };

    debug!(peer = %peer, protocol = %protocol, "Stream opened");
    handler.handle_stream(peer, Box::new(stream)).await;
}

/// Listener side of protocol selection. Answers the dialer and returns the
/// handler for the selected protocol.
pub async fn negotiate_inbound<S>(
    stream: &mut S,
    router: &Router,
) -> Result<(ProtocolId, Arc<dyn StreamHandler>)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let len = read_uvarint(&mut LimitedReader::new(&mut *stream, MAX_VARINT_LEN64 as u64)).await?;
    if len == 0 || len > MAX_PROTOCOL_ID_LEN {
        stream.write_all(&[REJECT]).await?;
        return Err(ProtocolError::UnsupportedProtocol(format!(
            "protocol id length {len} out of range"
        )));
    }

    let mut raw = vec![0u8; len as usize];
    stream.read_exact(&mut raw).await?;
    let Ok(id) = String::from_utf8(raw) else {
        stream.write_all(&[REJECT]).await?;
        return Err(ProtocolError::UnsupportedProtocol(
            "protocol id is not UTF-8".to_string(),
        ));
    };

    let protocol = ProtocolId::new(id);
    match router.route(&protocol)? {
        Some(handler) => {
            stream.write_all(&[ACCEPT]).await?;
            Ok((protocol, handler))
        }
        None => {
            stream.write_all(&[REJECT]).await?;
            Err(ProtocolError::UnsupportedProtocol(protocol.to_string()))
        }
    }
}

/// Dialer side of protocol selection.
pub async fn negotiate_outbound<S>(stream: &mut S, protocol: &ProtocolId) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let id = protocol.as_str().as_bytes();
    let mut preamble = Vec::with_capacity(MAX_VARINT_LEN64 + id.len());
    encode_uvarint(id.len() as u64, &mut preamble);
    preamble.extend_from_slice(id);
    stream.write_all(&preamble).await?;
    stream.flush().await?;

    match stream.read_u8().await? {
        ACCEPT => Ok(()),
        _ => Err(ProtocolError::UnsupportedProtocol(protocol.to_string())),
    }
}

/// Connect to `addr` and select `protocol`. The returned stream is ready for
/// a request.
#[instrument(skip_all, fields(protocol = %protocol))]
pub async fn open_stream<A: ToSocketAddrs>(addr: A, protocol: &ProtocolId) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    negotiate_outbound(&mut stream, protocol).await?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::transport::BoxedStream;
    use futures::future::BoxFuture;

    struct Noop;

    impl StreamHandler for Noop {
        fn handle_stream(&self, _peer: PeerId, _stream: BoxedStream) -> BoxFuture<'static, ()> {
            Box::pin(async {})
        }
    }

    fn router_with(protocol: &ProtocolId) -> Router {
        let router = Router::new();
        router
            .set_stream_handler(protocol.clone(), Arc::new(Noop))
            .unwrap();
        router
    }

    #[tokio::test]
    async fn test_negotiation_accepts_registered_protocol() {
        let protocol = ProtocolId::from_static("/status/1_snappy");
        let router = router_with(&protocol);
        let (mut dialer, mut listener) = tokio::io::duplex(512);

        let outbound = {
            let protocol = protocol.clone();
            tokio::spawn(async move { negotiate_outbound(&mut dialer, &protocol).await })
        };
        let (selected, _handler) = negotiate_inbound(&mut listener, &router).await.unwrap();
        outbound.await.unwrap().unwrap();
        assert_eq!(selected, protocol);
    }

    #[tokio::test]
    async fn test_negotiation_rejects_unknown_protocol() {
        let router = router_with(&ProtocolId::from_static("/status/1"));
        let (mut dialer, mut listener) = tokio::io::duplex(512);

        let outbound = tokio::spawn(async move {
            negotiate_outbound(&mut dialer, &ProtocolId::from_static("/status/1_snappy")).await
        });
        let inbound = negotiate_inbound(&mut listener, &router).await;
        assert!(matches!(inbound, Err(ProtocolError::UnsupportedProtocol(_))));
        assert!(matches!(
            outbound.await.unwrap(),
            Err(ProtocolError::UnsupportedProtocol(_))
        ));
    }

    #[tokio::test]
    async fn test_negotiation_rejects_long_protocol_id() {
        let router = Router::new();
        let (mut dialer, mut listener) = tokio::io::duplex(1024);

        let mut preamble = Vec::new();
        encode_uvarint(MAX_PROTOCOL_ID_LEN + 1, &mut preamble);
        dialer.write_all(&preamble).await.unwrap();

        let inbound = negotiate_inbound(&mut listener, &router).await;
        assert!(matches!(inbound, Err(ProtocolError::UnsupportedProtocol(_))));
        assert_eq!(dialer.read_u8().await.unwrap(), REJECT);
    }
}
