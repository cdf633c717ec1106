//! # reqresp-core
//!
//! Codec-agnostic request/response framing over bidirectional peer-to-peer
//! streams.
//!
//! A caller registers a handler for a protocol id. For every stream opened
//! under that id, the core reads and validates a varint length prefix, arms
//! a bounded reader with a read budget derived from policy (never from the
//! peer's claim), optionally wraps the body in a decompressor, invokes the
//! handler and frames its reply as result-coded chunks. A per-stream watcher
//! force-closes the stream when its context times out or is cancelled.
//!
//! ## Modules
//! - [`core`]: varint prefixes, the bounded reader, payload serialization
//! - [`protocol`]: request framing, response chunks, handlers, routing
//! - [`service`]: stream contexts and the lifecycle manager
//! - [`transport`]: in-memory and TCP transports
//! - [`utils`]: compression, buffer pool, logging, metrics
//! - [`config`]: TOML/env configuration
//!
//! ## Example
//! ```rust,no_run
//! use futures::FutureExt;
//! use reqresp_core::config::ReqRespConfig;
//! use reqresp_core::protocol::handler::{handler_fn, respond_with};
//! use reqresp_core::service::context::StreamContext;
//! use reqresp_core::transport::tcp::TcpTransport;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> reqresp_core::Result<()> {
//! let config = ReqRespConfig::from_env()?;
//! config.validate_strict()?;
//! reqresp_core::utils::logging::init_logging(&config.logging)?;
//!
//! let shutdown = CancellationToken::new();
//! let transport = TcpTransport::new(config.listener.clone());
//! let method = config.protocol.rpc_method("/status/1")?;
//! method.register(
//!     &transport,
//!     config.protocol.stream_context_fn(StreamContext::from_token(shutdown.clone())),
//!     config.protocol.compression()?,
//!     None,
//!     handler_fn(|req| {
//!         async move {
//!             let _ = respond_with(req, |_peer, n: u64| async move { Ok::<_, String>(n + 1) }).await;
//!         }
//!         .boxed()
//!     }),
//! )?;
//!
//! let listener = transport.bind().await?;
//! transport.serve(listener, shutdown).await
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use error::{ProtocolError, Result};
pub use protocol::{PayloadRequest, ProtocolId, RequestPayloadHandler, ResultCode, RpcMethod};
pub use service::{ReqRespStreamHandler, StreamContext};
