//! # Stream Services
//!
//! Per-stream contexts and the lifecycle manager that drives a request from
//! accepted stream to closed stream.
//!
//! ## Components
//! - **Context**: cancellation scopes with optional deadlines
//! - **Lifecycle**: close-once streams, the cancellation watcher and the
//!   request/response stream handler

pub mod context;
pub mod lifecycle;

pub use context::{stream_context_fn, DoneReason, StreamContext, StreamContextFn};
pub use lifecycle::{ClosableStream, ReqRespStreamHandler, StreamCloser};
