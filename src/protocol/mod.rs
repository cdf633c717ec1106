//! # Request/Response Protocol
//!
//! Framing of requests and chunked responses, the handler capability and the
//! routing of streams to handlers by protocol id.
//!
//! ## Components
//! - **Request**: length-prefix decoding and read budget derivation
//! - **Response**: result codes and chunk encoding/decoding
//! - **Handler**: the per-protocol capability invoked for every request
//! - **Method**: protocol ids (with codec suffixes) and method policy
//! - **Dispatcher**: protocol id to stream handler routing
//!
//! ## Security
//! - Oversized or malformed requests are rejected without reading the body
//! - Unknown result codes are rejected on read
//! - Error messages are capped at 256 bytes

pub mod dispatcher;
pub mod handler;
pub mod method;
pub mod request;
pub mod response;


pub use dispatcher::Router;
pub use handler::{PayloadRequest, RequestPayloadHandler};
pub use method::{ProtocolId, RpcMethod};
pub use response::{ResponseWriter, ResultCode};
