//! # Utility Modules
//!
//! Supporting utilities for compression, buffering, logging and metrics.
//!
//! ## Components
//! - **Compression**: pluggable streaming codecs (snappy framing format)
//! - **Buffer Pool**: reusable serialization buffers
//! - **Logging**: structured logging configuration
//! - **Metrics**: thread-safe stream and request counters
//!
//! ## Security
//! - Codec expansion bounds size the read budget of compressed requests
//! - Snappy chunks are capped at 64 KiB of decoded data

pub mod buffer_pool;
pub mod compression;
pub mod logging;
pub mod metrics;

pub use compression::{Compression, SharedCompression, Snappy};
pub use metrics::{Metrics, MetricsSnapshot};
