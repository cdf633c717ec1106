//! # Core Framing Components
//!
//! Low-level building blocks shared by the request and response paths.
//!
//! ## Components
//! - **Varint**: unsigned LEB128 length prefixes (at most 10 bytes)
//! - **Limit**: the bounded reader that enforces read budgets
//! - **Serialization**: payload encodings for typed handlers
//!
//! ## Wire Format
//! ```text
//! Request:        [varint declared_len] [payload, optionally compressed]
//! Response chunk: [result code (1)] [varint payload_len] [payload, optionally compressed]
//! ```
//!
//! ## Security
//! - Declared lengths are hints; the bounded reader caps actual consumption
//! - Varint prefixes are read under a fixed 10-byte ceiling

pub mod limit;
pub mod serialization;
pub mod varint;
