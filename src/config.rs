//! # Configuration Management
//!
//! Centralized configuration for request/response listeners.
//!
//! This module provides structured configuration for the listener, the
//! request/response policy (size limits, timeouts, compression, payload
//! format) and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - TOML strings via `from_toml()`
//! - `REQRESP_*` environment variables via `from_env()`
//! - Direct instantiation with defaults
//!
//! ## Security Considerations
//! - The request size limit is the raw-content policy limit; compressed
//!   requests get a budget derived from it, never from the peer's claim
//! - A per-request timeout bounds how long a slow peer can hold a stream
//! - Protocol negotiation has its own short timeout

use crate::core::serialization::SerializationFormat;
use crate::error::{ProtocolError, Result};
use crate::protocol::method::{ProtocolId, RpcMethod};
use crate::service::context::{stream_context_fn, StreamContext, StreamContextFn};
use crate::utils::compression::{self, SharedCompression};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default raw-content limit for a single request (1 MiB)
pub const MAX_REQUEST_SIZE: u64 = 1024 * 1024;

/// Default limit for a single response chunk (1 MiB)
pub const MAX_RESPONSE_CHUNK_SIZE: u64 = 1024 * 1024;

/// Hard ceiling for both size limits (100 MiB)
const SIZE_CEILING: u64 = 100 * 1024 * 1024;

/// Default per-request timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for reading a protocol selection preamble
pub const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time to wait for open streams on shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ReqRespConfig {
    /// Listener configuration
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Request/response policy
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ReqRespConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build a configuration from a variable lookup, starting from defaults.
    /// Unparsable numbers are configuration errors.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("REQRESP_LISTEN_ADDRESS") {
            config.listener.address = addr;
        }
        if let Some(val) = lookup("REQRESP_MAX_CONNECTIONS") {
            config.listener.max_connections = parse_var("REQRESP_MAX_CONNECTIONS", &val)?;
        }
        if let Some(val) = lookup("REQRESP_MAX_REQUEST_SIZE") {
            config.protocol.max_request_size = parse_var("REQRESP_MAX_REQUEST_SIZE", &val)?;
        }
        if let Some(val) = lookup("REQRESP_MAX_RESPONSE_CHUNK_SIZE") {
            config.protocol.max_response_chunk_size =
                parse_var("REQRESP_MAX_RESPONSE_CHUNK_SIZE", &val)?;
        }
        if let Some(val) = lookup("REQRESP_REQUEST_TIMEOUT_MS") {
            config.protocol.request_timeout =
                Duration::from_millis(parse_var("REQRESP_REQUEST_TIMEOUT_MS", &val)?);
        }
        if let Some(name) = lookup("REQRESP_COMPRESSION") {
            config.protocol.compression = name;
        }
        if let Some(name) = lookup("REQRESP_FORMAT") {
            config.protocol.format = name;
        }
        if let Some(level) = lookup("REQRESP_LOG_LEVEL") {
            config.logging.log_level = level
                .parse()
                .map_err(|_| ProtocolError::ConfigError(format!("Invalid log level: {level}")))?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.listener.validate());
        errors.extend(self.protocol.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ProtocolError::ConfigError(format!("Invalid value for {name}: '{value}'")))
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    /// Listen address (e.g., "127.0.0.1:9000")
    pub address: String,

    /// Maximum number of concurrently served connections
    pub max_connections: usize,

    /// Timeout for reading the protocol selection preamble
    #[serde(with = "duration_serde")]
    pub negotiation_timeout: Duration,

    /// Timeout for graceful listener shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:9000"),
            max_connections: 1000,
            negotiation_timeout: NEGOTIATION_TIMEOUT,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        }
    }
}

impl ListenerConfig {
    /// Validate listener configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Listen address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid listen address format: '{}' (expected format: '0.0.0.0:9000')",
                self.address
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.negotiation_timeout.as_millis() < 100 {
            errors.push("Negotiation timeout too short (minimum: 100ms)".to_string());
        } else if self.negotiation_timeout.as_secs() > 60 {
            errors.push("Negotiation timeout too long (maximum: 60s)".to_string());
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Request/response policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtocolConfig {
    /// Raw-content limit for a request, before compression
    pub max_request_size: u64,

    /// Largest response chunk accepted when acting as requester
    pub max_response_chunk_size: u64,

    /// Timeout for one complete request/response exchange; 0 disables it
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    /// Compression codec name: "none" or "snappy"
    pub compression: String,

    /// Payload format name: "bincode" or "json"
    pub format: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_request_size: MAX_REQUEST_SIZE,
            max_response_chunk_size: MAX_RESPONSE_CHUNK_SIZE,
            request_timeout: REQUEST_TIMEOUT,
            compression: String::from("none"),
            format: String::from("bincode"),
        }
    }
}

impl ProtocolConfig {
    /// The configured codec, `None` when compression is disabled
    pub fn compression(&self) -> Result<Option<SharedCompression>> {
        compression::from_name(&self.compression)
    }

    /// The configured payload format
    pub fn format(&self) -> Result<SerializationFormat> {
        self.format.parse()
    }

    /// Per-stream timeout, `None` when streams inherit the governing context
    pub fn request_timeout(&self) -> Option<Duration> {
        Some(self.request_timeout).filter(|t| !t.is_zero())
    }

    /// Context factory applying the configured request timeout
    pub fn stream_context_fn(&self, governing: StreamContext) -> StreamContextFn {
        stream_context_fn(governing, self.request_timeout())
    }

    /// Describe a method under `protocol` with this policy
    pub fn rpc_method(&self, protocol: impl Into<ProtocolId>) -> Result<RpcMethod> {
        Ok(RpcMethod::new(protocol, self.max_request_size)
            .with_format(self.format()?)
            .with_max_response_chunk_size(self.max_response_chunk_size))
    }

    /// Validate protocol configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_request_size == 0 {
            errors.push("Max request size cannot be 0".to_string());
        } else if self.max_request_size > SIZE_CEILING {
            errors.push(format!(
                "Max request size too large: {} bytes (maximum: 100 MB)",
                self.max_request_size
            ));
        }

        if self.max_response_chunk_size == 0 {
            errors.push("Max response chunk size cannot be 0".to_string());
        } else if self.max_response_chunk_size > SIZE_CEILING {
            errors.push(format!(
                "Max response chunk size too large: {} bytes (maximum: 100 MB)",
                self.max_response_chunk_size
            ));
        }

        if !self.request_timeout.is_zero() && self.request_timeout.as_millis() < 10 {
            errors.push("Request timeout too short (minimum: 10ms, or 0 to disable)".to_string());
        } else if self.request_timeout.as_secs() > 300 {
            errors.push("Request timeout too long (maximum: 300s)".to_string());
        }

        if let Err(e) = self.compression() {
            errors.push(e.to_string());
        }
        if let Err(e) = self.format() {
            errors.push(e.to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level, used when `RUST_LOG` is not set
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("reqresp"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
