//! Integration tests for configuration validation and loading

#![allow(clippy::expect_used, clippy::unwrap_used)]

use reqresp_core::config::{ListenerConfig, LoggingConfig, ProtocolConfig, ReqRespConfig};
use reqresp_core::core::serialization::SerializationFormat;
use reqresp_core::service::context::StreamContext;
use std::collections::HashMap;
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = ReqRespConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_invalid_listen_address() {
    let mut config = ReqRespConfig::default();
    config.listener.address = "invalid_address".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid listen address")));
}

#[test]
fn test_empty_listen_address() {
    let config = ListenerConfig {
        address: String::new(),
        ..ListenerConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_zero_max_connections() {
    let config = ListenerConfig {
        max_connections: 0,
        ..ListenerConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Max connections must be greater than 0")));
}

#[test]
fn test_short_negotiation_timeout() {
    let config = ListenerConfig {
        negotiation_timeout: Duration::from_millis(10),
        ..ListenerConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Negotiation timeout too short")));
}

#[test]
fn test_long_shutdown_timeout() {
    let config = ListenerConfig {
        shutdown_timeout: Duration::from_secs(120),
        ..ListenerConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Shutdown timeout too long")));
}

#[test]
fn test_zero_request_size() {
    let config = ProtocolConfig {
        max_request_size: 0,
        ..ProtocolConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Max request size cannot be 0")));
}

#[test]
fn test_excessive_response_chunk_size() {
    let config = ProtocolConfig {
        max_response_chunk_size: 1 << 40,
        ..ProtocolConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Max response chunk size too large")));
}

#[test]
fn test_zero_request_timeout_inherits() {
    let config = ProtocolConfig {
        request_timeout: Duration::ZERO,
        ..ProtocolConfig::default()
    };
    assert!(config.validate().is_empty());
    assert!(config.request_timeout().is_none());

    let root = StreamContext::background();
    let ctx = config.stream_context_fn(root.clone())();
    assert!(ctx.deadline().is_none());
    root.cancel();
    assert!(ctx.is_done());
}

#[test]
fn test_tiny_request_timeout() {
    let config = ProtocolConfig {
        request_timeout: Duration::from_millis(5),
        ..ProtocolConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Request timeout too short")));
}

#[test]
fn test_unknown_compression() {
    let config = ProtocolConfig {
        compression: "zstd".to_string(),
        ..ProtocolConfig::default()
    };
    assert_eq!(config.validate().len(), 1);
    assert!(config.compression().is_err());
}

#[test]
fn test_snappy_compression_selected() {
    let config = ProtocolConfig {
        compression: "snappy".to_string(),
        ..ProtocolConfig::default()
    };
    assert!(config.validate().is_empty());
    let codec = config.compression().unwrap().unwrap();
    assert_eq!(codec.name(), "snappy");
}

#[test]
fn test_unknown_format() {
    let config = ProtocolConfig {
        format: "msgpack".to_string(),
        ..ProtocolConfig::default()
    };
    assert_eq!(config.validate().len(), 1);
}

#[test]
fn test_rpc_method_from_policy() {
    let config = ProtocolConfig {
        max_request_size: 84,
        max_response_chunk_size: 4096,
        format: "json".to_string(),
        ..ProtocolConfig::default()
    };
    let method = config.rpc_method("/status/1").unwrap();
    assert_eq!(method.protocol.as_str(), "/status/1");
    assert_eq!(method.max_request_size, 84);
    assert_eq!(method.max_response_chunk_size, 4096);
    assert_eq!(method.format, SerializationFormat::Json);
}

#[test]
fn test_empty_app_name() {
    let config = LoggingConfig {
        app_name: String::new(),
        ..LoggingConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Application name cannot be empty")));
}

#[test]
fn test_validate_strict_with_invalid_config() {
    let config = ReqRespConfig::default_with_overrides(|c| {
        c.listener.max_connections = 0;
        c.protocol.max_request_size = 0;
    });
    let err = config.validate_strict().unwrap_err().to_string();
    assert!(err.contains("Configuration validation failed"));
    assert!(err.contains("Max connections"));
    assert!(err.contains("Max request size"));
}

#[test]
fn test_from_toml_partial() {
    let config = ReqRespConfig::from_toml(
        r#"
        [protocol]
        max_request_size = 84
        max_response_chunk_size = 1024
        request_timeout = 500
        compression = "snappy"
        format = "bincode"

        [logging]
        app_name = "status-responder"
        log_level = "debug"
        json_format = true
        "#,
    )
    .unwrap();

    assert_eq!(config.protocol.max_request_size, 84);
    assert_eq!(config.protocol.request_timeout, Duration::from_millis(500));
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert!(config.logging.json_format);
    // Missing sections fall back to defaults
    assert_eq!(config.listener.address, ListenerConfig::default().address);
    assert!(config.validate().is_empty());
}

#[test]
fn test_from_toml_rejects_garbage() {
    assert!(ReqRespConfig::from_toml("[protocol\nmax_request_size = ").is_err());
}

#[test]
fn test_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reqresp.toml");

    let config = ReqRespConfig::default_with_overrides(|c| {
        c.listener.address = "0.0.0.0:9100".to_string();
        c.protocol.compression = "snappy".to_string();
        c.logging.log_level = Level::WARN;
    });
    config.save_to_file(&path).unwrap();

    let loaded = ReqRespConfig::from_file(&path).unwrap();
    assert_eq!(loaded.listener.address, "0.0.0.0:9100");
    assert_eq!(loaded.protocol.compression, "snappy");
    assert_eq!(loaded.logging.log_level, Level::WARN);
    assert_eq!(
        loaded.protocol.request_timeout,
        config.protocol.request_timeout
    );
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = ReqRespConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_example_config_parses() {
    let example = ReqRespConfig::example_config();
    let parsed = ReqRespConfig::from_toml(&example).unwrap();
    assert!(parsed.validate().is_empty());
}

#[test]
fn test_from_vars() {
    let vars: HashMap<&str, &str> = [
        ("REQRESP_LISTEN_ADDRESS", "127.0.0.1:9200"),
        ("REQRESP_MAX_REQUEST_SIZE", "84"),
        ("REQRESP_REQUEST_TIMEOUT_MS", "0"),
        ("REQRESP_COMPRESSION", "snappy"),
        ("REQRESP_LOG_LEVEL", "trace"),
    ]
    .into_iter()
    .collect();

    let config =
        ReqRespConfig::from_vars(|name| vars.get(name).map(|v| v.to_string())).unwrap();
    assert_eq!(config.listener.address, "127.0.0.1:9200");
    assert_eq!(config.protocol.max_request_size, 84);
    assert!(config.protocol.request_timeout().is_none());
    assert_eq!(config.protocol.compression, "snappy");
    assert_eq!(config.logging.log_level, Level::TRACE);
}

#[test]
fn test_from_vars_rejects_bad_number() {
    let err = ReqRespConfig::from_vars(|name| {
        (name == "REQRESP_MAX_CONNECTIONS").then(|| "many".to_string())
    })
    .unwrap_err();
    assert!(err.to_string().contains("REQRESP_MAX_CONNECTIONS"));
}
