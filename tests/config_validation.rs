//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use opcua_uacp::config::{ClientConfig, LoggingConfig, SecurityConfig, ServerConfig, UacpConfig};
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = UacpConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
    assert!(config.validate_strict().is_ok());
}

#[test]
fn test_buffer_below_minimum() {
    let mut config = UacpConfig::default();
    config.server.receive_buffer_size = 4096;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("receive buffer too small")));
}

#[test]
fn test_buffer_above_maximum() {
    let mut config = UacpConfig::default();
    config.client.send_buffer_size = 64 * 1024 * 1024;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("send buffer too large")));
}

#[test]
fn test_invalid_endpoint_url() {
    let mut config = UacpConfig::default();
    config.server.endpoint_url = "http://localhost:4840".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid server endpoint URL")));
}

#[test]
fn test_empty_client_endpoint_is_allowed() {
    let config = UacpConfig::default_with_overrides(|c| c.client.endpoint_url.clear());
    assert!(config.validate().is_empty());
}

#[test]
fn test_max_message_smaller_than_buffer() {
    let config = UacpConfig::default_with_overrides(|c| c.server.max_message_size = 1024);
    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("smaller than its receive buffer")));
}

#[test]
fn test_handshake_timeout_bounds() {
    let mut config = UacpConfig::default();
    config.server.handshake_timeout = Duration::from_millis(10);
    config.client.handshake_timeout = Duration::from_secs(600);

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Server handshake timeout too short")));
    assert!(errors.iter().any(|e| e.contains("Client handshake timeout too long")));
}

#[test]
fn test_renewal_fraction_range() {
    for fraction in [0.0, 1.0, -0.5, f64::NAN] {
        let security = SecurityConfig {
            renewal_fraction: fraction,
            ..SecurityConfig::default()
        };
        assert!(
            security
                .validate()
                .iter()
                .any(|e| e.contains("Invalid renewal fraction")),
            "fraction {fraction} should be rejected"
        );
    }
}

#[test]
fn test_token_lifetime_limits() {
    let short = SecurityConfig {
        requested_lifetime: Duration::from_millis(10),
        ..SecurityConfig::default()
    };
    assert!(!short.validate().is_empty());

    let default = SecurityConfig::default();
    assert_eq!(default.requested_lifetime_ms(), 3_600_000);
}

#[test]
fn test_file_logging_requires_path() {
    let logging = LoggingConfig {
        log_to_file: true,
        log_file_path: None,
        ..LoggingConfig::default()
    };
    assert!(logging
        .validate()
        .iter()
        .any(|e| e.contains("log_file_path must be specified")));
}

#[test]
fn test_no_logging_output() {
    let logging = LoggingConfig {
        log_to_console: false,
        ..LoggingConfig::default()
    };
    assert!(!logging.validate().is_empty());
}

#[test]
fn test_strict_validation_lists_all_errors() {
    let mut config = UacpConfig::default();
    config.server.server_uri.clear();
    config.logging.app_name.clear();

    let err = config.validate_strict().unwrap_err().to_string();
    assert!(err.contains("Server URI cannot be empty"));
    assert!(err.contains("Application name cannot be empty"));
}

#[test]
fn test_toml_round_trip() {
    let toml = r#"
        [server]
        server_uri = "urn:example:plant"
        endpoint_url = "opc.tcp://plant:4840/UA"
        protocol_version = 0
        receive_buffer_size = 32768
        send_buffer_size = 32768
        max_message_size = 0
        max_chunk_count = 16
        max_endpoint_url_length = 1024
        handshake_timeout = 2000

        [logging]
        app_name = "plant"
        log_level = "debug"
        log_to_console = true
        log_to_file = false
        json_format = true
    "#;

    let config = UacpConfig::from_toml(toml).unwrap();
    assert_eq!(config.server.server_uri, "urn:example:plant");
    assert_eq!(config.server.max_chunk_count, 16);
    assert_eq!(config.server.handshake_timeout, Duration::from_secs(2));
    assert_eq!(config.logging.log_level, Level::DEBUG);
    // sections left out fall back to defaults
    assert_eq!(config.client.receive_buffer_size, ClientConfig::default().receive_buffer_size);
    assert!(config.validate().is_empty());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("uacp.toml");
    config.save_to_file(&path).unwrap();
    let loaded = UacpConfig::from_file(&path).unwrap();
    assert_eq!(loaded.server.endpoint_url, config.server.endpoint_url);
    assert_eq!(loaded.security.token_grace_period, Duration::from_secs(5));
}

#[test]
fn test_invalid_toml_is_config_error() {
    let err = UacpConfig::from_toml("[server]\nreceive_buffer_size = \"big\"").unwrap_err();
    assert!(err.to_string().contains("Invalid TOML config"));
}

#[test]
fn test_example_config_parses() {
    let example = UacpConfig::example_config();
    let parsed = UacpConfig::from_toml(&example).unwrap();
    assert_eq!(
        parsed.server.max_endpoint_url_length,
        ServerConfig::default().max_endpoint_url_length
    );
}
