//! Logging setup. Kept in its own test binary because the subscriber is global.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use opcua_uacp::config::LoggingConfig;
use opcua_uacp::ProtocolError;
use tempfile::tempdir;

#[test]
fn test_file_logging_installs_once() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("uacp.log");

    let missing_path = LoggingConfig {
        log_to_console: false,
        log_to_file: true,
        log_file_path: None,
        ..Default::default()
    };
    assert!(matches!(
        opcua_uacp::utils::logging::init_logging(&missing_path),
        Err(ProtocolError::ConfigError(_))
    ));

    let config = LoggingConfig {
        log_to_console: false,
        log_to_file: true,
        log_file_path: Some(path.clone()),
        json_format: true,
        ..Default::default()
    };
    opcua_uacp::utils::logging::init_logging(&config).expect("first install succeeds");
    assert!(path.exists());

    // a second global subscriber is refused
    assert!(opcua_uacp::utils::logging::init_logging(&config).is_err());
}
