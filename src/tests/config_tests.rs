//! Tests for the configuration module.
//!
//! This module contains tests for configuration loading, validation, and usage.

use std::fs;

use tempfile::tempdir;

use crate::config::endpoint::MAX_INITIAL_REQUEST_ID;
use crate::config::{ConfigLoader, EngineConfig, Validate};
use crate::error::ConfigError;

/// Test that default configuration can be created and is valid.
#[test]
fn test_default_config_is_valid() {
    let config = EngineConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.endpoint.initial_request_id, 1);
    assert_eq!(config.endpoint.default_timeout_ms, 30000);
    assert!(config.endpoint.ping_interval().is_none());
    assert_eq!(config.protocol.supported_versions, vec!["2025-06-18", "2025-03-26"]);
    assert_eq!(config.limits.window_ms, 1000);
    assert_eq!(config.log.level, "info");
}

/// Test that configuration validation catches invalid values.
#[test]
fn test_config_validation() {
    let mut config = EngineConfig::default();

    config.limits.tools_per_window = 0;
    assert!(config.validate().is_err());

    config.limits.tools_per_window = 5;
    config.protocol.supported_versions.clear();
    assert!(config.validate().is_err());

    config.protocol.supported_versions = vec!["2025-06-18".to_string()];
    config.endpoint.default_timeout_ms = 0;
    assert!(config.validate().is_err());

    config.endpoint.default_timeout_ms = 100;
    config.log.level = "chatty".to_string();
    assert!(config.validate().is_err());

    config.log.level = "debug".to_string();
    assert!(config.validate().is_ok());
}

/// Ping settings only matter once probing is enabled.
#[test]
fn test_ping_settings_validated_when_enabled() {
    let mut config = EngineConfig::default();
    config.endpoint.max_ping_failures = 0;
    assert!(config.validate().is_ok());

    config.endpoint.ping_interval_ms = 500;
    assert!(config.validate().is_err());
}

/// Request ids must start low enough that the counter never overflows.
#[test]
fn test_initial_request_id_bounds() {
    let mut config = EngineConfig::default();
    config.endpoint.initial_request_id = MAX_INITIAL_REQUEST_ID;
    assert!(config.validate().is_ok());

    config.endpoint.initial_request_id = i64::MAX;
    assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

    config.endpoint.initial_request_id = -1;
    assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

    config.endpoint.initial_request_id = 0;
    assert!(config.validate().is_ok());
}

/// Test loading configuration from a file.
#[test]
fn test_load_config_from_file() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config_file_test.toml");

    let config_content = r#"
    [endpoint]
    initial_request_id = 100
    ping_interval_ms = 2000

    [protocol]
    server_name = "file-server"

    [limits]
    tools_per_window = 7
    "#;
    fs::write(&config_path, config_content).unwrap();

    let loader = ConfigLoader::new(Some(&config_path), "TEST_FILE");
    let config = loader.load().unwrap();

    assert_eq!(config.endpoint.initial_request_id, 100);
    assert_eq!(config.endpoint.ping_interval_ms, 2000);
    assert_eq!(config.protocol.server_name, "file-server");
    assert_eq!(config.limits.tools_per_window, 7);

    // Other values should be defaults
    assert_eq!(config.limits.window_ms, 1000);
    assert_eq!(config.endpoint.default_timeout_ms, 30000);
}

/// Test loading configuration with environment variable overrides.
#[test]
fn test_env_var_override() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config_env_test.toml");
    fs::write(&config_path, "[limits]\nlogs_per_window = 3\n").unwrap();

    std::env::set_var("TEST_ENV_LIMITS__LOGS_PER_WINDOW", "9");
    std::env::set_var("TEST_ENV_PROTOCOL__SERVER_NAME", "env-server");

    let loader = ConfigLoader::new(Some(&config_path), "TEST_ENV");
    let config = loader.load();

    std::env::remove_var("TEST_ENV_LIMITS__LOGS_PER_WINDOW");
    std::env::remove_var("TEST_ENV_PROTOCOL__SERVER_NAME");

    let config = config.unwrap();
    assert_eq!(config.limits.logs_per_window, 9);
    assert_eq!(config.protocol.server_name, "env-server");
}

/// Test that a missing file is reported as such.
#[test]
fn test_missing_config_file() {
    let dir = tempdir().unwrap();
    let loader = ConfigLoader::new(Some(dir.path().join("absent.toml")), "TEST_MISSING");
    assert!(matches!(loader.load(), Err(ConfigError::FileNotFound(_))));
}

/// Test that loading an invalid configuration file returns an error.
#[test]
fn test_load_invalid_config() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("invalid.toml");

    let config_content = r#"
    [limits
    window_ms = soon"
    "#;
    fs::write(&config_path, config_content).unwrap();

    let loader = ConfigLoader::new(Some(&config_path), "TEST_INVALID");
    assert!(matches!(loader.load(), Err(ConfigError::ParseError(_))));
}

/// Values that parse but fail validation are rejected by the loader.
#[test]
fn test_loader_validates() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("zero.json");
    fs::write(&config_path, r#"{"limits": {"window_ms": 0}}"#).unwrap();

    let loader = ConfigLoader::new(Some(&config_path), "TEST_ZERO");
    assert!(matches!(loader.load(), Err(ConfigError::ValidationError(_))));
}

/// Unknown extensions are refused.
#[test]
fn test_unsupported_extension() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.ini");
    fs::write(&config_path, "window_ms=1").unwrap();

    let loader = ConfigLoader::new(Some(&config_path), "TEST_EXT");
    assert!(matches!(loader.load(), Err(ConfigError::UnsupportedFormat(_))));
}

/// The generated default file loads back to the defaults.
#[test]
fn test_generated_config_loads() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("generated.toml");
    fs::write(&config_path, toml::to_string_pretty(&EngineConfig::default()).unwrap()).unwrap();

    let config = ConfigLoader::new(Some(&config_path), "TEST_GEN").load().unwrap();
    assert_eq!(config.limits.progress_per_window, 20);
    assert_eq!(config.protocol.server_name, "mcp-conduit");
}
