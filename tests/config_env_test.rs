//! Config environment variable tests
//!
//! These tests verify that Config::from_env() correctly reads and applies
//! environment variable overrides. Config::from_env() also loads a .env file
//! via dotenvy, so every test sets the variables it depends on explicitly.
//!
//! Tests use #[serial] to prevent race conditions with shared env vars.

use std::env;
use std::path::PathBuf;

use serial_test::serial;
use virtual_board::config::{Config, LogFormat, PathConfig, DEFAULT_BOARD_CONFIG_PATH};

fn set_api_key() {
    env::set_var("LANGBASE_API_KEY", "test-key");
}

#[test]
#[serial]
fn test_config_from_env_loads_with_api_key() {
    set_api_key();

    let config = Config::from_env().unwrap();
    assert_eq!(config.langbase.api_key, "test-key");
}

#[test]
#[serial]
fn test_config_from_env_requires_api_key() {
    env::remove_var("LANGBASE_API_KEY");

    // A local .env file may provide the key; only assert on failure shape.
    if let Err(e) = Config::from_env() {
        assert!(e.to_string().contains("LANGBASE_API_KEY"));
    }

    set_api_key();
}

#[test]
#[serial]
fn test_config_from_env_custom_base_url() {
    set_api_key();
    env::set_var("LANGBASE_BASE_URL", "https://custom.api.com");

    let config = Config::from_env().unwrap();
    assert_eq!(config.langbase.base_url, "https://custom.api.com");

    // Restore default
    env::remove_var("LANGBASE_BASE_URL");
}

#[test]
#[serial]
fn test_config_from_env_json_log_format() {
    set_api_key();
    env::set_var("LOG_FORMAT", "JSON");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.format, LogFormat::Json);

    // Restore default
    env::remove_var("LOG_FORMAT");
}

#[test]
#[serial]
fn test_config_from_env_unknown_log_format_is_pretty() {
    set_api_key();
    env::set_var("LOG_FORMAT", "fancy");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.format, LogFormat::Pretty);

    env::remove_var("LOG_FORMAT");
}

#[test]
#[serial]
fn test_config_from_env_custom_request_and_retry() {
    set_api_key();
    env::set_var("REQUEST_TIMEOUT_MS", "60000");
    env::set_var("RETRY_MAX_ATTEMPTS", "5");
    env::set_var("RETRY_BACKOFF_BASE_MS", "250");

    let config = Config::from_env().unwrap();
    assert_eq!(config.request.timeout_ms, 60000);
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.backoff_base_ms, 250);

    // Restore defaults
    env::remove_var("REQUEST_TIMEOUT_MS");
    env::remove_var("RETRY_MAX_ATTEMPTS");
    env::remove_var("RETRY_BACKOFF_BASE_MS");
}

#[test]
#[serial]
fn test_config_from_env_invalid_numbers_use_defaults() {
    set_api_key();
    env::set_var("REQUEST_TIMEOUT_MS", "soon");
    env::set_var("RETRY_MAX_ATTEMPTS", "-1");

    let config = Config::from_env().unwrap();
    assert_eq!(config.request.timeout_ms, 30000);
    assert_eq!(config.retry.max_attempts, 3);

    env::remove_var("REQUEST_TIMEOUT_MS");
    env::remove_var("RETRY_MAX_ATTEMPTS");
}

#[test]
#[serial]
fn test_config_from_env_custom_pipes() {
    set_api_key();
    env::set_var("PIPE_ANALYST", "my-analyst");
    env::set_var("PIPE_PERSONA", "my-persona");

    let config = Config::from_env().unwrap();
    assert_eq!(config.pipes.analyst, "my-analyst");
    assert_eq!(config.pipes.persona, "my-persona");
    assert_eq!(config.pipes.moderator, "vb-moderator-v1");

    env::remove_var("PIPE_ANALYST");
    env::remove_var("PIPE_PERSONA");
}

#[test]
#[serial]
fn test_config_from_env_custom_paths() {
    set_api_key();
    env::set_var("BOARD_CONFIG", "/tmp/board.yaml");
    env::set_var("EXPORT_DIR", "/tmp/exports");

    let config = Config::from_env().unwrap();
    assert_eq!(config.paths.board_config, PathBuf::from("/tmp/board.yaml"));
    assert_eq!(config.paths.export_dir, PathBuf::from("/tmp/exports"));

    env::remove_var("BOARD_CONFIG");
    env::remove_var("EXPORT_DIR");
}

#[test]
#[serial]
fn test_board_config_path_default_and_override() {
    env::remove_var("BOARD_CONFIG");
    assert_eq!(
        PathConfig::board_config_from_env(),
        PathBuf::from(DEFAULT_BOARD_CONFIG_PATH)
    );

    env::set_var("BOARD_CONFIG", "/tmp/other.yaml");
    assert_eq!(
        PathConfig::board_config_from_env(),
        PathBuf::from("/tmp/other.yaml")
    );
    env::remove_var("BOARD_CONFIG");
}
