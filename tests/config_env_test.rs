//! Config environment variable tests
//!
//! These tests verify that Config::from_env() correctly reads and applies
//! environment variable overrides. Note that Config::from_env() also loads
//! from .env file via dotenvy, so these tests focus on override behavior.
//!
//! Tests use #[serial] to prevent race conditions with shared env vars.

use mcp_sequential_thinking::config::{Config, LogFormat};
use mcp_sequential_thinking::cycle::StepKind;
use serial_test::serial;
use std::env;

#[test]
#[serial]
fn test_config_from_env_loads_successfully() {
    let result = Config::from_env();
    assert!(result.is_ok(), "Config::from_env() needs no variables");
}

#[test]
#[serial]
fn test_config_from_env_custom_database() {
    env::set_var("DATABASE_PATH", "/custom/path.db");
    env::set_var("DATABASE_MAX_CONNECTIONS", "10");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.path.to_str().unwrap(), "/custom/path.db");
    assert_eq!(config.database.max_connections, 10);

    env::remove_var("DATABASE_PATH");
    env::remove_var("DATABASE_MAX_CONNECTIONS");
}

#[test]
#[serial]
fn test_config_from_env_json_log_format() {
    env::set_var("LOG_FORMAT", "json");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.format, LogFormat::Json);

    env::remove_var("LOG_FORMAT");
}

#[test]
#[serial]
fn test_config_from_env_log_level() {
    env::set_var("LOG_LEVEL", "debug");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.level, "debug");

    env::remove_var("LOG_LEVEL");
}

#[test]
#[serial]
fn test_config_invalid_number_uses_default() {
    env::set_var("DATABASE_MAX_CONNECTIONS", "not-a-number");
    env::set_var("CONTEXT_TOKEN_BUDGET", "lots");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.max_connections, 5);
    assert_eq!(config.chunker.token_budget, 25_000);

    env::remove_var("DATABASE_MAX_CONNECTIONS");
    env::remove_var("CONTEXT_TOKEN_BUDGET");
}

#[test]
#[serial]
fn test_config_from_env_chunker() {
    env::set_var("CONTEXT_TOKEN_BUDGET", "8000");
    env::set_var("CONTEXT_UNIT_OVERHEAD", "2");
    env::set_var("HIGH_CONFIDENCE_THRESHOLD", "0.75");

    let config = Config::from_env().unwrap();
    assert_eq!(config.chunker.token_budget, 8000);
    assert_eq!(config.chunker.unit_overhead, 2);
    assert_eq!(config.chunker.high_confidence_threshold, 0.75);

    env::remove_var("CONTEXT_TOKEN_BUDGET");
    env::remove_var("CONTEXT_UNIT_OVERHEAD");
    env::remove_var("HIGH_CONFIDENCE_THRESHOLD");
}

#[test]
#[serial]
fn test_config_from_env_auto_cycle() {
    env::set_var("AUTO_CYCLE_PASS_THRESHOLD", "0.8");
    env::set_var("AUTO_CYCLE_CONFIDENCE_THRESHOLD", "0.5");
    env::set_var("AUTO_CYCLE_SKIP_STEPS", "package_discovery, Validation,");
    env::set_var("PACKAGE_RELEVANCE_THRESHOLD", "0.1");

    let config = Config::from_env().unwrap();
    assert_eq!(config.auto_cycle.pass_threshold, 0.8);
    assert_eq!(config.auto_cycle.confidence_threshold, 0.5);
    assert_eq!(
        config.auto_cycle.skip_steps,
        vec![StepKind::PackageDiscovery, StepKind::Validation]
    );
    assert_eq!(config.auto_cycle.package_relevance_threshold, 0.1);

    env::remove_var("AUTO_CYCLE_PASS_THRESHOLD");
    env::remove_var("AUTO_CYCLE_CONFIDENCE_THRESHOLD");
    env::remove_var("AUTO_CYCLE_SKIP_STEPS");
    env::remove_var("PACKAGE_RELEVANCE_THRESHOLD");
}

#[test]
#[serial]
fn test_config_threshold_out_of_range_is_error() {
    env::set_var("AUTO_CYCLE_PASS_THRESHOLD", "1.5");

    let result = Config::from_env();
    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("AUTO_CYCLE_PASS_THRESHOLD"));

    env::remove_var("AUTO_CYCLE_PASS_THRESHOLD");
}

#[test]
#[serial]
fn test_config_unknown_skip_step_is_error() {
    env::set_var("AUTO_CYCLE_SKIP_STEPS", "Meditation");

    let result = Config::from_env();
    assert!(result.is_err());

    env::remove_var("AUTO_CYCLE_SKIP_STEPS");
}
