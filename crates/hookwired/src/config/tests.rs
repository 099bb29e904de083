//! Tests for runtime configuration loading.

use std::fs;

use rstest::rstest;
use tempfile::TempDir;

use super::*;

#[test]
fn defaults_are_valid() {
    let config = RuntimeConfig::load(None).expect("defaults load");

    assert_eq!(config.activation_workers, 4);
    assert_eq!(config.health_check.ping_attempts, 3);
    assert!(!config.health_check.restart_on_failure);
    assert_eq!(config.hook_timeout(), Some(Duration::from_secs(30)));
    assert_eq!(config.shutdown_grace(), Duration::from_secs(10));
}

#[test]
fn partial_file_keeps_remaining_defaults() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("hookwired.json");
    fs::write(
        &path,
        r#"{
            "plugin_directory": "/srv/plugins",
            "plugin_states": { "tax.flat": true },
            "hook_timeout_secs": 0,
            "health_check": { "restart_on_failure": true },
            "log_format": "compact"
        }"#,
    )
    .expect("write config");

    let config = RuntimeConfig::load(Some(&path)).expect("config loads");

    assert_eq!(config.plugin_directory, PathBuf::from("/srv/plugins"));
    assert_eq!(config.plugin_states.get("tax.flat"), Some(&true));
    assert_eq!(config.hook_timeout(), None);
    assert!(config.health_check.restart_on_failure);
    assert_eq!(config.health_check.interval_secs, 30);
    assert_eq!(config.log_format(), LogFormat::Compact);
}

#[rstest]
#[case::no_workers(RuntimeConfig { activation_workers: 0, ..RuntimeConfig::default() })]
#[case::no_pings(RuntimeConfig {
    health_check: HealthCheckConfig { ping_attempts: 0, ..HealthCheckConfig::default() },
    ..RuntimeConfig::default()
})]
#[case::bad_host_version(RuntimeConfig { host_version: "v-next".into(), ..RuntimeConfig::default() })]
#[case::blank_filter(RuntimeConfig { log_filter: " ".into(), ..RuntimeConfig::default() })]
fn invalid_values_are_rejected(#[case] config: RuntimeConfig) {
    assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
}

#[test]
fn unreadable_file_is_reported() {
    let dir = TempDir::new().expect("temp dir");

    let result = RuntimeConfig::load(Some(&dir.path().join("missing.json")));

    assert!(matches!(result, Err(ConfigError::Read { .. })));
}

#[test]
fn log_format_parses_case_insensitively() {
    assert_eq!("JSON".parse::<LogFormat>().ok(), Some(LogFormat::Json));
}
