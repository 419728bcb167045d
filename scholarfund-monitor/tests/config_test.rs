//! Config file loading against a temporary directory

use scholarfund_monitor::config::MonitorConfig;
use tempfile::TempDir;

#[test]
fn test_missing_file_is_created_with_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("monitor.toml");

    let config = MonitorConfig::load_from(&path).unwrap();

    assert!(path.exists(), "Default config should be written");
    assert_eq!(config.config_path, path);
    assert_eq!(config.realtime.channel, "realtime-status-monitor");
    assert_eq!(config.reconnect.delay_ms, 2_000);
}

#[test]
fn test_saved_config_loads_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("monitor.toml");

    let mut config = MonitorConfig::load_from(&path).unwrap();
    config.realtime.endpoint = "https://project.example.co".to_string();
    config.realtime.channel = "ops-board".to_string();
    config.reconnect.max_attempts = Some(6);
    config.save().unwrap();

    let loaded = MonitorConfig::load_from(&path).unwrap();
    assert_eq!(loaded.realtime.endpoint, "https://project.example.co");
    assert_eq!(loaded.realtime.channel, "ops-board");
    assert_eq!(loaded.reconnect.max_attempts, Some(6));
}

#[test]
fn test_malformed_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("monitor.toml");
    std::fs::write(&path, "[realtime\nendpoint = ").unwrap();

    assert!(MonitorConfig::load_from(&path).is_err());
}

#[test]
fn test_invalid_policy_is_rejected_on_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("monitor.toml");
    std::fs::write(&path, "[reconnect]\nbackoff = 0.5\n").unwrap();

    let err = MonitorConfig::load_from(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("reconnect"));
}
