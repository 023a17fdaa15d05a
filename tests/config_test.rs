//! Configuration file loading

use plg_relay::config::ConfigManager;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_full_config_file() {
    let file = write_config(
        r#"
[relay]
bind_addr = "127.0.0.1"
port = 5443
socket_buffer = 1048576
shutdown_timeout = "5s"

[api]
port = 8080
key = "file-key"

[metrics]
port = 9100

[sessions]
max_sessions = 50
idle_timeout = "2m"
reaper_interval = "30s"

[logging]
level = "debug"
"#,
    );

    let config = ConfigManager::load_from_file(file.path()).unwrap();
    assert_eq!(config.udp_addr().to_string(), "127.0.0.1:5443");
    assert_eq!(config.api_addr().to_string(), "127.0.0.1:8080");
    assert_eq!(config.metrics_addr().to_string(), "127.0.0.1:9100");
    assert_eq!(config.api.key, "file-key");
    assert_eq!(config.sessions.max_sessions, 50);
    assert_eq!(config.sessions.idle_timeout, Duration::from_secs(120));
    assert_eq!(config.sessions.reaper_interval, Duration::from_secs(30));
    assert_eq!(config.relay.shutdown_timeout, Duration::from_secs(5));
    assert_eq!(config.logging.level, "debug");
    assert!(config.validate().is_ok());
}

#[test]
fn test_partial_config_uses_defaults() {
    let file = write_config(
        r#"
[api]
key = "only-key"
"#,
    );

    let config = ConfigManager::load_from_file(file.path()).unwrap();
    assert_eq!(config.relay.port, 443);
    assert_eq!(config.api.port, 8443);
    assert_eq!(config.metrics.port, 9090);
    assert_eq!(config.sessions.idle_timeout, Duration::from_secs(300));
    assert!(config.validate().is_ok());
}

#[test]
fn test_invalid_config_file() {
    let file = write_config("[relay]\nport = \"not a number\"\n");
    assert!(ConfigManager::load_from_file(file.path()).is_err());

    let file = write_config(
        r#"
[api]
key = "k"

[sessions]
idle_timeout = "10s"
reaper_interval = "1m"
"#,
    );
    let config = ConfigManager::load_from_file(file.path()).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_missing_config_file() {
    let result = ConfigManager::load_from_file(std::path::Path::new("/nonexistent/relay.toml"));
    assert!(result.is_err());
}
