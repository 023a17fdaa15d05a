//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{bail, Context};
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Smallest accepted client socket buffer
pub const MIN_SOCKET_BUFFER: usize = 64 * 1024;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Manages configuration loading and validation.
///
/// Loaders only parse; [`Config::validate`] runs once every source, including
/// CLI overrides, has been merged.
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from a TOML file. An empty `api.key` is filled from
    /// `RELAY_API_KEY`.
    pub fn load_from_file(path: &Path) -> Result<Config> {
        tracing::info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        if config.api.key.is_empty() {
            if let Ok(key) = std::env::var("RELAY_API_KEY") {
                config.api.key = key;
            }
        }

        Ok(config)
    }

    /// Load configuration from `RELAY_*` environment variables over defaults
    pub fn load_from_env() -> Result<Config> {
        Self::load_from_vars(|name| std::env::var(name).ok())
    }

    /// Apply variables from `lookup` over defaults
    pub fn load_from_vars<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(key) = lookup("RELAY_API_KEY") {
            config.api.key = key;
        }

        if let Some(bind_addr) = lookup("RELAY_BIND_ADDR") {
            config.relay.bind_addr = parse_var::<IpAddr>("RELAY_BIND_ADDR", &bind_addr)?;
        }

        if let Some(port) = lookup("RELAY_PORT") {
            config.relay.port = parse_var("RELAY_PORT", &port)?;
        }

        if let Some(port) = lookup("RELAY_API_PORT") {
            config.api.port = parse_var("RELAY_API_PORT", &port)?;
        }

        if let Some(port) = lookup("RELAY_METRICS_PORT") {
            config.metrics.port = parse_var("RELAY_METRICS_PORT", &port)?;
        }

        if let Some(max_sessions) = lookup("RELAY_MAX_SESSIONS") {
            config.sessions.max_sessions = parse_var("RELAY_MAX_SESSIONS", &max_sessions)?;
        }

        if let Some(timeout) = lookup("RELAY_SESSION_TIMEOUT") {
            config.sessions.idle_timeout = parse_duration(&timeout)
                .with_context(|| format!("Invalid RELAY_SESSION_TIMEOUT: {}", timeout))?;
        }

        if let Some(interval) = lookup("RELAY_REAPER_INTERVAL") {
            config.sessions.reaper_interval = parse_duration(&interval)
                .with_context(|| format!("Invalid RELAY_REAPER_INTERVAL: {}", interval))?;
        }

        if let Some(buffer) = lookup("RELAY_SOCKET_BUFFER") {
            config.relay.socket_buffer = parse_var("RELAY_SOCKET_BUFFER", &buffer)?;
        }

        if let Some(log_level) = lookup("RELAY_LOG_LEVEL") {
            config.logging.level = log_level;
        }

        Ok(config)
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse::<T>()
        .with_context(|| format!("Invalid {}: {}", name, value))
}

/// Bare integers are seconds; anything else goes through humantime (`90s`, `5m`)
pub fn parse_duration(value: &str) -> Result<Duration> {
    let trimmed = value.trim();
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    Ok(humantime::parse_duration(trimmed)?)
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_relay_config()
            .with_context(|| "Relay configuration validation failed")?;

        self.validate_api_config()
            .with_context(|| "API configuration validation failed")?;

        self.validate_session_config()
            .with_context(|| "Session configuration validation failed")?;

        self.validate_logging_config()
            .with_context(|| "Logging configuration validation failed")?;

        Ok(())
    }

    fn validate_relay_config(&self) -> Result<()> {
        if self.relay.socket_buffer < MIN_SOCKET_BUFFER {
            bail!("relay.socket_buffer must be at least {} bytes", MIN_SOCKET_BUFFER);
        }

        Ok(())
    }

    fn validate_api_config(&self) -> Result<()> {
        if self.api.key.trim().is_empty() {
            bail!("api.key must be set (RELAY_API_KEY or --api-key)");
        }

        if self.api.port == self.metrics.port && self.api.port != 0 {
            bail!("api.port and metrics.port must differ (both {})", self.api.port);
        }

        Ok(())
    }

    fn validate_session_config(&self) -> Result<()> {
        if self.sessions.max_sessions == 0 {
            bail!("sessions.max_sessions must be greater than 0");
        }

        if self.sessions.idle_timeout.is_zero() {
            bail!("sessions.idle_timeout must be greater than 0");
        }

        if self.sessions.reaper_interval.is_zero() {
            bail!("sessions.reaper_interval must be greater than 0");
        }

        if self.sessions.reaper_interval > self.sessions.idle_timeout {
            bail!(
                "sessions.reaper_interval ({:?}) cannot exceed sessions.idle_timeout ({:?})",
                self.sessions.reaper_interval,
                self.sessions.idle_timeout
            );
        }

        Ok(())
    }

    fn validate_logging_config(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            bail!("logging.level must be one of: {}", VALID_LOG_LEVELS.join(", "));
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        relay_port: Option<u16>,
        api_port: Option<u16>,
        metrics_port: Option<u16>,
        api_key: Option<&str>,
        log_level: Option<&str>,
    ) {
        if let Some(port) = relay_port {
            self.relay.port = port;
            tracing::info!("CLI override: relay port set to {}", port);
        }

        if let Some(port) = api_port {
            self.api.port = port;
            tracing::info!("CLI override: API port set to {}", port);
        }

        if let Some(port) = metrics_port {
            self.metrics.port = port;
            tracing::info!("CLI override: metrics port set to {}", port);
        }

        if let Some(key) = api_key {
            self.api.key = key.to_string();
            tracing::info!("CLI override: API key set");
        }

        if let Some(level) = log_level {
            self.logging.level = level.to_string();
            tracing::info!("CLI override: log level set to {}", level);
        }
    }
}
