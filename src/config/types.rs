//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub relay: RelayConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub sessions: SessionConfig,
    pub logging: LoggingConfig,
}

/// Client-facing UDP listener
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address every listener binds to
    pub bind_addr: IpAddr,
    pub port: u16,
    /// SO_RCVBUF / SO_SNDBUF for the client socket, in bytes
    pub socket_buffer: usize,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Control API
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
    /// Shared secret expected in `X-API-Key`
    pub key: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub port: u16,
}

/// Session table limits and expiry
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_sessions: usize,
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub reaper_interval: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 443,
            socket_buffer: 4 * 1024 * 1024,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: 8443,
            key: String::new(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { port: 9090 }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 1000,
            idle_timeout: Duration::from_secs(300),
            reaper_interval: Duration::from_secs(60),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// UDP data-plane address
    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.relay.bind_addr, self.relay.port)
    }

    pub fn api_addr(&self) -> SocketAddr {
        SocketAddr::new(self.relay.bind_addr, self.api.port)
    }

    pub fn metrics_addr(&self) -> SocketAddr {
        SocketAddr::new(self.relay.bind_addr, self.metrics.port)
    }
}
