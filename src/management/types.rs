//! Management API Types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Instant;

use crate::relay::{RelaySession, SessionStats};

/// Status string carried by every successful response
pub const STATUS_OK: &str = "ok";

/// `POST /sessions` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub session_token: u32,
    pub game_server_ips: Vec<String>,
    pub game_ports: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub status: String,
    pub session_token: u32,
    pub local_port: u16,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnregisterResponse {
    pub status: String,
    pub session_token: u32,
    /// False when the token was not registered
    pub removed: bool,
}

/// `GET /sessions/{token}` body
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_token: u32,
    pub local_port: u16,
    pub current_target: SocketAddr,
    pub client_addr: Option<SocketAddr>,
    pub idle_secs: u64,
    #[serde(flatten)]
    pub stats: SessionStats,
}

impl SessionInfo {
    pub fn from_session(session: &RelaySession, now: Instant) -> Self {
        let route = session.route();
        Self {
            session_token: session.token(),
            local_port: session.local_port(),
            current_target: route.current_target,
            client_addr: route.client_addr,
            idle_secs: session.idle_for(now).as_secs(),
            stats: session.stats(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_sessions: usize,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
