//! Management API Handlers

use super::types::*;
use crate::relay::{RegisterError, SessionTable};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Shared application state for handlers
#[derive(Clone)]
pub struct AppState {
    pub table: Arc<SessionTable>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(table: Arc<SessionTable>) -> Self {
        Self {
            table,
            start_time: Instant::now(),
        }
    }
}

/// Error response with a JSON `{error}` body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl From<RegisterError> for ApiError {
    fn from(err: RegisterError) -> Self {
        let status = match &err {
            RegisterError::AllowList(_) => StatusCode::BAD_REQUEST,
            RegisterError::CapacityReached(_) => StatusCode::SERVICE_UNAVAILABLE,
            RegisterError::Socket(e) => {
                error!(error = %e, "Failed to open backend socket");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Health check handler
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: STATUS_OK.to_string(),
        active_sessions: state.table.len(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// Register or replace a session
pub async fn register_session(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let registration = state
        .table
        .register(
            request.session_token,
            &request.game_server_ips,
            &request.game_ports,
        )
        .await?;

    info!(
        token = registration.session_token,
        local_port = registration.local_port,
        ips = ?request.game_server_ips,
        ports = ?request.game_ports,
        "Session registered via management API"
    );

    Ok(Json(RegisterResponse {
        status: STATUS_OK.to_string(),
        session_token: registration.session_token,
        local_port: registration.local_port,
    }))
}

/// Unregister a session; absent tokens still succeed
pub async fn unregister_session(
    State(state): State<AppState>,
    Path(token): Path<u32>,
) -> Json<UnregisterResponse> {
    let removed = state.table.remove(token);
    if removed {
        info!(token, "Session unregistered via management API");
    }

    Json(UnregisterResponse {
        status: STATUS_OK.to_string(),
        session_token: token,
        removed,
    })
}

/// Session details
pub async fn get_session(
    State(state): State<AppState>,
    Path(token): Path<u32>,
) -> Result<Json<SessionInfo>, ApiError> {
    let session = state
        .table
        .get(token)
        .ok_or_else(|| ApiError::not_found(format!("session {} not found", token)))?;

    Ok(Json(SessionInfo::from_session(&session, Instant::now())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RelayMetrics;
    use tokio::net::UdpSocket;

    async fn create_test_state(max_sessions: usize) -> AppState {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let metrics = Arc::new(RelayMetrics::new().unwrap());
        AppState::new(Arc::new(SessionTable::new(socket, metrics, max_sessions)))
    }

    fn request(token: u32, ips: &[&str], ports: &[&str]) -> RegisterRequest {
        RegisterRequest {
            session_token: token,
            game_server_ips: ips.iter().map(|s| s.to_string()).collect(),
            game_ports: ports.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_health_check() {
        let state = create_test_state(10).await;
        let response = health_check(State(state)).await;
        assert_eq!(response.0.status, "ok");
        assert_eq!(response.0.active_sessions, 0);
    }

    #[tokio::test]
    async fn test_register_and_get_session() {
        let state = create_test_state(10).await;

        let response = register_session(
            State(state.clone()),
            Json(request(42, &["127.0.0.1"], &["27015"])),
        )
        .await
        .unwrap();
        assert_eq!(response.0.status, "ok");
        assert_eq!(response.0.session_token, 42);

        let info = get_session(State(state.clone()), Path(42)).await.unwrap();
        assert_eq!(info.0.local_port, response.0.local_port);
        assert_eq!(info.0.current_target, "127.0.0.1:27015".parse().unwrap());
        assert_eq!(info.0.client_addr, None);
    }

    #[tokio::test]
    async fn test_register_error_statuses() {
        let state = create_test_state(1).await;

        let err = register_session(State(state.clone()), Json(request(1, &[], &["1"])))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        register_session(State(state.clone()), Json(request(1, &["127.0.0.1"], &["1"])))
            .await
            .unwrap();
        let err = register_session(State(state), Json(request(2, &["127.0.0.1"], &["1"])))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unregister_unknown_session() {
        let state = create_test_state(10).await;
        let response = unregister_session(State(state), Path(999)).await;
        assert_eq!(response.0.status, "ok");
        assert!(!response.0.removed);
    }

    #[tokio::test]
    async fn test_get_unknown_session() {
        let state = create_test_state(10).await;
        let err = get_session(State(state), Path(7)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
