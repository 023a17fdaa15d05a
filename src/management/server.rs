//! Management API Server

use super::{api::ManagementApi, auth::ApiAuth, handlers::AppState};
use crate::relay::SessionTable;
use crate::Result;
use anyhow::Context;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use crate::shutdown::ShutdownSignal;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Management API server
pub struct ManagementServer {
    listener: TcpListener,
    app_state: AppState,
    auth: Arc<ApiAuth>,
}

impl ManagementServer {
    /// Bind the management API listener. Port 0 picks an ephemeral port.
    pub async fn bind(bind_addr: SocketAddr, table: Arc<SessionTable>, api_key: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind management API server to {}", bind_addr))?;

        Ok(Self {
            listener,
            app_state: AppState::new(table),
            auth: Arc::new(ApiAuth::new(api_key)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Router sharing this server's state, for in-process requests
    pub fn router(&self) -> Router {
        ManagementApi::create_router(self.app_state.clone(), self.auth.clone())
    }

    /// Serve until a shutdown signal arrives
    pub async fn start(self, mut shutdown: ShutdownSignal) -> Result<()> {
        let addr = self.local_addr()?;
        let app = self.router();

        info!("Management API server listening on {}", addr);

        let result = axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                shutdown.recv().await;
            })
            .await;

        if let Err(e) = result {
            error!("Management API server error: {}", e);
            return Err(e.into());
        }

        info!("Management API server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RelayMetrics;
    use tokio::net::UdpSocket;

    #[tokio::test]
    async fn test_management_server_creation() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let metrics = Arc::new(RelayMetrics::new().unwrap());
        let table = Arc::new(SessionTable::new(socket, metrics, 10));

        let server = ManagementServer::bind("127.0.0.1:0".parse().unwrap(), table, "key")
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);

        // Test that we can create a router
        let _router = server.router();
    }
}
