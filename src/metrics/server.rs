//! Metrics HTTP Server
//!
//! Provides HTTP endpoint for Prometheus metrics scraping

use crate::metrics::RelayMetrics;
use crate::shutdown::ShutdownSignal;
use crate::Result;
use anyhow::Context;
use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// HTTP server for serving Prometheus metrics
pub struct MetricsServer {
    metrics: Arc<RelayMetrics>,
    listener: TcpListener,
}

impl MetricsServer {
    /// Bind the metrics listener. Port 0 picks an ephemeral port.
    pub async fn bind(metrics: Arc<RelayMetrics>, bind_addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind metrics server to {}", bind_addr))?;

        Ok(Self { metrics, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Router exposing `GET /metrics`
    pub fn router(metrics: Arc<RelayMetrics>) -> Router {
        Router::new()
            .route("/metrics", get(export_metrics))
            .with_state(metrics)
    }

    /// Serve until a shutdown signal arrives
    pub async fn start(self, mut shutdown: ShutdownSignal) -> Result<()> {
        let addr = self.local_addr()?;
        info!(bind_addr = %addr, "Metrics server started");

        let app = Self::router(self.metrics);
        let result = axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                shutdown.recv().await;
            })
            .await;

        if let Err(e) = result {
            error!(error = %e, "Metrics server error");
            return Err(e.into());
        }

        debug!("Metrics server stopped");
        Ok(())
    }
}

async fn export_metrics(State(metrics): State<Arc<RelayMetrics>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
        metrics.export_prometheus(),
    )
}
