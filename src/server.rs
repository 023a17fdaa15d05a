//! Relay Server
//!
//! Binds every listener up front, then runs the data plane, the reaper, the
//! management API and the metrics endpoint until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{info, warn};

use crate::config::Config;
use crate::management::ManagementServer;
use crate::metrics::{MetricsServer, RelayMetrics};
use crate::relay::{DataPlane, Reaper, SessionTable};
use crate::shutdown::ShutdownCoordinator;
use crate::Result;

/// Create the client-facing UDP socket with enlarged kernel buffers
pub fn bind_client_socket(addr: SocketAddr, buffer_size: usize) -> Result<UdpSocket> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .context("Failed to create UDP socket")?;

    socket.set_reuse_address(true)?;

    if let Err(e) = socket.set_recv_buffer_size(buffer_size) {
        warn!(error = %e, buffer_size, "Failed to set SO_RCVBUF");
    }
    if let Err(e) = socket.set_send_buffer_size(buffer_size) {
        warn!(error = %e, buffer_size, "Failed to set SO_SNDBUF");
    }

    socket.set_nonblocking(true)?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("Failed to bind UDP socket to {}", addr))?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).context("Failed to convert to tokio UdpSocket")
}

/// All relay components, bound and ready to run
pub struct RelayServer {
    config: Config,
    metrics: Arc<RelayMetrics>,
    table: Arc<SessionTable>,
    data_plane: DataPlane,
    management: ManagementServer,
    metrics_server: MetricsServer,
}

impl RelayServer {
    /// Bind the UDP socket and both HTTP listeners
    pub async fn bind(config: Config) -> Result<Self> {
        let metrics = Arc::new(RelayMetrics::new()?);

        let client_socket = Arc::new(bind_client_socket(config.udp_addr(), config.relay.socket_buffer)?);
        let table = Arc::new(SessionTable::new(
            client_socket.clone(),
            metrics.clone(),
            config.sessions.max_sessions,
        ));
        let data_plane = DataPlane::new(client_socket, table.clone(), metrics.clone());

        let management = ManagementServer::bind(config.api_addr(), table.clone(), &config.api.key).await?;
        let metrics_server = MetricsServer::bind(metrics.clone(), config.metrics_addr()).await?;

        Ok(Self {
            config,
            metrics,
            table,
            data_plane,
            management,
            metrics_server,
        })
    }

    pub fn udp_addr(&self) -> Result<SocketAddr> {
        self.data_plane.local_addr()
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        self.management.local_addr()
    }

    pub fn metrics_addr(&self) -> Result<SocketAddr> {
        self.metrics_server.local_addr()
    }

    pub fn table(&self) -> &Arc<SessionTable> {
        &self.table
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    /// Management API router sharing this server's session table
    pub fn api_router(&self) -> Router {
        self.management.router()
    }

    pub fn metrics_router(&self) -> Router {
        MetricsServer::router(self.metrics.clone())
    }

    /// Run until `shutdown` fires, then close every session
    pub async fn run(self, shutdown: ShutdownCoordinator) -> Result<()> {
        info!(
            udp = %self.udp_addr()?,
            api = %self.api_addr()?,
            metrics = %self.metrics_addr()?,
            max_sessions = self.config.sessions.max_sessions,
            "PLG relay running"
        );

        let api_handle = tokio::spawn(self.management.start(shutdown.subscribe()));
        let metrics_handle = tokio::spawn(self.metrics_server.start(shutdown.subscribe()));

        let reaper = Reaper::new(
            self.table.clone(),
            self.config.sessions.reaper_interval,
            self.config.sessions.idle_timeout,
        );
        let reaper_rx = shutdown.subscribe();
        let reaper_handle = tokio::spawn(async move {
            reaper.run(reaper_rx).await;
            Ok::<_, anyhow::Error>(())
        });

        let result = self.data_plane.run(shutdown.subscribe()).await;

        let closed = self.table.close_all();
        info!(closed, "Relay sessions closed");

        shutdown.join_with_timeout("Session reaper", reaper_handle).await;
        shutdown.join_with_timeout("Management API server", api_handle).await;
        shutdown.join_with_timeout("Metrics server", metrics_handle).await;

        result
    }
}
