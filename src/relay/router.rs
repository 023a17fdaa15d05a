//! Data-Plane Router
//!
//! Reads datagrams from the client-facing socket and dispatches them by
//! packet kind. Malformed datagrams and unknown tokens are dropped with no
//! side effect besides the received counter.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

use super::session::RelaySession;
use super::table::SessionTable;
use crate::metrics::RelayMetrics;
use crate::protocol::{PacketKind, PlgPacket, MAX_DATAGRAM_SIZE};
use crate::shutdown::ShutdownSignal;
use crate::Result;

/// What the router did with one datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Shorter than the PLG header
    Malformed,
    /// No session registered under the token
    UnknownSession,
    Keepalive,
    /// Control packet accepted; the session now forwards here
    Retargeted(SocketAddr),
    /// Control packet unparsable or naming a target outside the allow-list
    RetargetRejected,
    /// Data payload handed to the backend socket
    Forwarded { target: SocketAddr, bytes: usize },
    /// Backend send failed; the packet is dropped, the session is kept
    SendFailed,
}

/// Parse a control payload: UTF-8 `ip:port` (IPv6 as `[addr]:port`)
pub fn parse_control_target(payload: &[u8]) -> Option<SocketAddr> {
    std::str::from_utf8(payload).ok()?.trim().parse().ok()
}

/// UDP listener and per-packet dispatcher
pub struct DataPlane {
    socket: Arc<UdpSocket>,
    table: Arc<SessionTable>,
    metrics: Arc<RelayMetrics>,
}

impl DataPlane {
    pub fn new(socket: Arc<UdpSocket>, table: Arc<SessionTable>, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            socket,
            table,
            metrics,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive loop; returns once a shutdown signal arrives
    pub async fn run(&self, mut shutdown: ShutdownSignal) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        info!(addr = %self.local_addr()?, "Data plane listening");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Data plane received shutdown signal");
                    break;
                }
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, src)) => {
                            self.handle_datagram(&buf[..len], src);
                        }
                        Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {}
                        Err(e) => {
                            warn!(error = %e, "recv_from error on client socket");
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Classify and act on one datagram from `src`
    pub fn handle_datagram(&self, datagram: &[u8], src: SocketAddr) -> Disposition {
        self.metrics.packets_received.inc();

        let Some(packet) = PlgPacket::decode(datagram) else {
            trace!(len = datagram.len(), %src, "Dropped: packet too short");
            return Disposition::Malformed;
        };

        let token = packet.header.session_id;
        let Some(session) = self.table.get(token) else {
            trace!(token, %src, "Dropped: unknown session");
            return Disposition::UnknownSession;
        };

        session.observe(src, packet.header.path_id, datagram.len());

        match packet.kind() {
            PacketKind::Control => self.handle_control(&session, packet.payload),
            PacketKind::Keepalive => {
                self.metrics.keepalives.inc();
                trace!(token, "Keepalive received");
                Disposition::Keepalive
            }
            PacketKind::Data => self.forward(&session, packet.payload),
        }
    }

    fn handle_control(&self, session: &RelaySession, payload: &[u8]) -> Disposition {
        let token = session.token();
        let accepted = match parse_control_target(payload) {
            Some(target) if session.retarget(target) => Some(target),
            Some(target) => {
                warn!(token, %target, "Control target not in allow-list");
                None
            }
            None => {
                warn!(token, len = payload.len(), "Invalid control packet payload");
                None
            }
        };

        match accepted {
            Some(target) => {
                self.metrics.control_accepted.inc();
                debug!(token, %target, "Forward target updated via control packet");
                Disposition::Retargeted(target)
            }
            None => {
                self.metrics.control_rejected.inc();
                self.metrics.packets_dropped.inc();
                Disposition::RetargetRejected
            }
        }
    }

    fn forward(&self, session: &RelaySession, payload: &[u8]) -> Disposition {
        match session.forward(payload) {
            Ok((target, bytes)) => {
                self.metrics.packets_forwarded.inc();
                self.metrics.bytes_forwarded.inc_by(bytes as u64);
                Disposition::Forwarded { target, bytes }
            }
            Err(e) => {
                self.metrics.send_errors.inc();
                self.metrics.packets_dropped.inc();
                if e.kind() == io::ErrorKind::WouldBlock {
                    debug!(token = session.token(), "Backend socket not writable, packet dropped");
                } else {
                    warn!(
                        token = session.token(),
                        target = %session.current_target(),
                        error = %e,
                        "Failed to forward packet"
                    );
                }
                Disposition::SendFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PlgHeader, FLAG_CONTROL, FLAG_KEEPALIVE};
    use std::time::Duration;

    fn datagram(session_id: u32, flags: u8, payload: &[u8]) -> Vec<u8> {
        PlgPacket {
            header: PlgHeader {
                session_id,
                seq: 1,
                flags,
                path_id: 0,
            },
            payload,
        }
        .to_bytes()
        .to_vec()
    }

    async fn data_plane() -> (DataPlane, Arc<SessionTable>, Arc<RelayMetrics>, UdpSocket) {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let metrics = Arc::new(RelayMetrics::new().unwrap());
        let table = Arc::new(SessionTable::new(socket.clone(), metrics.clone(), 16));
        let game = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        (DataPlane::new(socket, table.clone(), metrics.clone()), table, metrics, game)
    }

    #[test]
    fn test_parse_control_target() {
        assert_eq!(
            parse_control_target(b"192.168.1.1:27015"),
            Some("192.168.1.1:27015".parse().unwrap())
        );
        assert_eq!(
            parse_control_target(b"[::1]:27015"),
            Some("[::1]:27015".parse().unwrap())
        );
        assert!(parse_control_target(b"invalid").is_none());
        assert!(parse_control_target(b"").is_none());
        assert!(parse_control_target(b"192.168.1.1").is_none());
        assert!(parse_control_target(b"192.168.1.1:abc").is_none());
        assert!(parse_control_target(&[0xFF, 0xFE]).is_none());
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_have_no_side_effects() {
        let (plane, _table, metrics, _game) = data_plane().await;
        let src: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        assert_eq!(plane.handle_datagram(&[1, 2, 3], src), Disposition::Malformed);
        assert_eq!(
            plane.handle_datagram(&datagram(0xDEAD, 0, b"hello"), src),
            Disposition::UnknownSession
        );

        assert_eq!(metrics.packets_received.get(), 2);
        assert_eq!(metrics.packets_dropped.get(), 0);
        assert_eq!(metrics.packets_forwarded.get(), 0);
    }

    #[tokio::test]
    async fn test_data_is_forwarded_with_header_stripped() {
        let (plane, table, metrics, game) = data_plane().await;
        let game_port = game.local_addr().unwrap().port().to_string();
        table.register(9, &["127.0.0.1"], &[game_port.as_str()]).await.unwrap();

        let src: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let disposition = plane.handle_datagram(&datagram(9, 0, b"payload"), src);
        assert!(matches!(disposition, Disposition::Forwarded { bytes: 7, .. }));

        let mut buf = [0u8; 64];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), game.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"payload");
        assert_eq!(metrics.packets_forwarded.get(), 1);
        assert_eq!(metrics.bytes_forwarded.get(), 7);
        assert_eq!(table.get(9).unwrap().route().client_addr, Some(src));
    }

    #[tokio::test]
    async fn test_keepalive_and_control_are_not_forwarded() {
        let (plane, table, metrics, _game) = data_plane().await;
        table
            .register(9, &["127.0.0.1"], &["27015", "27016"])
            .await
            .unwrap();
        let src: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        assert_eq!(
            plane.handle_datagram(&datagram(9, FLAG_KEEPALIVE, b"ignored"), src),
            Disposition::Keepalive
        );
        assert_eq!(
            plane.handle_datagram(&datagram(9, FLAG_CONTROL, b"127.0.0.1:27016"), src),
            Disposition::Retargeted("127.0.0.1:27016".parse().unwrap())
        );
        assert_eq!(
            plane.handle_datagram(&datagram(9, FLAG_CONTROL, b"127.0.0.1:9"), src),
            Disposition::RetargetRejected
        );
        assert_eq!(
            plane.handle_datagram(&datagram(9, FLAG_CONTROL | FLAG_KEEPALIVE, b"junk"), src),
            Disposition::RetargetRejected
        );

        assert_eq!(table.get(9).unwrap().current_target(), "127.0.0.1:27016".parse().unwrap());
        assert_eq!(metrics.packets_forwarded.get(), 0);
        assert_eq!(metrics.keepalives.get(), 1);
        assert_eq!(metrics.control_accepted.get(), 1);
        assert_eq!(metrics.control_rejected.get(), 2);
        assert_eq!(table.get(9).unwrap().stats().packets_in, 4);
    }
}
