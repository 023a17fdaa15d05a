//! Relay Session
//!
//! A registered session owns its allow-list, its mutable route (forward target,
//! client address, path id) and exactly one backend UDP socket. The socket's
//! reply reader is a spawned task whose lifetime is tied to the session: it is
//! aborted on [`RelaySession::close`] and, failing that, when the session drops.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::allowlist::AllowList;
use crate::metrics::RelayMetrics;
use crate::protocol::{PlgHeader, FLAGS_DATA, HEADER_SIZE, MAX_DATAGRAM_SIZE};

/// Mutable forwarding state, always read and written as a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Where data packets are forwarded; always a member of the allow-list
    pub current_target: SocketAddr,
    /// Last observed client address; `None` until the first packet arrives
    pub client_addr: Option<SocketAddr>,
    /// Path id from the client's most recent packet, echoed on replies
    pub path_id: u8,
}

/// Point-in-time copy of a session's traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub packets_in: u64,
    pub packets_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// The session's dedicated outbound socket and its reply reader
#[derive(Debug)]
pub struct BackendSocket {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl BackendSocket {
    /// Bind an ephemeral port in the same address family as `target`
    async fn bind_for(target: SocketAddr) -> io::Result<Self> {
        let bind_addr: SocketAddr = match target {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        let local_addr = socket.local_addr()?;
        // try_send_to reports WouldBlock until the reactor has seen the socket
        // writable, so settle that before the session can be published
        socket.writable().await?;

        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
            reader: Mutex::new(None),
        })
    }

    fn attach_reader(&self, handle: JoinHandle<()>) {
        let mut slot = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(handle);
    }

    /// Stop the reader task. Returns false if it was already stopped.
    fn stop_reader(&self) -> bool {
        let handle = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for BackendSocket {
    fn drop(&mut self) {
        let slot = self.reader.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

/// Represents a registered relay session
#[derive(Debug)]
pub struct RelaySession {
    token: u32,
    allowed: AllowList,
    route: RwLock<Route>,
    created_at: Instant,
    /// Milliseconds since `created_at` at which the last packet arrived
    last_seen_ms: AtomicU64,
    relay_seq: AtomicU32,
    closed: AtomicBool,
    packets_in: AtomicU64,
    packets_out: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    backend: BackendSocket,
}

impl RelaySession {
    /// Open a session: bind its backend socket and start the reply reader,
    /// which wraps game server replies and sends them out of `client_socket`.
    pub async fn open(
        token: u32,
        allowed: AllowList,
        client_socket: Arc<UdpSocket>,
        metrics: Arc<RelayMetrics>,
    ) -> io::Result<Arc<Self>> {
        let initial_target = allowed.initial_target();
        let backend = BackendSocket::bind_for(initial_target).await?;

        let session = Arc::new(Self {
            token,
            allowed,
            route: RwLock::new(Route {
                current_target: initial_target,
                client_addr: None,
                path_id: 0,
            }),
            created_at: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
            relay_seq: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            packets_in: AtomicU64::new(0),
            packets_out: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            backend,
        });

        let reader = tokio::spawn(relay_replies(
            session.backend.socket.clone(),
            Arc::downgrade(&session),
            client_socket,
            metrics,
        ));
        session.backend.attach_reader(reader);

        debug!(
            token,
            local_addr = %session.backend.local_addr,
            target = %initial_target,
            "Opened relay session"
        );

        Ok(session)
    }

    pub fn token(&self) -> u32 {
        self.token
    }

    /// Local port of the backend socket
    pub fn local_port(&self) -> u16 {
        self.backend.local_addr().port()
    }

    /// Consistent snapshot of the forwarding state
    pub fn route(&self) -> Route {
        *self.route.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current_target(&self) -> SocketAddr {
        self.route().current_target
    }

    /// Record an inbound packet from `client_addr`: refresh liveness, remember
    /// the return address and path id.
    pub fn observe(&self, client_addr: SocketAddr, path_id: u8, len: usize) {
        {
            let mut route = self.route.write().unwrap_or_else(PoisonError::into_inner);
            route.client_addr = Some(client_addr);
            route.path_id = path_id;
        }
        self.touch();
        self.packets_in.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(len as u64, Ordering::Relaxed);
    }

    /// Refresh `last_seen`
    pub fn touch(&self) {
        let elapsed = self.created_at.elapsed().as_millis() as u64;
        self.last_seen_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    /// Time since the last packet (or since registration if none arrived)
    pub fn idle_for(&self, now: Instant) -> Duration {
        let last_seen = self.created_at + Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        now.saturating_duration_since(last_seen)
    }

    /// Switch the forward target. Targets outside the allow-list are refused
    /// and leave the route untouched.
    pub fn retarget(&self, target: SocketAddr) -> bool {
        if !self.allowed.contains(target) {
            return false;
        }
        let mut route = self.route.write().unwrap_or_else(PoisonError::into_inner);
        route.current_target = target;
        true
    }

    /// Send a payload to the current target without waiting for socket readiness
    pub fn forward(&self, payload: &[u8]) -> io::Result<(SocketAddr, usize)> {
        let target = self.current_target();
        let sent = self.backend.socket.try_send_to(payload, target)?;
        Ok((target, sent))
    }

    /// Next sequence number for a relay-originated packet
    pub fn next_relay_seq(&self) -> u32 {
        self.relay_seq.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    fn record_reply(&self, len: usize) {
        self.packets_out.fetch_add(1, Ordering::Relaxed);
        self.bytes_out.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            packets_in: self.packets_in.load(Ordering::Relaxed),
            packets_out: self.packets_out.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the backend socket's reader. Only the first call has an effect.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.backend.stop_reader();
        true
    }

    /// Log session statistics on removal
    pub fn log_stats(&self, reason: &str) {
        let stats = self.stats();
        info!(
            token = self.token,
            reason,
            duration_ms = self.created_at.elapsed().as_millis() as u64,
            packets_in = stats.packets_in,
            packets_out = stats.packets_out,
            bytes_in = stats.bytes_in,
            bytes_out = stats.bytes_out,
            "Relay session closed"
        );
    }
}

/// Reply reader for one backend socket. Exits when the socket errors, the
/// session is gone or closed, or the task is aborted.
async fn relay_replies(
    socket: Arc<UdpSocket>,
    session: Weak<RelaySession>,
    client_socket: Arc<UdpSocket>,
    metrics: Arc<RelayMetrics>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut frame = BytesMut::with_capacity(HEADER_SIZE + MAX_DATAGRAM_SIZE);

    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(result) => result,
            // ICMP port unreachable surfaces as a reset on some platforms
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
            Err(e) => {
                debug!(error = %e, "Backend socket read failed, reader exiting");
                return;
            }
        };
        trace!(%from, len, "Reply from game server");

        let Some(session) = session.upgrade() else {
            return;
        };
        if session.is_closed() {
            trace!(token = session.token, "Discarding reply for closed session");
            return;
        }
        let route = session.route();
        let Some(client_addr) = route.client_addr else {
            trace!(token = session.token, "Discarding reply, client address not yet known");
            continue;
        };

        frame.clear();
        PlgHeader {
            session_id: session.token,
            seq: session.next_relay_seq(),
            flags: FLAGS_DATA,
            path_id: route.path_id,
        }
        .encode(&mut frame);
        frame.extend_from_slice(&buf[..len]);

        match client_socket.send_to(&frame, client_addr).await {
            Ok(sent) => {
                session.record_reply(sent);
                metrics.replies_relayed.inc();
            }
            Err(e) => {
                metrics.send_errors.inc();
                warn!(token = session.token, %client_addr, error = %e, "Failed to relay reply to client");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_session(token: u32, ports: &[&str]) -> Arc<RelaySession> {
        let client_socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let metrics = Arc::new(RelayMetrics::new().unwrap());
        let allowed = AllowList::compile(&["127.0.0.1"], ports).unwrap();
        RelaySession::open(token, allowed, client_socket, metrics).await.unwrap()
    }

    #[tokio::test]
    async fn test_open_initial_state() {
        let session = open_session(7, &["27015", "27016"]).await;

        assert_eq!(session.token(), 7);
        assert_ne!(session.local_port(), 0);
        let route = session.route();
        assert_eq!(route.current_target, "127.0.0.1:27015".parse().unwrap());
        assert_eq!(route.client_addr, None);
        assert_eq!(session.stats(), SessionStats::default());
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_retarget_respects_allow_list() {
        let session = open_session(1, &["27015", "27016"]).await;

        assert!(session.retarget("127.0.0.1:27016".parse().unwrap()));
        assert_eq!(session.current_target(), "127.0.0.1:27016".parse().unwrap());

        assert!(!session.retarget("127.0.0.1:9999".parse().unwrap()));
        assert!(!session.retarget("10.0.0.1:27015".parse().unwrap()));
        assert_eq!(session.current_target(), "127.0.0.1:27016".parse().unwrap());
    }

    #[tokio::test]
    async fn test_observe_updates_route_and_stats() {
        let session = open_session(1, &["27015"]).await;
        let client: SocketAddr = "127.0.0.1:5000".parse().unwrap();

        session.observe(client, 1, 30);
        session.observe(client, 0, 12);

        let route = session.route();
        assert_eq!(route.client_addr, Some(client));
        assert_eq!(route.path_id, 0);
        let stats = session.stats();
        assert_eq!(stats.packets_in, 2);
        assert_eq!(stats.bytes_in, 42);
    }

    #[tokio::test]
    async fn test_idle_for_resets_on_touch() {
        let session = open_session(1, &["27015"]).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(session.idle_for(Instant::now()) >= Duration::from_millis(30));

        session.touch();
        assert!(session.idle_for(Instant::now()) < Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_relay_seq_increments() {
        let session = open_session(1, &["27015"]).await;
        assert_eq!(session.next_relay_seq(), 1);
        assert_eq!(session.next_relay_seq(), 2);
    }

    #[tokio::test]
    async fn test_forward_right_after_open() {
        let game = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = game.local_addr().unwrap().port().to_string();
        let session = open_session(3, &[port.as_str()]).await;

        let (target, sent) = session.forward(b"first").unwrap();
        assert_eq!(target, game.local_addr().unwrap());
        assert_eq!(sent, 5);

        let mut buf = [0u8; 16];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), game.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"first");
    }

    #[tokio::test]
    async fn test_replies_from_any_source_are_relayed() {
        let client_socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let metrics = Arc::new(RelayMetrics::new().unwrap());
        let allowed = AllowList::compile(&["127.0.0.1"], &["27015"]).unwrap();
        let session = RelaySession::open(4, allowed, client_socket.clone(), metrics.clone())
            .await
            .unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        session.observe(client.local_addr().unwrap(), 2, 0);

        // Answer from a port outside the allow-list
        let game = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let backend: SocketAddr = ([127, 0, 0, 1], session.local_port()).into();
        game.send_to(b"state", backend).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(from, client_socket.local_addr().unwrap());
        let header = PlgHeader::decode(&buf[..len]).unwrap();
        assert_eq!(header.session_id, 4);
        assert_eq!(header.seq, 1);
        assert_eq!(header.flags, FLAGS_DATA);
        assert_eq!(header.path_id, 2);
        assert_eq!(&buf[HEADER_SIZE..len], b"state");
        assert_eq!(metrics.replies_relayed.get(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let session = open_session(1, &["27015"]).await;
        assert!(session.close());
        assert!(session.is_closed());
        assert!(!session.close());
    }
}
