//! Session Table
//!
//! Sharded concurrent map from session token to [`RelaySession`]. Lookups clone
//! the session `Arc` out of the shard so no shard lock is held across I/O.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use super::allowlist::{AllowList, AllowListError};
use super::session::RelaySession;
use crate::metrics::RelayMetrics;

/// Why a registration was refused
#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error(transparent)]
    AllowList(#[from] AllowListError),
    #[error("session capacity reached ({0} active)")]
    CapacityReached(usize),
    #[error("failed to open backend socket: {0}")]
    Socket(#[from] io::Error),
}

/// Outcome of a successful registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub session_token: u32,
    pub local_port: u16,
    /// An existing session with the same token was swapped out
    pub replaced: bool,
}

/// Concurrent registry of live sessions
pub struct SessionTable {
    sessions: DashMap<u32, Arc<RelaySession>>,
    client_socket: Arc<UdpSocket>,
    metrics: Arc<RelayMetrics>,
    max_sessions: usize,
    /// Live sessions plus registrations that reserved a slot but are not
    /// yet published; never exceeds `max_sessions`
    slots: AtomicUsize,
}

impl SessionTable {
    /// Create an empty table. `client_socket` is the shared client-facing
    /// socket replies are sent from.
    pub fn new(client_socket: Arc<UdpSocket>, metrics: Arc<RelayMetrics>, max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            client_socket,
            metrics,
            max_sessions,
            slots: AtomicUsize::new(0),
        }
    }

    /// Register or re-register a session.
    ///
    /// The new session is fully opened before it is published; publishing is a
    /// single insert that swaps out any previous session under the same token,
    /// which is then closed.
    pub async fn register<S: AsRef<str>>(
        &self,
        token: u32,
        game_server_ips: &[S],
        game_ports: &[S],
    ) -> Result<Registration, RegisterError> {
        let allowed = AllowList::compile(game_server_ips, game_ports)?;

        // Replacing an existing token needs no new slot
        let reserved = !self.sessions.contains_key(&token);
        if reserved && !self.try_reserve() {
            return Err(self.capacity_reached(token));
        }

        let opened = RelaySession::open(
            token,
            allowed,
            self.client_socket.clone(),
            self.metrics.clone(),
        )
        .await;
        let session = match opened {
            Ok(session) => session,
            Err(e) => {
                if reserved {
                    self.release();
                }
                return Err(e.into());
            }
        };
        let local_port = session.local_port();
        let target = session.current_target();

        // The token may have come or gone while the socket was opening, so the
        // slot accounting is settled under the entry's shard lock
        let previous = match self.sessions.entry(token) {
            Entry::Occupied(mut entry) => {
                if reserved {
                    self.release();
                }
                Some(entry.insert(session))
            }
            Entry::Vacant(entry) => {
                if !reserved && !self.try_reserve() {
                    drop(entry);
                    session.close();
                    return Err(self.capacity_reached(token));
                }
                entry.insert(session);
                None
            }
        };
        let replaced = previous.is_some();
        if let Some(previous) = previous {
            if previous.close() {
                previous.log_stats("replaced");
            }
        }
        self.sync_gauge();

        info!(token, local_port, %target, replaced, "Session registered");
        Ok(Registration {
            session_token: token,
            local_port,
            replaced,
        })
    }

    /// Look up a live session
    pub fn get(&self, token: u32) -> Option<Arc<RelaySession>> {
        self.sessions.get(&token).map(|entry| entry.value().clone())
    }

    /// Remove and close a session. Absent tokens are not an error.
    pub fn remove(&self, token: u32) -> bool {
        match self.sessions.remove(&token) {
            Some((_, session)) => {
                self.release();
                if session.close() {
                    session.log_stats("unregistered");
                }
                self.sync_gauge();
                true
            }
            None => {
                debug!(token, "Unregister for unknown session");
                false
            }
        }
    }

    /// Evict sessions idle for longer than `idle_timeout`.
    ///
    /// Candidates are collected shard by shard, then each is removed only if it
    /// is still idle at removal time, so a packet that lands mid-sweep keeps
    /// its session alive.
    pub fn expire_idle(&self, idle_timeout: Duration) -> usize {
        let now = Instant::now();
        let candidates: Vec<u32> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_for(now) > idle_timeout)
            .map(|entry| *entry.key())
            .collect();

        let mut expired = 0;
        for token in candidates {
            let removed = self
                .sessions
                .remove_if(&token, |_, session| session.idle_for(Instant::now()) > idle_timeout);
            if let Some((_, session)) = removed {
                self.release();
                if session.close() {
                    session.log_stats("expired");
                }
                self.metrics.sessions_expired.inc();
                expired += 1;
            }
        }

        if expired > 0 {
            self.sync_gauge();
            info!(expired, remaining = self.sessions.len(), "Expired idle sessions");
        }

        expired
    }

    /// Remove and close every session
    pub fn close_all(&self) -> usize {
        let tokens: Vec<u32> = self.sessions.iter().map(|entry| *entry.key()).collect();
        let closed = tokens.into_iter().filter(|token| self.remove(*token)).count();
        if closed > 0 {
            info!(closed, "Closed all relay sessions");
        }
        closed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn try_reserve(&self) -> bool {
        self.slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.max_sessions).then_some(used + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        self.slots.fetch_sub(1, Ordering::AcqRel);
    }

    fn capacity_reached(&self, token: u32) -> RegisterError {
        let active = self.slots.load(Ordering::Acquire);
        warn!(token, active, "Max sessions reached, rejecting registration");
        RegisterError::CapacityReached(active)
    }

    fn sync_gauge(&self) {
        self.metrics.active_sessions.set(self.sessions.len() as i64);
    }
}
