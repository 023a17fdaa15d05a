//! Idle session reaper

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::table::SessionTable;
use crate::shutdown::ShutdownSignal;

/// Periodically evicts sessions that have been idle past the timeout
pub struct Reaper {
    table: Arc<SessionTable>,
    interval: Duration,
    idle_timeout: Duration,
}

impl Reaper {
    pub fn new(table: Arc<SessionTable>, interval: Duration, idle_timeout: Duration) -> Self {
        Self {
            table,
            interval,
            idle_timeout,
        }
    }

    /// One pass over the table; returns how many sessions were evicted
    pub fn sweep(&self) -> usize {
        debug!(active = self.table.len(), "Running idle session sweep");
        self.table.expire_idle(self.idle_timeout)
    }

    /// Sweep every `interval` until shutdown
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;

        info!(
            interval = ?self.interval,
            idle_timeout = ?self.idle_timeout,
            "Session reaper started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("Session reaper stopping");
                    return;
                }
                _ = interval.tick() => {
                    self.sweep();
                }
            }
        }
    }
}
