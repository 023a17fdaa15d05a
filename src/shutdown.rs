//! Graceful Shutdown Handling
//!
//! This module provides utilities for handling graceful shutdown of the relay.
//! It supports SIGTERM and SIGINT signals; every long-running task subscribes
//! to the same signal and winds down when it fires. The signal is level
//! triggered: a task that subscribes after shutdown began still sees it.

use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::Result;

/// Shutdown coordinator that manages graceful shutdown process
#[derive(Clone)]
pub struct ShutdownCoordinator {
    /// Set to `true` once shutdown begins
    shutdown_tx: Arc<watch::Sender<bool>>,
    /// How long to wait for tasks to finish after the signal
    timeout: Duration,
}

/// A component's handle on the shutdown signal
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolve once shutdown has been triggered, immediately if it already was
    pub async fn recv(&mut self) {
        // A dropped coordinator also means nobody can keep us running
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            shutdown_tx: Arc::new(shutdown_tx),
            timeout,
        }
    }

    /// Get a shutdown signal for components to listen on
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.shutdown_tx.subscribe(),
        }
    }

    /// Signal shutdown to every current and future subscriber
    pub fn trigger(&self) {
        if self.shutdown_tx.send_replace(true) {
            debug!("Shutdown already triggered");
        }
    }

    /// Wait for SIGTERM, SIGINT or Ctrl+C, then trigger shutdown
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C, initiating graceful shutdown");
                }
            }
        }

        #[cfg(windows)]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        self.trigger();
        Ok(())
    }

    /// Wait for a task to finish, aborting it if the timeout elapses first
    pub async fn join_with_timeout(&self, task_name: &str, mut handle: JoinHandle<Result<()>>) {
        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(Ok(()))) => debug!("{} stopped", task_name),
            Ok(Ok(Err(e))) => error!("{} failed: {}", task_name, e),
            Ok(Err(e)) if e.is_cancelled() => debug!("{} was cancelled", task_name),
            Ok(Err(e)) => error!("{} panicked: {}", task_name, e),
            Err(_) => {
                warn!("{} did not stop within {:?}, aborting", task_name, self.timeout);
                handle.abort();
            }
        }
    }
}
