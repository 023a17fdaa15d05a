//! PLG Relay Library
//!
//! UDP relay for game traffic. Clients wrap packets in a 10-byte PLG header;
//! the relay looks the session token up, forwards the payload to an
//! allow-listed game server from a per-session socket and wraps replies on the
//! way back. A trusted backend registers sessions through the HTTP control API.

pub mod config;
pub mod management;
pub mod metrics;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod shutdown;

pub use config::Config;
pub use server::RelayServer;
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};

/// Common error type for the relay
pub type Result<T> = anyhow::Result<T>;
