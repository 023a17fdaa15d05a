//! Relay Module
//!
//! Session table, per-session backend sockets, the client-facing data plane
//! and the idle reaper.

pub mod allowlist;
pub mod reaper;
pub mod router;
pub mod session;
pub mod table;

pub use allowlist::{AllowList, AllowListError, PortRange};
pub use reaper::Reaper;
pub use router::{parse_control_target, DataPlane, Disposition};
pub use session::{RelaySession, Route, SessionStats};
pub use table::{RegisterError, Registration, SessionTable};
