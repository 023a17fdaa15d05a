//! Management API Module
//!
//! Control API used by the trusted backend to register and unregister relay
//! sessions.

pub mod api;
pub mod auth;
pub mod handlers;
pub mod server;
pub mod types;

pub use api::ManagementApi;
pub use auth::{ApiAuth, API_KEY_HEADER};
pub use handlers::AppState;
pub use server::ManagementServer;
pub use types::*;
