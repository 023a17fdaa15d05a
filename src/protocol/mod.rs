//! PLG Protocol Implementation
//!
//! Wire codec for the 10-byte PLG datagram header.

pub mod constants;
pub mod types;

pub use constants::*;
pub use types::*;
