//! PLG Protocol Constants
//!
//! Header layout (big-endian):
//!
//! ```text
//! Offset  Size   Field
//! 0       4      Session ID
//! 4       4      Sequence number
//! 8       1      Flags
//! 9       1      Path ID
//! 10      N      Payload (opaque game datagram)
//! ```

/// Fixed PLG header length in bytes
pub const HEADER_SIZE: usize = 10;

/// Largest UDP datagram the relay will read in one call
pub const MAX_DATAGRAM_SIZE: usize = 65535;

// Flag bits
pub const FLAG_MULTIPATH_DUP: u8 = 0x01;
pub const FLAG_KEEPALIVE: u8 = 0x02;
pub const FLAG_CONTROL: u8 = 0x04;
pub const FLAG_COMPRESSED: u8 = 0x08;

/// Flags value the relay puts on replies sent back to clients
pub const FLAGS_DATA: u8 = 0x00;
