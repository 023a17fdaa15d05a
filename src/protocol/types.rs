//! PLG Protocol Types

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::protocol::constants::*;

/// How the relay treats a packet, decoded once from the flags byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Payload is forwarded to the session's current target
    Data,
    /// Refreshes liveness only
    Keepalive,
    /// Payload is an `ip:port` retarget request
    Control,
}

impl PacketKind {
    /// Classify a flags byte. CONTROL wins over KEEPALIVE; every other bit
    /// combination is plain data.
    pub fn from_flags(flags: u8) -> Self {
        if flags & FLAG_CONTROL != 0 {
            PacketKind::Control
        } else if flags & FLAG_KEEPALIVE != 0 {
            PacketKind::Keepalive
        } else {
            PacketKind::Data
        }
    }
}

/// Fixed 10-byte PLG header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlgHeader {
    pub session_id: u32,
    pub seq: u32,
    pub flags: u8,
    pub path_id: u8,
}

impl PlgHeader {
    /// Decode the header from the front of `buf`.
    ///
    /// Returns `None` when fewer than [`HEADER_SIZE`] bytes are available.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }

        let mut cursor = &buf[..HEADER_SIZE];
        Some(Self {
            session_id: cursor.get_u32(),
            seq: cursor.get_u32(),
            flags: cursor.get_u8(),
            path_id: cursor.get_u8(),
        })
    }

    /// Append the encoded header to `dst`
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u32(self.session_id);
        dst.put_u32(self.seq);
        dst.put_u8(self.flags);
        dst.put_u8(self.path_id);
    }

    pub fn kind(&self) -> PacketKind {
        PacketKind::from_flags(self.flags)
    }
}

/// A decoded PLG datagram. The payload borrows from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlgPacket<'a> {
    pub header: PlgHeader,
    pub payload: &'a [u8],
}

impl<'a> PlgPacket<'a> {
    /// Decode a whole datagram. Anything shorter than the header is rejected.
    pub fn decode(datagram: &'a [u8]) -> Option<Self> {
        let header = PlgHeader::decode(datagram)?;
        Some(Self {
            header,
            payload: &datagram[HEADER_SIZE..],
        })
    }

    pub fn kind(&self) -> PacketKind {
        self.header.kind()
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        self.header.encode(&mut buf);
        buf.extend_from_slice(self.payload);
        buf.freeze()
    }
}
