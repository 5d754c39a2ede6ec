//! Fixed header for the binary framed protocol.
//!
//! Every binary frame starts with a 16-byte header carrying the message kind,
//! heartbeat flag, reply code and the sequence id used for request/response
//! correlation. The last four bytes are a CRC32 over the first twelve.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 16;

/// Bytes covered by the header checksum
const CHECKSUMMED_LEN: usize = HEADER_SIZE - 4;

/// Direction of a message within a request/response exchange
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Request expecting a response
    Request = 0x00,
    /// Response to an earlier request
    Response = 0x01,
}

impl TryFrom<u8> for MessageKind {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(MessageKind::Request),
            0x01 => Ok(MessageKind::Response),
            _ => Err(crate::WireError::Kind(value)),
        }
    }
}

bitflags! {
    /// Header flags bitmask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Flags: u16 {
        /// Liveness probe, never delivered to the owning service
        const HEARTBEAT = 1 << 0;
    }
}

/// Outcome a session stamps on a delivered message
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReplyCode {
    /// Normal delivery
    #[default]
    Ok = 0,
    /// The session was not connected or the connection dropped
    PeerClosed = 1,
    /// No response arrived before the request deadline
    TimedOut = 2,
}

impl TryFrom<u8> for ReplyCode {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ReplyCode::Ok),
            1 => Ok(ReplyCode::PeerClosed),
            2 => Ok(ReplyCode::TimedOut),
            _ => Err(crate::WireError::Code(value)),
        }
    }
}

impl std::fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReplyCode::Ok => "OK",
            ReplyCode::PeerClosed => "PEER_CLOSED",
            ReplyCode::TimedOut => "TIMED_OUT",
        };
        f.write_str(s)
    }
}

/// Binary frame header (16 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Protocol version (must be 1)
    pub ver: u8,
    /// Request or response
    pub kind: MessageKind,
    /// Header flags
    pub flags: Flags,
    /// Reply code
    pub code: ReplyCode,
    /// Correlation key echoed by the peer in its response
    pub seq_id: u32,
}

impl Header {
    /// Create a new header with default values
    pub fn new(kind: MessageKind, seq_id: u32) -> Self {
        Self {
            ver: WIRE_VERSION,
            kind,
            flags: Flags::empty(),
            code: ReplyCode::Ok,
            seq_id,
        }
    }

    /// Encode the header to bytes (big-endian), checksum included
    pub fn encode(&self, buf: &mut BytesMut) {
        let start = buf.len();
        buf.put_u8(self.ver);
        buf.put_u8(self.kind as u8);
        buf.put_u16(self.flags.bits());
        buf.put_u8(self.code as u8);
        buf.put_u8(0);
        buf.put_u16(0);
        buf.put_u32(self.seq_id);
        let csum = crc32fast::hash(&buf[start..start + CHECKSUMMED_LEN]);
        buf.put_u32(csum);
    }

    /// Decode the header from bytes (big-endian)
    pub fn decode(buf: &mut Bytes) -> Result<Self, crate::WireError> {
        if buf.len() < HEADER_SIZE {
            return Err(crate::WireError::Incomplete);
        }

        let expected = crc32fast::hash(&buf[..CHECKSUMMED_LEN]);

        let ver = buf.get_u8();
        if ver != WIRE_VERSION {
            return Err(crate::WireError::Version(ver));
        }

        let kind = MessageKind::try_from(buf.get_u8())?;
        let flags = Flags::from_bits_truncate(buf.get_u16());
        let code = ReplyCode::try_from(buf.get_u8())?;
        buf.advance(3);
        let seq_id = buf.get_u32();

        if buf.get_u32() != expected {
            return Err(crate::WireError::HdrCsum);
        }

        Ok(Self {
            ver,
            kind,
            flags,
            code,
            seq_id,
        })
    }
}
