//! Pluggable protocol parsers.
//!
//! A session never touches bytes directly: it asks its parser to encode
//! outgoing messages, to decode buffered input, and to synthesize
//! heartbeats. Each [`ProtocolKind`] maps to one parser implementation.

use crate::header::MessageKind;
use crate::message::Message;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Identifies which parser a session uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// Length-prefixed binary frames with explicit sequence ids
    #[default]
    Binary,
    /// HTTP/1.1, no sequence id on the wire
    Http,
}

impl ProtocolKind {
    /// Whether the protocol echoes a sequence id end-to-end
    pub fn carries_sequence_id(self) -> bool {
        matches!(self, ProtocolKind::Binary)
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolKind::Binary => f.write_str("binary"),
            ProtocolKind::Http => f.write_str("http"),
        }
    }
}

impl FromStr for ProtocolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" => Ok(ProtocolKind::Binary),
            "http" => Ok(ProtocolKind::Http),
            other => Err(format!("unknown protocol '{}'", other)),
        }
    }
}

/// Protocol-specific encoding, decoding and heartbeat synthesis
pub trait Parser: Send + Sync + fmt::Debug {
    /// The protocol this parser speaks
    fn protocol(&self) -> ProtocolKind;

    /// Build a heartbeat of the given kind, or `None` if the protocol has none
    fn create_heartbeat(&self, kind: MessageKind) -> Option<Message>;

    /// Serialize a message for the wire
    fn encode(&self, msg: &Message) -> Result<Bytes, crate::WireError>;

    /// Decode one message from `buf`, consuming its bytes.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched while the message is
    /// still incomplete.
    fn decode(&self, buf: &mut BytesMut) -> Result<Option<Message>, crate::WireError>;
}

/// Get the parser for a protocol
pub fn parser_for(kind: ProtocolKind) -> Arc<dyn Parser> {
    match kind {
        ProtocolKind::Binary => Arc::new(crate::binary::BinaryParser::new()),
        ProtocolKind::Http => Arc::new(crate::http::HttpParser::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_from_str() {
        assert_eq!("HTTP".parse::<ProtocolKind>().unwrap(), ProtocolKind::Http);
        assert_eq!(
            "binary".parse::<ProtocolKind>().unwrap(),
            ProtocolKind::Binary
        );
        assert!("smtp".parse::<ProtocolKind>().is_err());
    }

    #[test]
    fn test_parser_for() {
        assert_eq!(
            parser_for(ProtocolKind::Http).protocol(),
            ProtocolKind::Http
        );
        assert!(ProtocolKind::Binary.carries_sequence_id());
        assert!(!ProtocolKind::Http.carries_sequence_id());
    }
}
