//! Parser for the binary framed protocol.

use crate::codec::{parse_meta, MetaBuilder};
use crate::frame::{Frame, FrameDecoder, DEFAULT_MAX_FRAME_SIZE};
use crate::header::{Flags, Header, MessageKind};
use crate::message::Message;
use crate::parser::{Parser, ProtocolKind};
use bytes::{Bytes, BytesMut};
use tracing::trace;

/// Binary protocol parser
#[derive(Debug, Clone, Default)]
pub struct BinaryParser {
    decoder: FrameDecoder,
}

impl BinaryParser {
    /// Create a new binary parser
    pub fn new() -> Self {
        Self::default()
    }
}

impl Parser for BinaryParser {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Binary
    }

    fn create_heartbeat(&self, kind: MessageKind) -> Option<Message> {
        Some(Message::heartbeat(kind))
    }

    fn encode(&self, msg: &Message) -> Result<Bytes, crate::WireError> {
        let mut header = Header::new(msg.kind, msg.seq_id);
        header.code = msg.code;
        if msg.heartbeat {
            header.flags |= Flags::HEARTBEAT;
        }

        let meta_raw = if msg.headers.is_empty() {
            Bytes::new()
        } else {
            MetaBuilder::new().extend(&msg.headers).build()?
        };

        Frame::new(header, meta_raw, msg.payload.clone()).encode(DEFAULT_MAX_FRAME_SIZE)
    }

    fn decode(&self, buf: &mut BytesMut) -> Result<Option<Message>, crate::WireError> {
        let Some(frame) = self.decoder.decode(buf)? else {
            return Ok(None);
        };

        trace!(
            "Decoded binary frame: kind={:?} seq_id={} len={}",
            frame.header.kind,
            frame.header.seq_id,
            frame.payload.len()
        );

        let mut msg = Message::new(frame.header.kind, frame.header.seq_id);
        msg.heartbeat = frame.header.flags.contains(Flags::HEARTBEAT);
        msg.code = frame.header.code;
        msg.headers = parse_meta(&frame.meta_raw)?;
        msg.payload = frame.payload;
        Ok(Some(msg))
    }
}
