//! Length-prefixed framing for the binary protocol.
//!
//! ```text
//! +----------------------+----------------------------+
//! | u32 frame_len        | length of bytes that follow|
//! +----------------------+----------------------------+
//! | Header (16B)         | kind, flags, code, seq_id  |
//! +----------------------+----------------------------+
//! | u32 meta_len         | canonical CBOR map length  |
//! +----------------------+----------------------------+
//! | meta_bytes           | metadata (CBOR)            |
//! +----------------------+----------------------------+
//! | payload              | variable (0..N)            |
//! +----------------------+----------------------------+
//! ```

use crate::header::{Header, HEADER_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

/// Maximum frame size (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Maximum metadata size (64 KiB)
pub const MAX_META_SIZE: usize = 64 * 1024;

/// Complete wire frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Fixed header
    pub header: Header,
    /// Metadata as raw CBOR bytes
    pub meta_raw: Bytes,
    /// Payload
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame
    pub fn new(header: Header, meta_raw: Bytes, payload: Bytes) -> Self {
        Self {
            header,
            meta_raw,
            payload,
        }
    }

    /// Get the total frame size when encoded
    pub fn encoded_size(&self) -> usize {
        4 + HEADER_SIZE + 4 + self.meta_raw.len() + self.payload.len()
    }

    /// Encode frame to a contiguous buffer
    pub fn encode(&self, max_frame_size: usize) -> Result<Bytes, crate::WireError> {
        let total_size = self.encoded_size();
        if total_size > max_frame_size {
            return Err(crate::WireError::Size(total_size));
        }
        if self.meta_raw.len() > MAX_META_SIZE {
            return Err(crate::WireError::Meta);
        }

        let mut buf = BytesMut::with_capacity(total_size);

        // Frame length (everything after this u32)
        buf.put_u32((total_size - 4) as u32);
        self.header.encode(&mut buf);
        buf.put_u32(self.meta_raw.len() as u32);
        buf.put_slice(&self.meta_raw);
        buf.put_slice(&self.payload);

        Ok(buf.freeze())
    }
}

/// Frame decoder for parsing incoming frames
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Decode one frame from a buffer, consuming it only when complete
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>, crate::WireError> {
        if buf.len() < 4 {
            return Ok(None);
        }

        let frame_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

        if frame_len > self.max_frame_size {
            debug!(
                "Rejecting {} byte frame, limit is {}",
                frame_len, self.max_frame_size
            );
            return Err(crate::WireError::Size(frame_len));
        }
        if frame_len < HEADER_SIZE + 4 {
            debug!("Rejecting {} byte frame, shorter than its header", frame_len);
            return Err(crate::WireError::Malformed);
        }

        if buf.len() < 4 + frame_len {
            return Ok(None);
        }

        buf.advance(4);
        let mut frame_buf = buf.split_to(frame_len).freeze();
        let header = Header::decode(&mut frame_buf)?;

        let meta_len = frame_buf.get_u32() as usize;
        if meta_len > MAX_META_SIZE || frame_buf.len() < meta_len {
            return Err(crate::WireError::Meta);
        }

        let meta_raw = frame_buf.split_to(meta_len);
        trace!(
            "Decoded frame seq={} meta={}B payload={}B",
            header.seq_id,
            meta_len,
            frame_buf.len()
        );

        Ok(Some(Frame {
            header,
            meta_raw,
            payload: frame_buf,
        }))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
