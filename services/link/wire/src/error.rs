//! Errors raised while encoding or decoding messages.
//!
//! Any decode error ends the connection it came from; the session sees it
//! as a peer close.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Buffer ended inside a header
    #[error("incomplete header")]
    Incomplete,

    /// Header carries a version this build does not speak
    #[error("unsupported wire version {0}")]
    Version(u8),

    /// Frame or HTTP head larger than allowed
    #[error("message of {0} bytes exceeds the size limit")]
    Size(usize),

    /// Metadata is not a CBOR map
    #[error("invalid cbor metadata")]
    Meta,

    /// Header checksum mismatch
    #[error("header checksum mismatch")]
    HdrCsum,

    /// Message kind byte is neither request nor response
    #[error("unknown message kind {0}")]
    Kind(u8),

    /// Reply code byte is not a known code
    #[error("unknown reply code {0}")]
    Code(u8),

    /// Frame shorter than its fixed fields
    #[error("malformed frame")]
    Malformed,

    /// Unparseable HTTP start line or header
    #[error("malformed http message: {0}")]
    Http(String),
}
