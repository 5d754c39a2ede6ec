//! Messages, reply codes and pluggable protocol parsers for link sessions.
//!
//! This crate holds everything a session needs to know about the bytes it
//! exchanges with a peer, and nothing about connections or timing.
//!
//! ## Features
//!
//! - **Protocol-independent messages**: request/response kind, heartbeat flag,
//!   sequence id, reply code, headers, payload and opaque caller context
//! - **Binary protocol**: length-prefixed frames with a checksummed 16-byte
//!   header and CBOR metadata
//! - **HTTP/1.1**: `Content-Length` delimited messages for protocols that do
//!   not carry a sequence id end-to-end
//! - **Zero-Copy I/O**: Uses `Bytes`/`BytesMut` for minimal allocations

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod binary;
pub mod codec;
pub mod error;
pub mod frame;
pub mod header;
pub mod http;
pub mod message;
pub mod parser;

// Re-export main types
pub use binary::BinaryParser;
pub use codec::{parse_meta, MetaBuilder};
pub use error::WireError;
pub use frame::{Frame, FrameDecoder, DEFAULT_MAX_FRAME_SIZE, MAX_META_SIZE};
pub use header::{Flags, Header, MessageKind, ReplyCode, HEADER_SIZE, WIRE_VERSION};
pub use http::HttpParser;
pub use message::{Context, Message};
pub use parser::{parser_for, Parser, ProtocolKind};
