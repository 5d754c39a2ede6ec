//! Protocol-independent message representation.
//!
//! A [`Message`] is what sessions hand to parsers for encoding and what
//! parsers produce from inbound bytes. The session stamps its outcome on
//! [`Message::code`] before handing a message to the owning service.

use crate::header::{MessageKind, ReplyCode};
use bytes::Bytes;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

/// Opaque caller data carried through a request/response round trip.
///
/// The session never looks inside; it only moves the context from a pending
/// request onto the response that resolves it.
pub struct Context(Box<dyn Any + Send>);

impl Context {
    /// Wrap any value as a context
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Box::new(value))
    }

    /// Borrow the value if it has type `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Take the value back out if it has type `T`
    pub fn into_inner<T: Any>(self) -> Result<T, Self> {
        self.0.downcast::<T>().map(|b| *b).map_err(Self)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Context(..)")
    }
}

/// A single protocol message
#[derive(Debug)]
pub struct Message {
    /// Request or response
    pub kind: MessageKind,
    /// Liveness probe
    pub heartbeat: bool,
    /// Correlation key (protocol-defined)
    pub seq_id: u32,
    /// Outcome stamped by the session
    pub code: ReplyCode,
    /// Protocol headers / metadata
    pub headers: BTreeMap<String, String>,
    /// Message body
    pub payload: Bytes,
    /// Caller data, never put on the wire
    pub context: Option<Context>,
}

/// Loggable summary of a message
#[derive(Serialize)]
struct Notice<'a> {
    kind: MessageKind,
    heartbeat: bool,
    seq_id: u32,
    code: ReplyCode,
    headers: &'a BTreeMap<String, String>,
    payload_len: usize,
}

impl Message {
    /// Create an empty message of the given kind
    pub fn new(kind: MessageKind, seq_id: u32) -> Self {
        Self {
            kind,
            heartbeat: false,
            seq_id,
            code: ReplyCode::Ok,
            headers: BTreeMap::new(),
            payload: Bytes::new(),
            context: None,
        }
    }

    /// Create a request carrying `payload`
    pub fn request(seq_id: u32, payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Request, seq_id).with_payload(payload)
    }

    /// Create a response correlated with `request`
    pub fn response_to(request: &Message) -> Self {
        Self::new(MessageKind::Response, request.seq_id)
    }

    /// Create a heartbeat of the given kind
    pub fn heartbeat(kind: MessageKind) -> Self {
        let mut msg = Self::new(kind, 0);
        msg.heartbeat = true;
        msg
    }

    /// Set the body
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Add a header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Attach caller data
    pub fn with_context<T: std::any::Any + Send>(mut self, value: T) -> Self {
        self.context = Some(Context::new(value));
        self
    }

    /// Whether this message is a request
    pub fn is_request(&self) -> bool {
        self.kind == MessageKind::Request
    }

    /// Whether this message is a response
    pub fn is_response(&self) -> bool {
        self.kind == MessageKind::Response
    }

    /// Stamp the reply code
    pub fn set_reply(&mut self, code: ReplyCode) {
        self.code = code;
    }

    /// Look up a header
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Borrow the context value if it has type `T`
    pub fn context_ref<T: std::any::Any>(&self) -> Option<&T> {
        self.context.as_ref().and_then(|c| c.downcast_ref::<T>())
    }

    /// One-line description for logs
    pub fn notice_info(&self) -> String {
        let notice = Notice {
            kind: self.kind,
            heartbeat: self.heartbeat,
            seq_id: self.seq_id,
            code: self.code,
            headers: &self.headers,
            payload_len: self.payload.len(),
        };
        serde_json::to_string(&notice).unwrap_or_else(|_| format!("{:?}", self.kind))
    }
}
