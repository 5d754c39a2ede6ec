//! Minimal HTTP/1.1 parser.
//!
//! Bodies are delimited by `Content-Length` only. The start line is exposed
//! through pseudo headers (`:method`, `:path` for requests, `:status`,
//! `:reason` for responses); regular header names are lowercased. HTTP has
//! no sequence id on the wire and no heartbeat.

use crate::frame::DEFAULT_MAX_FRAME_SIZE;
use crate::header::MessageKind;
use crate::message::Message;
use crate::parser::{Parser, ProtocolKind};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

/// Request method pseudo header
pub const METHOD: &str = ":method";
/// Request target pseudo header
pub const PATH: &str = ":path";
/// Response status pseudo header
pub const STATUS: &str = ":status";
/// Response reason phrase pseudo header
pub const REASON: &str = ":reason";

/// Maximum size of the start line plus headers
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Maximum body size, the same bound binary frames get
pub const MAX_BODY_SIZE: usize = DEFAULT_MAX_FRAME_SIZE;

const CONTENT_LENGTH: &str = "content-length";

/// HTTP/1.1 parser
#[derive(Debug, Clone, Default)]
pub struct HttpParser;

impl HttpParser {
    /// Create a new HTTP parser
    pub fn new() -> Self {
        Self
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn http_err(msg: impl Into<String>) -> crate::WireError {
    crate::WireError::Http(msg.into())
}

impl Parser for HttpParser {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Http
    }

    fn create_heartbeat(&self, _kind: MessageKind) -> Option<Message> {
        None
    }

    fn encode(&self, msg: &Message) -> Result<Bytes, crate::WireError> {
        let mut buf = BytesMut::with_capacity(256 + msg.payload.len());

        match msg.kind {
            MessageKind::Request => {
                let method = msg.header(METHOD).unwrap_or("POST");
                let path = msg.header(PATH).unwrap_or("/");
                buf.put_slice(format!("{} {} HTTP/1.1\r\n", method, path).as_bytes());
            }
            MessageKind::Response => {
                let status = msg.header(STATUS).unwrap_or("200");
                let reason = msg.header(REASON).unwrap_or("OK");
                buf.put_slice(format!("HTTP/1.1 {} {}\r\n", status, reason).as_bytes());
            }
        }

        for (name, value) in &msg.headers {
            if name.starts_with(':') || name.eq_ignore_ascii_case(CONTENT_LENGTH) {
                continue;
            }
            buf.put_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        buf.put_slice(format!("Content-Length: {}\r\n\r\n", msg.payload.len()).as_bytes());
        buf.put_slice(&msg.payload);

        Ok(buf.freeze())
    }

    fn decode(&self, buf: &mut BytesMut) -> Result<Option<Message>, crate::WireError> {
        let Some(head_len) = find_head_end(buf) else {
            if buf.len() > MAX_HEAD_SIZE {
                return Err(crate::WireError::Size(buf.len()));
            }
            return Ok(None);
        };
        if head_len > MAX_HEAD_SIZE {
            return Err(crate::WireError::Size(head_len));
        }

        let head = std::str::from_utf8(&buf[..head_len - 4])
            .map_err(|_| http_err("head is not utf-8"))?;
        let mut lines = head.split("\r\n");
        let start = lines.next().ok_or_else(|| http_err("missing start line"))?;

        let mut msg = if let Some(rest) = start.strip_prefix("HTTP/") {
            let mut parts = rest.splitn(3, ' ');
            let _version = parts.next();
            let status = parts
                .next()
                .filter(|s| s.len() == 3 && s.bytes().all(|b| b.is_ascii_digit()))
                .ok_or_else(|| http_err(format!("bad status line '{}'", start)))?;
            Message::new(MessageKind::Response, 0)
                .with_header(STATUS, status)
                .with_header(REASON, parts.next().unwrap_or(""))
        } else {
            let mut parts = start.split(' ');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(method), Some(path), Some(version))
                    if !method.is_empty() && version.starts_with("HTTP/") =>
                {
                    Message::new(MessageKind::Request, 0)
                        .with_header(METHOD, method)
                        .with_header(PATH, path)
                }
                _ => return Err(http_err(format!("bad request line '{}'", start))),
            }
        };

        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| http_err(format!("bad header line '{}'", line)))?;
            msg.headers
                .insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        let body_len = match msg.headers.get(CONTENT_LENGTH) {
            Some(v) => v
                .parse::<usize>()
                .map_err(|_| http_err(format!("bad content-length '{}'", v)))?,
            None => 0,
        };

        if body_len > MAX_BODY_SIZE {
            debug!(
                "Rejecting {} byte http body, limit is {}",
                body_len, MAX_BODY_SIZE
            );
            return Err(crate::WireError::Size(body_len));
        }
        let total = head_len
            .checked_add(body_len)
            .ok_or(crate::WireError::Size(body_len))?;

        if buf.len() < total {
            return Ok(None);
        }

        let _ = buf.split_to(head_len);
        msg.payload = buf.split_to(body_len).freeze();
        Ok(Some(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_request() {
        let parser = HttpParser::new();
        let mut buf =
            BytesMut::from(&b"POST /echo HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\n\r\nhello"[..]);

        let msg = parser.decode(&mut buf).unwrap().unwrap();
        assert!(msg.is_request());
        assert_eq!(msg.header(METHOD), Some("POST"));
        assert_eq!(msg.header(PATH), Some("/echo"));
        assert_eq!(msg.header("host"), Some("a"));
        assert_eq!(msg.payload.as_ref(), b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_waits_for_body() {
        let parser = HttpParser::new();
        let mut buf = BytesMut::from(&b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nab"[..]);
        assert!(parser.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"cd");
        let msg = parser.decode(&mut buf).unwrap().unwrap();
        assert!(msg.is_response());
        assert_eq!(msg.header(STATUS), Some("200"));
        assert_eq!(msg.header(REASON), Some("OK"));
        assert_eq!(msg.payload.as_ref(), b"abcd");
    }

    #[test]
    fn test_pipelined_responses() {
        let parser = HttpParser::new();
        let mut buf = BytesMut::from(
            &b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\naHTTP/1.1 404 Not Found\r\n\r\n"[..],
        );

        let first = parser.decode(&mut buf).unwrap().unwrap();
        let second = parser.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.payload.as_ref(), b"a");
        assert_eq!(second.header(STATUS), Some("404"));
        assert_eq!(second.header(REASON), Some("Not Found"));
        assert!(parser.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_encode_then_decode_request() {
        let parser = HttpParser::new();
        let msg = Message::request(17, "body")
            .with_header(METHOD, "PUT")
            .with_header(PATH, "/items/1")
            .with_header("x-trace", "abc");

        let encoded = parser.encode(&msg).unwrap();
        let text = std::str::from_utf8(&encoded).unwrap();
        assert!(text.starts_with("PUT /items/1 HTTP/1.1\r\n"));
        assert!(text.contains("Content-Length: 4\r\n"));

        let mut buf = BytesMut::from(encoded.as_ref());
        let decoded = parser.decode(&mut buf).unwrap().unwrap();
        // The sequence id never reaches the wire.
        assert_eq!(decoded.seq_id, 0);
        assert_eq!(decoded.header("x-trace"), Some("abc"));
    }

    #[test]
    fn test_malformed_input() {
        let parser = HttpParser::new();
        let mut buf = BytesMut::from(&b"garbage\r\n\r\n"[..]);
        assert!(parser.decode(&mut buf).is_err());

        let mut buf = BytesMut::from(&b"HTTP/1.1 2x0 OK\r\n\r\n"[..]);
        assert!(parser.decode(&mut buf).is_err());
    }

    #[test]
    fn test_rejects_oversized_body() {
        let parser = HttpParser::new();

        let mut buf = BytesMut::from(
            &b"HTTP/1.1 200 OK\r\nContent-Length: 18446744073709551615\r\n\r\nx"[..],
        );
        assert!(parser.decode(&mut buf).is_err());

        let mut buf =
            BytesMut::from(&b"HTTP/1.1 200 OK\r\nContent-Length: 1000000000000\r\n\r\n"[..]);
        assert!(parser.decode(&mut buf).is_err());

        let head = format!(
            "POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            MAX_BODY_SIZE + 1
        );
        let mut buf = BytesMut::from(head.as_bytes());
        assert!(matches!(
            parser.decode(&mut buf),
            Err(crate::WireError::Size(n)) if n == MAX_BODY_SIZE + 1
        ));
    }

    #[test]
    fn test_no_heartbeat() {
        assert!(HttpParser::new()
            .create_heartbeat(MessageKind::Request)
            .is_none());
    }
}
