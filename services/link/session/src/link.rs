//! Transport connection seam.
//!
//! The session core drives a [`Link`] and consumes the [`LinkEvent`]s it
//! reports. Each connect or accept opens a new generation; events carrying
//! an older generation belong to a connection the session already gave up
//! on and are ignored.

use link_wire::{Message, Parser};
use std::fmt;

/// Remote endpoint of an outbound session
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RemoteAddr {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl RemoteAddr {
    /// Create a remote address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for RemoteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// What happened on a connection
#[derive(Debug)]
pub enum LinkEventKind {
    /// An asynchronous connect finished
    Connected(std::io::Result<()>),
    /// A complete message was decoded
    Read(Message),
    /// The peer closed the connection, or reading/writing failed
    Closed,
}

/// Connection event tagged with the generation that produced it
#[derive(Debug)]
pub struct LinkEvent {
    /// Connection generation
    pub generation: u64,
    /// Event
    pub kind: LinkEventKind,
}

/// Asynchronous transport connection owned by one session
pub trait Link: Send {
    /// Start connecting to `addr`; the result arrives as a `Connected` event
    fn connect(&mut self, addr: &RemoteAddr);

    /// Queue `msg` for writing, optionally closing the connection afterwards
    fn write(&mut self, msg: &Message, close_after: bool);

    /// Tear the connection down without reporting a `Closed` event
    fn shutdown(&mut self);

    /// Parser for this connection's protocol
    fn parser(&self) -> &dyn Parser;

    /// Current connection generation
    fn generation(&self) -> u64;
}
