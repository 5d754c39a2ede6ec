//! Connection sessions for link: state machine, heartbeats, reconnection and
//! request/response correlation.
//!
//! A session wraps one logical connection to a peer on behalf of an owning
//! service. It tracks whether the connection is usable, keeps it alive with
//! heartbeats, re-establishes it after failures, and matches every request it
//! sends to its response, timeout or shutdown.
//!
//! ## Features
//!
//! - **Lifecycle**: `WAITING -> CONNECTING -> CONNECTED -> CLOSED`, with a
//!   fixed 3 second reconnect delay when auto-reconnect is on
//! - **Heartbeats**: periodic keepalives, never more often than once a second
//! - **Correlation**: per-request timeouts with exactly one outcome per request,
//!   by sequence id or, for HTTP, by position
//! - **Single-task design**: each session owns its state on one Tokio task;
//!   callers talk to it through a cloneable [`SessionHandle`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use link_session::{RemoteAddr, Session, SessionConfig, SessionHandle, SessionOwner};
//! use link_wire::{Message, ReplyCode};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct Printer;
//!
//! impl SessionOwner for Printer {
//!     fn on_read(&self, _session: &SessionHandle, message: Message) {
//!         match message.code {
//!             ReplyCode::Ok => println!("reply {}", message.seq_id),
//!             code => println!("request {} failed: {}", message.seq_id, code),
//!         }
//!     }
//! }
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = SessionConfig {
//!     auto_reconnect: true,
//!     heartbeat_interval: Duration::from_secs(5),
//!     ..SessionConfig::default()
//! };
//! let session = Session::connect(config, RemoteAddr::new("127.0.0.1", 9000), Arc::new(Printer));
//! session.send_request(Message::request(1, "hello"), Duration::from_secs(3))?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod correlation;
pub mod error;
pub mod http;
pub mod keepalive;
pub mod link;
pub mod machine;
pub mod owner;
pub mod session;
pub mod timer;
pub mod transport;

// Re-export main types
pub use correlation::{Correlator, PendingRequest, PendingTable, SequenceCorrelator};
pub use error::SessionError;
pub use http::HttpCorrelator;
pub use keepalive::{heartbeat_period, HEARTBEAT_FLOOR, RECONNECT_INTERVAL};
pub use link::{Link, LinkEvent, LinkEventKind, RemoteAddr};
pub use machine::SessionCore;
pub use owner::SessionOwner;
pub use session::{
    Command, Session, SessionConfig, SessionHandle, SessionId, SessionState, SessionStats,
};
pub use timer::{Timer, TimerId, TimerMode, TimerStatus, TimerWheel};
pub use transport::{connect_tcp, listen_tcp, TcpLink};
