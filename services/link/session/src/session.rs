//! Session task and public handle.
//!
//! Each session runs on its own task. Commands from [`SessionHandle`]s,
//! connection events and timer deadlines are multiplexed by one `select!`
//! loop, so the [`SessionCore`] never sees two events at once.

use crate::machine::SessionCore;
use crate::error::SessionError;
use crate::link::{LinkEvent, RemoteAddr};
use crate::owner::SessionOwner;
use crate::transport::TcpLink;
use link_wire::{parser_for, Message, ProtocolKind};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info};

/// Configuration for a session
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Wire protocol
    pub protocol: ProtocolKind,
    /// Reconnect after a failed connect or a peer close
    pub auto_reconnect: bool,
    /// Interval between heartbeats; zero disables them
    pub heartbeat_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolKind::Binary,
            auto_reconnect: false,
            heartbeat_interval: Duration::ZERO,
        }
    }
}

/// Connection lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No connect attempt yet
    Waiting,
    /// Connect in flight
    Connecting,
    /// Usable for writes
    Connected,
    /// Connection gone; may move back to `Connecting` on reconnect
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Waiting => "WAITING",
            SessionState::Connecting => "CONNECTING",
            SessionState::Connected => "CONNECTED",
            SessionState::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// Statistics for a session
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Requests written to the peer
    pub requests_sent: u64,
    /// Requests rejected with `PeerClosed` because the session was not connected
    pub requests_rejected: u64,
    /// Responses matched to a pending request
    pub responses_matched: u64,
    /// Responses with no pending request
    pub responses_unmatched: u64,
    /// Requests resolved by timeout
    pub timeouts: u64,
    /// Non-heartbeat messages received
    pub messages_received: u64,
    /// Heartbeats sent by our timer
    pub heartbeats_sent: u64,
    /// Heartbeat requests answered
    pub heartbeats_answered: u64,
    /// Connect attempts, reconnects included
    pub connect_attempts: u64,
    /// Requests currently outstanding
    pub pending: usize,
}

/// Process-unique session identifier
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Allocate the next identifier
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Commands accepted by a session task
#[derive(Debug)]
pub enum Command {
    /// Connect (or reconnect) to a remote address
    Connect(RemoteAddr),
    /// Send a request and track it until response or timeout
    SendRequest {
        /// Request message
        message: Message,
        /// Time to wait for the response
        timeout: Duration,
    },
    /// Send a response to a request received earlier
    SendResponse {
        /// Response message
        message: Message,
        /// Close the connection once it is written
        close_after: bool,
    },
    /// Close the connection without reconnecting
    Close,
    /// Log the pending table
    Dump,
    /// Report statistics
    Stats(oneshot::Sender<SessionStats>),
    /// Destroy the session, flushing pending requests
    Shutdown,
}

/// Cloneable handle to a running session
#[derive(Clone, Debug)]
pub struct SessionHandle {
    id: SessionId,
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    pub(crate) fn new(id: SessionId, commands: mpsc::UnboundedSender<Command>) -> Self {
        Self { id, commands }
    }

    /// Handle whose commands are always refused
    fn detached(id: SessionId) -> Self {
        let (commands, _) = mpsc::unbounded_channel();
        Self { id, commands }
    }

    pub(crate) fn downgrade(&self) -> WeakSessionHandle {
        WeakSessionHandle {
            id: self.id,
            commands: self.commands.downgrade(),
        }
    }

    /// Session identifier
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Whether the session task has exited
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::Closed(self.id.0))
    }

    /// Connect to `host:port`
    pub fn connect(&self, host: impl Into<String>, port: u16) -> Result<(), SessionError> {
        self.send(Command::Connect(RemoteAddr::new(host, port)))
    }

    /// Connect to a remote address
    pub fn connect_to(&self, addr: RemoteAddr) -> Result<(), SessionError> {
        self.send(Command::Connect(addr))
    }

    /// Send a request; its outcome is delivered through `SessionOwner::on_read`
    pub fn send_request(&self, message: Message, timeout: Duration) -> Result<(), SessionError> {
        self.send(Command::SendRequest { message, timeout })
    }

    /// Send a response, optionally closing the connection after it
    pub fn send_response(&self, message: Message, close_after: bool) -> Result<(), SessionError> {
        self.send(Command::SendResponse {
            message,
            close_after,
        })
    }

    /// Close the connection; the owner is detached and no reconnect happens
    pub fn close(&self) -> Result<(), SessionError> {
        self.send(Command::Close)
    }

    /// Log the pending table at debug level
    pub fn dump(&self) -> Result<(), SessionError> {
        self.send(Command::Dump)
    }

    /// Destroy the session; every pending request is delivered as timed out
    pub fn shutdown(&self) -> Result<(), SessionError> {
        self.send(Command::Shutdown)
    }

    /// Fetch the session's statistics
    pub async fn stats(&self) -> Result<SessionStats, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Stats(tx))?;
        rx.await.map_err(|_| SessionError::NoReply(self.id.0))
    }
}

/// Handle held by the session itself; it does not keep the task alive
#[derive(Clone, Debug)]
pub(crate) struct WeakSessionHandle {
    id: SessionId,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl WeakSessionHandle {
    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    /// Handle to pass to owner callbacks.
    ///
    /// Once every external handle is gone the session is shutting down and
    /// the returned handle refuses commands.
    pub(crate) fn upgrade(&self) -> SessionHandle {
        match self.commands.upgrade() {
            Some(commands) => SessionHandle::new(self.id, commands),
            None => SessionHandle::detached(self.id),
        }
    }
}

/// Entry points that spawn session tasks
pub struct Session;

impl Session {
    /// Spawn an unconnected client session.
    ///
    /// The session runs until it is shut down, closed, or every
    /// [`SessionHandle`] to it has been dropped.
    pub fn spawn(config: SessionConfig, owner: Arc<dyn SessionOwner>) -> SessionHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle::new(SessionId::next(), command_tx);

        let link = TcpLink::new(parser_for(config.protocol), event_tx);
        let core = SessionCore::new(&handle, config, link, owner);
        tokio::spawn(run(core, command_rx, event_rx));
        handle
    }

    /// Spawn a client session and start connecting to `addr`
    pub fn connect(
        config: SessionConfig,
        addr: RemoteAddr,
        owner: Arc<dyn SessionOwner>,
    ) -> SessionHandle {
        let handle = Self::spawn(config, owner);
        // The task was just spawned and cannot have exited yet.
        let _ = handle.connect_to(addr);
        handle
    }

    /// Spawn a server session for an accepted stream
    pub fn accept(
        config: SessionConfig,
        stream: TcpStream,
        owner: Arc<dyn SessionOwner>,
    ) -> SessionHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle::new(SessionId::next(), command_tx);

        if let Ok(peer) = stream.peer_addr() {
            info!("Accepted session {} from {}", handle.id(), peer);
        }

        let link = TcpLink::accepted(stream, parser_for(config.protocol), event_tx);
        let mut core = SessionCore::new(&handle, config, link, owner);
        // Accepted sessions live as long as their connection, whether or not
        // anyone keeps the returned handle.
        let held = handle.clone();
        tokio::spawn(async move {
            core.accept(Instant::now());
            run(core, command_rx, event_rx).await;
            drop(held);
        });
        handle
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn execute(core: &mut SessionCore<TcpLink>, command: Command) {
    let now = Instant::now();
    match command {
        Command::Connect(addr) => core.connect(addr),
        Command::SendRequest { message, timeout } => core.send_request(message, timeout, now),
        Command::SendResponse {
            message,
            close_after,
        } => core.send_response(message, close_after),
        Command::Close => core.close(),
        Command::Dump => core.dump(),
        Command::Stats(reply) => {
            let _ = reply.send(core.stats());
        }
        // Handled by the loop.
        Command::Shutdown => {}
    }
}

async fn run(
    mut core: SessionCore<TcpLink>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut events: mpsc::UnboundedReceiver<LinkEvent>,
) {
    let id = core.id();
    debug!("Session {} task started", id);

    loop {
        if core.is_inert() {
            debug!("Session {} detached from its owner, stopping", id);
            break;
        }

        let deadline = core.next_deadline();
        tokio::select! {
            biased;

            Some(event) = events.recv() => {
                core.on_link_event(event, Instant::now());
            }

            _ = wait_until(deadline) => {
                core.poll_timers(Instant::now());
            }

            command = commands.recv() => match command {
                Some(Command::Shutdown) => {
                    debug!("Session {} shutting down", id);
                    break;
                }
                None => {
                    debug!("Session {} has no handles left, shutting down", id);
                    break;
                }
                Some(command) => execute(&mut core, command),
            }
        }
    }

    // Dropping the core flushes every pending request.
    drop(core);
    debug!("Session {} task finished", id);
}
