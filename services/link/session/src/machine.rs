//! Session state machine.
//!
//! [`SessionCore`] holds everything a session knows: connection state,
//! heartbeat and reconnect timers, and the table of outstanding requests.
//! It performs no I/O of its own and never reads the clock; the driver in
//! [`crate::session`] feeds it commands, [`LinkEvent`]s and the current
//! time, which keeps every transition deterministic under test.
//!
//! Every outstanding request is resolved exactly once, through
//! [`SessionCore::on_request_timer`], whether it is answered, times out, or
//! is flushed when the session is destroyed.

use crate::correlation::{Correlator, PendingRequest, PendingTable, SequenceCorrelator};
use crate::http::HttpCorrelator;
use crate::keepalive::{heartbeat_period, RECONNECT_INTERVAL};
use crate::link::{Link, LinkEvent, LinkEventKind, RemoteAddr};
use crate::owner::SessionOwner;
use crate::session::{
    SessionConfig, SessionHandle, SessionId, SessionState, SessionStats, WeakSessionHandle,
};
use crate::timer::{Timer, TimerId, TimerMode, TimerStatus, TimerWheel};
use link_wire::{Message, MessageKind, ReplyCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Sans-I/O session state machine over a [`Link`]
pub struct SessionCore<L: Link> {
    handle: WeakSessionHandle,
    config: SessionConfig,
    state: SessionState,
    remote: Option<RemoteAddr>,
    link: L,
    wheel: TimerWheel,
    heartbeat: Option<Timer>,
    reconnect: Option<Timer>,
    pending: PendingTable,
    correlator: Box<dyn Correlator>,
    owner: Option<Arc<dyn SessionOwner>>,
    stats: SessionStats,
}

impl<L: Link> SessionCore<L> {
    /// Create a session in the `Waiting` state.
    ///
    /// The core keeps only a weak reference to `handle`'s command channel.
    pub fn new(
        handle: &SessionHandle,
        config: SessionConfig,
        link: L,
        owner: Arc<dyn SessionOwner>,
    ) -> Self {
        let correlator: Box<dyn Correlator> = if config.protocol.carries_sequence_id() {
            Box::new(SequenceCorrelator)
        } else {
            Box::new(HttpCorrelator::new())
        };

        Self {
            handle: handle.downgrade(),
            config,
            state: SessionState::Waiting,
            remote: None,
            link,
            wheel: TimerWheel::new(),
            heartbeat: None,
            reconnect: None,
            pending: PendingTable::new(),
            correlator,
            owner: Some(owner),
            stats: SessionStats::default(),
        }
    }

    /// Session identifier
    pub fn id(&self) -> SessionId {
        self.handle.id()
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Remote address of an outbound session
    pub fn remote(&self) -> Option<&RemoteAddr> {
        self.remote.as_ref()
    }

    /// The underlying link
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Number of outstanding requests
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            pending: self.pending.len(),
            ..self.stats.clone()
        }
    }

    /// Earliest timer deadline the driver must wake up for
    pub fn next_deadline(&self) -> Option<Instant> {
        self.wheel.next_deadline()
    }

    /// Whether the session has been detached from its owner and is closed.
    ///
    /// An inert session can never deliver anything again.
    pub fn is_inert(&self) -> bool {
        self.owner.is_none() && self.state == SessionState::Closed
    }

    /// Record the remote address and start connecting
    pub fn connect(&mut self, addr: RemoteAddr) {
        info!("Session {} connecting to {}", self.id(), addr);
        self.remote = Some(addr);
        self.do_connect();
    }

    fn do_connect(&mut self) {
        let Some(addr) = self.remote.clone() else {
            warn!("Session {} has no remote address to connect to", self.id());
            return;
        };
        self.state = SessionState::Connecting;
        self.stats.connect_attempts += 1;
        self.link.connect(&addr);
    }

    /// Adopt an accepted connection
    pub fn accept(&mut self, now: Instant) {
        self.established(now);
        if let Some(owner) = &self.owner {
            owner.on_accept(&self.handle.upgrade());
        }
    }

    fn established(&mut self, now: Instant) {
        self.state = SessionState::Connected;
        self.correlator.reset();

        if let Some(reconnect) = self.reconnect.as_mut() {
            reconnect.stop(&mut self.wheel);
        }

        if let Some(period) = heartbeat_period(self.config.heartbeat_interval) {
            if self.heartbeat.is_none() {
                self.heartbeat = Some(Timer::new(&mut self.wheel, period, TimerMode::Circle, None));
            }
            if let Some(heartbeat) = self.heartbeat.as_mut() {
                heartbeat.start(&mut self.wheel, now);
            }
        }
    }

    fn schedule_reconnect(&mut self, now: Instant) {
        if self.reconnect.is_none() {
            self.reconnect = Some(Timer::new(
                &mut self.wheel,
                RECONNECT_INTERVAL,
                TimerMode::Once,
                None,
            ));
        }
        if let Some(reconnect) = self.reconnect.as_mut() {
            reconnect.start(&mut self.wheel, now);
        }
        debug!(
            "Session {} reconnecting in {:?}",
            self.id(),
            RECONNECT_INTERVAL
        );
    }

    fn can_reconnect(&self) -> bool {
        self.config.auto_reconnect && self.remote.is_some()
    }

    /// Outcome of an asynchronous connect
    pub fn on_connect_result(&mut self, result: std::io::Result<()>, now: Instant) {
        match result {
            Ok(()) => {
                if let Some(addr) = &self.remote {
                    info!("Session {} connected to {}", self.id(), addr);
                }
                self.established(now);
                if let Some(owner) = &self.owner {
                    owner.on_connected(&self.handle.upgrade());
                }
            }
            Err(e) => {
                warn!("Session {} failed to connect: {}", self.id(), e);
                self.state = SessionState::Closed;
                if self.can_reconnect() {
                    self.schedule_reconnect(now);
                }
            }
        }
    }

    /// The peer closed the connection or it failed
    pub fn on_peer_close(&mut self, now: Instant) {
        if self.state == SessionState::Closed {
            trace!("Session {} already closed", self.id());
            return;
        }
        info!("Session {} closed by peer", self.id());
        self.state = SessionState::Closed;
        if let Some(heartbeat) = self.heartbeat.as_mut() {
            heartbeat.stop(&mut self.wheel);
        }

        if self.can_reconnect() {
            self.schedule_reconnect(now);
        } else if let Some(owner) = self.owner.take() {
            owner.on_peer_close(&self.handle.upgrade());
        }
    }

    /// A message arrived from the peer
    pub fn on_read(&mut self, mut msg: Message) {
        // Anything read proves the connection is alive.
        self.state = SessionState::Connected;

        if msg.heartbeat {
            if msg.is_request() {
                if let Some(reply) = self.link.parser().create_heartbeat(MessageKind::Response) {
                    self.link.write(&reply, false);
                    self.stats.heartbeats_answered += 1;
                }
            }
            trace!("Session {} heartbeat {:?}", self.id(), msg.kind);
            return;
        }

        self.stats.messages_received += 1;
        if msg.is_response() {
            let matched = match self.correlator.inbound_response(&mut msg) {
                Some(key) => self.resolve(key, &mut msg),
                None => false,
            };
            if matched {
                self.stats.responses_matched += 1;
            } else {
                self.stats.responses_unmatched += 1;
                debug!(
                    "Session {} got unmatched response {}",
                    self.id(),
                    msg.notice_info()
                );
            }
        } else {
            self.correlator.inbound_request(&mut msg);
        }

        self.deliver(msg);
    }

    /// Hand the response the oldest request's context and retire that request
    fn resolve(&mut self, key: u32, response: &mut Message) -> bool {
        let Some(entry) = self.pending.first_for(key) else {
            return false;
        };
        if let Some(context) = entry.timer.data_mut().and_then(|req| req.context.take()) {
            response.context = Some(context);
        }
        entry.timer.stop(&mut self.wheel);
        let id = entry.timer.id();
        self.on_request_timer(key, id);
        true
    }

    /// Send a request and track it until its response or `timeout`
    pub fn send_request(&mut self, mut msg: Message, timeout: Duration, now: Instant) {
        if self.state != SessionState::Connected {
            debug!(
                "Session {} is {}, rejecting request {}",
                self.id(),
                self.state,
                msg.seq_id
            );
            self.stats.requests_rejected += 1;
            msg.set_reply(ReplyCode::PeerClosed);
            self.deliver(msg);
            return;
        }

        let key = self.correlator.outbound_request(&mut msg);
        let mut timer = Timer::new(&mut self.wheel, timeout, TimerMode::Once, Some(msg));
        timer.start(&mut self.wheel, now);
        let id = timer.id();
        self.pending.insert(PendingRequest { key, timer });

        if let Some(req) = self.pending.get_mut(key, id).and_then(|r| r.timer.data()) {
            self.link.write(req, false);
            self.stats.requests_sent += 1;
        }
    }

    /// Send a response to a request received earlier
    pub fn send_response(&mut self, msg: Message, close_after: bool) {
        if self.state != SessionState::Connected {
            warn!(
                "Session {} is {}, dropping response {}",
                self.id(),
                self.state,
                msg.seq_id
            );
            return;
        }
        for (out, close) in self.correlator.outbound_response(msg, close_after) {
            self.link.write(&out, close);
        }
    }

    /// Close the connection and detach from the owner.
    ///
    /// Outstanding requests are left to their timers; with the owner gone
    /// they resolve silently.
    pub fn close(&mut self) {
        info!("Session {} closing", self.id());
        self.state = SessionState::Closed;
        self.owner = None;
        if let Some(reconnect) = self.reconnect.as_mut() {
            reconnect.stop(&mut self.wheel);
        }
        if let Some(heartbeat) = self.heartbeat.as_mut() {
            heartbeat.stop(&mut self.wheel);
        }
        self.link.shutdown();
    }

    /// Dispatch a connection event, ignoring those from stale generations
    pub fn on_link_event(&mut self, event: LinkEvent, now: Instant) {
        if event.generation != self.link.generation() {
            trace!(
                "Session {} ignoring event from generation {} (current {})",
                self.id(),
                event.generation,
                self.link.generation()
            );
            return;
        }
        match event.kind {
            LinkEventKind::Connected(result) => self.on_connect_result(result, now),
            LinkEventKind::Read(msg) => self.on_read(msg),
            LinkEventKind::Closed => self.on_peer_close(now),
        }
    }

    /// Fire every timer due at or before `now`
    pub fn poll_timers(&mut self, now: Instant) {
        while let Some(id) = self.wheel.pop_expired(now) {
            self.on_timer(id, now);
        }
    }

    fn on_timer(&mut self, id: TimerId, now: Instant) {
        if let Some(heartbeat) = self.heartbeat.as_mut().filter(|t| t.id() == id) {
            heartbeat.expire(&mut self.wheel, now);
            self.do_heartbeat();
        } else if let Some(reconnect) = self.reconnect.as_mut().filter(|t| t.id() == id) {
            reconnect.expire(&mut self.wheel, now);
            self.do_connect();
        } else if let Some(key) = self.pending.key_of(id) {
            if let Some(entry) = self.pending.get_mut(key, id) {
                entry.timer.expire(&mut self.wheel, now);
            }
            self.on_request_timer(key, id);
        } else {
            trace!("Session {} timer {} has no owner", self.id(), id);
        }
    }

    fn do_heartbeat(&mut self) {
        if self.state != SessionState::Connected {
            return;
        }
        if let Some(ping) = self.link.parser().create_heartbeat(MessageKind::Request) {
            self.link.write(&ping, false);
            self.stats.heartbeats_sent += 1;
        }
    }

    /// Final step for every outstanding request.
    ///
    /// The entry leaves the table unconditionally. If its timer expired the
    /// request goes back to the owner marked `TimedOut`; otherwise it was
    /// answered and the copy held here is released.
    pub fn on_request_timer(&mut self, key: u32, id: TimerId) {
        let Some(mut entry) = self.pending.remove(key, id) else {
            return;
        };
        let Some(mut msg) = entry.timer.take_data() else {
            return;
        };

        if entry.timer.status() != TimerStatus::TimedOut {
            trace!("Session {} request {} answered", self.id(), key);
            return;
        }

        self.stats.timeouts += 1;
        if self.owner.is_some() {
            debug!("Session {} request {} timed out", self.id(), key);
            msg.set_reply(ReplyCode::TimedOut);
            self.deliver(msg);
        } else {
            debug!(
                "Session {} request {} timed out with no owner, dropping it",
                self.id(),
                key
            );
        }
    }

    fn deliver(&self, msg: Message) {
        match &self.owner {
            Some(owner) => owner.on_read(&self.handle.upgrade(), msg),
            None => trace!(
                "Session {} has no owner, dropping {}",
                self.id(),
                msg.notice_info()
            ),
        }
    }

    /// Log the pending table
    pub fn dump(&self) {
        debug!(
            "Session {} state={} pending={} queued={} armed_timers={}",
            self.id(),
            self.state,
            self.pending.len(),
            self.correlator.queued(),
            self.wheel.armed()
        );
    }

    /// Stop every timer and flush outstanding requests as timed out
    fn teardown(&mut self) {
        if let Some(mut heartbeat) = self.heartbeat.take() {
            heartbeat.stop(&mut self.wheel);
        }
        if let Some(mut reconnect) = self.reconnect.take() {
            reconnect.stop(&mut self.wheel);
        }

        let flushed = self.pending.len();
        while let Some((key, id)) = self.pending.first() {
            if let Some(entry) = self.pending.get_mut(key, id) {
                entry.timer.expire_now(&mut self.wheel);
            }
            self.on_request_timer(key, id);
        }
        if flushed > 0 {
            debug!(
                "Session {} flushed {} pending request(s)",
                self.id(),
                flushed
            );
        }
        self.owner = None;
    }
}

impl<L: Link> Drop for SessionCore<L> {
    fn drop(&mut self) {
        self.teardown();
    }
}
