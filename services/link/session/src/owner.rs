//! Capability interface of the service that owns sessions.

use crate::session::SessionHandle;
use link_wire::Message;

/// Receives lifecycle notifications and delivered messages from sessions.
///
/// Sessions hold the owner by reference-counted pointer but never keep it
/// alive past `close()` or a non-reconnecting peer close; after that point
/// no further callbacks are made. Callbacks run on the session's own task
/// and must not block.
pub trait SessionOwner: Send + Sync + std::fmt::Debug {
    /// A session was accepted from a listener
    fn on_accept(&self, session: &SessionHandle) {
        let _ = session;
    }

    /// An outbound connect attempt succeeded
    fn on_connected(&self, session: &SessionHandle) {
        let _ = session;
    }

    /// A message is delivered; the owner takes ownership.
    ///
    /// Requests from the peer, responses to our requests (with the request's
    /// context restored), and locally resolved requests stamped
    /// `TimedOut` / `PeerClosed` all arrive here.
    fn on_read(&self, session: &SessionHandle, message: Message);

    /// The peer closed the connection and the session will not reconnect
    fn on_peer_close(&self, session: &SessionHandle) {
        let _ = session;
    }
}
