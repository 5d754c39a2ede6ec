//! Request/response correlation.
//!
//! Outstanding requests live in a [`PendingTable`] keyed by correlation key.
//! Keys are not unique: a peer may reuse a sequence id before an earlier
//! request with the same id has resolved, so each key maps to the requests
//! holding it in send order.
//!
//! How a key is derived from a message is the job of a [`Correlator`]. The
//! default [`SequenceCorrelator`] uses the protocol's sequence id; protocols
//! without one use FIFO matching (see [`crate::http`]).

use crate::timer::{Timer, TimerId};
use link_wire::Message;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

/// An outstanding request awaiting its response or timeout
#[derive(Debug)]
pub struct PendingRequest {
    /// Correlation key
    pub key: u32,
    /// Timeout timer; its payload is the request itself
    pub timer: Timer<Message>,
}

/// Multi-valued table of pending requests
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: BTreeMap<u32, VecDeque<PendingRequest>>,
    by_timer: HashMap<TimerId, u32>,
}

impl PendingTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a request behind any others sharing its key
    pub fn insert(&mut self, request: PendingRequest) {
        self.by_timer.insert(request.timer.id(), request.key);
        self.entries.entry(request.key).or_default().push_back(request);
    }

    /// Oldest request holding `key`
    pub fn first_for(&mut self, key: u32) -> Option<&mut PendingRequest> {
        self.entries.get_mut(&key).and_then(|queue| queue.front_mut())
    }

    /// The request whose timer is `id`
    pub fn get_mut(&mut self, key: u32, id: TimerId) -> Option<&mut PendingRequest> {
        self.entries
            .get_mut(&key)
            .and_then(|queue| queue.iter_mut().find(|r| r.timer.id() == id))
    }

    /// Key of the request whose timer is `id`
    pub fn key_of(&self, id: TimerId) -> Option<u32> {
        self.by_timer.get(&id).copied()
    }

    /// Remove the request whose timer is `id`
    pub fn remove(&mut self, key: u32, id: TimerId) -> Option<PendingRequest> {
        let queue = self.entries.get_mut(&key)?;
        let pos = queue.iter().position(|r| r.timer.id() == id)?;
        let request = queue.remove(pos);
        if queue.is_empty() {
            self.entries.remove(&key);
        }
        self.by_timer.remove(&id);
        request
    }

    /// Key and timer of the first request in key order
    pub fn first(&self) -> Option<(u32, TimerId)> {
        self.entries
            .iter()
            .next()
            .and_then(|(key, queue)| queue.front().map(|r| (*key, r.timer.id())))
    }

    /// Number of outstanding requests
    pub fn len(&self) -> usize {
        self.by_timer.len()
    }

    /// Whether nothing is outstanding
    pub fn is_empty(&self) -> bool {
        self.by_timer.is_empty()
    }
}

/// Strategy deriving correlation keys from messages.
///
/// Every hook runs on the session task, in the order the session sees
/// messages.
pub trait Correlator: Send + fmt::Debug {
    /// Key under which an outgoing request is tracked
    fn outbound_request(&mut self, msg: &mut Message) -> u32;

    /// Key of the pending request an inbound response answers, if any
    fn inbound_response(&mut self, msg: &mut Message) -> Option<u32>;

    /// Observe an inbound request before it reaches the owner
    fn inbound_request(&mut self, msg: &mut Message);

    /// Messages to write, in order, for a response the owner sends back
    fn outbound_response(&mut self, msg: Message, close_after: bool) -> Vec<(Message, bool)>;

    /// Forget per-connection state after a new connection is established
    fn reset(&mut self);

    /// Requests or responses still queued inside the correlator
    fn queued(&self) -> usize;
}

/// Correlation by the protocol's own sequence id
#[derive(Debug, Default)]
pub struct SequenceCorrelator;

impl Correlator for SequenceCorrelator {
    fn outbound_request(&mut self, msg: &mut Message) -> u32 {
        msg.seq_id
    }

    fn inbound_response(&mut self, msg: &mut Message) -> Option<u32> {
        Some(msg.seq_id)
    }

    fn inbound_request(&mut self, _msg: &mut Message) {}

    fn outbound_response(&mut self, msg: Message, close_after: bool) -> Vec<(Message, bool)> {
        vec![(msg, close_after)]
    }

    fn reset(&mut self) {}

    fn queued(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::{TimerMode, TimerWheel};
    use std::time::Duration;

    fn pending(wheel: &mut TimerWheel, key: u32, tag: &'static str) -> PendingRequest {
        let msg = Message::request(key, tag);
        PendingRequest {
            key,
            timer: Timer::new(wheel, Duration::from_secs(1), TimerMode::Once, Some(msg)),
        }
    }

    #[test]
    fn test_duplicate_keys_kept_in_order() {
        let mut wheel = TimerWheel::new();
        let mut table = PendingTable::new();
        let a = pending(&mut wheel, 7, "a");
        let b = pending(&mut wheel, 7, "b");
        let (a_id, b_id) = (a.timer.id(), b.timer.id());
        table.insert(a);
        table.insert(b);
        assert_eq!(table.len(), 2);

        let first = table.first_for(7).unwrap();
        assert_eq!(first.timer.id(), a_id);

        // Removing the second leaves the first in place.
        let removed = table.remove(7, b_id).unwrap();
        assert_eq!(removed.timer.data().unwrap().payload.as_ref(), b"b");
        assert_eq!(table.first_for(7).unwrap().timer.id(), a_id);
        assert_eq!(table.key_of(a_id), Some(7));
        assert_eq!(table.key_of(b_id), None);

        assert!(table.remove(7, a_id).is_some());
        assert!(table.is_empty());
        assert!(table.first().is_none());
    }

    #[test]
    fn test_first_in_key_order() {
        let mut wheel = TimerWheel::new();
        let mut table = PendingTable::new();
        table.insert(pending(&mut wheel, 9, "late"));
        let early = pending(&mut wheel, 2, "early");
        let early_id = early.timer.id();
        table.insert(early);

        assert_eq!(table.first(), Some((2, early_id)));
        assert!(table.get_mut(9, early_id).is_none());
    }

    #[test]
    fn test_sequence_correlator_uses_seq_id() {
        let mut correlator = SequenceCorrelator;
        let mut req = Message::request(41, "x");
        assert_eq!(correlator.outbound_request(&mut req), 41);

        let mut res = Message::response_to(&req);
        assert_eq!(correlator.inbound_response(&mut res), Some(41));

        let out = correlator.outbound_response(res, true);
        assert_eq!(out.len(), 1);
        assert!(out[0].1);
    }
}
