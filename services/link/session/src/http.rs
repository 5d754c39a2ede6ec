//! FIFO correlation for HTTP sessions.
//!
//! HTTP/1.1 carries no sequence id, but a non-multiplexed connection answers
//! requests in the order they were sent. Every message crossing the session
//! is therefore numbered from one counter:
//!
//! - outgoing requests take the next number as their key and are queued;
//!   each inbound response is matched to the front of that queue.
//! - inbound requests take the next number and reserve a response slot;
//!   responses sent back fill their slot, and filled slots are written
//!   strictly from the front so pipelined responses keep request order.
//!
//! A request that times out keeps its place in the queue: its late response
//! still consumes that place and is delivered unmatched instead of being
//! attributed to the next request.

use crate::correlation::Correlator;
use link_wire::Message;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Response slot reserved for an inbound request
#[derive(Debug)]
struct ResponseSlot {
    no: u32,
    response: Option<(Message, bool)>,
}

/// Positional correlator for HTTP sessions
#[derive(Debug, Default)]
pub struct HttpCorrelator {
    counter: u32,
    awaiting: VecDeque<u32>,
    slots: VecDeque<ResponseSlot>,
}

impl HttpCorrelator {
    /// Create a new correlator
    pub fn new() -> Self {
        Self::default()
    }

    fn next_no(&mut self) -> u32 {
        self.counter = self.counter.wrapping_add(1);
        self.counter
    }

    /// Outgoing requests still waiting for a response
    pub fn awaiting(&self) -> usize {
        self.awaiting.len()
    }

    /// Inbound requests whose response has not been written yet
    pub fn unanswered(&self) -> usize {
        self.slots.len()
    }
}

impl Correlator for HttpCorrelator {
    fn outbound_request(&mut self, msg: &mut Message) -> u32 {
        let no = self.next_no();
        msg.seq_id = no;
        self.awaiting.push_back(no);
        no
    }

    fn inbound_response(&mut self, msg: &mut Message) -> Option<u32> {
        let no = self.awaiting.pop_front()?;
        msg.seq_id = no;
        Some(no)
    }

    fn inbound_request(&mut self, msg: &mut Message) {
        let no = self.next_no();
        msg.seq_id = no;
        self.slots.push_back(ResponseSlot { no, response: None });
    }

    fn outbound_response(&mut self, msg: Message, close_after: bool) -> Vec<(Message, bool)> {
        let Some(slot) = self.slots.iter_mut().find(|s| s.no == msg.seq_id) else {
            warn!(
                "No pending request {} for HTTP response, writing it directly",
                msg.seq_id
            );
            return vec![(msg, close_after)];
        };
        if slot.response.is_some() {
            warn!("Duplicate HTTP response for request {}, dropping it", msg.seq_id);
            return Vec::new();
        }
        slot.response = Some((msg, close_after));

        let mut ready = Vec::new();
        while let Some(front) = self.slots.front_mut() {
            match front.response.take() {
                Some(out) => {
                    ready.push(out);
                    self.slots.pop_front();
                }
                None => break,
            }
        }
        if ready.is_empty() {
            debug!(
                "Holding HTTP response until {} earlier request(s) are answered",
                self.slots.iter().take_while(|s| s.response.is_none()).count()
            );
        }
        ready
    }

    fn reset(&mut self) {
        self.awaiting.clear();
        self.slots.clear();
    }

    fn queued(&self) -> usize {
        self.awaiting.len() + self.slots.len()
    }
}
