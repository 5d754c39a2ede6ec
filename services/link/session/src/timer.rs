//! One-shot and repeating timers driven by the session's event loop.
//!
//! A [`TimerWheel`] only orders deadlines; each [`Timer`] is owned by whoever
//! armed it (the session for heartbeat and reconnect, a pending request for
//! its timeout) together with its payload. The session loop sleeps until
//! [`TimerWheel::next_deadline`], pops expired ids and dispatches them.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Identifier of a timer within one wheel
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Firing mode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerMode {
    /// Fire once, then stay expired
    Once,
    /// Fire every interval until stopped
    Circle,
}

/// Timer status as seen by the timer's callback
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerStatus {
    /// Armed and waiting
    Running,
    /// Stopped before expiry, or never started
    Stopped,
    /// Expired
    TimedOut,
}

/// Deadline queue shared by all timers of a session
#[derive(Debug, Default)]
pub struct TimerWheel {
    next_id: u64,
    deadlines: BTreeSet<(Instant, TimerId)>,
}

impl TimerWheel {
    /// Create an empty wheel
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> TimerId {
        self.next_id += 1;
        TimerId(self.next_id)
    }

    fn arm(&mut self, id: TimerId, deadline: Instant) {
        self.deadlines.insert((deadline, id));
    }

    fn disarm(&mut self, id: TimerId, deadline: Instant) {
        self.deadlines.remove(&(deadline, id));
    }

    /// Earliest armed deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.first().map(|(deadline, _)| *deadline)
    }

    /// Remove and return the earliest timer whose deadline is at or before `now`
    pub fn pop_expired(&mut self, now: Instant) -> Option<TimerId> {
        let (deadline, id) = *self.deadlines.first()?;
        if deadline > now {
            return None;
        }
        self.deadlines.remove(&(deadline, id));
        Some(id)
    }

    /// Number of armed timers
    pub fn armed(&self) -> usize {
        self.deadlines.len()
    }
}

/// A timer with an optional payload
#[derive(Debug)]
pub struct Timer<T = ()> {
    id: TimerId,
    interval: Duration,
    mode: TimerMode,
    status: TimerStatus,
    deadline: Option<Instant>,
    data: Option<T>,
}

impl<T> Timer<T> {
    /// Create a stopped timer registered with `wheel`
    pub fn new(wheel: &mut TimerWheel, interval: Duration, mode: TimerMode, data: Option<T>) -> Self {
        Self {
            id: wheel.allocate(),
            interval,
            mode,
            status: TimerStatus::Stopped,
            deadline: None,
            data,
        }
    }

    /// Arm the timer `interval` from `now`, replacing any earlier deadline
    pub fn start(&mut self, wheel: &mut TimerWheel, now: Instant) {
        if let Some(deadline) = self.deadline.take() {
            wheel.disarm(self.id, deadline);
        }
        let deadline = now + self.interval;
        wheel.arm(self.id, deadline);
        self.deadline = Some(deadline);
        self.status = TimerStatus::Running;
    }

    /// Disarm the timer
    pub fn stop(&mut self, wheel: &mut TimerWheel) {
        if let Some(deadline) = self.deadline.take() {
            wheel.disarm(self.id, deadline);
        }
        self.status = TimerStatus::Stopped;
    }

    /// Record a natural expiry reported by the wheel.
    ///
    /// A repeating timer is re-armed one interval after `now`.
    pub fn expire(&mut self, wheel: &mut TimerWheel, now: Instant) {
        self.deadline = None;
        match self.mode {
            TimerMode::Once => self.status = TimerStatus::TimedOut,
            TimerMode::Circle => self.start(wheel, now),
        }
    }

    /// Disarm and mark expired without waiting for the deadline
    pub fn expire_now(&mut self, wheel: &mut TimerWheel) {
        self.stop(wheel);
        self.status = TimerStatus::TimedOut;
    }

    /// Timer id
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Current status
    pub fn status(&self) -> TimerStatus {
        self.status
    }

    /// Configured interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Armed deadline, if running
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Borrow the payload
    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    /// Mutably borrow the payload
    pub fn data_mut(&mut self) -> Option<&mut T> {
        self.data.as_mut()
    }

    /// Take ownership of the payload
    pub fn take_data(&mut self) -> Option<T> {
        self.data.take()
    }
}
