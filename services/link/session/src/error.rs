//! Session error types.
//!
//! Request outcomes are not errors: a timed out or rejected request is
//! delivered to the owning service with its reply code set.

use thiserror::Error;

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// The session task has exited and no longer accepts commands
    #[error("session {0} is closed")]
    Closed(u64),
    /// The session task dropped a reply channel
    #[error("session {0} did not answer")]
    NoReply(u64),
}
