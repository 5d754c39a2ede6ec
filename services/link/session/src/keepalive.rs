//! Heartbeat and reconnect timing.

use std::time::Duration;

/// Fixed delay before retrying a failed or dropped connection
pub const RECONNECT_INTERVAL: Duration = Duration::from_millis(3000);

/// Shortest heartbeat period a session will use
pub const HEARTBEAT_FLOOR: Duration = Duration::from_millis(1000);

/// Effective heartbeat period for a configured interval.
///
/// Zero disables heartbeats; anything below [`HEARTBEAT_FLOOR`] is raised to it.
pub fn heartbeat_period(configured: Duration) -> Option<Duration> {
    if configured.is_zero() {
        None
    } else {
        Some(configured.max(HEARTBEAT_FLOOR))
    }
}
