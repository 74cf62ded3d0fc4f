//! Heartbeat scheduling

use std::time::{Duration, Instant};

/// Fires on the first poll, then whenever more than `interval` has passed.
#[derive(Debug)]
pub struct HeartbeatTimer {
    interval: Duration,
    last: Option<Instant>,
}

impl HeartbeatTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Returns `true` and restarts the timer when a heartbeat is due.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        let due = match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.interval,
        };
        if due {
            self.last = Some(now);
        }
        due
    }
}
