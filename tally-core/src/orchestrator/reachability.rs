//! Server reachability with probe backoff

use std::time::{Duration, Instant};

/// Result of asking whether a batch may be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Last send succeeded; no probe needed
    Available,
    /// A probe ran and reached the server
    ProbeSucceeded,
    /// A probe ran and failed
    ProbeFailed,
    /// Still inside the check interval; nothing was attempted
    BackingOff,
}

impl Verdict {
    pub fn may_send(&self) -> bool {
        matches!(self, Verdict::Available | Verdict::ProbeSucceeded)
    }

    pub fn probed(&self) -> bool {
        matches!(self, Verdict::ProbeSucceeded | Verdict::ProbeFailed)
    }
}

/// Available/Unavailable state plus the earliest time of the next probe.
#[derive(Debug)]
pub struct Reachability {
    available: bool,
    next_check: Option<Instant>,
}

impl Default for Reachability {
    fn default() -> Self {
        Self::new()
    }
}

impl Reachability {
    /// Starts out available. The first send failure is what triggers probing.
    pub fn new() -> Self {
        Self {
            available: true,
            next_check: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Decide whether to send, running `probe` when a check is due.
    pub fn check(&mut self, now: Instant, interval: Duration, probe: impl FnOnce() -> bool) -> Verdict {
        if self.available {
            return Verdict::Available;
        }
        if self.next_check.is_some_and(|next| now < next) {
            return Verdict::BackingOff;
        }

        self.next_check = Some(now + interval);
        if probe() {
            self.available = true;
            Verdict::ProbeSucceeded
        } else {
            Verdict::ProbeFailed
        }
    }

    pub fn mark_available(&mut self) {
        self.available = true;
    }

    /// Record a failed send. The probe schedule is left as is, so the first
    /// probe after a failure runs as soon as the last probe is old enough.
    pub fn mark_unavailable(&mut self) {
        self.available = false;
    }
}
