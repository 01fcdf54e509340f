//! User presence tracking.

use std::time::Duration;

use tokio::time::Instant;

/// Decides when the user has been away long enough to stop polling.
///
/// Pure bookkeeping: the session feeds it activity timestamps and asks it
/// for the next deadline; the monitor never sleeps itself.
#[derive(Debug, Clone)]
pub struct InactivityMonitor {
    timeout: Duration,
    last_activity: Instant,
    suspended: bool,
}

impl InactivityMonitor {
    /// Start tracking with `now` as the last activity.
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            last_activity: now,
            suspended: false,
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// When the inactivity check should fire next, if it should at all.
    ///
    /// A timeout too large to represent never fires.
    pub fn deadline(&self) -> Option<Instant> {
        if self.suspended {
            return None;
        }
        self.last_activity.checked_add(self.timeout)
    }

    /// Record activity at `at`. Returns true when this ended a suspension.
    pub fn record_activity(&mut self, at: Instant) -> bool {
        // Ticks may arrive out of order; the timestamp only moves forward.
        self.last_activity = self.last_activity.max(at);
        std::mem::replace(&mut self.suspended, false)
    }

    /// Returns true when `now` is past the deadline and this call suspended.
    pub fn check(&mut self, now: Instant) -> bool {
        match self.deadline() {
            Some(deadline) if now >= deadline => {}
            _ => return false,
        }
        self.suspended = true;
        true
    }
}
