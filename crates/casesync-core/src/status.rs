//! Poller states and the published polling status.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Lifecycle state of the task poller for one case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollerState {
    /// Not polling: never started, explicitly stopped, or a form is open.
    #[default]
    Idle,
    /// Fetching or waiting for the next cycle.
    Polling,
    /// Paused because the user has been inactive.
    Suspended,
    /// Halted after repeated fetch failures; needs an explicit start.
    Stopped,
}

impl PollerState {
    /// Returns true while cycles are being scheduled.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Polling)
    }
}

impl fmt::Display for PollerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Polling => "polling",
            Self::Suspended => "suspended",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Read-only view of the poller's bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollingStatus {
    pub state: PollerState,
    pub running: bool,
    pub consecutive_failures: u32,
    pub current_delay: Duration,
    pub suspended_by_inactivity: bool,
}
