//! Task list polling as an explicit state machine.
//!
//! [`PollerMachine`] decides *when* to fetch and *what* a fetch result
//! means; it never performs I/O or sleeps. The session hands it the results
//! of the fetches it asked for and carries out the returned [`NextStep`].
//!
//! Every fetch is issued against a [`FetchTicket`]. `stop()` bumps the
//! generation, so a ticket issued before it can never be applied.

use std::time::Duration;

use casesync_core::{
    BackoffConfig, BackoffPolicy, CoreError, PollerState, PollingStatus, Task, TaskDiff,
    TaskRepository, TaskSnapshot,
};

/// Permission to apply the result of exactly one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    generation: u64,
}

impl FetchTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// What the session should do after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Fetch again right away (a resync was queued behind the last fetch).
    FetchNow(FetchTicket),
    /// Sleep, then call [`PollerMachine::on_timer`].
    Wait(Duration),
    /// Schedule nothing.
    Halt,
}

/// What one applied fetch did.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// The structural change, when there was one.
    pub diff: Option<TaskDiff>,
    /// Whether the snapshot contents changed at all.
    pub refreshed: bool,
    /// Why the fetch failed, if it did.
    pub error: Option<String>,
    /// Set when this failure stopped polling.
    pub fatal: Option<String>,
    pub next: NextStep,
}

/// Outcome of handing a fetch result to the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchCompletion {
    /// The ticket was invalidated by `stop()`; nothing was applied.
    Stale,
    Applied(CycleReport),
}

/// Poll scheduling for one case.
#[derive(Debug)]
pub struct PollerMachine {
    state: PollerState,
    repository: TaskRepository,
    backoff: BackoffPolicy,
    generation: u64,
    in_flight: Option<FetchTicket>,
    resync_queued: bool,
    suspended_by_inactivity: bool,
}

impl PollerMachine {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            state: PollerState::Idle,
            repository: TaskRepository::new(),
            backoff: BackoffPolicy::new(config),
            generation: 0,
            in_flight: None,
            resync_queued: false,
            suspended_by_inactivity: false,
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.repository.current()
    }

    pub fn current_delay(&self) -> Duration {
        self.backoff.current_delay()
    }

    /// The fetch currently awaited, if any.
    pub fn in_flight(&self) -> Option<FetchTicket> {
        self.in_flight
    }

    pub fn status(&self) -> PollingStatus {
        PollingStatus {
            state: self.state,
            running: self.state.is_running(),
            consecutive_failures: self.backoff.consecutive_failures(),
            current_delay: self.backoff.current_delay(),
            suspended_by_inactivity: self.suspended_by_inactivity,
        }
    }

    /// Begin polling with a fresh backoff, fetching immediately.
    ///
    /// Also the way out of `Stopped`. While the user is inactive the fetch
    /// is deferred until [`resume`](Self::resume).
    pub fn start(&mut self) -> Option<FetchTicket> {
        self.backoff.reset();
        if self.suspended_by_inactivity {
            if self.in_flight.is_none() {
                self.state = PollerState::Suspended;
            } else {
                self.state = PollerState::Polling;
            }
            return None;
        }
        self.state = PollerState::Polling;
        self.request_fetch()
    }

    /// Cancel the schedule and invalidate any in-flight fetch.
    ///
    /// `Stopped` survives a stop; only [`start`](Self::start) leaves it.
    pub fn stop(&mut self) {
        self.generation += 1;
        self.in_flight = None;
        self.resync_queued = false;
        if self.state != PollerState::Stopped {
            self.state = PollerState::Idle;
        }
    }

    /// Fetch out of cycle, then continue on the normal schedule.
    ///
    /// Queued behind an in-flight fetch instead of running beside it.
    /// Ignored while `Stopped`.
    pub fn force_resync(&mut self) -> Option<FetchTicket> {
        match self.state {
            PollerState::Stopped => return None,
            PollerState::Idle => {
                self.state = if self.suspended_by_inactivity {
                    PollerState::Suspended
                } else {
                    PollerState::Polling
                };
            }
            PollerState::Polling | PollerState::Suspended => {}
        }
        self.request_fetch()
    }

    /// The scheduled delay elapsed.
    pub fn on_timer(&mut self) -> Option<FetchTicket> {
        if self.state == PollerState::Polling && self.in_flight.is_none() {
            Some(self.issue())
        } else {
            None
        }
    }

    /// The user went inactive. Returns true if this changed anything.
    pub fn suspend(&mut self) -> bool {
        if self.suspended_by_inactivity {
            return false;
        }
        self.suspended_by_inactivity = true;
        if self.state == PollerState::Polling && self.in_flight.is_none() {
            self.state = PollerState::Suspended;
        }
        true
    }

    /// The user is back. Fetches immediately if polling was suspended.
    pub fn resume(&mut self) -> Option<FetchTicket> {
        if !std::mem::replace(&mut self.suspended_by_inactivity, false) {
            return None;
        }
        if self.state == PollerState::Suspended {
            self.state = PollerState::Polling;
            return self.request_fetch();
        }
        None
    }

    /// Apply the result of the fetch issued for `ticket`.
    pub fn complete<E: ToString>(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<Task>, E>,
    ) -> FetchCompletion {
        if self.in_flight != Some(ticket) {
            return FetchCompletion::Stale;
        }
        self.in_flight = None;

        let version = self.repository.version();
        let mut report = CycleReport {
            diff: None,
            refreshed: false,
            error: None,
            fatal: None,
            next: NextStep::Halt,
        };

        match result
            .map_err(|e| e.to_string())
            .and_then(|tasks| self.apply(tasks).map_err(|e| e.to_string()))
        {
            Ok(diff) => {
                self.backoff.on_fetch_success();
                if diff.is_empty() {
                    self.backoff.on_no_change_cycle();
                } else {
                    self.backoff.on_change_detected();
                    report.diff = Some(diff);
                }
            }
            Err(reason) => {
                if self.backoff.on_fetch_failure() {
                    self.state = PollerState::Stopped;
                    self.resync_queued = false;
                    report.fatal = Some(format!(
                        "task list fetch failed {} times in a row: {}",
                        self.backoff.consecutive_failures(),
                        reason
                    ));
                }
                report.error = Some(reason);
            }
        }

        report.refreshed = self.repository.version() != version;
        report.next = self.schedule_next();
        FetchCompletion::Applied(report)
    }

    fn apply(&mut self, tasks: Vec<Task>) -> Result<TaskDiff, CoreError> {
        self.repository.replace(tasks)
    }

    fn schedule_next(&mut self) -> NextStep {
        match self.state {
            PollerState::Idle | PollerState::Stopped => NextStep::Halt,
            PollerState::Polling | PollerState::Suspended => {
                if std::mem::take(&mut self.resync_queued) {
                    return NextStep::FetchNow(self.issue());
                }
                if self.suspended_by_inactivity {
                    self.state = PollerState::Suspended;
                    return NextStep::Halt;
                }
                self.state = PollerState::Polling;
                NextStep::Wait(self.backoff.current_delay())
            }
        }
    }

    fn request_fetch(&mut self) -> Option<FetchTicket> {
        if self.in_flight.is_some() {
            self.resync_queued = true;
            None
        } else {
            Some(self.issue())
        }
    }

    fn issue(&mut self) -> FetchTicket {
        let ticket = FetchTicket {
            generation: self.generation,
        };
        self.in_flight = Some(ticket);
        ticket
    }
}

impl Default for PollerMachine {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
