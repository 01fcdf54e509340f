//! casesync engine.
//!
//! Keeps a client-side view of one case's workflow tasks in sync with the
//! remote engine by polling, and coordinates the user actions that change
//! that list:
//! - [`PollerMachine`]: fetch scheduling, diffing and backoff as a pure state machine
//! - [`InactivityMonitor`]: suspends polling while the user is away
//! - [`Orchestrator`]: pending start actions and the single open form
//! - [`CaseSession`]: the task that drives all of the above against a [`CaseBackend`]

pub mod activity;
pub mod backend;
pub mod config;
pub mod error;
pub mod event;
pub mod form;
pub mod handle;
pub mod inactivity;
pub mod orchestrator;
pub mod poller;
pub mod session;

pub use activity::{activity_channel, ActivityKind, ActivitySender, ActivityTick};
pub use backend::{BackendError, CaseBackend};
pub use config::EngineConfig;
pub use error::EngineError;
pub use event::{ActionKind, EngineEvent, EventReceiver};
pub use form::{FormPhase, FormSession};
pub use handle::CaseSessionHandle;
pub use inactivity::InactivityMonitor;
pub use orchestrator::{Orchestrator, PendingAction, PendingOutcome};
pub use poller::{CycleReport, FetchCompletion, FetchTicket, NextStep, PollerMachine};
pub use session::CaseSession;
