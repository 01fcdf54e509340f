//! The case session task.
//!
//! One tokio task per case view owns the poller, the inactivity monitor and
//! the orchestrator. It multiplexes commands, activity ticks, request
//! completions and its two timers on a single `select!` loop, so none of
//! that state is ever shared or locked.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, trace, warn};

use casesync_core::{
    ActionId, CaseId, CaseResolution, FormData, FormLayout, PollerState, PollingStatus,
    StartMessage, Task, TaskDiff, TaskId, TaskSnapshot,
};

use crate::activity::ActivityTick;
use crate::backend::{BackendError, CaseBackend};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::event::{ActionKind, EngineCommand, EngineEvent, EventReceiver, Reply};
use crate::handle::CaseSessionHandle;
use crate::inactivity::InactivityMonitor;
use crate::orchestrator::{Orchestrator, PendingOutcome};
use crate::poller::{CycleReport, FetchCompletion, FetchTicket, NextStep, PollerMachine};

type ActivityStream = std::pin::Pin<Box<dyn Stream<Item = ActivityTick> + Send>>;
type FetchResult = (FetchTicket, Result<Vec<Task>, BackendError>);

/// Completion of a request the session started on behalf of a user action.
enum ActionOutcome {
    LayoutLoaded {
        session_id: u64,
        task_id: TaskId,
        result: Result<FormLayout, BackendError>,
        reply: Option<Reply<FormLayout>>,
    },
    FormSubmitted {
        session_id: u64,
        task_id: TaskId,
        result: Result<(), BackendError>,
        reply: Reply<()>,
    },
    StartMessageSent {
        action_id: ActionId,
        result: Result<(), BackendError>,
        reply: Reply<ActionId>,
    },
    TaskCanceled {
        task_id: TaskId,
        result: Result<(), BackendError>,
        reply: Reply<()>,
    },
    CaseClosed {
        result: Result<(), BackendError>,
        reply: Reply<()>,
    },
}

/// Synchronization engine for one case view.
pub struct CaseSession {
    case_id: CaseId,
    config: EngineConfig,
    backend: Arc<dyn CaseBackend>,
    poller: PollerMachine,
    inactivity: InactivityMonitor,
    orchestrator: Orchestrator,
    cmd_rx: mpsc::Receiver<EngineCommand>,
    activity: ActivityStream,
    activity_open: bool,
    events: mpsc::UnboundedSender<EngineEvent>,
    snapshot_tx: watch::Sender<TaskSnapshot>,
    status_tx: watch::Sender<PollingStatus>,
    fetches: JoinSet<FetchResult>,
    actions: JoinSet<ActionOutcome>,
    poll_deadline: Option<Instant>,
    deferred_start: bool,
}

impl CaseSession {
    /// Spawn the session for `case_id` on the current runtime.
    ///
    /// The session runs until [`CaseSessionHandle::shutdown`] is called or
    /// every handle is dropped. Events go to the returned receiver.
    pub fn spawn<S>(
        case_id: CaseId,
        backend: Arc<dyn CaseBackend>,
        activity: S,
        config: EngineConfig,
    ) -> (CaseSessionHandle, EventReceiver)
    where
        S: Stream<Item = ActivityTick> + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer.max(1));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(TaskSnapshot::empty());

        let poller = PollerMachine::new(config.backoff.clone());
        let (status_tx, status_rx) = watch::channel(poller.status());

        let session = Self {
            case_id: case_id.clone(),
            inactivity: InactivityMonitor::new(config.inactivity_timeout, Instant::now()),
            orchestrator: Orchestrator::new(config.start_message_retry_cycles),
            config,
            backend,
            poller,
            cmd_rx,
            activity: Box::pin(activity),
            activity_open: true,
            events: event_tx,
            snapshot_tx,
            status_tx,
            fetches: JoinSet::new(),
            actions: JoinSet::new(),
            poll_deadline: None,
            deferred_start: false,
        };

        tokio::spawn(session.run());

        (
            CaseSessionHandle::new(case_id, cmd_tx, snapshot_rx, status_rx),
            event_rx,
        )
    }

    async fn run(mut self) {
        info!(case_id = %self.case_id, "Case session started");

        if self.config.autostart {
            self.start();
            self.publish_status();
        }

        loop {
            let poll_deadline = self.poll_deadline;
            let idle_deadline = self.inactivity.deadline();

            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(EngineCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },

                tick = self.activity.next(), if self.activity_open => match tick {
                    Some(tick) => self.on_activity(tick),
                    None => {
                        debug!(case_id = %self.case_id, "Activity source closed");
                        self.activity_open = false;
                    }
                },

                Some(joined) = self.fetches.join_next() => self.on_fetch_joined(joined),

                Some(joined) = self.actions.join_next() => self.on_action_joined(joined),

                _ = sleep_until(poll_deadline) => {
                    self.poll_deadline = None;
                    let ticket = self.poller.on_timer();
                    self.issue(ticket);
                }

                _ = sleep_until(idle_deadline) => self.on_inactivity_deadline(),
            }

            self.publish_status();
        }

        self.teardown();
    }

    fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Start => self.start(),
            EngineCommand::Stop => {
                info!(case_id = %self.case_id, "Polling stopped on request");
                self.deferred_start = false;
                self.stop_polling();
            }
            EngineCommand::ForceResync => self.force_resync(),
            EngineCommand::Activity(tick) => self.on_activity(tick),
            EngineCommand::OpenTask { task_id, reply } => self.open_task(task_id, Some(reply)),
            EngineCommand::CloseForm { reply } => {
                let closed = self.close_form();
                let _ = reply.send(closed);
            }
            EngineCommand::SubmitForm { data, reply } => self.submit_form(data, reply),
            EngineCommand::SendStartMessage { message, reply } => {
                self.send_start_message(message, reply)
            }
            EngineCommand::CancelTask { task_id, reply } => self.cancel_task(task_id, reply),
            EngineCommand::CloseCase { resolution, reply } => self.close_case(resolution, reply),
            // Handled by the run loop.
            EngineCommand::Shutdown => {}
        }
    }

    // ---- polling -------------------------------------------------------

    fn start(&mut self) {
        if self.orchestrator.restarts_blocked() {
            debug!(case_id = %self.case_id, "Start deferred until the start-message is sent");
            self.deferred_start = true;
            return;
        }
        info!(case_id = %self.case_id, "Polling started");
        let ticket = self.poller.start();
        self.issue(ticket);
    }

    fn stop_polling(&mut self) {
        self.poller.stop();
        self.fetches.abort_all();
        self.poll_deadline = None;
    }

    fn force_resync(&mut self) {
        if self.poller.state() == PollerState::Stopped {
            warn!(case_id = %self.case_id, "Polling is stopped; resync ignored until restarted");
            return;
        }
        // The resync that follows the send covers this one.
        if self.orchestrator.restarts_blocked() {
            debug!(case_id = %self.case_id, "Start-message in flight; resync held back");
            return;
        }
        let ticket = self.poller.force_resync();
        self.issue(ticket);
    }

    /// Resync after a user action, unless polling is meant to stay paused.
    fn resync_after_action(&mut self) {
        if self.orchestrator.form_open() {
            debug!(case_id = %self.case_id, "Form open; resync deferred until it closes");
        } else if self.orchestrator.restarts_blocked() {
            debug!(case_id = %self.case_id, "Start-message in flight; resync deferred");
        } else if std::mem::take(&mut self.deferred_start) {
            self.start();
        } else {
            self.force_resync();
        }
    }

    fn issue(&mut self, ticket: Option<FetchTicket>) {
        let Some(ticket) = ticket else {
            return;
        };
        self.poll_deadline = None;

        debug!(case_id = %self.case_id, generation = ticket.generation(), "Fetching task list");
        let backend = Arc::clone(&self.backend);
        let case_id = self.case_id.clone();
        self.fetches.spawn(async move {
            let result = backend.fetch_tasks(&case_id).await;
            (ticket, result)
        });
    }

    fn on_fetch_joined(&mut self, joined: Result<FetchResult, JoinError>) {
        let (ticket, result) = match joined {
            Ok(fetched) => fetched,
            // Aborted by stop(); the ticket is already invalid.
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                error!(case_id = %self.case_id, error = %e, "Task list fetch panicked");
                let Some(ticket) = self.poller.in_flight() else {
                    return;
                };
                (ticket, Err(BackendError::Transport(e.to_string())))
            }
        };

        match self.poller.complete(ticket, result) {
            FetchCompletion::Stale => {
                debug!(case_id = %self.case_id, generation = ticket.generation(), "Discarding stale task list");
            }
            FetchCompletion::Applied(report) => self.apply_cycle(report),
        }
    }

    fn apply_cycle(&mut self, report: CycleReport) {
        let CycleReport {
            diff,
            refreshed,
            error,
            fatal,
            next,
        } = report;

        if let Some(reason) = &error {
            warn!(
                case_id = %self.case_id,
                failures = self.poller.status().consecutive_failures,
                error = %reason,
                "Task list fetch failed"
            );
        }

        let snapshot = self.poller.snapshot();
        if refreshed {
            self.snapshot_tx.send_replace(snapshot.clone());
        }
        match &diff {
            Some(diff) => {
                info!(
                    case_id = %self.case_id,
                    added = diff.added.len(),
                    removed = diff.removed.len(),
                    "Task list changed"
                );
                self.emit(EngineEvent::TaskListChanged {
                    diff: diff.clone(),
                    snapshot,
                });
            }
            None if refreshed => self.emit(EngineEvent::TasksRefreshed { snapshot }),
            None => trace!(case_id = %self.case_id, "Task list unchanged"),
        }

        if let Some(reason) = fatal {
            error!(case_id = %self.case_id, reason = %reason, "Polling stopped");
            self.emit(EngineEvent::Fatal { reason });
        }

        match next {
            NextStep::FetchNow(ticket) => self.issue(Some(ticket)),
            NextStep::Wait(delay) => {
                debug!(case_id = %self.case_id, delay_ms = delay.as_millis() as u64, "Next poll scheduled");
                // A delay too large to represent means no further poll.
                self.poll_deadline = Instant::now().checked_add(delay);
            }
            NextStep::Halt => self.poll_deadline = None,
        }

        // Resolving may open a form, which stops polling again; it has to
        // come after scheduling.
        if error.is_none() {
            self.observe_pending(diff.as_ref());
        }
    }

    fn observe_pending(&mut self, diff: Option<&TaskDiff>) {
        match self.orchestrator.observe_cycle(diff) {
            PendingOutcome::Idle => {}
            PendingOutcome::Waiting => {
                debug!(case_id = %self.case_id, "Start-message task not visible yet");
            }
            PendingOutcome::Resolved { action_id, task_id } => {
                info!(
                    case_id = %self.case_id,
                    action_id = %action_id,
                    task_id = %task_id,
                    "Start-message produced a task, opening it"
                );
                self.emit(EngineEvent::PendingActionResolved {
                    action_id,
                    task_id: task_id.clone(),
                });
                self.open_task(task_id, None);
            }
            PendingOutcome::Expired { action_id } => {
                info!(case_id = %self.case_id, action_id = %action_id, "Start-message produced no visible task");
                self.emit(EngineEvent::PendingActionExpired { action_id });
            }
        }
    }

    // ---- presence ------------------------------------------------------

    fn on_activity(&mut self, tick: ActivityTick) {
        trace!(case_id = %self.case_id, kind = ?tick.kind, "Activity");
        if self.inactivity.record_activity(tick.at) {
            info!(case_id = %self.case_id, "User active again, resuming polling");
            let ticket = self.poller.resume();
            self.issue(ticket);
        }
    }

    fn on_inactivity_deadline(&mut self) {
        if !self.inactivity.check(Instant::now()) {
            return;
        }
        info!(
            case_id = %self.case_id,
            timeout_ms = self.config.inactivity_timeout.as_millis() as u64,
            "No user activity, suspending polling"
        );
        self.poller.suspend();
        if self.poller.state() != PollerState::Polling {
            self.poll_deadline = None;
        }
    }

    // ---- user actions --------------------------------------------------

    fn open_task(&mut self, task_id: TaskId, reply: Option<Reply<FormLayout>>) {
        self.stop_polling();

        let (session_id, closed) = self.orchestrator.open_form(task_id.clone());
        if let Some(closed) = closed {
            self.emit(EngineEvent::FormClosed { task_id: closed });
        }
        info!(case_id = %self.case_id, task_id = %task_id, "Opening task form");

        let backend = Arc::clone(&self.backend);
        let request = self.actions.spawn(async move {
            let result = backend.fetch_form_layout(&task_id).await;
            ActionOutcome::LayoutLoaded {
                session_id,
                task_id,
                result,
                reply,
            }
        });
        self.orchestrator.track_form_request(session_id, request);
    }

    fn close_form(&mut self) -> Option<TaskId> {
        let closed = self.orchestrator.close_form()?;
        info!(case_id = %self.case_id, task_id = %closed, "Form closed");
        self.emit(EngineEvent::FormClosed {
            task_id: closed.clone(),
        });
        self.resync_after_action();
        Some(closed)
    }

    fn submit_form(&mut self, data: FormData, reply: Reply<()>) {
        let (session_id, task_id) = match self.orchestrator.begin_submit() {
            Ok(open) => open,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        debug!(case_id = %self.case_id, task_id = %task_id, "Submitting task form");

        let backend = Arc::clone(&self.backend);
        let request = self.actions.spawn(async move {
            let result = backend.submit_task_form(&task_id, &data).await;
            ActionOutcome::FormSubmitted {
                session_id,
                task_id,
                result,
                reply,
            }
        });
        self.orchestrator.track_form_request(session_id, request);
    }

    fn send_start_message(&mut self, message: StartMessage, reply: Reply<ActionId>) {
        self.stop_polling();

        let known_ids = self.poller.snapshot().ids();
        let (action_id, replaced) = self.orchestrator.begin_start_message(known_ids);
        if let Some(previous) = replaced {
            info!(
                case_id = %self.case_id,
                previous = %previous.id,
                action_id = %action_id,
                "Replacing pending start-message"
            );
        }
        info!(case_id = %self.case_id, action_id = %action_id, message = %message.name, "Sending start-message");

        let backend = Arc::clone(&self.backend);
        let case_id = self.case_id.clone();
        self.actions.spawn(async move {
            let result = backend.send_start_message(&case_id, &message).await;
            ActionOutcome::StartMessageSent {
                action_id,
                result,
                reply,
            }
        });
    }

    fn cancel_task(&mut self, task_id: TaskId, reply: Reply<()>) {
        if self
            .poller
            .snapshot()
            .get(&task_id)
            .is_some_and(|task| !task.cancelable)
        {
            let _ = reply.send(Err(EngineError::TaskNotCancelable(task_id)));
            return;
        }
        info!(case_id = %self.case_id, task_id = %task_id, "Canceling task");

        let backend = Arc::clone(&self.backend);
        self.actions.spawn(async move {
            let result = backend.cancel_task(&task_id).await;
            ActionOutcome::TaskCanceled {
                task_id,
                result,
                reply,
            }
        });
    }

    fn close_case(&mut self, resolution: CaseResolution, reply: Reply<()>) {
        info!(case_id = %self.case_id, outcome = %resolution.outcome, "Closing case");

        let backend = Arc::clone(&self.backend);
        let case_id = self.case_id.clone();
        self.actions.spawn(async move {
            let result = backend.close_case(&case_id, &resolution).await;
            ActionOutcome::CaseClosed { result, reply }
        });
    }

    fn on_action_joined(&mut self, joined: Result<ActionOutcome, JoinError>) {
        let outcome = match joined {
            Ok(outcome) => outcome,
            // Form closed or superseded; the caller sees a dropped reply.
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                error!(case_id = %self.case_id, error = %e, "Action request panicked");
                return;
            }
        };

        match outcome {
            ActionOutcome::LayoutLoaded {
                session_id,
                task_id,
                result,
                reply,
            } => self.on_layout_loaded(session_id, task_id, result, reply),

            ActionOutcome::FormSubmitted {
                session_id,
                task_id,
                result,
                reply,
            } => {
                if !self.orchestrator.is_current_form(session_id) {
                    let _ = reply.send(Err(EngineError::Cancelled));
                    return;
                }
                match result {
                    Ok(()) => {
                        info!(case_id = %self.case_id, task_id = %task_id, "Task form submitted");
                        self.orchestrator.close_form();
                        self.emit(EngineEvent::FormSubmitted {
                            task_id: task_id.clone(),
                        });
                        self.emit(EngineEvent::FormClosed { task_id });
                        self.resync_after_action();
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        warn!(case_id = %self.case_id, task_id = %task_id, error = %e, "Form submission failed");
                        self.orchestrator.submit_failed(session_id);
                        self.action_failed(ActionKind::SubmitForm(task_id), &e);
                        let _ = reply.send(Err(e.into()));
                    }
                }
            }

            ActionOutcome::StartMessageSent {
                action_id,
                result,
                reply,
            } => match result {
                Ok(()) => {
                    if self.orchestrator.start_message_sent(&action_id) {
                        debug!(case_id = %self.case_id, action_id = %action_id, "Start-message accepted");
                    }
                    self.resync_after_action();
                    let _ = reply.send(Ok(action_id));
                }
                Err(e) => {
                    warn!(case_id = %self.case_id, action_id = %action_id, error = %e, "Start-message failed");
                    self.orchestrator.start_message_failed(&action_id);
                    self.action_failed(ActionKind::SendStartMessage(action_id), &e);
                    self.resync_after_action();
                    let _ = reply.send(Err(e.into()));
                }
            },

            ActionOutcome::TaskCanceled {
                task_id,
                result,
                reply,
            } => match result {
                Ok(()) => {
                    info!(case_id = %self.case_id, task_id = %task_id, "Task canceled");
                    self.resync_after_action();
                    let _ = reply.send(Ok(()));
                }
                Err(e) => {
                    warn!(case_id = %self.case_id, task_id = %task_id, error = %e, "Cancel failed");
                    self.action_failed(ActionKind::CancelTask(task_id), &e);
                    let _ = reply.send(Err(e.into()));
                }
            },

            ActionOutcome::CaseClosed { result, reply } => match result {
                Ok(()) => {
                    info!(case_id = %self.case_id, "Case closed");
                    self.resync_after_action();
                    let _ = reply.send(Ok(()));
                }
                Err(e) => {
                    warn!(case_id = %self.case_id, error = %e, "Closing case failed");
                    self.action_failed(ActionKind::CloseCase, &e);
                    let _ = reply.send(Err(e.into()));
                }
            },
        }
    }

    fn on_layout_loaded(
        &mut self,
        session_id: u64,
        task_id: TaskId,
        result: Result<FormLayout, BackendError>,
        reply: Option<Reply<FormLayout>>,
    ) {
        let respond = |reply: Option<Reply<FormLayout>>, value: Result<FormLayout, EngineError>| {
            if let Some(reply) = reply {
                let _ = reply.send(value);
            }
        };

        if !self.orchestrator.is_current_form(session_id) {
            respond(reply, Err(EngineError::Cancelled));
            return;
        }

        match result {
            Ok(FormLayout::Redirect { url, target }) => {
                info!(case_id = %self.case_id, task_id = %task_id, url = %url, "Task redirects instead of rendering a form");
                self.orchestrator.close_form();
                self.emit(EngineEvent::Redirect {
                    task_id,
                    url: url.clone(),
                    target,
                });
                self.resync_after_action();
                respond(reply, Ok(FormLayout::Redirect { url, target }));
            }
            Ok(layout) => {
                debug!(case_id = %self.case_id, task_id = %task_id, "Task form loaded");
                self.orchestrator.form_loaded(session_id, layout.clone());
                self.emit(EngineEvent::FormOpened {
                    task_id,
                    layout: layout.clone(),
                });
                respond(reply, Ok(layout));
            }
            Err(e) => {
                warn!(case_id = %self.case_id, task_id = %task_id, error = %e, "Loading task form failed");
                self.orchestrator.close_form();
                self.action_failed(ActionKind::OpenTask(task_id), &e);
                self.resync_after_action();
                respond(reply, Err(e.into()));
            }
        }
    }

    // ---- plumbing ------------------------------------------------------

    fn action_failed(&self, action: ActionKind, error: &BackendError) {
        self.emit(EngineEvent::ActionFailed {
            action,
            error: error.to_string(),
        });
    }

    fn emit(&self, event: EngineEvent) {
        // Nobody listening is fine; the watch channels still carry state.
        let _ = self.events.send(event);
    }

    fn publish_status(&self) {
        let status = self.poller.status();
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status.clone();
                true
            }
        });
        if changed {
            debug!(case_id = %self.case_id, state = %status.state, "Polling state changed");
            self.emit(EngineEvent::StateChanged(status));
        }
    }

    fn teardown(&mut self) {
        self.poller.stop();
        self.fetches.abort_all();
        self.actions.abort_all();
        self.poll_deadline = None;
        self.orchestrator.clear_pending();
        if let Some(task_id) = self.orchestrator.close_form() {
            self.emit(EngineEvent::FormClosed { task_id });
        }
        self.publish_status();
        info!(case_id = %self.case_id, "Case session stopped");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Used by handles to wait for a command's reply.
pub(crate) async fn await_reply<T>(
    rx: oneshot::Receiver<Result<T, EngineError>>,
) -> Result<T, EngineError> {
    rx.await.unwrap_or(Err(EngineError::Cancelled))
}
