//! Bookkeeping for user actions whose outcome shows up in the task list.
//!
//! Two things live here: the single [`PendingAction`] left behind by a
//! start-message, and the single open [`FormSession`]. Both are plain state;
//! the session decides when to talk to the backend.

use std::collections::HashSet;

use tokio::task::AbortHandle;

use casesync_core::{ActionId, FormLayout, TaskDiff, TaskId};

use crate::error::EngineError;
use crate::form::FormSession;

/// A start-message waiting for the task it should create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub id: ActionId,
    /// Task ids known when the message was triggered.
    pub known_ids: HashSet<TaskId>,
    /// True until the message request itself has completed; polling may not
    /// restart in the meantime.
    pub awaiting_send: bool,
    /// Successful poll cycles this action may still wait through.
    pub cycles_left: u32,
}

/// Result of checking a poll cycle against the pending action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOutcome {
    /// Nothing pending, or the message is still being sent.
    Idle,
    /// Still waiting for the new task to appear.
    Waiting,
    /// The new task appeared and should be opened.
    Resolved { action_id: ActionId, task_id: TaskId },
    /// The cycle budget ran out without a new task.
    Expired { action_id: ActionId },
}

#[derive(Debug)]
pub struct Orchestrator {
    pending: Option<PendingAction>,
    form: Option<FormSession>,
    next_form_id: u64,
    retry_cycles: u32,
}

impl Orchestrator {
    /// `retry_cycles` is how many regular cycles a start-message may wait
    /// after its first resync.
    pub fn new(retry_cycles: u32) -> Self {
        Self {
            pending: None,
            form: None,
            next_form_id: 1,
            retry_cycles,
        }
    }

    pub fn pending(&self) -> Option<&PendingAction> {
        self.pending.as_ref()
    }

    /// Polling must not restart while a start-message is in flight.
    pub fn restarts_blocked(&self) -> bool {
        self.pending.as_ref().is_some_and(|p| p.awaiting_send)
    }

    /// Record a new start-message, replacing any earlier one.
    pub fn begin_start_message(
        &mut self,
        known_ids: HashSet<TaskId>,
    ) -> (ActionId, Option<PendingAction>) {
        let id = ActionId::generate();
        let replaced = self.pending.replace(PendingAction {
            id: id.clone(),
            known_ids,
            awaiting_send: true,
            cycles_left: 0,
        });
        (id, replaced)
    }

    /// The message was accepted. Returns false if a newer action replaced it.
    pub fn start_message_sent(&mut self, id: &ActionId) -> bool {
        match self.pending.as_mut() {
            Some(pending) if &pending.id == id => {
                pending.awaiting_send = false;
                // The forced resync plus the retry budget.
                pending.cycles_left = 1 + self.retry_cycles;
                true
            }
            _ => false,
        }
    }

    /// The message was rejected; forget the action if it is still current.
    pub fn start_message_failed(&mut self, id: &ActionId) -> bool {
        if self.pending.as_ref().is_some_and(|p| &p.id == id) {
            self.pending = None;
            true
        } else {
            false
        }
    }

    /// Check a successful poll cycle against the pending action.
    pub fn observe_cycle(&mut self, diff: Option<&TaskDiff>) -> PendingOutcome {
        let Some(pending) = self.pending.as_mut() else {
            return PendingOutcome::Idle;
        };
        if pending.awaiting_send {
            return PendingOutcome::Idle;
        }

        // `added` is newest first, so the first unknown id wins ties.
        let created = diff.and_then(|diff| {
            diff.added_ids()
                .find(|id| !pending.known_ids.contains(*id))
                .cloned()
        });

        if let Some(task_id) = created {
            let action_id = pending.id.clone();
            self.pending = None;
            return PendingOutcome::Resolved { action_id, task_id };
        }

        pending.cycles_left = pending.cycles_left.saturating_sub(1);
        if pending.cycles_left == 0 {
            let action_id = pending.id.clone();
            self.pending = None;
            return PendingOutcome::Expired { action_id };
        }
        PendingOutcome::Waiting
    }

    /// Drop the pending action, e.g. on teardown.
    pub fn clear_pending(&mut self) -> Option<PendingAction> {
        self.pending.take()
    }

    pub fn form(&self) -> Option<&FormSession> {
        self.form.as_ref()
    }

    pub fn form_open(&self) -> bool {
        self.form.is_some()
    }

    /// Open a form for `task_id`, closing the current one first.
    ///
    /// Returns the new session id and the task whose form was closed.
    pub fn open_form(&mut self, task_id: TaskId) -> (u64, Option<TaskId>) {
        let closed = self.close_form();
        let id = self.next_form_id;
        self.next_form_id += 1;
        self.form = Some(FormSession::new(id, task_id));
        (id, closed)
    }

    pub fn close_form(&mut self) -> Option<TaskId> {
        self.form.take().map(FormSession::close)
    }

    pub fn is_current_form(&self, session_id: u64) -> bool {
        self.form.as_ref().is_some_and(|form| form.id() == session_id)
    }

    pub fn track_form_request(&mut self, session_id: u64, request: AbortHandle) {
        match self.form.as_mut() {
            Some(form) if form.id() == session_id => form.track(request),
            _ => request.abort(),
        }
    }

    pub fn form_loaded(&mut self, session_id: u64, layout: FormLayout) {
        if let Some(form) = self.form.as_mut().filter(|form| form.id() == session_id) {
            form.loaded(layout);
        }
    }

    /// Mark the open form as submitting and return its session and task.
    pub fn begin_submit(&mut self) -> Result<(u64, TaskId), EngineError> {
        let form = self.form.as_mut().ok_or(EngineError::NoFormOpen)?;
        if !form.begin_submit() {
            return Err(EngineError::FormNotReady(form.task_id().clone()));
        }
        Ok((form.id(), form.task_id().clone()))
    }

    pub fn submit_failed(&mut self, session_id: u64) {
        if let Some(form) = self.form.as_mut().filter(|form| form.id() == session_id) {
            form.submit_failed();
        }
    }
}
