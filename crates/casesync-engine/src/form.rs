//! Lifecycle of the single open task form.

use tokio::task::AbortHandle;

use casesync_core::{FormLayout, TaskId};

/// Where an open form is in its lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum FormPhase {
    /// Waiting for the layout.
    Loading,
    /// Rendered and editable.
    Ready(FormLayout),
    /// Submitted, waiting for the engine to accept it.
    Submitting(FormLayout),
}

/// One open task form.
///
/// Owns the handle of its outstanding request; dropping or closing the
/// session aborts that request.
#[derive(Debug)]
pub struct FormSession {
    id: u64,
    task_id: TaskId,
    phase: FormPhase,
    request: Option<AbortHandle>,
}

impl FormSession {
    pub fn new(id: u64, task_id: TaskId) -> Self {
        Self {
            id,
            task_id,
            phase: FormPhase::Loading,
            request: None,
        }
    }

    /// Distinguishes this session from earlier ones for the same task.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn phase(&self) -> &FormPhase {
        &self.phase
    }

    /// Remember the request currently running on behalf of this form.
    pub fn track(&mut self, request: AbortHandle) {
        if let Some(previous) = self.request.replace(request) {
            previous.abort();
        }
    }

    pub fn loaded(&mut self, layout: FormLayout) {
        self.request = None;
        self.phase = FormPhase::Ready(layout);
    }

    /// Move to `Submitting`. Returns false unless the form was `Ready`.
    pub fn begin_submit(&mut self) -> bool {
        match std::mem::replace(&mut self.phase, FormPhase::Loading) {
            FormPhase::Ready(layout) => {
                self.phase = FormPhase::Submitting(layout);
                true
            }
            other => {
                self.phase = other;
                false
            }
        }
    }

    /// The engine rejected the submission; the form stays editable.
    pub fn submit_failed(&mut self) {
        self.request = None;
        if let FormPhase::Submitting(layout) = std::mem::replace(&mut self.phase, FormPhase::Loading)
        {
            self.phase = FormPhase::Ready(layout);
        }
    }

    /// Discard the form, aborting whatever it was waiting for.
    pub fn close(mut self) -> TaskId {
        self.abort_request();
        std::mem::replace(&mut self.task_id, TaskId::new(""))
    }

    fn abort_request(&mut self) {
        if let Some(request) = self.request.take() {
            request.abort();
        }
    }
}

impl Drop for FormSession {
    fn drop(&mut self) {
        self.abort_request();
    }
}
