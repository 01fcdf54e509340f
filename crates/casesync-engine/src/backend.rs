//! The remote workflow engine as seen by the case session.

use async_trait::async_trait;
use thiserror::Error;

use casesync_core::{CaseId, CaseResolution, FormData, FormLayout, StartMessage, Task, TaskId};

/// Errors a [`CaseBackend`] reports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The request never got a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The workflow engine answered with a non-success status.
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The addressed case or task does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Request/response API of the remote workflow engine.
///
/// Implementations must be cheap to call concurrently; the session issues
/// at most one task-list fetch at a time but may run an action alongside it.
#[async_trait]
pub trait CaseBackend: Send + Sync {
    /// List the active tasks of a case.
    async fn fetch_tasks(&self, case_id: &CaseId) -> Result<Vec<Task>, BackendError>;

    /// Layout and context of the form for a task.
    async fn fetch_form_layout(&self, task_id: &TaskId) -> Result<FormLayout, BackendError>;

    /// Submit form data as an update to a task.
    async fn submit_task_form(&self, task_id: &TaskId, data: &FormData)
        -> Result<(), BackendError>;

    /// Send a message that starts a new task in the case.
    async fn send_start_message(
        &self,
        case_id: &CaseId,
        message: &StartMessage,
    ) -> Result<(), BackendError>;

    /// Cancel a task.
    async fn cancel_task(&self, task_id: &TaskId) -> Result<(), BackendError>;

    /// Close the case with a final resolution.
    async fn close_case(
        &self,
        case_id: &CaseId,
        resolution: &CaseResolution,
    ) -> Result<(), BackendError>;
}
