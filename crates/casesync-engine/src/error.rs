//! Errors returned to callers of the case session.

use thiserror::Error;

use casesync_core::TaskId;

use crate::backend::BackendError;

/// Outcome of a failed engine operation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The workflow engine rejected or failed the request.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// No form session is open.
    #[error("No form is open")]
    NoFormOpen,

    /// The open form is still loading or already being submitted.
    #[error("Form for task {0} is not ready for submission")]
    FormNotReady(TaskId),

    /// The task is known and does not allow cancellation.
    #[error("Task {0} cannot be canceled")]
    TaskNotCancelable(TaskId),

    /// The request was abandoned before it completed, e.g. its form was closed.
    #[error("Request was cancelled")]
    Cancelled,

    /// The case session has shut down.
    #[error("Case session is closed")]
    SessionClosed,
}
