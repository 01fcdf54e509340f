//! Core domain errors.

use thiserror::Error;

use crate::ids::TaskId;

/// Core domain errors for casesync.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A fetched task list named the same task twice.
    #[error("Duplicate task id in task list: {0}")]
    DuplicateTaskId(TaskId),
}
