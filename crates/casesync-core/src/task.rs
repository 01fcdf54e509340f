//! Task types as observed from the remote workflow engine.

use crate::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who a task is currently assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Assignee {
    /// A single user.
    User(String),
    /// A candidate group; any member may pick the task up.
    Group(String),
}

/// A unit of work exposed by the remote workflow engine for one case.
///
/// Local copies are never patched. Every fetch replaces the whole list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,

    /// Human readable task name.
    pub name: String,

    /// When the workflow engine created the task.
    pub created_at: DateTime<Utc>,

    /// Current assignee, if any.
    #[serde(default)]
    pub assignee: Option<Assignee>,

    /// Selects which form handler renders this task.
    #[serde(default)]
    pub form_key: Option<String>,

    /// Whether the user may cancel this task.
    #[serde(default)]
    pub cancelable: bool,
}

impl Task {
    /// Create a new Task.
    pub fn new(id: impl Into<TaskId>, name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            created_at,
            assignee: None,
            form_key: None,
            cancelable: false,
        }
    }

    /// Builder method to set the assignee.
    pub fn with_assignee(mut self, assignee: Assignee) -> Self {
        self.assignee = Some(assignee);
        self
    }

    /// Builder method to set the form key.
    pub fn with_form_key(mut self, form_key: impl Into<String>) -> Self {
        self.form_key = Some(form_key.into());
        self
    }

    /// Builder method to mark the task as cancelable.
    pub fn cancelable(mut self) -> Self {
        self.cancelable = true;
        self
    }
}
