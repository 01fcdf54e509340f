//! Payloads exchanged with the workflow engine around task forms and
//! case-level actions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field values a user submitted for a task form.
pub type FormData = Map<String, Value>;

/// Where a redirect should be opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectTarget {
    /// Replace the current view.
    #[default]
    SameWindow,
    /// Open beside the current view.
    NewWindow,
}

/// What the workflow engine wants shown for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormLayout {
    /// A form rendered by the handler registered for `form_key`.
    Form {
        #[serde(rename = "formKey")]
        form_key: String,
        /// Handler specific layout and prefilled context.
        #[serde(default)]
        context: Value,
    },
    /// No form; the user is sent elsewhere immediately.
    Redirect {
        url: String,
        #[serde(default)]
        target: RedirectTarget,
    },
}

impl FormLayout {
    pub fn is_redirect(&self) -> bool {
        matches!(self, Self::Redirect { .. })
    }
}

/// Message that asks the workflow engine to start a new task in a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMessage {
    /// Message name the process definition listens for.
    pub name: String,

    /// Process variables sent along with the message.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
}

impl StartMessage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variables: Map::new(),
        }
    }

    /// Builder method to add a process variable.
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }
}

/// Final result recorded when a case is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseResolution {
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl CaseResolution {
    pub fn new(outcome: impl Into<String>) -> Self {
        Self {
            outcome: outcome.into(),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}
