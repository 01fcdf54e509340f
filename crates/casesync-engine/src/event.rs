//! Events published by the case session and commands sent to it.

use tokio::sync::{mpsc, oneshot};

use casesync_core::{
    ActionId, CaseResolution, FormData, FormLayout, PollingStatus, RedirectTarget, StartMessage,
    TaskDiff, TaskId, TaskSnapshot,
};

use crate::activity::ActivityTick;
use crate::error::EngineError;

/// Receiving side of the session's event stream.
pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// The user action an [`EngineEvent::ActionFailed`] refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    OpenTask(TaskId),
    SubmitForm(TaskId),
    SendStartMessage(ActionId),
    CancelTask(TaskId),
    CloseCase,
}

/// Events sent from the case session to whoever renders it.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Tasks appeared or disappeared.
    TaskListChanged {
        diff: TaskDiff,
        snapshot: TaskSnapshot,
    },

    /// Task fields changed while the set of tasks stayed the same.
    TasksRefreshed { snapshot: TaskSnapshot },

    /// Poller state or counters changed.
    StateChanged(PollingStatus),

    /// Polling halted after repeated failures.
    Fatal { reason: String },

    /// A task form is loaded and ready to render.
    FormOpened { task_id: TaskId, layout: FormLayout },

    /// The task wants the user sent elsewhere instead of a form.
    Redirect {
        task_id: TaskId,
        url: String,
        target: RedirectTarget,
    },

    /// The form for a task was discarded.
    FormClosed { task_id: TaskId },

    /// A form submission was accepted.
    FormSubmitted { task_id: TaskId },

    /// The task created by a start-message was found and is being opened.
    PendingActionResolved { action_id: ActionId, task_id: TaskId },

    /// A start-message never produced a visible task.
    PendingActionExpired { action_id: ActionId },

    /// A user action failed; nothing local was changed.
    ActionFailed { action: ActionKind, error: String },
}

/// Reply channel for a command.
pub(crate) type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Commands sent from handles to the case session.
#[derive(Debug)]
pub(crate) enum EngineCommand {
    Start,
    Stop,
    ForceResync,
    Activity(ActivityTick),
    OpenTask {
        task_id: TaskId,
        reply: Reply<FormLayout>,
    },
    CloseForm {
        reply: oneshot::Sender<Option<TaskId>>,
    },
    SubmitForm {
        data: FormData,
        reply: Reply<()>,
    },
    SendStartMessage {
        message: StartMessage,
        reply: Reply<ActionId>,
    },
    CancelTask {
        task_id: TaskId,
        reply: Reply<()>,
    },
    CloseCase {
        resolution: CaseResolution,
        reply: Reply<()>,
    },
    Shutdown,
}
