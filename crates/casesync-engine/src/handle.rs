//! Cloneable handle for talking to a running [`CaseSession`](crate::CaseSession).

use tokio::sync::{mpsc, oneshot, watch};

use casesync_core::{
    ActionId, CaseId, CaseResolution, FormData, FormLayout, PollingStatus, StartMessage, TaskId,
    TaskSnapshot,
};

use crate::activity::{ActivityKind, ActivityTick};
use crate::error::EngineError;
use crate::event::{EngineCommand, Reply};
use crate::session::await_reply;

#[derive(Debug, Clone)]
pub struct CaseSessionHandle {
    case_id: CaseId,
    cmd_tx: mpsc::Sender<EngineCommand>,
    snapshot_rx: watch::Receiver<TaskSnapshot>,
    status_rx: watch::Receiver<PollingStatus>,
}

impl CaseSessionHandle {
    pub(crate) fn new(
        case_id: CaseId,
        cmd_tx: mpsc::Sender<EngineCommand>,
        snapshot_rx: watch::Receiver<TaskSnapshot>,
        status_rx: watch::Receiver<PollingStatus>,
    ) -> Self {
        Self {
            case_id,
            cmd_tx,
            snapshot_rx,
            status_rx,
        }
    }

    pub fn case_id(&self) -> &CaseId {
        &self.case_id
    }

    /// Start polling with a fresh backoff. Also clears a fatal stop.
    pub async fn start(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Start).await
    }

    /// Stop polling and discard any fetch in flight.
    pub async fn stop(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Stop).await
    }

    /// Fetch now, then continue on the regular schedule.
    pub async fn force_resync(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::ForceResync).await
    }

    /// Report user activity directly, without an activity stream.
    pub async fn record_activity(&self, kind: ActivityKind) -> Result<(), EngineError> {
        self.send(EngineCommand::Activity(ActivityTick::now(kind)))
            .await
    }

    /// Open the form for a task, closing any form that is already open.
    ///
    /// Polling pauses until the form is closed or submitted. A redirect
    /// layout is returned as is; the session has already closed the form.
    pub async fn open_task(&self, task_id: TaskId) -> Result<FormLayout, EngineError> {
        self.request(|reply| EngineCommand::OpenTask { task_id, reply })
            .await
    }

    /// Discard the open form. Returns the task it belonged to.
    pub async fn close_form(&self) -> Result<Option<TaskId>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::CloseForm { reply }).await?;
        rx.await.map_err(|_| EngineError::Cancelled)
    }

    /// Submit the open form.
    pub async fn submit_form(&self, data: FormData) -> Result<(), EngineError> {
        self.request(|reply| EngineCommand::SubmitForm { data, reply })
            .await
    }

    /// Send a start-message and wait for the engine to accept it.
    ///
    /// The task it creates is opened automatically once a poll cycle shows
    /// it; watch for [`EngineEvent::PendingActionResolved`](crate::EngineEvent).
    pub async fn send_start_message(&self, message: StartMessage) -> Result<ActionId, EngineError> {
        self.request(|reply| EngineCommand::SendStartMessage { message, reply })
            .await
    }

    pub async fn cancel_task(&self, task_id: TaskId) -> Result<(), EngineError> {
        self.request(|reply| EngineCommand::CancelTask { task_id, reply })
            .await
    }

    pub async fn close_case(&self, resolution: CaseResolution) -> Result<(), EngineError> {
        self.request(|reply| EngineCommand::CloseCase { resolution, reply })
            .await
    }

    /// The latest task snapshot.
    pub fn snapshot(&self) -> TaskSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// The latest polling status.
    pub fn status(&self) -> PollingStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<TaskSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<PollingStatus> {
        self.status_rx.clone()
    }

    /// Stop the session and wait until it has torn down.
    pub async fn shutdown(&self) {
        if self.cmd_tx.send(EngineCommand::Shutdown).await.is_ok() {
            self.cmd_tx.closed().await;
        }
    }

    async fn send(&self, cmd: EngineCommand) -> Result<(), EngineError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| EngineError::SessionClosed)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> EngineCommand,
    ) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        await_reply(rx).await
    }
}
