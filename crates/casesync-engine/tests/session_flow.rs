//! End-to-end behavior of a case session against an in-memory backend.
//!
//! All tests run on paused time, so poll delays and the inactivity timeout
//! elapse instantly once every task is idle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;
use tokio::time::Instant;

use casesync_core::{
    CaseId, CaseResolution, FormData, FormLayout, PollerState, RedirectTarget, StartMessage, Task,
    TaskId,
};
use casesync_engine::{
    activity_channel, ActivityKind, ActivitySender, BackendError, CaseBackend, CaseSession,
    CaseSessionHandle, EngineConfig, EngineError, EngineEvent, EventReceiver,
};

#[derive(Default)]
struct State {
    tasks: Vec<Task>,
    failing: bool,
    layouts: HashMap<TaskId, FormLayout>,
    created_by_message: Option<Task>,
    messages: Vec<StartMessage>,
    submitted: Vec<(TaskId, FormData)>,
    canceled: Vec<TaskId>,
    resolution: Option<CaseResolution>,
    send_delay: Option<Duration>,
}

#[derive(Default)]
struct FakeBackend {
    state: Mutex<State>,
    fetches: AtomicUsize,
}

impl FakeBackend {
    fn with_tasks(tasks: Vec<Task>) -> Arc<Self> {
        let backend = Self::default();
        backend.state.lock().unwrap().tasks = tasks;
        Arc::new(backend)
    }

    fn set_tasks(&self, tasks: Vec<Task>) {
        self.state.lock().unwrap().tasks = tasks;
    }

    fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }

    fn set_layout(&self, task_id: &str, layout: FormLayout) {
        self.state
            .lock()
            .unwrap()
            .layouts
            .insert(TaskId::new(task_id), layout);
    }

    fn create_on_message(&self, task: Task) {
        self.state.lock().unwrap().created_by_message = Some(task);
    }

    /// The start-message creates its task, then takes `delay` to acknowledge.
    fn delay_send(&self, delay: Duration) {
        self.state.lock().unwrap().send_delay = Some(delay);
    }

    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaseBackend for FakeBackend {
    async fn fetch_tasks(&self, _case_id: &CaseId) -> Result<Vec<Task>, BackendError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.failing {
            return Err(BackendError::Transport("connection refused".to_string()));
        }
        Ok(state.tasks.clone())
    }

    async fn fetch_form_layout(&self, task_id: &TaskId) -> Result<FormLayout, BackendError> {
        self.state
            .lock()
            .unwrap()
            .layouts
            .get(task_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("task {task_id}")))
    }

    async fn submit_task_form(&self, task_id: &TaskId, data: &FormData) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        state.submitted.push((task_id.clone(), data.clone()));
        state.tasks.retain(|task| &task.id != task_id);
        Ok(())
    }

    async fn send_start_message(
        &self,
        _case_id: &CaseId,
        message: &StartMessage,
    ) -> Result<(), BackendError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.messages.push(message.clone());
            if let Some(task) = state.created_by_message.take() {
                state.tasks.push(task);
            }
            state.send_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn cancel_task(&self, task_id: &TaskId) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        state.canceled.push(task_id.clone());
        state.tasks.retain(|task| &task.id != task_id);
        Ok(())
    }

    async fn close_case(
        &self,
        _case_id: &CaseId,
        resolution: &CaseResolution,
    ) -> Result<(), BackendError> {
        self.state.lock().unwrap().resolution = Some(resolution.clone());
        Ok(())
    }
}

fn task(id: &str, minute: u32) -> Task {
    Task::new(id, format!("Task {id}"), Utc.with_ymd_and_hms(2024, 3, 1, 10, minute, 0).unwrap())
}

fn form(key: &str) -> FormLayout {
    FormLayout::Form {
        form_key: key.to_string(),
        context: json!({}),
    }
}

fn spawn(backend: &Arc<FakeBackend>) -> (CaseSessionHandle, EventReceiver, ActivitySender) {
    spawn_with(backend, EngineConfig::default())
}

fn spawn_with(
    backend: &Arc<FakeBackend>,
    config: EngineConfig,
) -> (CaseSessionHandle, EventReceiver, ActivitySender) {
    let (activity, ticks) = activity_channel(16);
    let (handle, events) = CaseSession::spawn(CaseId::new("case-1"), backend.clone(), ticks, config);
    (handle, events, activity)
}

/// Wait for the first event matching `predicate`, skipping the rest.
async fn wait_for<F>(events: &mut EventReceiver, mut predicate: F) -> EngineEvent
where
    F: FnMut(&EngineEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(300), async {
        loop {
            let event = events.recv().await.expect("session ended");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event did not arrive")
}

async fn wait_for_list(events: &mut EventReceiver) -> EngineEvent {
    wait_for(events, |e| matches!(e, EngineEvent::TaskListChanged { .. })).await
}

#[tokio::test(start_paused = true)]
async fn test_autostart_fetches_immediately() {
    let backend = FakeBackend::with_tasks(vec![task("T1", 0)]);
    let started = Instant::now();
    let (handle, mut events, _activity) = spawn(&backend);

    let EngineEvent::TaskListChanged { diff, snapshot } = wait_for_list(&mut events).await else {
        unreachable!()
    };
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(diff.added[0].id.as_str(), "T1");
    assert!(diff.removed.is_empty());
    assert_eq!(snapshot.len(), 1);
    assert_eq!(handle.snapshot().len(), 1);
    assert_eq!(handle.status().state, PollerState::Polling);
    assert_eq!(backend.fetch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_new_task_found_on_next_cycle() {
    let backend = FakeBackend::with_tasks(vec![task("T1", 0)]);
    let (_handle, mut events, _activity) = spawn(&backend);
    wait_for_list(&mut events).await;

    let started = Instant::now();
    backend.set_tasks(vec![task("T1", 0), task("T2", 5)]);

    let EngineEvent::TaskListChanged { diff, .. } = wait_for_list(&mut events).await else {
        unreachable!()
    };
    assert_eq!(started.elapsed(), Duration::from_millis(2000));
    assert_eq!(diff.added.len(), 1);
    assert_eq!(diff.added[0].id.as_str(), "T2");
    assert!(diff.removed.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_field_change_refreshes_without_diff() {
    let backend = FakeBackend::with_tasks(vec![task("T1", 0)]);
    let (handle, mut events, _activity) = spawn(&backend);
    wait_for_list(&mut events).await;

    backend.set_tasks(vec![task("T1", 0).cancelable()]);
    wait_for(&mut events, |e| matches!(e, EngineEvent::TasksRefreshed { .. })).await;
    assert!(handle.snapshot().tasks()[0].cancelable);
}

#[tokio::test(start_paused = true)]
async fn test_five_failures_stop_until_started() {
    let backend = FakeBackend::with_tasks(vec![task("T1", 0)]);
    backend.set_failing(true);
    let (handle, mut events, _activity) = spawn(&backend);

    let EngineEvent::Fatal { reason } =
        wait_for(&mut events, |e| matches!(e, EngineEvent::Fatal { .. })).await
    else {
        unreachable!()
    };
    assert!(reason.contains("5 times"));
    assert_eq!(backend.fetch_count(), 5);

    let status = handle.status();
    assert_eq!(status.state, PollerState::Stopped);
    assert!(!status.running);
    assert_eq!(status.consecutive_failures, 5);

    // Nothing is scheduled and a resync is ignored.
    handle.force_resync().await.unwrap();
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(backend.fetch_count(), 5);

    backend.set_failing(false);
    handle.start().await.unwrap();
    wait_for_list(&mut events).await;

    let status = handle.status();
    assert_eq!(status.state, PollerState::Polling);
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(status.current_delay, Duration::from_millis(2000));
}

#[tokio::test(start_paused = true)]
async fn test_stop_halts_polling() {
    let backend = FakeBackend::with_tasks(vec![]);
    let (handle, mut events, activity) = spawn(&backend);
    wait_for(&mut events, |e| matches!(e, EngineEvent::StateChanged(_))).await;

    handle.stop().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let fetched = backend.fetch_count();
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(10)).await;
        activity.record(ActivityKind::Pointer);
    }
    assert_eq!(backend.fetch_count(), fetched);
    assert_eq!(handle.status().state, PollerState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_inactivity_suspends_and_activity_resumes() {
    let backend = FakeBackend::with_tasks(vec![task("T1", 0)]);
    let started = Instant::now();
    let (handle, mut events, activity) = spawn(&backend);

    wait_for(&mut events, |e| {
        matches!(e, EngineEvent::StateChanged(status) if status.suspended_by_inactivity)
    })
    .await;
    assert_eq!(started.elapsed(), Duration::from_secs(30));
    assert_eq!(handle.status().state, PollerState::Suspended);

    let fetched = backend.fetch_count();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(backend.fetch_count(), fetched);

    assert!(activity.record(ActivityKind::Key));
    wait_for(&mut events, |e| {
        matches!(e, EngineEvent::StateChanged(status) if !status.suspended_by_inactivity)
    })
    .await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(backend.fetch_count(), fetched + 1);
    assert_eq!(handle.status().state, PollerState::Polling);
}

#[tokio::test(start_paused = true)]
async fn test_activity_keeps_polling_alive() {
    let backend = FakeBackend::with_tasks(vec![]);
    let (handle, _events, activity) = spawn(&backend);

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(20)).await;
        activity.record(ActivityKind::Scroll);
    }
    let status = handle.status();
    assert!(!status.suspended_by_inactivity);
    assert_eq!(status.state, PollerState::Polling);
}

#[tokio::test(start_paused = true)]
async fn test_start_message_opens_created_task() {
    let backend = FakeBackend::with_tasks(vec![task("T1", 0)]);
    backend.create_on_message(task("T2", 5));
    backend.set_layout("T2", form("upload-document"));
    let (handle, mut events, _activity) = spawn(&backend);
    wait_for_list(&mut events).await;

    let action_id = handle
        .send_start_message(StartMessage::new("addDocument").with_variable("kind", "invoice"))
        .await
        .unwrap();

    let EngineEvent::PendingActionResolved {
        action_id: resolved,
        task_id,
    } = wait_for(&mut events, |e| matches!(e, EngineEvent::PendingActionResolved { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(resolved, action_id);
    assert_eq!(task_id.as_str(), "T2");

    let EngineEvent::FormOpened { task_id, layout } =
        wait_for(&mut events, |e| matches!(e, EngineEvent::FormOpened { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(task_id.as_str(), "T2");
    assert_eq!(layout, form("upload-document"));
    // Polling pauses while the form is open.
    assert_eq!(handle.status().state, PollerState::Idle);

    let mut data = FormData::new();
    data.insert("amount".to_string(), json!(120));
    handle.submit_form(data.clone()).await.unwrap();

    wait_for(&mut events, |e| {
        matches!(e, EngineEvent::FormSubmitted { task_id } if task_id.as_str() == "T2")
    })
    .await;
    let EngineEvent::TaskListChanged { diff, .. } = wait_for_list(&mut events).await else {
        unreachable!()
    };
    assert_eq!(diff.removed[0].id.as_str(), "T2");
    assert_eq!(handle.status().state, PollerState::Polling);

    let state = backend.state.lock().unwrap();
    assert_eq!(state.messages[0].name, "addDocument");
    assert_eq!(state.submitted, vec![(TaskId::new("T2"), data)]);
}

#[tokio::test(start_paused = true)]
async fn test_resync_while_start_message_in_flight_is_held_back() {
    let backend = FakeBackend::with_tasks(vec![task("T1", 0)]);
    backend.create_on_message(task("T2", 5));
    backend.set_layout("T2", form("upload-document"));
    backend.delay_send(Duration::from_millis(500));
    let (handle, mut events, _activity) = spawn(&backend);
    wait_for_list(&mut events).await;
    let fetches = backend.fetch_count();

    let sender = handle.clone();
    let send = tokio::spawn(async move {
        sender
            .send_start_message(StartMessage::new("addDocument"))
            .await
    });

    // The task already exists on the backend, the send is not acknowledged yet.
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.force_resync().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(backend.fetch_count(), fetches);
    assert_eq!(handle.snapshot().len(), 1);
    assert_eq!(handle.status().state, PollerState::Idle);

    let action_id = send.await.unwrap().unwrap();
    let EngineEvent::PendingActionResolved {
        action_id: resolved,
        task_id,
    } = wait_for(&mut events, |e| {
        matches!(
            e,
            EngineEvent::PendingActionResolved { .. } | EngineEvent::PendingActionExpired { .. }
        )
    })
    .await
    else {
        panic!("start-message expired");
    };
    assert_eq!(resolved, action_id);
    assert_eq!(task_id.as_str(), "T2");

    let EngineEvent::FormOpened { task_id, .. } =
        wait_for(&mut events, |e| matches!(e, EngineEvent::FormOpened { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(task_id.as_str(), "T2");
}

#[tokio::test(start_paused = true)]
async fn test_unrepresentable_delays_disable_timers() {
    let mut config = EngineConfig::default();
    config.backoff.initial_delay = Duration::MAX;
    config.backoff.max_delay = Duration::MAX;
    config.inactivity_timeout = Duration::MAX;
    let backend = FakeBackend::with_tasks(vec![task("T1", 0)]);
    let (handle, mut events, _activity) = spawn_with(&backend, config);
    wait_for_list(&mut events).await;

    tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
    assert_eq!(backend.fetch_count(), 1);
    let status = handle.status();
    assert_eq!(status.state, PollerState::Polling);
    assert!(!status.suspended_by_inactivity);

    backend.set_tasks(vec![task("T1", 0), task("T2", 5)]);
    handle.force_resync().await.unwrap();
    let EngineEvent::TaskListChanged { diff, .. } = wait_for_list(&mut events).await else {
        unreachable!()
    };
    assert_eq!(diff.added[0].id.as_str(), "T2");
}

#[tokio::test(start_paused = true)]
async fn test_start_message_without_new_task_expires() {
    let backend = FakeBackend::with_tasks(vec![task("T1", 0)]);
    let (handle, mut events, _activity) = spawn(&backend);
    wait_for_list(&mut events).await;

    let action_id = handle
        .send_start_message(StartMessage::new("addDocument"))
        .await
        .unwrap();

    let EngineEvent::PendingActionExpired { action_id: expired } =
        wait_for(&mut events, |e| matches!(e, EngineEvent::PendingActionExpired { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(expired, action_id);
    assert_eq!(handle.status().state, PollerState::Polling);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_respects_cancelable_flag() {
    let backend = FakeBackend::with_tasks(vec![task("T1", 0), task("T2", 1).cancelable()]);
    let (handle, mut events, _activity) = spawn(&backend);
    wait_for_list(&mut events).await;

    let err = handle.cancel_task(TaskId::new("T1")).await.unwrap_err();
    assert!(matches!(err, EngineError::TaskNotCancelable(id) if id.as_str() == "T1"));

    handle.cancel_task(TaskId::new("T2")).await.unwrap();
    let EngineEvent::TaskListChanged { diff, .. } = wait_for_list(&mut events).await else {
        unreachable!()
    };
    assert_eq!(diff.removed[0].id.as_str(), "T2");
    assert_eq!(backend.state.lock().unwrap().canceled, vec![TaskId::new("T2")]);
}

#[tokio::test(start_paused = true)]
async fn test_open_and_close_form() {
    let backend = FakeBackend::with_tasks(vec![task("T1", 0), task("T2", 1)]);
    backend.set_layout("T1", form("review"));
    backend.set_layout("T2", form("approve"));
    let (handle, mut events, _activity) = spawn(&backend);
    wait_for_list(&mut events).await;

    assert!(matches!(
        handle.submit_form(FormData::new()).await,
        Err(EngineError::NoFormOpen)
    ));

    handle.open_task(TaskId::new("T1")).await.unwrap();
    let fetched = backend.fetch_count();
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(backend.fetch_count(), fetched);

    // Opening another task closes the first form.
    let layout = handle.open_task(TaskId::new("T2")).await.unwrap();
    assert_eq!(layout, form("approve"));
    wait_for(&mut events, |e| {
        matches!(e, EngineEvent::FormClosed { task_id } if task_id.as_str() == "T1")
    })
    .await;

    assert_eq!(handle.close_form().await.unwrap(), Some(TaskId::new("T2")));
    assert_eq!(handle.close_form().await.unwrap(), None);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(backend.fetch_count(), fetched + 1);
    assert_eq!(handle.status().state, PollerState::Polling);
}

#[tokio::test(start_paused = true)]
async fn test_redirect_layout_does_not_keep_form_open() {
    let backend = FakeBackend::with_tasks(vec![task("T1", 0)]);
    backend.set_layout(
        "T1",
        FormLayout::Redirect {
            url: "https://sign.example.com/s/1".to_string(),
            target: RedirectTarget::NewWindow,
        },
    );
    let (handle, mut events, _activity) = spawn(&backend);
    wait_for_list(&mut events).await;

    let layout = handle.open_task(TaskId::new("T1")).await.unwrap();
    assert!(layout.is_redirect());

    let EngineEvent::Redirect { url, target, .. } =
        wait_for(&mut events, |e| matches!(e, EngineEvent::Redirect { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(url, "https://sign.example.com/s/1");
    assert_eq!(target, RedirectTarget::NewWindow);
    assert!(matches!(
        handle.submit_form(FormData::new()).await,
        Err(EngineError::NoFormOpen)
    ));
    assert_eq!(handle.status().state, PollerState::Polling);
}

#[tokio::test(start_paused = true)]
async fn test_failed_open_reports_and_resumes() {
    let backend = FakeBackend::with_tasks(vec![task("T1", 0)]);
    let (handle, mut events, _activity) = spawn(&backend);
    wait_for_list(&mut events).await;

    let err = handle.open_task(TaskId::new("T1")).await.unwrap_err();
    assert!(matches!(err, EngineError::Backend(BackendError::NotFound(_))));
    wait_for(&mut events, |e| matches!(e, EngineEvent::ActionFailed { .. })).await;
    assert_eq!(handle.status().state, PollerState::Polling);
}

#[tokio::test(start_paused = true)]
async fn test_close_case_sends_resolution() {
    let backend = FakeBackend::with_tasks(vec![task("T1", 0)]);
    let (handle, mut events, _activity) = spawn(&backend);
    wait_for_list(&mut events).await;

    handle
        .close_case(CaseResolution::new("approved").with_comment("all documents present"))
        .await
        .unwrap();

    let state = backend.state.lock().unwrap();
    let resolution = state.resolution.as_ref().unwrap();
    assert_eq!(resolution.outcome, "approved");
    assert_eq!(resolution.comment.as_deref(), Some("all documents present"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_session() {
    let backend = FakeBackend::with_tasks(vec![task("T1", 0)]);
    let (handle, mut events, _activity) = spawn(&backend);
    wait_for_list(&mut events).await;

    handle.shutdown().await;
    assert!(matches!(handle.start().await, Err(EngineError::SessionClosed)));

    while events.recv().await.is_some() {}
    let fetched = backend.fetch_count();
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(backend.fetch_count(), fetched);
}
