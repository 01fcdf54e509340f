//! [`CaseBackend`] over the workflow engine's REST API.

use async_trait::async_trait;
use reqwest::{Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use casesync_core::{CaseId, CaseResolution, FormData, FormLayout, StartMessage, Task, TaskId};
use casesync_engine::{BackendError, CaseBackend};

use crate::error::ClientError;

/// HTTP client for the case and task endpoints.
#[derive(Debug, Clone)]
pub struct HttpCaseBackend {
    inner: reqwest::Client,
    base_url: Url,
}

impl HttpCaseBackend {
    /// Create a client rooted at `base_url`, e.g. `http://localhost:8080/api`.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a client reusing an existing `reqwest::Client`.
    pub fn with_client(inner: reqwest::Client, base_url: &str) -> Result<Self, ClientError> {
        let base_url =
            Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self { inner, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build `{base}/{segments...}`, escaping each segment.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ClientError> {
        debug!(url = %url, "GET request");
        let response = self.inner.get(url).send().await?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| ClientError::Serialization(e.to_string()))
    }

    async fn post<B: Serialize + ?Sized>(&self, url: Url, body: Option<&B>) -> Result<(), ClientError> {
        debug!(url = %url, "POST request");
        let mut request = self.inner.post(url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let path = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound(path));
    }
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body
    };
    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl CaseBackend for HttpCaseBackend {
    async fn fetch_tasks(&self, case_id: &CaseId) -> Result<Vec<Task>, BackendError> {
        let url = self.url(&["cases", case_id.as_str(), "tasks"]);
        Ok(self.get_json(url).await?)
    }

    async fn fetch_form_layout(&self, task_id: &TaskId) -> Result<FormLayout, BackendError> {
        let url = self.url(&["tasks", task_id.as_str(), "form"]);
        Ok(self.get_json(url).await?)
    }

    async fn submit_task_form(&self, task_id: &TaskId, data: &FormData) -> Result<(), BackendError> {
        let url = self.url(&["tasks", task_id.as_str(), "form"]);
        Ok(self.post(url, Some(data)).await?)
    }

    async fn send_start_message(
        &self,
        case_id: &CaseId,
        message: &StartMessage,
    ) -> Result<(), BackendError> {
        let url = self.url(&["cases", case_id.as_str(), "messages"]);
        Ok(self.post(url, Some(message)).await?)
    }

    async fn cancel_task(&self, task_id: &TaskId) -> Result<(), BackendError> {
        let url = self.url(&["tasks", task_id.as_str(), "cancel"]);
        Ok(self.post::<()>(url, None).await?)
    }

    async fn close_case(
        &self,
        case_id: &CaseId,
        resolution: &CaseResolution,
    ) -> Result<(), BackendError> {
        let url = self.url(&["cases", case_id.as_str(), "close"]);
        Ok(self.post(url, Some(resolution)).await?)
    }
}
