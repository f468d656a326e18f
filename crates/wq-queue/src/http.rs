//! Thin JSON client for a parent queue reachable over HTTP.

use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use tracing::debug;
use wq_core::{ElementId, ElementStatus, Progress, WorkQueueElement};

use crate::error::ParentError;
use crate::parent::{ParentQueue, ParentResult, StatusUpdate};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// [`ParentQueue`] over the parent's REST surface.
///
/// ```text
/// GET  {base}/elements?status=Available&max_jobs=N
/// GET  {base}/element/{id}
/// POST {base}/element/{id}/status     {"status": .., "child_queue_url": ..}
/// POST {base}/element/{id}/progress   {"percent_complete": .., ..}
/// ```
#[derive(Clone)]
pub struct HttpParentQueue {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl std::fmt::Debug for HttpParentQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpParentQueue")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpParentQueue {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("workqueue/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn elements_url(&self, max_jobs: u64) -> String {
        format!("{}/elements?status={}&max_jobs={}", self.base_url, ElementStatus::Available, max_jobs)
    }

    pub fn element_url(&self, id: &ElementId) -> String {
        format!("{}/element/{}", self.base_url, id)
    }

    fn unreachable(&self, err: impl Into<anyhow::Error>) -> ParentError {
        ParentError::Unreachable {
            url: self.base_url.clone(),
            source: err.into(),
        }
    }

    /// Map non-success statuses; 409 means another child got there first.
    fn check(&self, id: Option<&ElementId>, response: Response) -> ParentResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        match (status, id) {
            (StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY, Some(id)) => Err(ParentError::Rejected {
                id: id.clone(),
                reason: format!("HTTP {status}: {body}"),
            }),
            _ if status.is_server_error() => Err(self.unreachable(anyhow::anyhow!("HTTP {status}: {body}"))),
            _ => Err(ParentError::Protocol(format!("HTTP {status}: {body}"))),
        }
    }

    fn post_json<T: serde::Serialize>(&self, id: &ElementId, url: String, body: &T) -> ParentResult<()> {
        debug!(%url, "parent post");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .map_err(|e| self.unreachable(e))?;
        self.check(Some(id), response)?;
        Ok(())
    }
}

impl ParentQueue for HttpParentQueue {
    fn location(&self) -> &str {
        &self.base_url
    }

    fn available_work(&self, max_jobs: u64) -> ParentResult<Vec<WorkQueueElement>> {
        let url = self.elements_url(max_jobs);
        debug!(%url, "parent fetch available work");
        let response = self.client.get(&url).send().map_err(|e| self.unreachable(e))?;
        let response = self.check(None, response)?;
        response
            .json::<Vec<WorkQueueElement>>()
            .map_err(|e| ParentError::Protocol(e.to_string()))
    }

    fn get_element(&self, id: &ElementId) -> ParentResult<Option<WorkQueueElement>> {
        let response = self
            .client
            .get(self.element_url(id))
            .send()
            .map_err(|e| self.unreachable(e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = self.check(Some(id), response)?;
        response
            .json::<WorkQueueElement>()
            .map(Some)
            .map_err(|e| ParentError::Protocol(e.to_string()))
    }

    fn update_status(&self, id: &ElementId, status: ElementStatus, child_queue_url: Option<&str>) -> ParentResult<()> {
        let body = StatusUpdate {
            status,
            child_queue_url: child_queue_url.map(str::to_string),
        };
        self.post_json(id, format!("{}/status", self.element_url(id)), &body)
    }

    fn update_progress(&self, id: &ElementId, progress: &Progress) -> ParentResult<()> {
        self.post_json(id, format!("{}/progress", self.element_url(id)), progress)
    }
}
