//! Completion callbacks.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use crate::task::{NarrativeTask, TaskProgress, TaskResult, TaskStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub task_id: String,
    pub status: TaskStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<TaskProgress>,
}

impl WebhookPayload {
    /// Result and progress go out on completion, the error on failure.
    pub fn from_task(task: &NarrativeTask) -> Self {
        let completed = task.status == TaskStatus::Completed;
        Self {
            task_id: task.task_id.clone(),
            status: task.status,
            submitted_at: task.submitted_at,
            completed_at: task.completed_at,
            result: task.result.clone().filter(|_| completed),
            error: task.error.clone().filter(|_| !completed),
            progress: task.progress.clone().filter(|_| completed),
        }
    }
}

#[async_trait]
pub trait WebhookNotifier: Send + Sync {
    /// Deliver once. Failures are logged by the implementation.
    async fn notify(&self, url: &str, payload: &WebhookPayload);
}

#[derive(Debug, Clone)]
pub struct HttpWebhookNotifier {
    client: Client,
    timeout: Duration,
}

impl HttpWebhookNotifier {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl WebhookNotifier for HttpWebhookNotifier {
    async fn notify(&self, url: &str, payload: &WebhookPayload) {
        let sent = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await;
        match sent {
            Ok(response) if response.status().is_success() => {
                info!(task_id = %payload.task_id, status = response.status().as_u16(), "webhook delivered");
            }
            Ok(response) => {
                warn!(
                    task_id = %payload.task_id,
                    status = response.status().as_u16(),
                    "webhook rejected"
                );
            }
            Err(err) => {
                warn!(task_id = %payload.task_id, error = %err, "webhook delivery failed");
            }
        }
    }
}
