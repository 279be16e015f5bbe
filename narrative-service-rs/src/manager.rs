//! Asynchronous narrative tasks.
//!
//! `submit` validates the request, stores a pending task in the fast tier and
//! hands the work to a spawned worker. The worker owns the task record from
//! then on: it writes every stage to the fast tier (and the durable tier when
//! configured), completes or fails the task, and fires the callback.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use config_rs::{PipelineConfig, ServiceSettings};
use rca_model::{IdentifierResolver, RcaIncident};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{OrchestratorError, StoreError, TaskError};
use crate::generator::NarrativeGenerator;
use crate::orchestrator::{ChunkOrchestrator, ChunkProgress, NarrativeOutcome};
use crate::prompt::{render_base_prompt, DEFAULT_BASE_TEMPLATE};
use crate::store::{load_task, save_task, DurableTaskStore, FastStore, SearchMode, TaskPage};
use crate::task::{stage, NarrativeTask, TaskResult};
use crate::webhook::{WebhookNotifier, WebhookPayload};

pub const STATUS_PATH_PREFIX: &str = "/api/v1/narrative/rca_analyze/";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub name: String,
    pub rca_data: RcaIncident,
    #[serde(default)]
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub status: String,
    pub task_id: String,
    pub status_url: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskManagerConfig {
    pub task_ttl: Duration,
    pub request_timeout: Duration,
    pub worker_timeout: Duration,
    pub generation_timeout: Duration,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            task_ttl: Duration::from_secs(24 * 60 * 60),
            request_timeout: Duration::from_secs(30),
            worker_timeout: Duration::from_secs(10 * 60),
            generation_timeout: Duration::from_secs(120),
        }
    }
}

impl From<&ServiceSettings> for TaskManagerConfig {
    fn from(settings: &ServiceSettings) -> Self {
        Self {
            task_ttl: settings.task_ttl,
            request_timeout: settings.request_timeout,
            worker_timeout: settings.worker_timeout,
            generation_timeout: settings.generation_timeout,
        }
    }
}

fn validate_callback(raw: Option<String>) -> Result<Option<String>, TaskError> {
    let Some(raw) = raw.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()) else {
        return Ok(None);
    };
    let url = Url::parse(&raw)
        .map_err(|err| TaskError::InvalidRequest(format!("callbackUrl is not a valid URL: {}", err)))?;
    match url.scheme() {
        "http" | "https" => Ok(Some(raw)),
        other => Err(TaskError::InvalidRequest(format!(
            "callbackUrl must use http or https, got '{}'",
            other
        ))),
    }
}

pub struct TaskManager {
    fast: Arc<dyn FastStore>,
    durable: Option<Arc<dyn DurableTaskStore>>,
    generator: Arc<dyn NarrativeGenerator>,
    resolver: Option<IdentifierResolver>,
    notifier: Arc<dyn WebhookNotifier>,
    config: TaskManagerConfig,
}

impl TaskManager {
    pub fn new(
        fast: Arc<dyn FastStore>,
        generator: Arc<dyn NarrativeGenerator>,
        notifier: Arc<dyn WebhookNotifier>,
        config: TaskManagerConfig,
    ) -> Self {
        Self {
            fast,
            durable: None,
            generator,
            resolver: None,
            notifier,
            config,
        }
    }

    pub fn with_durable(mut self, durable: Arc<dyn DurableTaskStore>) -> Self {
        self.durable = Some(durable);
        self
    }

    /// Re-resolve identifiers in every submitted incident before narration.
    pub fn with_resolver(mut self, resolver: IdentifierResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn config(&self) -> &TaskManagerConfig {
        &self.config
    }

    pub fn has_durable_store(&self) -> bool {
        self.durable.is_some()
    }

    /// Accept a request and start a worker for it. No task id is issued unless
    /// the pending task reached the fast tier.
    pub async fn submit(
        self: &Arc<Self>,
        request: SubmitRequest,
        pipeline: PipelineConfig,
    ) -> Result<SubmitResponse, TaskError> {
        let (task, incident) =
            match tokio::time::timeout(self.config.request_timeout, self.create_task(request)).await {
                Ok(created) => created?,
                Err(_) => {
                    warn!(timeout_ms = self.config.request_timeout.as_millis() as u64, "task submission timed out");
                    return Err(TaskError::RequestTimeout);
                }
            };

        let task_id = task.task_id.clone();
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.process(task, incident, pipeline).await;
        });

        info!(task_id = %task_id, "narrative task accepted");
        Ok(SubmitResponse {
            status: "accepted".to_string(),
            status_url: format!("{}{}", STATUS_PATH_PREFIX, task_id),
            task_id,
            message: "Narrative generation started; poll statusUrl for progress".to_string(),
        })
    }

    async fn create_task(
        &self,
        request: SubmitRequest,
    ) -> Result<(NarrativeTask, RcaIncident), TaskError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(TaskError::InvalidRequest("name must not be empty".to_string()));
        }
        let callback_url = validate_callback(request.callback_url)?;

        let mut incident = request.rca_data;
        incident.validate()?;
        incident.normalize();

        let mut task = NarrativeTask::new(name, callback_url);
        task.record_progress(0, 0, stage::QUEUED);
        save_task(self.fast.as_ref(), &task, self.config.task_ttl)
            .await
            .map_err(|err| {
                error!(task_id = %task.task_id, error = %err, "failed to store new task");
                TaskError::Creation(err)
            })?;
        self.upsert_durable(&task).await;
        Ok((task, incident))
    }

    pub async fn get_task(&self, task_id: &str) -> Result<NarrativeTask, TaskError> {
        match load_task(self.fast.as_ref(), task_id).await {
            Ok(Some(task)) => Ok(task),
            Ok(None) => Err(TaskError::NotFound(task_id.to_string())),
            Err(err) => {
                error!(task_id, error = %err, "task lookup failed");
                Err(TaskError::Lookup(err))
            }
        }
    }

    pub async fn list_tasks(&self, limit: usize, offset: usize) -> Result<TaskPage, TaskError> {
        let durable = self.durable.as_ref().ok_or(TaskError::DurableNotConfigured)?;
        durable.list(limit, offset).await.map_err(|err| {
            error!(error = %err, "durable list failed");
            TaskError::ListFailed(err)
        })
    }

    pub async fn search_tasks(
        &self,
        query: &str,
        mode: SearchMode,
        limit: usize,
        offset: usize,
    ) -> Result<TaskPage, TaskError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(TaskError::EmptyQuery);
        }
        let durable = self.durable.as_ref().ok_or(TaskError::DurableNotConfigured)?;
        durable
            .search(query, mode, limit, offset)
            .await
            .map_err(|err| {
                error!(error = %err, mode = %mode, "durable search failed");
                TaskError::SearchFailed(err)
            })
    }

    async fn upsert_durable(&self, task: &NarrativeTask) {
        if let Some(durable) = &self.durable {
            match durable.upsert(task).await {
                Ok(outcome) => debug!(task_id = %task.task_id, ?outcome, "durable task upserted"),
                Err(err) => warn!(task_id = %task.task_id, error = %err, "durable task upsert failed"),
            }
        }
    }

    /// Durable tier first so history is current by the time pollers see the
    /// fast-tier copy. Only the fast-tier failure is returned.
    async fn persist(&self, task: &NarrativeTask) -> Result<(), StoreError> {
        self.upsert_durable(task).await;
        save_task(self.fast.as_ref(), task, self.config.task_ttl).await
    }

    async fn reload_into(&self, task: &mut NarrativeTask) {
        match load_task(self.fast.as_ref(), &task.task_id).await {
            Ok(Some(stored)) => task.merge_stored(stored),
            Ok(None) => warn!(task_id = %task.task_id, "task missing from fast tier, using in-memory copy"),
            Err(err) => warn!(task_id = %task.task_id, error = %err, "task re-read failed, using in-memory copy"),
        }
    }

    async fn process(&self, mut task: NarrativeTask, incident: RcaIncident, pipeline: PipelineConfig) {
        let task_id = task.task_id.clone();
        if !task.start() {
            return;
        }
        task.record_progress(0, 0, stage::RESOLUTION);
        if let Err(err) = self.persist(&task).await {
            warn!(task_id = %task_id, error = %err, "failed to record task start");
        }

        let (stage_tx, stage_rx) = watch::channel(stage::RESOLUTION.to_string());
        let writer = ProgressWriter {
            manager: self,
            task: Mutex::new(task),
            stage_tx,
        };

        let deadline = Instant::now().checked_add(self.config.worker_timeout);
        let run = self.narrate(&writer, incident, pipeline, deadline);
        let outcome = match tokio::time::timeout(self.config.worker_timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::DeadlineExceeded {
                stage: stage_rx.borrow().to_string(),
            }),
        };

        let task = writer.task.into_inner();
        match outcome {
            Ok(outcome) => self.complete(task, outcome).await,
            Err(err) => self.fail(task, err.to_string()).await,
        }
    }

    async fn narrate(
        &self,
        writer: &ProgressWriter<'_>,
        incident: RcaIncident,
        pipeline: PipelineConfig,
        deadline: Option<Instant>,
    ) -> Result<NarrativeOutcome, OrchestratorError> {
        let incident = match &self.resolver {
            Some(resolver) => resolver.resolve_incident(&incident).await,
            None => incident,
        };
        let template = pipeline
            .prompt_template
            .as_deref()
            .unwrap_or(DEFAULT_BASE_TEMPLATE);
        let base_prompt = render_base_prompt(template, &incident);

        let orchestrator =
            ChunkOrchestrator::new(Arc::clone(&self.generator), pipeline, self.config.generation_timeout);
        orchestrator
            .run_with_progress(&incident, &base_prompt, writer, deadline)
            .await
    }

    async fn complete(&self, mut task: NarrativeTask, outcome: NarrativeOutcome) {
        self.reload_into(&mut task).await;
        let started = task.started_at.unwrap_or(task.submitted_at);
        let now = Utc::now();
        let result = TaskResult {
            explanation: outcome.text,
            tokens_used: outcome.total_tokens,
            cached: outcome.all_cached,
            provider: outcome.provider,
            model: outcome.model,
            generated_at: now,
            generation_time_ms: (now - started).num_milliseconds().max(0),
            total_chunks: outcome.chunk_count,
            synthesized: outcome.synthesized,
        };
        if !task.complete(result) {
            return;
        }
        if let Err(err) = self.persist(&task).await {
            error!(task_id = %task.task_id, error = %err, "failed to store completed task");
        }
        info!(task_id = %task.task_id, "narrative task completed");
        self.notify(&task);
    }

    async fn fail(&self, mut task: NarrativeTask, error: String) {
        self.reload_into(&mut task).await;
        error!(task_id = %task.task_id, error = %error, "narrative task failed");
        if !task.fail(error) {
            return;
        }
        if let Err(err) = self.persist(&task).await {
            error!(task_id = %task.task_id, error = %err, "failed to store failed task");
        }
        self.notify(&task);
    }

    fn notify(&self, task: &NarrativeTask) {
        let Some(url) = task.callback_url.clone() else {
            return;
        };
        let payload = WebhookPayload::from_task(task);
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            notifier.notify(&url, &payload).await;
        });
    }
}

/// Writes stage updates for one running task.
struct ProgressWriter<'a> {
    manager: &'a TaskManager,
    task: Mutex<NarrativeTask>,
    stage_tx: watch::Sender<String>,
}

#[async_trait::async_trait]
impl ChunkProgress for ProgressWriter<'_> {
    async fn stage(&self, current_chunk: usize, total_chunks: usize, current_stage: &str) {
        self.stage_tx.send_replace(current_stage.to_string());

        let snapshot = {
            let mut task = self.task.lock().await;
            task.record_progress(current_chunk, total_chunks, current_stage);
            self.manager.reload_into(&mut task).await;
            task.clone()
        };
        debug!(
            task_id = %snapshot.task_id,
            stage = current_stage,
            current_chunk,
            total_chunks,
            "task progress"
        );
        if let Err(err) = self.manager.persist(&snapshot).await {
            warn!(task_id = %snapshot.task_id, error = %err, "failed to record task progress");
        }
    }
}
