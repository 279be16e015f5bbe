//! The narrative task record and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }
}

/// Stage labels written to [`TaskProgress::current_stage`].
pub mod stage {
    pub const QUEUED: &str = "queued";
    pub const RESOLUTION: &str = "resolution";
    pub const CHUNK_PLANNING: &str = "chunk_planning";
    pub const PROMPT_RENDERING: &str = "prompt_rendering";
    pub const CHUNKS_STARTED: &str = "chunk_processing_started";
    pub const STITCHING: &str = "stitching_final_explanation";
    pub const SYNTHESIS: &str = "synthesis";

    pub fn chunk_processing(chunk: usize) -> String {
        format!("chunk_{}_processing", chunk)
    }

    pub fn chunk_completed(chunk: usize) -> String {
        format!("chunk_{}_completed", chunk)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub current_chunk: usize,
    pub current_stage: String,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub explanation: String,
    pub tokens_used: u64,
    pub cached: bool,
    pub provider: String,
    pub model: String,
    pub generated_at: DateTime<Utc>,
    pub generation_time_ms: i64,
    pub total_chunks: usize,
    #[serde(default)]
    pub synthesized: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeTask {
    pub task_id: String,
    pub name: String,
    pub status: TaskStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<TaskProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl NarrativeTask {
    pub fn new(name: impl Into<String>, callback_url: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::new_v4().to_string(),
            name: name.into(),
            status: TaskStatus::Pending,
            submitted_at: now,
            started_at: None,
            completed_at: None,
            progress: None,
            result: None,
            error: None,
            callback_url,
            updated_at: now,
        }
    }

    fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            warn!(
                task_id = %self.task_id,
                from = self.status.as_str(),
                to = next.as_str(),
                "refusing task status transition"
            );
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }

    pub fn start(&mut self) -> bool {
        if !self.transition(TaskStatus::Processing) {
            return false;
        }
        self.started_at = Some(self.updated_at);
        true
    }

    pub fn complete(&mut self, result: TaskResult) -> bool {
        if !self.transition(TaskStatus::Completed) {
            return false;
        }
        self.completed_at = Some(self.updated_at);
        self.result = Some(result);
        self.error = None;
        true
    }

    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if !self.transition(TaskStatus::Failed) {
            return false;
        }
        self.completed_at = Some(self.updated_at);
        self.error = Some(error.into());
        true
    }

    /// Record the stage now in progress. Reaching `chunk_K_completed`
    /// advances the completed-chunk count to `K`.
    pub fn record_progress(&mut self, current_chunk: usize, total_chunks: usize, current_stage: &str) {
        let now = Utc::now();
        let progress = self.progress.get_or_insert_with(|| TaskProgress {
            total_chunks,
            completed_chunks: 0,
            current_chunk: 0,
            current_stage: String::new(),
            last_updated: now,
        });
        if total_chunks > 0 {
            progress.total_chunks = total_chunks;
        }
        progress.current_chunk = current_chunk;
        progress.current_stage = current_stage.to_string();
        progress.last_updated = now;
        if current_chunk > 0 && current_stage == stage::chunk_completed(current_chunk) {
            progress.completed_chunks = progress.completed_chunks.max(current_chunk);
        }
        self.updated_at = now;
    }

    pub fn current_stage(&self) -> Option<&str> {
        self.progress.as_ref().map(|p| p.current_stage.as_str())
    }

    /// Fold a copy read back from storage into this in-memory record.
    ///
    /// Only the owning worker writes a task, so status and error always come
    /// from `self`; the stored copy contributes timestamps and progress the
    /// in-memory record may be missing.
    pub fn merge_stored(&mut self, stored: NarrativeTask) {
        if stored.task_id != self.task_id {
            warn!(
                task_id = %self.task_id,
                stored_id = %stored.task_id,
                "stored task id does not match, ignoring stored copy"
            );
            return;
        }
        if self.started_at.is_none() {
            self.started_at = stored.started_at;
        }
        if let Some(theirs) = stored.progress {
            let newer = self
                .progress
                .as_ref()
                .map_or(true, |mine| theirs.last_updated > mine.last_updated);
            if newer {
                self.progress = Some(theirs);
            }
        }
        if self.callback_url.is_none() {
            self.callback_url = stored.callback_url;
        }
    }

    /// Case-insensitive keyword match used by the bundled durable stores.
    pub fn matches(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        let hay = [
            Some(self.task_id.as_str()),
            Some(self.name.as_str()),
            Some(self.status.as_str()),
            self.error.as_deref(),
            self.result.as_ref().map(|r| r.explanation.as_str()),
        ];
        hay.iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(&needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> TaskResult {
        TaskResult {
            explanation: "payments-db saturated".to_string(),
            tokens_used: 42,
            cached: false,
            provider: "openai".to_string(),
            model: "gpt".to_string(),
            generated_at: Utc::now(),
            generation_time_ms: 10,
            total_chunks: 2,
            synthesized: true,
        }
    }

    #[test]
    fn happy_path_transitions() {
        let mut task = NarrativeTask::new("checkout latency", None);
        assert_eq!(task.status, TaskStatus::Pending);

        assert!(task.start());
        assert!(task.started_at.is_some());

        assert!(task.complete(result()));
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut task = NarrativeTask::new("t", None);
        assert!(!task.complete(result()));
        assert_eq!(task.status, TaskStatus::Pending);

        task.start();
        assert!(task.fail("chunk 2 of 3 failed"));
        assert!(!task.complete(result()));
        assert!(!task.start());
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("chunk 2 of 3 failed"));
    }

    #[test]
    fn progress_counts_completed_chunks() {
        let mut task = NarrativeTask::new("t", None);
        task.record_progress(0, 0, stage::CHUNK_PLANNING);
        task.record_progress(1, 3, &stage::chunk_processing(1));
        assert_eq!(task.progress.as_ref().unwrap().completed_chunks, 0);

        task.record_progress(1, 3, &stage::chunk_completed(1));
        let progress = task.progress.as_ref().unwrap();
        assert_eq!(progress.completed_chunks, 1);
        assert_eq!(progress.total_chunks, 3);
        assert_eq!(task.current_stage(), Some("chunk_1_completed"));
    }

    #[test]
    fn merge_keeps_local_status_and_takes_newer_progress() {
        let mut stored = NarrativeTask::new("t", Some("http://hook".to_string()));
        stored.start();
        stored.record_progress(2, 2, &stage::chunk_completed(2));

        let mut local = stored.clone();
        local.started_at = None;
        local.progress = None;
        local.callback_url = None;
        local.fail("boom");

        local.merge_stored(stored.clone());
        assert_eq!(local.status, TaskStatus::Failed);
        assert_eq!(local.started_at, stored.started_at);
        assert_eq!(local.progress, stored.progress);
        assert_eq!(local.callback_url.as_deref(), Some("http://hook"));
    }

    #[test]
    fn serializes_camel_case() {
        let task = NarrativeTask::new("t", None);
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["status"], "pending");
        assert!(json.get("taskId").is_some());
        assert!(json.get("submittedAt").is_some());
        assert!(json.get("result").is_none());
    }

    #[test]
    fn keyword_matching() {
        let mut task = NarrativeTask::new("Checkout latency", None);
        task.start();
        task.complete(result());
        assert!(task.matches("checkout"));
        assert!(task.matches("PAYMENTS-DB"));
        assert!(!task.matches("inventory"));
    }
}
