//! Durable-tier implementations: an in-process map and a JSON-file directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::{DurableTaskStore, SearchMode, TaskPage, UpsertOutcome};
use crate::error::StoreError;
use crate::task::NarrativeTask;

fn note_mode(mode: SearchMode) {
    if mode != SearchMode::Keyword {
        debug!(mode = %mode, "search mode served by keyword matching");
    }
}

#[derive(Debug, Default)]
pub struct MemoryDurableStore {
    tasks: RwLock<HashMap<String, NarrativeTask>>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableTaskStore for MemoryDurableStore {
    async fn upsert(&self, task: &NarrativeTask) -> Result<UpsertOutcome, StoreError> {
        let mut tasks = self.tasks.write().await;
        let outcome = match tasks.get(&task.task_id) {
            None => UpsertOutcome::Created,
            Some(existing) if existing == task => return Ok(UpsertOutcome::Unchanged),
            Some(_) => UpsertOutcome::Updated,
        };
        tasks.insert(task.task_id.clone(), task.clone());
        Ok(outcome)
    }

    async fn get(&self, task_id: &str) -> Result<Option<NarrativeTask>, StoreError> {
        Ok(self.tasks.read().await.get(task_id).cloned())
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<TaskPage, StoreError> {
        let all = self.tasks.read().await.values().cloned().collect();
        Ok(TaskPage::from_unsorted(all, limit, offset))
    }

    async fn search(
        &self,
        query: &str,
        mode: SearchMode,
        limit: usize,
        offset: usize,
    ) -> Result<TaskPage, StoreError> {
        note_mode(mode);
        let hits = self
            .tasks
            .read()
            .await
            .values()
            .filter(|task| task.matches(query))
            .cloned()
            .collect();
        Ok(TaskPage::from_unsorted(hits, limit, offset))
    }
}

/// One JSON document per task under a directory.
#[derive(Debug)]
pub struct FileDurableStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileDurableStore {
    /// Opens `dir`, creating it if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, task_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !task_id.is_empty()
            && task_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::Backend(format!("invalid task id '{}'", task_id)));
        }
        Ok(self.dir.join(format!("{}.json", task_id)))
    }

    async fn read_task(path: &Path) -> Result<Option<NarrativeTask>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn read_all(&self) -> Result<Vec<NarrativeTask>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut tasks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_task(&path).await {
                Ok(Some(task)) => tasks.push(task),
                Ok(None) => {}
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable task file"),
            }
        }
        Ok(tasks)
    }
}

#[async_trait]
impl DurableTaskStore for FileDurableStore {
    async fn upsert(&self, task: &NarrativeTask) -> Result<UpsertOutcome, StoreError> {
        let path = self.path_for(&task.task_id)?;
        let _guard = self.write_lock.lock().await;

        let outcome = match Self::read_task(&path).await {
            Ok(None) => UpsertOutcome::Created,
            Ok(Some(existing)) if &existing == task => return Ok(UpsertOutcome::Unchanged),
            Ok(Some(_)) => UpsertOutcome::Updated,
            Err(err) => {
                warn!(task_id = %task.task_id, error = %err, "overwriting unreadable task file");
                UpsertOutcome::Updated
            }
        };

        let bytes = serde_json::to_vec_pretty(task)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(outcome)
    }

    async fn get(&self, task_id: &str) -> Result<Option<NarrativeTask>, StoreError> {
        let path = self.path_for(task_id)?;
        Self::read_task(&path).await
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<TaskPage, StoreError> {
        let all = self.read_all().await?;
        Ok(TaskPage::from_unsorted(all, limit, offset))
    }

    async fn search(
        &self,
        query: &str,
        mode: SearchMode,
        limit: usize,
        offset: usize,
    ) -> Result<TaskPage, StoreError> {
        note_mode(mode);
        let hits = self
            .read_all()
            .await?
            .into_iter()
            .filter(|task| task.matches(query))
            .collect();
        Ok(TaskPage::from_unsorted(hits, limit, offset))
    }
}
