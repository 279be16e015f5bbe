//! Task persistence.
//!
//! The fast tier is a TTL key-value store that holds the authoritative copy
//! of every live task and the generator response cache. The durable tier is
//! optional and keeps task history for listing and search.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::task::NarrativeTask;

pub mod durable;
pub mod fast;

pub use durable::{FileDurableStore, MemoryDurableStore};
pub use fast::{MemoryFastStore, RedisFastStore};

/// Key prefix for task records in the fast tier.
pub const TASK_KEY_PREFIX: &str = "narrative:rca:task:";

pub fn task_key(task_id: &str) -> String {
    format!("{}{}", TASK_KEY_PREFIX, task_id)
}

#[async_trait]
pub trait FastStore: Send + Sync {
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Serialize `task` and write it under its task key.
pub async fn save_task(
    store: &dyn FastStore,
    task: &NarrativeTask,
    ttl: Duration,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(task)?;
    store.set(&task_key(&task.task_id), bytes, ttl).await
}

pub async fn load_task(
    store: &dyn FastStore,
    task_id: &str,
) -> Result<Option<NarrativeTask>, StoreError> {
    match store.get(&task_key(task_id)).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Search strategy requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    Keyword,
    #[default]
    Hybrid,
    Semantic,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Keyword => "keyword",
            SearchMode::Hybrid => "hybrid",
            SearchMode::Semantic => "semantic",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyword" => Ok(SearchMode::Keyword),
            "hybrid" => Ok(SearchMode::Hybrid),
            "semantic" => Ok(SearchMode::Semantic),
            other => Err(format!("unknown search mode '{}'", other)),
        }
    }
}

/// One page of tasks plus the total number of matches.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPage {
    pub tasks: Vec<NarrativeTask>,
    pub total: usize,
}

impl TaskPage {
    /// Sort newest first and cut the requested window.
    pub fn from_unsorted(mut tasks: Vec<NarrativeTask>, limit: usize, offset: usize) -> Self {
        tasks.sort_by(|a, b| {
            b.submitted_at
                .cmp(&a.submitted_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        let total = tasks.len();
        let tasks = tasks.into_iter().skip(offset).take(limit).collect();
        Self { tasks, total }
    }
}

#[async_trait]
pub trait DurableTaskStore: Send + Sync {
    async fn upsert(&self, task: &NarrativeTask) -> Result<UpsertOutcome, StoreError>;

    async fn get(&self, task_id: &str) -> Result<Option<NarrativeTask>, StoreError>;

    /// Newest first.
    async fn list(&self, limit: usize, offset: usize) -> Result<TaskPage, StoreError>;

    async fn search(
        &self,
        query: &str,
        mode: SearchMode,
        limit: usize,
        offset: usize,
    ) -> Result<TaskPage, StoreError>;
}
