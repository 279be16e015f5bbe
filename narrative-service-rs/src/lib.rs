//! narrative-service-rs/lib.rs
//! Turns ranked root-cause analyses into readable narratives.
//!
//! An incident is split into prompt-sized chunks, each chunk is narrated by
//! a [`generator::NarrativeGenerator`], and the parts are stitched and
//! optionally merged into one explanation. Requests are served
//! asynchronously: callers submit work, get a task id back and poll it.

pub mod api;
pub mod chunking;
pub mod error;
pub mod generator;
pub mod logging;
pub mod manager;
pub mod orchestrator;
pub mod prompt;
pub mod store;
pub mod task;
pub mod webhook;

#[cfg(test)]
mod tests;

pub use chunking::{Chunk, ChunkPlan, ChunkPlanner};
pub use error::{GenerationError, OrchestratorError, StoreError, TaskError};
pub use generator::{CachingGenerator, GeneratedText, HttpNarrativeGenerator, NarrativeGenerator};
pub use manager::{SubmitRequest, SubmitResponse, TaskManager};
pub use orchestrator::{ChunkOrchestrator, ChunkProgress, NarrativeOutcome};
pub use prompt::PromptBuilder;
pub use store::{DurableTaskStore, FastStore, SearchMode};
pub use task::{NarrativeTask, TaskProgress, TaskResult, TaskStatus};
pub use webhook::{HttpWebhookNotifier, WebhookNotifier, WebhookPayload};
