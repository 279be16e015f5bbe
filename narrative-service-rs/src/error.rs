//! Error types for the narrative pipeline.
//!
//! Generation and persistence failures are classified so the orchestrator and
//! task manager can decide what is fatal; boundary failures carry the stable
//! machine-readable codes returned to API callers.

use rca_model::ModelError;
use thiserror::Error;

/// Failures from a narrative generator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    /// 400/401/403/404 and friends; retrying will not help
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// 429
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// 5xx
    #[error("Server error: {0}")]
    Server(String),

    /// Connection failures and transport timeouts
    #[error("Network error: {0}")]
    Network(String),

    /// The caller's deadline ran out
    #[error("Generation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Response body did not have the expected shape
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::Server(_) | GenerationError::Network(_) | GenerationError::RateLimited(_)
        )
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GenerationError::Network(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            GenerationError::Network(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            GenerationError::Parse(err.to_string())
        } else {
            GenerationError::Network(err.to_string())
        }
    }
}

/// Failures from either persistence tier.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

/// Why a narrative run stopped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestratorError {
    /// `chunk` is 1-based.
    #[error("chunk {chunk} of {total} failed: {source}")]
    ChunkFailed {
        chunk: usize,
        total: usize,
        #[source]
        source: GenerationError,
    },

    #[error("deadline exceeded during {stage}")]
    DeadlineExceeded { stage: String },

    #[error("chunk planning failed: {0}")]
    Planning(String),
}

/// Errors surfaced by the task manager and the HTTP boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid incident: {0}")]
    InvalidIncident(#[from] ModelError),

    #[error("failed to create task: {0}")]
    Creation(StoreError),

    #[error("task {0} not found")]
    NotFound(String),

    #[error("failed to read task: {0}")]
    Lookup(StoreError),

    #[error("durable task store is not configured")]
    DurableNotConfigured,

    #[error("failed to list tasks: {0}")]
    ListFailed(StoreError),

    #[error("failed to search tasks: {0}")]
    SearchFailed(StoreError),

    #[error("search query must not be empty")]
    EmptyQuery,

    #[error("request timed out")]
    RequestTimeout,
}

impl TaskError {
    /// Stable code returned to API callers.
    pub fn error_code(&self) -> &'static str {
        match self {
            TaskError::InvalidRequest(_) => "invalid_request",
            TaskError::InvalidIncident(_) => "invalid_rca_data",
            TaskError::Creation(_) => "task_creation_failed",
            TaskError::NotFound(_) => "task_not_found",
            TaskError::Lookup(_) => "task_lookup_failed",
            TaskError::DurableNotConfigured => "durable_store_not_configured",
            TaskError::ListFailed(_) => "durable_list_failed",
            TaskError::SearchFailed(_) => "durable_search_failed",
            TaskError::EmptyQuery => "empty_query",
            TaskError::RequestTimeout => "request_timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classes() {
        assert!(GenerationError::Server("502".into()).is_retryable());
        assert!(GenerationError::RateLimited("slow down".into()).is_retryable());
        assert!(GenerationError::Network("reset".into()).is_retryable());
        assert!(!GenerationError::InvalidRequest("bad key".into()).is_retryable());
        assert!(!GenerationError::Parse("no choices".into()).is_retryable());
        assert!(!GenerationError::Timeout(std::time::Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn chunk_failures_name_the_chunk() {
        let err = OrchestratorError::ChunkFailed {
            chunk: 2,
            total: 3,
            source: GenerationError::Server("boom".into()),
        };
        assert_eq!(err.to_string(), "chunk 2 of 3 failed: Server error: boom");
    }

    #[test]
    fn task_errors_have_stable_codes() {
        assert_eq!(TaskError::NotFound("x".into()).error_code(), "task_not_found");
        assert_eq!(
            TaskError::from(ModelError::EmptyChain).error_code(),
            "invalid_rca_data"
        );
        assert_eq!(TaskError::DurableNotConfigured.error_code(), "durable_store_not_configured");
    }
}
