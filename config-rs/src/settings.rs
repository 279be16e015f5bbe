//! Typed service settings read once at startup.
//!
//! Configuration (.env file or environment):
//! - NARRATIVE_SERVICE_ADDR / NARRATIVE_SERVICE_PORT: listen address (default 0.0.0.0:8290)
//! - NARRATIVE_FAST_STORE_URL: redis URL for the fast tier (unset = in-memory)
//! - NARRATIVE_DURABLE_STORE_DIR: directory for task history (unset = no history)
//! - NARRATIVE_IDENTIFIER_MAP: JSON file mapping identifiers to display names
//! - NARRATIVE_TASK_TTL_SECS, NARRATIVE_REQUEST_TIMEOUT_SECS, NARRATIVE_WORKER_TIMEOUT_SECS,
//!   NARRATIVE_GENERATION_TIMEOUT_SECS, NARRATIVE_WEBHOOK_TIMEOUT_SECS
//! - NARRATIVE_CACHE_ENABLED / NARRATIVE_CACHE_TTL_SECS: generator response cache
//! - NARRATIVE_LOG_LEVEL / NARRATIVE_LOG_JSON
//! - LLM_API_URL, LLM_API_KEY, LLM_MODEL, LLM_MAX_TOKENS, LLM_TEMPERATURE,
//!   LLM_MAX_RETRIES, LLM_INITIAL_RETRY_DELAY_MS, LLM_MAX_RETRY_DELAY_MS

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::pipeline::PipelineConfig;
use crate::{
    env_lookup, get_bind_address, get_default_port, lookup_flag, lookup_or, lookup_string,
    NARRATIVE_SERVICE,
};

/// Connection settings for the OpenAI-compatible generation endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmSettings {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-3.5-turbo".to_string(),
            max_tokens: 1000,
            temperature: 0.7,
            max_retries: 3,
            initial_retry_delay_ms: 1000,
            max_retry_delay_ms: 30000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl LoggingSettings {
    /// Just the logging settings, so tracing can be up before the rest of
    /// the configuration is read and checked.
    pub fn from_env() -> Self {
        load_dotenv();
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            level: lookup_string(lookup, "NARRATIVE_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            json: lookup_flag(lookup, "NARRATIVE_LOG_JSON", false),
        }
    }
}

/// Load `.env` from the working directory when one exists. Variables already
/// set in the environment win, so calling this more than once is harmless.
pub fn load_dotenv() {
    if dotenv::dotenv().is_ok() {
        log::debug!("loaded .env file");
    }
}

/// Everything the service binary needs to wire itself up.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    pub bind_addr: SocketAddr,
    pub fast_store_url: Option<String>,
    pub durable_store_dir: Option<PathBuf>,
    pub identifier_map: Option<PathBuf>,
    pub task_ttl: Duration,
    pub request_timeout: Duration,
    pub worker_timeout: Duration,
    pub generation_timeout: Duration,
    pub webhook_timeout: Duration,
    pub llm: LlmSettings,
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
    pub pipeline: PipelineConfig,
}

impl ServiceSettings {
    /// Read settings from the process environment, after loading `.env`
    /// from the working directory when one exists.
    pub fn from_env() -> Self {
        load_dotenv();
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let llm_defaults = LlmSettings::default();
        let secs = |name: &str, default: u64| Duration::from_secs(lookup_or(lookup, name, default));

        let settings = Self {
            bind_addr: get_bind_address(
                lookup,
                NARRATIVE_SERVICE,
                get_default_port(NARRATIVE_SERVICE),
            ),
            fast_store_url: lookup_string(lookup, "NARRATIVE_FAST_STORE_URL"),
            durable_store_dir: lookup_string(lookup, "NARRATIVE_DURABLE_STORE_DIR")
                .map(PathBuf::from),
            identifier_map: lookup_string(lookup, "NARRATIVE_IDENTIFIER_MAP").map(PathBuf::from),
            task_ttl: secs("NARRATIVE_TASK_TTL_SECS", 24 * 60 * 60),
            request_timeout: secs("NARRATIVE_REQUEST_TIMEOUT_SECS", 30),
            worker_timeout: secs("NARRATIVE_WORKER_TIMEOUT_SECS", 10 * 60),
            generation_timeout: secs("NARRATIVE_GENERATION_TIMEOUT_SECS", 120),
            webhook_timeout: secs("NARRATIVE_WEBHOOK_TIMEOUT_SECS", 10),
            llm: LlmSettings {
                api_url: lookup_string(lookup, "LLM_API_URL").unwrap_or(llm_defaults.api_url),
                api_key: lookup_string(lookup, "LLM_API_KEY"),
                model: lookup_string(lookup, "LLM_MODEL").unwrap_or(llm_defaults.model),
                max_tokens: lookup_or(lookup, "LLM_MAX_TOKENS", llm_defaults.max_tokens),
                temperature: lookup_or(lookup, "LLM_TEMPERATURE", llm_defaults.temperature),
                max_retries: lookup_or(lookup, "LLM_MAX_RETRIES", llm_defaults.max_retries),
                initial_retry_delay_ms: lookup_or(
                    lookup,
                    "LLM_INITIAL_RETRY_DELAY_MS",
                    llm_defaults.initial_retry_delay_ms,
                ),
                max_retry_delay_ms: lookup_or(
                    lookup,
                    "LLM_MAX_RETRY_DELAY_MS",
                    llm_defaults.max_retry_delay_ms,
                ),
            },
            cache: CacheSettings {
                enabled: lookup_flag(lookup, "NARRATIVE_CACHE_ENABLED", true),
                ttl: secs("NARRATIVE_CACHE_TTL_SECS", 60 * 60),
            },
            logging: LoggingSettings::from_lookup(lookup),
            pipeline: PipelineConfig::from_lookup(lookup),
        };
        settings.checked()
    }

    // The worker deadline bounds a whole multi-chunk run, so it can never be
    // shorter than the synchronous request deadline.
    fn checked(mut self) -> Self {
        if self.worker_timeout <= self.request_timeout {
            log::warn!(
                "worker timeout {:?} is not longer than request timeout {:?}, extending it",
                self.worker_timeout,
                self.request_timeout
            );
            self.worker_timeout = self.request_timeout.saturating_mul(20);
        }
        if self.generation_timeout > self.worker_timeout {
            self.generation_timeout = self.worker_timeout;
        }
        self
    }
}
