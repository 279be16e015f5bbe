// narrative-service-rs/src/generator.rs
//
// Narrative generators.
//
// - HttpNarrativeGenerator talks to an OpenAI-compatible chat-completions
//   endpoint with exponential backoff on transient failures
// - CachingGenerator wraps any generator and reuses responses for identical
//   prompts through the fast tier

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use config_rs::LlmSettings;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::error::GenerationError;
use crate::prompt::estimate_tokens;
use crate::store::FastStore;

/// Text produced for one prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedText {
    pub text: String,
    pub tokens_used: u64,
    pub cached: bool,
    pub provider: String,
    pub model: String,
}

#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    /// Generate text for `prompt`, giving up after `deadline`.
    async fn generate(&self, prompt: &str, deadline: Duration)
        -> Result<GeneratedText, GenerationError>;

    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;
}

const SYSTEM_PROMPT: &str = "You explain incidents to on-call engineers. \
Be accurate, stay close to the data you are given and never invent services or numbers.";

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u64,
}

/// Provider label inferred from the endpoint URL and model name.
pub fn determine_provider(api_url: &str, model: &str) -> String {
    if api_url.contains("openai.com") {
        "openai".to_string()
    } else if api_url.contains("openrouter.ai") {
        "openrouter".to_string()
    } else if api_url.contains("x.ai") {
        "grok".to_string()
    } else if api_url.contains("googleapis.com") {
        "gemini".to_string()
    } else if api_url.contains("localhost:11434") {
        "ollama".to_string()
    } else if api_url.contains("localhost:1234") {
        "lmstudio".to_string()
    } else if model.starts_with("anthropic/") {
        "anthropic".to_string()
    } else {
        "default".to_string()
    }
}

#[derive(Debug, Clone)]
pub struct HttpNarrativeGenerator {
    client: Client,
    api_key: Option<String>,
    api_url: String,
    model: String,
    provider: String,
    max_tokens: u32,
    temperature: f32,
    max_retries: u32,
    initial_retry_delay_ms: u64,
    max_retry_delay_ms: u64,
}

impl HttpNarrativeGenerator {
    pub fn new(settings: &LlmSettings) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .build()
            .map_err(|err| GenerationError::Unknown(format!("failed to build HTTP client: {}", err)))?;
        let provider = determine_provider(&settings.api_url, &settings.model);
        if settings.api_key.is_none() {
            warn!(provider = %provider, "LLM_API_KEY is not set, sending unauthenticated requests");
        }
        info!(
            api_url = %settings.api_url,
            model = %settings.model,
            provider = %provider,
            "narrative generator configured"
        );

        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            api_url: settings.api_url.clone(),
            model: settings.model.clone(),
            provider,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            max_retries: settings.max_retries,
            initial_retry_delay_ms: settings.initial_retry_delay_ms,
            max_retry_delay_ms: settings.max_retry_delay_ms,
        })
    }

    /// Exponential backoff doubling from the initial delay up to the max
    /// delay, with randomization. Elapsed time is bounded by the caller's
    /// deadline instead of the policy.
    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_retry_delay_ms))
            .with_max_interval(Duration::from_millis(self.max_retry_delay_ms))
            .with_multiplier(2.0)
            .with_max_elapsed_time(None)
            .with_randomization_factor(0.5)
            .build()
    }

    async fn generate_with_retry(&self, prompt: &str) -> Result<GeneratedText, GenerationError> {
        let request_body = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
        };

        let mut backoff = self.create_backoff();
        let mut attempt = 0;
        loop {
            attempt += 1;
            if attempt > 1 {
                info!(attempt, "retrying generation request");
            }

            match self.execute_request(&request_body).await {
                Ok(generated) => return Ok(generated),
                Err(err) => {
                    if !err.is_retryable() || attempt > self.max_retries {
                        error!(attempt, error = %err, "generation request failed");
                        return Err(err);
                    }
                    match backoff.next_backoff() {
                        Some(delay) => {
                            let jitter = rand::thread_rng().gen_range(0..=200);
                            let delay = delay + Duration::from_millis(jitter);
                            warn!(error = %err, delay_ms = delay.as_millis() as u64, "retryable generation error");
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            error!(error = %err, "backoff exhausted");
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    async fn execute_request(
        &self,
        request_body: &ChatCompletionRequest,
    ) -> Result<GeneratedText, GenerationError> {
        let mut request = self
            .client
            .post(&self.api_url)
            .header("Content-Type", "application/json")
            .json(request_body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                400 => GenerationError::InvalidRequest(format!("Bad request: {}", text)),
                401 => GenerationError::InvalidRequest(format!("Unauthorized: {}", text)),
                403 => GenerationError::InvalidRequest(format!("Forbidden: {}", text)),
                404 => GenerationError::InvalidRequest(format!("Not found: {}", text)),
                429 => GenerationError::RateLimited(text),
                500..=599 => GenerationError::Server(format!("({}) {}", status, text)),
                _ => GenerationError::Unknown(format!("({}) {}", status, text)),
            });
        }

        let data: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| GenerationError::Parse(format!("Failed to parse response: {}", err)))?;
        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GenerationError::Parse("No choices returned in response".to_string()))?;
        let text = choice.message.content;
        if text.trim().is_empty() {
            return Err(GenerationError::Parse("Empty completion".to_string()));
        }

        let tokens_used = match data.usage {
            Some(usage) => usage.total_tokens,
            None => (estimate_tokens(&request_body.messages[1].content) + estimate_tokens(&text)) as u64,
        };
        debug!(tokens_used, "generation request completed");

        Ok(GeneratedText {
            text,
            tokens_used,
            cached: false,
            provider: self.provider.clone(),
            model: self.model.clone(),
        })
    }
}

#[async_trait]
impl NarrativeGenerator for HttpNarrativeGenerator {
    async fn generate(
        &self,
        prompt: &str,
        deadline: Duration,
    ) -> Result<GeneratedText, GenerationError> {
        match tokio::time::timeout(deadline, self.generate_with_retry(prompt)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(deadline_ms = deadline.as_millis() as u64, "generation deadline exceeded");
                Err(GenerationError::Timeout(deadline))
            }
        }
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Key prefix for cached generator responses in the fast tier.
pub const PROMPT_CACHE_PREFIX: &str = "narrative:ai:prompt:";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedResponse {
    text: String,
    tokens_used: u64,
    provider: String,
    model: String,
}

/// Reuses responses for identical prompts sent to the same model.
pub struct CachingGenerator {
    inner: Arc<dyn NarrativeGenerator>,
    store: Arc<dyn FastStore>,
    ttl: Duration,
}

impl CachingGenerator {
    pub fn new(inner: Arc<dyn NarrativeGenerator>, store: Arc<dyn FastStore>, ttl: Duration) -> Self {
        Self { inner, store, ttl }
    }

    pub fn cache_key(&self, prompt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.inner.provider_name().as_bytes());
        hasher.update(b"\n");
        hasher.update(self.inner.model_name().as_bytes());
        hasher.update(b"\n");
        hasher.update(prompt.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("{}{}", PROMPT_CACHE_PREFIX, &digest[..32])
    }

    async fn lookup(&self, key: &str) -> Option<GeneratedText> {
        let bytes = match self.store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, "prompt cache read failed");
                return None;
            }
        };
        match serde_json::from_slice::<CachedResponse>(&bytes) {
            Ok(cached) => Some(GeneratedText {
                text: cached.text,
                tokens_used: cached.tokens_used,
                cached: true,
                provider: cached.provider,
                model: cached.model,
            }),
            Err(err) => {
                warn!(error = %err, "ignoring malformed prompt cache entry");
                None
            }
        }
    }
}

#[async_trait]
impl NarrativeGenerator for CachingGenerator {
    async fn generate(
        &self,
        prompt: &str,
        deadline: Duration,
    ) -> Result<GeneratedText, GenerationError> {
        let key = self.cache_key(prompt);
        if let Some(hit) = self.lookup(&key).await {
            debug!(key = %key, "prompt cache hit");
            return Ok(hit);
        }

        let generated = self.inner.generate(prompt, deadline).await?;
        let entry = CachedResponse {
            text: generated.text.clone(),
            tokens_used: generated.tokens_used,
            provider: generated.provider.clone(),
            model: generated.model.clone(),
        };
        match serde_json::to_vec(&entry) {
            Ok(bytes) => {
                if let Err(err) = self.store.set(&key, bytes, self.ttl).await {
                    warn!(error = %err, "prompt cache write failed");
                }
            }
            Err(err) => warn!(error = %err, "prompt cache entry serialization failed"),
        }
        Ok(generated)
    }

    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
