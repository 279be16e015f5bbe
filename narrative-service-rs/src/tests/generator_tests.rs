use std::sync::Arc;
use std::time::Duration;

use config_rs::LlmSettings;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::error::GenerationError;
use crate::generator::{CachingGenerator, HttpNarrativeGenerator, NarrativeGenerator, PROMPT_CACHE_PREFIX};
use crate::store::{FastStore, MemoryFastStore};

const DEADLINE: Duration = Duration::from_secs(10);

fn settings(server: &MockServer, max_retries: u32) -> LlmSettings {
    LlmSettings {
        api_url: format!("{}/v1/chat/completions", server.uri()),
        api_key: Some("test-key".to_string()),
        model: "test-model".to_string(),
        max_tokens: 256,
        temperature: 0.2,
        max_retries,
        initial_retry_delay_ms: 1,
        max_retry_delay_ms: 5,
    }
}

fn completion(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"message": {"role": "assistant", "content": text}}],
        "usage": {"total_tokens": 42}
    }))
}

#[tokio::test]
async fn returns_the_first_choice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"model": "test-model", "max_tokens": 256})))
        .respond_with(completion("the database saturated"))
        .expect(1)
        .mount(&server)
        .await;

    let generator = HttpNarrativeGenerator::new(&settings(&server, 0)).unwrap();
    let generated = generator.generate("explain", DEADLINE).await.unwrap();

    assert_eq!(generated.text, "the database saturated");
    assert_eq!(generated.tokens_used, 42);
    assert!(!generated.cached);
    assert_eq!(generated.provider, "default");
    assert_eq!(generated.model, "test-model");
}

#[tokio::test]
async fn retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(completion("recovered"))
        .expect(1)
        .mount(&server)
        .await;

    let generator = HttpNarrativeGenerator::new(&settings(&server, 3)).unwrap();
    let generated = generator.generate("explain", DEADLINE).await.unwrap();
    assert_eq!(generated.text, "recovered");
}

#[tokio::test]
async fn gives_up_after_max_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .expect(2)
        .mount(&server)
        .await;

    let generator = HttpNarrativeGenerator::new(&settings(&server, 1)).unwrap();
    let err = generator.generate("explain", DEADLINE).await.unwrap_err();
    assert_eq!(err, GenerationError::RateLimited("slow down".to_string()));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .expect(1)
        .mount(&server)
        .await;

    let generator = HttpNarrativeGenerator::new(&settings(&server, 3)).unwrap();
    let err = generator.generate("explain", DEADLINE).await.unwrap_err();
    assert!(matches!(err, GenerationError::InvalidRequest(_)));
}

#[tokio::test]
async fn empty_choices_are_a_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .expect(1)
        .mount(&server)
        .await;

    let generator = HttpNarrativeGenerator::new(&settings(&server, 3)).unwrap();
    let err = generator.generate("explain", DEADLINE).await.unwrap_err();
    assert!(matches!(err, GenerationError::Parse(_)));
}

#[tokio::test]
async fn slow_endpoints_hit_the_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion("late").set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let generator = HttpNarrativeGenerator::new(&settings(&server, 0)).unwrap();
    let deadline = Duration::from_millis(100);
    let err = generator.generate("explain", deadline).await.unwrap_err();
    assert_eq!(err, GenerationError::Timeout(deadline));
}

#[tokio::test]
async fn caching_generator_reuses_identical_prompts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion("cached narrative"))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryFastStore::new());
    let inner = Arc::new(HttpNarrativeGenerator::new(&settings(&server, 0)).unwrap());
    let generator = CachingGenerator::new(inner, store.clone(), Duration::from_secs(60));

    let first = generator.generate("same prompt", DEADLINE).await.unwrap();
    let second = generator.generate("same prompt", DEADLINE).await.unwrap();

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(second.text, "cached narrative");
    assert_eq!(second.tokens_used, 42);

    let key = generator.cache_key("same prompt");
    assert!(key.starts_with(PROMPT_CACHE_PREFIX));
    assert!(store.get(&key).await.unwrap().is_some());
    assert_ne!(key, generator.cache_key("other prompt"));
}

#[tokio::test]
async fn failures_are_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400))
        .expect(2)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryFastStore::new());
    let inner = Arc::new(HttpNarrativeGenerator::new(&settings(&server, 0)).unwrap());
    let generator = CachingGenerator::new(inner, store.clone(), Duration::from_secs(60));

    assert!(generator.generate("p", DEADLINE).await.is_err());
    assert!(generator.generate("p", DEADLINE).await.is_err());
    assert_eq!(store.len().await, 0);
}
