//! End-to-end runs through the HTTP API against a stubbed LLM endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use config_rs::{LlmSettings, PipelineConfig};
use narrative_service::api::{create_router, AppState};
use narrative_service::generator::{CachingGenerator, HttpNarrativeGenerator, NarrativeGenerator};
use narrative_service::manager::{TaskManager, TaskManagerConfig};
use narrative_service::store::MemoryFastStore;
use narrative_service::webhook::HttpWebhookNotifier;
use rca_model::fixtures::context;
use rca_model::{RcaChain, RcaIncident, RcaStep};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn incident(chains: usize) -> RcaIncident {
    let mut incident = RcaIncident::new(context());
    for i in 0..chains {
        let score = 0.9 - 0.01 * i as f64;
        let cause = format!("payments-db-{}", i);
        let chain = RcaChain::from_steps(
            score,
            vec![
                RcaStep::new(1, "checkout", score),
                RcaStep::new(5, cause.as_str(), score).with_component("lock contention"),
            ],
        )
        .unwrap();
        incident.add_chain(chain).unwrap();
    }
    incident
}

struct Service {
    router: axum::Router,
    llm: MockServer,
}

async fn service(webhook_timeout: Duration) -> Service {
    let llm = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "generated section"}}],
            "usage": {"total_tokens": 7}
        })))
        .mount(&llm)
        .await;

    let settings = LlmSettings {
        api_url: format!("{}/v1/chat/completions", llm.uri()),
        api_key: None,
        model: "e2e-model".to_string(),
        initial_retry_delay_ms: 1,
        max_retry_delay_ms: 5,
        ..LlmSettings::default()
    };
    let fast = Arc::new(MemoryFastStore::new());
    let http: Arc<dyn NarrativeGenerator> = Arc::new(HttpNarrativeGenerator::new(&settings).unwrap());
    let generator = Arc::new(CachingGenerator::new(http, fast.clone(), Duration::from_secs(60)));
    let manager = TaskManager::new(
        fast,
        generator,
        Arc::new(HttpWebhookNotifier::new(webhook_timeout)),
        TaskManagerConfig::default(),
    );
    let router = create_router(AppState::new(Arc::new(manager), PipelineConfig::default()));
    Service { router, llm }
}

async fn call(router: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn submit(router: &axum::Router, body: Value) -> String {
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/narrative/rca_analyze_async")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, accepted) = call(router, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    accepted["statusUrl"].as_str().unwrap().to_string()
}

async fn wait_done(router: &axum::Router, status_url: &str) -> Value {
    for _ in 0..300 {
        let request = Request::builder().uri(status_url).body(Body::empty()).unwrap();
        let (status, task) = call(router, request).await;
        assert_eq!(status, StatusCode::OK);
        if task["status"] == "completed" || task["status"] == "failed" {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task at {} did not finish", status_url);
}

async fn llm_calls(server: &MockServer) -> usize {
    server.received_requests().await.map_or(0, |r| r.len())
}

#[tokio::test]
async fn one_chain_is_two_chunks_and_a_merge() {
    let svc = service(Duration::from_secs(5)).await;
    let status_url = submit(
        &svc.router,
        json!({"name": "checkout errors", "rcaData": incident(1)}),
    )
    .await;

    let task = wait_done(&svc.router, &status_url).await;
    assert_eq!(task["status"], "completed");
    assert_eq!(task["result"]["totalChunks"], 2);
    assert_eq!(task["result"]["synthesized"], true);
    assert_eq!(task["result"]["tokensUsed"], 21);
    assert_eq!(task["result"]["model"], "e2e-model");
    let explanation = task["result"]["explanation"].as_str().unwrap();
    assert!(explanation.starts_with("# Root Cause Analysis Summary"));
    assert!(explanation.ends_with("*Analysis generated from 2 data segments*"));
    assert_eq!(llm_calls(&svc.llm).await, 3);
}

#[tokio::test]
async fn twelve_chains_are_four_chunks_and_a_merge() {
    let svc = service(Duration::from_secs(5)).await;
    let status_url = submit(
        &svc.router,
        json!({"name": "wide incident", "rcaData": incident(12)}),
    )
    .await;

    let task = wait_done(&svc.router, &status_url).await;
    assert_eq!(task["status"], "completed");
    assert_eq!(task["result"]["totalChunks"], 4);
    assert_eq!(task["progress"]["completedChunks"], 4);
    assert_eq!(llm_calls(&svc.llm).await, 5);
}

#[tokio::test]
async fn resubmitting_the_same_incident_is_served_from_cache() {
    let svc = service(Duration::from_secs(5)).await;
    let body = json!({"name": "checkout errors", "rcaData": incident(1)});

    let first = wait_done(&svc.router, &submit(&svc.router, body.clone()).await).await;
    let second = wait_done(&svc.router, &submit(&svc.router, body).await).await;

    assert_eq!(first["result"]["cached"], false);
    assert_eq!(second["result"]["cached"], true);
    assert_eq!(llm_calls(&svc.llm).await, 3);
}

#[tokio::test]
async fn completion_posts_to_the_callback() {
    let svc = service(Duration::from_secs(5)).await;
    let hooks = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/narrative"))
        .and(body_partial_json(json!({"status": "completed"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&hooks)
        .await;

    let status_url = submit(
        &svc.router,
        json!({
            "name": "checkout errors",
            "rcaData": incident(1),
            "callbackUrl": format!("{}/hooks/narrative", hooks.uri()),
        }),
    )
    .await;
    wait_done(&svc.router, &status_url).await;

    for _ in 0..100 {
        if llm_calls(&hooks).await > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    hooks.verify().await;
}
