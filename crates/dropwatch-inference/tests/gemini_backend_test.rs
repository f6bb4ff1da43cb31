//! HTTP-level tests for the Gemini backend against a mock server.

use std::sync::Arc;
use std::time::Duration;

use dropwatch_core::{
    EmbeddingBackend, EmbeddingRequest, Error, GenerationBackend, GenerationRequest,
    ShutdownSignal,
};
use dropwatch_inference::gemini::{GeminiBackend, GeminiConfig};
use dropwatch_inference::{ExtractionClient, RetryPolicy};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend_for(server: &MockServer) -> GeminiBackend {
    GeminiBackend::new(GeminiConfig {
        base_url: server.uri(),
        api_key: "test-key".to_string(),
        gen_model: "gemini-test".to_string(),
        embed_model: "embed-test".to_string(),
        embed_dimension: 4,
        timeout_seconds: 5,
    })
    .expect("backend")
}

fn gen_request(prompt: &str) -> GenerationRequest {
    GenerationRequest {
        model: "gemini-test".to_string(),
        prompt: prompt.to_string(),
    }
}

#[tokio::test]
async fn test_generation_sends_key_and_returns_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-test:generateContent"))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(serde_json::json!({
            "contents": [{"role": "user", "parts": [{"text": "hello"}]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "{\"identified_projects\": []}"}]},
                "finishReason": "STOP"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let generation = backend_for(&server)
        .generate(&gen_request("hello"))
        .await
        .expect("generation");
    assert!(generation.has_content);
    assert_eq!(generation.text, "{\"identified_projects\": []}");
}

#[tokio::test]
async fn test_generation_block_reason_surfaces() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-test:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        })))
        .mount(&server)
        .await;

    let generation = backend_for(&server)
        .generate(&gen_request("x"))
        .await
        .expect("generation");
    assert!(!generation.has_content);
    assert_eq!(generation.block_reason.as_deref(), Some("SAFETY"));
}

#[tokio::test]
async fn test_rate_limit_parses_retry_info() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-test:generateContent"))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "error": {
                "code": 429,
                "message": "Resource has been exhausted (e.g. check quota).",
                "status": "RESOURCE_EXHAUSTED",
                "details": [{
                    "@type": "type.googleapis.com/google.rpc.RetryInfo",
                    "retryDelay": "37s"
                }]
            }
        })))
        .mount(&server)
        .await;

    let err = backend_for(&server)
        .generate(&gen_request("x"))
        .await
        .unwrap_err();
    assert!(err.is_rate_limited());
    assert_eq!(err.retry_after(), Some(Duration::from_secs(37)));
}

#[tokio::test]
async fn test_rate_limit_falls_back_to_retry_after_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-test:generateContent"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "12")
                .set_body_string("slow down"),
        )
        .mount(&server)
        .await;

    let err = backend_for(&server)
        .generate(&gen_request("x"))
        .await
        .unwrap_err();
    assert!(err.is_rate_limited());
    assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
}

#[tokio::test]
async fn test_server_error_is_not_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-test:generateContent"))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
            "error": {"code": 500, "message": "internal", "status": "INTERNAL"}
        })))
        .mount(&server)
        .await;

    let err = backend_for(&server)
        .generate(&gen_request("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Inference(_)));
}

#[tokio::test]
async fn test_embedding_request_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/embed-test:embedContent"))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(serde_json::json!({
            "model": "models/embed-test",
            "content": {"parts": [{"text": "Project: Alpha"}]},
            "taskType": "RETRIEVAL_DOCUMENT"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "embedding": {"values": [0.1, 0.2, 0.3, 0.4]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let vector = backend_for(&server)
        .embed(&EmbeddingRequest {
            model: "embed-test".to_string(),
            text: "Project: Alpha".to_string(),
            task_type: "RETRIEVAL_DOCUMENT".to_string(),
        })
        .await
        .expect("embedding");
    assert_eq!(vector.as_slice().len(), 4);
}

#[tokio::test]
async fn test_embedding_error_maps_to_embedding_variant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/embed-test:embedContent"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": {"code": 400, "message": "bad", "status": "INVALID_ARGUMENT"}
        })))
        .mount(&server)
        .await;

    let err = backend_for(&server)
        .embed(&EmbeddingRequest {
            model: "embed-test".to_string(),
            text: "x".to_string(),
            task_type: "RETRIEVAL_DOCUMENT".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Embedding(_)));
}

#[tokio::test]
async fn test_extraction_client_retries_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-test:generateContent"))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "error": {"code": 429, "message": "quota", "status": "RESOURCE_EXHAUSTED"}
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-test:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "done"}]}}]
        })))
        .mount(&server)
        .await;

    let policy = RetryPolicy {
        default_wait: Duration::from_millis(10),
        min_wait: Duration::from_millis(1),
        ..RetryPolicy::default()
    };
    let client = ExtractionClient::new(Arc::new(backend_for(&server)), policy);
    let text = client
        .extract("prompt", "https://t.me/c/1/2", &ShutdownSignal::never())
        .await
        .expect("extraction");
    assert_eq!(text, "done");
}
