//! Tests for the AI gateway client against a stubbed upstream

use mediaforge::config::AiSettings;
use mediaforge::error::{GatewayError, PlatformError};
use mediaforge::intelligence::{AiGateway, HttpAiGateway, RerankDocument};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn settings(uri: &str) -> AiSettings {
    AiSettings {
        base_url: uri.to_string(),
        api_key: "secret-key".to_string(),
        summary_model: "standard".to_string(),
        embedding_model: "embedding-001".to_string(),
        timeout_secs: 5,
    }
}

#[tokio::test]
async fn test_embed_batches_of_twenty() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("X-API-KEY", "secret-key"))
        .respond_with(|req: &Request| {
            let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
            let count = body["input"].as_array().unwrap().len();
            assert!(count <= 20, "batch too large: {}", count);
            let data: Vec<Vec<f32>> = vec![vec![0.1, 0.2, 0.3]; count];
            ResponseTemplate::new(200).set_body_json(json!({ "data": data }))
        })
        .expect(3)
        .mount(&server)
        .await;

    let gateway = HttpAiGateway::new(settings(&server.uri())).unwrap();
    let texts: Vec<String> = (0..45).map(|i| format!("text {}", i)).collect();
    let vectors = gateway.embed(&texts).await.unwrap();

    assert_eq!(vectors.len(), 45);
    assert_eq!(vectors[0].len(), 3);
}

#[tokio::test]
async fn test_chat_returns_content() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "content": "a summary", "provider": "stub" })),
        )
        .mount(&server)
        .await;

    let gateway = HttpAiGateway::new(settings(&server.uri())).unwrap();
    let content = gateway
        .chat(Some("system prompt"), "user prompt", Some("fast"))
        .await
        .unwrap();
    assert_eq!(content, "a summary");
}

#[tokio::test]
async fn test_analyze_query_happy_path() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/query/analyze"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "detected_language": "es",
            "original_intent": "search",
            "entities": ["gatos"],
            "expanded_terms": ["felinos"],
            "translated_query": "purring cats"
        })))
        .mount(&server)
        .await;

    let gateway = HttpAiGateway::new(settings(&server.uri())).unwrap();
    let analysis = gateway.analyze_query("gatos ronroneando").await;
    assert_eq!(analysis.detected_language, "es");
    assert_eq!(analysis.translated_query.as_deref(), Some("purring cats"));
    assert_eq!(analysis.entities, vec!["gatos"]);
}

#[tokio::test]
async fn test_analyze_query_degrades_to_passthrough() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/query/analyze"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let gateway = HttpAiGateway::new(settings(&server.uri())).unwrap();
    let analysis = gateway.analyze_query("purring cats").await;

    // Analyzer failure must not fail the search path
    assert_eq!(analysis.detected_language, "en");
    assert_eq!(analysis.original_intent, "search");
    assert_eq!(analysis.translated_query.as_deref(), Some("purring cats"));
    assert!(analysis.expanded_terms.is_empty());
}

#[tokio::test]
async fn test_rerank_results() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/rerank/rerank"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": "q",
            "results": [
                { "id": "B", "score": 0.97 },
                { "id": "A", "score": 0.41 }
            ],
            "latency_ms": 12
        })))
        .mount(&server)
        .await;

    let gateway = HttpAiGateway::new(settings(&server.uri())).unwrap();
    let documents = vec![
        RerankDocument {
            id: "A".to_string(),
            text: "first".to_string(),
            metadata: serde_json::Value::Null,
        },
        RerankDocument {
            id: "B".to_string(),
            text: "second".to_string(),
            metadata: serde_json::Value::Null,
        },
    ];
    let results = gateway.rerank("q", &documents).await.unwrap();
    assert_eq!(results[0].id, "B");
    assert!(results[0].score > results[1].score);
}

#[tokio::test]
async fn test_upstream_rate_limit_maps_to_gateway_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let gateway = HttpAiGateway::new(settings(&server.uri())).unwrap();
    let err = gateway.embed(&["text".to_string()]).await.unwrap_err();
    assert!(matches!(
        err,
        PlatformError::Gateway(GatewayError::RateLimited)
    ));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_upstream_5xx_maps_to_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let gateway = HttpAiGateway::new(settings(&server.uri())).unwrap();
    let err = gateway.chat(None, "p", None).await.unwrap_err();
    assert!(matches!(
        err,
        PlatformError::Gateway(GatewayError::Unavailable(_))
    ));
}
