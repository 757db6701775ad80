//! Outbound AI gateway client
//!
//! Thin adapter over the remote intelligence service exposing embeddings,
//! chat completions, query analysis and reranking. The upstream is treated
//! as idempotent and rate-limited; 429s and 5xxs map onto the gateway error
//! taxonomy so workers can decide between retry and degrade.

use crate::config::AiSettings;
use crate::error::{GatewayError, PlatformError};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

/// Embedding requests are chunked into batches of this size.
pub const EMBED_BATCH_SIZE: usize = 20;

/// Query analysis produced by the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub detected_language: String,
    pub original_intent: String,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub expanded_terms: Vec<String>,
    #[serde(default)]
    pub translated_query: Option<String>,
}

impl QueryAnalysis {
    /// Identity analysis used when the analyzer is unavailable.
    pub fn passthrough(query: &str) -> Self {
        Self {
            detected_language: "en".to_string(),
            original_intent: "search".to_string(),
            entities: Vec::new(),
            expanded_terms: Vec::new(),
            translated_query: Some(query.to_string()),
        }
    }
}

/// One document handed to the reranker
#[derive(Debug, Clone, Serialize)]
pub struct RerankDocument {
    pub id: String,
    pub text: String,
    pub metadata: serde_json::Value,
}

/// One scored entry coming back from the reranker
#[derive(Debug, Clone, Deserialize)]
pub struct RerankResult {
    pub id: String,
    pub score: f64,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Deserialize)]
struct ChatResponse {
    content: String,
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    query: &'a str,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: &'a [RerankDocument],
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
    #[serde(default)]
    #[allow(dead_code)]
    latency_ms: Option<u64>,
}

/// Trait for the AI gateway so executors can be tested against stubs
#[async_trait]
pub trait AiGateway: Send + Sync {
    /// Embed a batch of texts; output order matches input order
    async fn embed(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>>;

    /// One chat completion; returns the raw content string
    async fn chat(
        &self,
        system: Option<&str>,
        prompt: &str,
        model: Option<&str>,
    ) -> crate::Result<String>;

    /// Analyze a search query; degrades to a passthrough analysis on error
    async fn analyze_query(&self, query: &str) -> QueryAnalysis;

    /// Rerank documents against a query
    async fn rerank(
        &self,
        query: &str,
        documents: &[RerankDocument],
    ) -> crate::Result<Vec<RerankResult>>;
}

/// HTTP client implementation
pub struct HttpAiGateway {
    client: reqwest::Client,
    settings: AiSettings,
}

impl HttpAiGateway {
    pub fn new(settings: AiSettings) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, settings })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    pub fn summary_model(&self) -> &str {
        &self.settings.summary_model
    }

    async fn post_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> crate::Result<Resp> {
        let response = self
            .client
            .post(self.url(path))
            .header("X-API-KEY", &self.settings.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PlatformError::Gateway(GatewayError::Timeout)
                } else {
                    PlatformError::Http(e)
                }
            })?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => {
                Err(PlatformError::Gateway(GatewayError::RateLimited))
            }
            status if status.is_server_error() => Err(PlatformError::Gateway(
                GatewayError::Unavailable(format!("{} returned {}", path, status)),
            )),
            status if !status.is_success() => {
                let text = response.text().await.unwrap_or_default();
                Err(PlatformError::Gateway(GatewayError::InvalidResponse(
                    format!("{} returned {}: {}", path, status, text),
                )))
            }
            _ => response.json::<Resp>().await.map_err(|e| {
                PlatformError::Gateway(GatewayError::InvalidResponse(e.to_string()))
            }),
        }
    }
}

#[async_trait]
impl AiGateway for HttpAiGateway {
    async fn embed(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        let mut all = Vec::with_capacity(texts.len());
        let batches = texts.chunks(EMBED_BATCH_SIZE);
        let total = texts.len().div_ceil(EMBED_BATCH_SIZE);

        for (i, batch) in batches.enumerate() {
            info!("embedding batch {}/{} ({} items)", i + 1, total, batch.len());
            let response: EmbeddingResponse = self
                .post_json(
                    "/v1/embeddings",
                    &EmbeddingRequest {
                        input: batch,
                        model: &self.settings.embedding_model,
                    },
                )
                .await?;
            all.extend(response.data);
        }

        if all.len() != texts.len() {
            return Err(PlatformError::Gateway(GatewayError::InvalidResponse(
                format!("embedded {} of {} texts", all.len(), texts.len()),
            )));
        }
        Ok(all)
    }

    async fn chat(
        &self,
        system: Option<&str>,
        prompt: &str,
        model: Option<&str>,
    ) -> crate::Result<String> {
        let response: ChatResponse = self
            .post_json(
                "/v1/chat/completions",
                &ChatRequest {
                    prompt,
                    system,
                    model,
                },
            )
            .await?;
        Ok(response.content)
    }

    async fn analyze_query(&self, query: &str) -> QueryAnalysis {
        let result: crate::Result<QueryAnalysis> = self
            .post_json("/v1/query/analyze", &AnalyzeRequest { query })
            .await;

        match result {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!("query analysis failed, using passthrough: {}", e);
                QueryAnalysis::passthrough(query)
            }
        }
    }

    async fn rerank(
        &self,
        query: &str,
        documents: &[RerankDocument],
    ) -> crate::Result<Vec<RerankResult>> {
        let response: crate::Result<RerankResponse> = self
            .post_json("/v1/rerank/rerank", &RerankRequest { query, documents })
            .await;

        match response {
            Ok(r) => Ok(r.results),
            Err(e) => {
                error!("rerank call failed: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_analysis() {
        let analysis = QueryAnalysis::passthrough("cats");
        assert_eq!(analysis.detected_language, "en");
        assert_eq!(analysis.translated_query.as_deref(), Some("cats"));
        assert!(analysis.expanded_terms.is_empty());
    }

    #[test]
    fn test_chat_request_skips_absent_fields() {
        let req = ChatRequest {
            prompt: "p",
            system: None,
            model: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"prompt":"p"}"#);
    }
}
