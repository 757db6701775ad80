//! Hybrid search executor
//!
//! Optional query analysis (language detection, entity extraction,
//! expansion), query embedding, composite lexical + nested-kNN retrieval,
//! optional cross-encoder reranking behind a process-local circuit
//! breaker, and final result shaping.

use crate::index::query::{build_search_body, QuerySpec, SortMode};
use crate::index::IndexManager;
use crate::intelligence::{AiGateway, QueryAnalysis, RerankDocument};
use crate::metrics::Metrics;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use utoipa::ToSchema;

/// Bound on the per-process query-analysis memo.
const ANALYSIS_CACHE_CAP: usize = 256;

fn default_limit() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_min_score() -> f64 {
    25.0
}

fn default_vector_threshold() -> f64 {
    0.65
}

/// Search request shape
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub filters: Option<Map<String, Value>>,
    #[serde(default)]
    pub index_name: Option<String>,
    #[serde(default = "default_true")]
    pub use_hybrid: bool,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_vector_threshold")]
    pub vector_threshold: f64,
    #[serde(default = "default_true")]
    pub return_chunks: bool,
    #[serde(default)]
    pub sort_by: SortMode,
    #[serde(default)]
    pub enable_query_expansion: bool,
    #[serde(default = "default_true")]
    pub enable_query_analysis: bool,
    #[serde(default)]
    pub enable_reranking: bool,
    #[serde(default)]
    pub debug: bool,
}

/// One shaped search result
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SearchResult {
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f64>,
    pub title: Option<String>,
    pub summary: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Value>,
    pub entity_id: Option<String>,
    pub source_app: Option<String>,
    pub entities: Vec<String>,
    pub key_concepts: Vec<String>,
    pub language: Option<String>,
    pub matched_chunk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub debug: Option<Value>,
}

/// Process-local rerank circuit breaker.
///
/// Opens after three consecutive failures; a later successful call closes
/// it again. Mutated only through atomics so the executor can be shared
/// across handler tasks without locks.
pub struct RerankBreaker {
    consecutive_failures: AtomicU32,
    threshold: u32,
}

impl RerankBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            threshold,
        }
    }

    pub fn is_open(&self) -> bool {
        self.consecutive_failures.load(Ordering::Relaxed) >= self.threshold
    }

    pub fn record_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }
}

impl Default for RerankBreaker {
    fn default() -> Self {
        Self::new(3)
    }
}

pub struct SearchExecutor {
    index: Arc<IndexManager>,
    gateway: Arc<dyn AiGateway>,
    metrics: Arc<Metrics>,
    breaker: RerankBreaker,
    /// Per-process analysis memo; repeated queries skip the gateway call.
    analysis_cache: Mutex<HashMap<String, QueryAnalysis>>,
}

impl SearchExecutor {
    pub fn new(index: Arc<IndexManager>, gateway: Arc<dyn AiGateway>, metrics: Arc<Metrics>) -> Self {
        Self {
            index,
            gateway,
            metrics,
            breaker: RerankBreaker::default(),
            analysis_cache: Mutex::new(HashMap::new()),
        }
    }

    async fn analyze(&self, query: &str) -> QueryAnalysis {
        let cached = self
            .analysis_cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(query).cloned());
        if let Some(analysis) = cached {
            self.metrics.search_cache_hits.inc();
            return analysis;
        }

        let analysis = self.gateway.analyze_query(query).await;
        if let Ok(mut cache) = self.analysis_cache.lock() {
            if cache.len() >= ANALYSIS_CACHE_CAP {
                cache.clear();
            }
            cache.insert(query.to_string(), analysis.clone());
        }
        analysis
    }

    pub async fn search(&self, request: &SearchRequest) -> crate::Result<Vec<SearchResult>> {
        // 1. Query analysis
        let analysis = if request.enable_query_analysis {
            self.analyze(&request.query).await
        } else {
            QueryAnalysis::passthrough(&request.query)
        };

        let mut search_query = request.query.clone();
        if analysis.detected_language != "en" {
            if let Some(translated) = analysis
                .translated_query
                .as_ref()
                .filter(|t| !t.is_empty())
            {
                info!("query translated: '{}' -> '{}'", request.query, translated);
                search_query = translated.clone();
            }
        }

        // 2. Expansion - suppressed when the analyzer saw no real intent
        let nonsense = analysis.original_intent.eq_ignore_ascii_case("nonsense");
        let embedding_text = if request.enable_query_expansion
            && !nonsense
            && !analysis.expanded_terms.is_empty()
        {
            let expanded = format!("{} {}", search_query, analysis.expanded_terms.join(" "));
            info!("query expanded: '{}' -> '{}'", search_query, expanded);
            expanded
        } else {
            search_query.clone()
        };

        // 3. Embed the final query (one call, single text)
        self.metrics
            .intelligence_calls
            .with_label_values(&["query_embed"])
            .inc();
        let vectors = self.gateway.embed(&[embedding_text]).await?;
        let vector = vectors.into_iter().next().unwrap_or_default();

        // 4. Composite retrieval; widen when a rerank pass will trim it back
        let retrieval_size = if request.enable_reranking {
            (request.limit * 3).max(20)
        } else {
            request.limit
        };

        let body = build_search_body(&QuerySpec {
            query_text: &search_query,
            vector: Some(&vector),
            size: retrieval_size,
            filters: request.filters.as_ref(),
            use_hybrid: request.use_hybrid,
            min_score: request.min_score,
            vector_threshold: request.vector_threshold,
            return_chunks: request.return_chunks,
            sort_mode: request.sort_by,
            entities: &analysis.entities,
            language: &analysis.detected_language,
        });

        let mut hits = self
            .index
            .execute_search(request.index_name.as_deref(), body)
            .await?;

        // 5. Rerank behind the circuit breaker
        let mut rerank_scores: Vec<Option<f64>> = vec![None; hits.len()];
        if request.enable_reranking && !hits.is_empty() {
            if self.breaker.is_open() {
                self.metrics.rerank_degraded.inc();
                warn!("rerank breaker open - returning index-ranked results");
            } else {
                match self.rerank_hits(&search_query, &hits, request.limit).await {
                    Ok((reordered, scores)) => {
                        self.breaker.record_success();
                        hits = reordered;
                        rerank_scores = scores;
                    }
                    Err(e) => {
                        self.breaker.record_failure();
                        self.metrics.rerank_degraded.inc();
                        self.metrics
                            .upstream_failures
                            .with_label_values(&["rerank"])
                            .inc();
                        warn!("rerank failed, falling back to index ranking: {}", e);
                    }
                }
            }
        }

        hits.truncate(request.limit);
        rerank_scores.truncate(request.limit);
        rerank_scores.resize(hits.len(), None);

        Ok(hits
            .iter()
            .zip(rerank_scores)
            .map(|(hit, rerank_score)| shape_result(hit, rerank_score, request))
            .collect())
    }

    async fn rerank_hits(
        &self,
        query: &str,
        hits: &[Value],
        limit: usize,
    ) -> crate::Result<(Vec<Value>, Vec<Option<f64>>)> {
        info!("reranking {} candidates", hits.len());
        self.metrics
            .intelligence_calls
            .with_label_values(&["rerank"])
            .inc();

        let documents: Vec<RerankDocument> = hits
            .iter()
            .map(|hit| RerankDocument {
                id: hit["_id"].as_str().unwrap_or_default().to_string(),
                text: rerank_text(hit),
                metadata: Value::Null,
            })
            .collect();

        let results = self.gateway.rerank(query, &documents).await?;

        let mut reordered = Vec::with_capacity(limit.min(results.len()));
        let mut scores = Vec::with_capacity(limit.min(results.len()));
        for item in results.into_iter().take(limit) {
            if let Some(hit) = hits
                .iter()
                .find(|h| h["_id"].as_str() == Some(item.id.as_str()))
            {
                reordered.push(hit.clone());
                scores.push(Some(item.score));
            }
        }
        Ok((reordered, scores))
    }
}

/// Reranker input text: best of matched chunk > summary > title.
fn rerank_text(hit: &Value) -> String {
    if let Some(chunk) = matched_chunk(hit) {
        return chunk;
    }
    let source = &hit["_source"];
    source["summary"]
        .as_str()
        .or_else(|| source["title"].as_str())
        .unwrap_or_default()
        .to_string()
}

/// Pull the best-matching chunk snippet out of the nested inner hits.
fn matched_chunk(hit: &Value) -> Option<String> {
    let inner = &hit["inner_hits"]["matched_chunks"]["hits"]["hits"];
    if let Some(first) = inner.as_array().and_then(|hits| hits.first()) {
        let source = &first["_source"];
        let text = source["text_chunk"]
            .as_str()
            .or_else(|| source["chunks"]["text_chunk"].as_str());
        if let Some(text) = text {
            return Some(text.to_string());
        }
    }
    // Fall back to the first stored chunk when inner hits are absent
    hit["_source"]["chunks"]
        .as_array()
        .and_then(|chunks| chunks.first())
        .and_then(|chunk| chunk["text_chunk"].as_str())
        .map(str::to_string)
}

fn string_array(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn shape_result(hit: &Value, rerank_score: Option<f64>, request: &SearchRequest) -> SearchResult {
    let source = &hit["_source"];
    SearchResult {
        score: hit["_score"].as_f64(),
        rerank_score,
        title: source["title"].as_str().map(str::to_string),
        summary: source["summary"].as_str().map(str::to_string),
        metadata: source.get("metadata").cloned(),
        entity_id: source["entity_id"].as_str().map(str::to_string),
        source_app: source["source_app"].as_str().map(str::to_string),
        entities: string_array(&source["entities"]),
        key_concepts: string_array(&source["key_concepts"]),
        language: source["language"].as_str().map(str::to_string),
        matched_chunk: if request.return_chunks {
            matched_chunk(hit)
        } else {
            None
        },
        debug: if request.debug {
            hit.get("matched_queries").cloned()
        } else {
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_breaker_opens_after_three_failures() {
        let breaker = RerankBreaker::default();
        assert!(!breaker.is_open());
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());

        breaker.record_success();
        assert!(!breaker.is_open());
    }

    fn sample_hit() -> Value {
        json!({
            "_id": "A",
            "_score": 61.2,
            "matched_queries": ["title_proximity_bonus", "chunk_semantic"],
            "_source": {
                "title": "cats purring",
                "summary": "all about the purr",
                "entity_id": "A",
                "source_app": "blog",
                "entities": ["cat"],
                "key_concepts": ["purring"],
                "language": "en",
                "metadata": {"len": 3}
            },
            "inner_hits": {
                "matched_chunks": {
                    "hits": {
                        "hits": [
                            { "_source": { "text_chunk": "cats purr when content" } }
                        ]
                    }
                }
            }
        })
    }

    #[test]
    fn test_matched_chunk_from_inner_hits() {
        assert_eq!(
            matched_chunk(&sample_hit()).as_deref(),
            Some("cats purr when content")
        );
    }

    #[test]
    fn test_matched_chunk_falls_back_to_source_chunks() {
        let hit = json!({
            "_id": "B",
            "_source": {
                "chunks": [ { "text_chunk": "first stored chunk" } ]
            }
        });
        assert_eq!(matched_chunk(&hit).as_deref(), Some("first stored chunk"));
    }

    #[test]
    fn test_rerank_text_preference_order() {
        assert_eq!(rerank_text(&sample_hit()), "cats purr when content");

        let no_chunk = json!({
            "_id": "C",
            "_source": { "summary": "sum", "title": "ttl" }
        });
        assert_eq!(rerank_text(&no_chunk), "sum");

        let title_only = json!({
            "_id": "D",
            "_source": { "title": "ttl" }
        });
        assert_eq!(rerank_text(&title_only), "ttl");
    }

    #[test]
    fn test_shape_result() {
        let request: SearchRequest = serde_json::from_value(json!({
            "query": "purring cats",
            "debug": true
        }))
        .unwrap();
        let result = shape_result(&sample_hit(), Some(0.93), &request);
        assert_eq!(result.entity_id.as_deref(), Some("A"));
        assert_eq!(result.rerank_score, Some(0.93));
        assert_eq!(result.matched_chunk.as_deref(), Some("cats purr when content"));
        assert!(result.debug.is_some());
        assert_eq!(result.entities, vec!["cat"]);
    }

    struct StubGateway {
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl crate::intelligence::AiGateway for StubGateway {
        async fn embed(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0; 3]).collect())
        }

        async fn chat(
            &self,
            _system: Option<&str>,
            _prompt: &str,
            _model: Option<&str>,
        ) -> crate::Result<String> {
            Ok("{}".to_string())
        }

        async fn analyze_query(&self, query: &str) -> QueryAnalysis {
            self.calls.fetch_add(1, Ordering::Relaxed);
            QueryAnalysis::passthrough(query)
        }

        async fn rerank(
            &self,
            _query: &str,
            _documents: &[RerankDocument],
        ) -> crate::Result<Vec<crate::intelligence::RerankResult>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_analysis_cache_skips_repeat_gateway_calls() {
        let settings = crate::config::Settings::from_env();
        let index = Arc::new(IndexManager::new(&settings.doc_store).unwrap());
        let metrics = Arc::new(crate::metrics::Metrics::new().unwrap());
        let gateway = Arc::new(StubGateway {
            calls: AtomicU32::new(0),
        });
        let gateway_dyn: Arc<dyn crate::intelligence::AiGateway> = gateway.clone();
        let executor = SearchExecutor::new(index, gateway_dyn, metrics.clone());

        executor.analyze("same query").await;
        executor.analyze("same query").await;
        executor.analyze("different query").await;

        assert_eq!(gateway.calls.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.search_cache_hits.get(), 1);
    }

    #[test]
    fn test_request_defaults() {
        let request: SearchRequest =
            serde_json::from_value(json!({ "query": "q" })).unwrap();
        assert_eq!(request.limit, 10);
        assert!(request.use_hybrid);
        assert!(request.enable_query_analysis);
        assert!(!request.enable_reranking);
        assert_eq!(request.min_score, 25.0);
        assert_eq!(request.sort_by, SortMode::Relevancy);
    }
}
