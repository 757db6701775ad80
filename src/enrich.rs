//! Pass-2 enrichment worker
//!
//! Claims oplog rows, derives chunks (semantic grouping happens here since
//! it needs embeddings), embeds them, optionally generates the structured
//! summary, writes vectors + structured fields to the document and flips it
//! to `ready`. Rows in a batch progress independently and concurrently;
//! any failure reschedules that row with exponential backoff.

use crate::bus::BusProducer;
use crate::index::{ChunkVector, EnrichmentFields, IndexManager};
use crate::ingest::chunker::TextChunker;
use crate::ingest::ChunkingStrategy;
use crate::intelligence::AiGateway;
use crate::metrics::Metrics;
use crate::oplog::{OplogRow, OplogStore};
use crate::prompts;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Completion event published on the results topic
#[derive(Debug, Serialize)]
struct ResultEvent<'a> {
    entity_id: &'a str,
    entity_type: &'a str,
    summary: &'a str,
    index_name: Option<&'a str>,
    status: &'a str,
    timestamp: chrono::DateTime<Utc>,
}

pub struct EnrichmentWorker {
    oplog: Arc<OplogStore>,
    index: Arc<IndexManager>,
    gateway: Arc<dyn AiGateway>,
    chunker: Arc<TextChunker>,
    producer: BusProducer,
    result_topic: String,
    summary_model: String,
    metrics: Arc<Metrics>,
    batch_size: i64,
    poll_interval: Duration,
}

impl EnrichmentWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        oplog: Arc<OplogStore>,
        index: Arc<IndexManager>,
        gateway: Arc<dyn AiGateway>,
        chunker: Arc<TextChunker>,
        producer: BusProducer,
        result_topic: String,
        summary_model: String,
        metrics: Arc<Metrics>,
        batch_size: i64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            oplog,
            index,
            gateway,
            chunker,
            producer,
            result_topic,
            summary_model,
            metrics,
            batch_size,
            poll_interval,
        }
    }

    /// Claim-and-process loop. Never returns under normal operation.
    pub async fn run(&self) -> crate::Result<()> {
        info!("enrichment worker started (batch={})", self.batch_size);
        loop {
            if let Err(e) = self.process_batch().await {
                error!("batch claim failed: {}", e);
                self.metrics
                    .upstream_failures
                    .with_label_values(&["database"])
                    .inc();
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn process_batch(&self) -> crate::Result<()> {
        let rows = self.oplog.claim_batch(self.batch_size).await?;
        if rows.is_empty() {
            return Ok(());
        }
        info!("processing {} oplog jobs", rows.len());

        // Rows progress independently; a slow summary on one row must not
        // serialize the rest of the batch.
        let jobs = rows.iter().map(|row| self.process_row(row));
        futures::future::join_all(jobs).await;
        Ok(())
    }

    async fn process_row(&self, row: &OplogRow) {
        let timer = self.metrics.oplog_job_seconds.start_timer();
        match self.execute(row).await {
            Ok(()) => {
                if let Err(e) = self.oplog.complete(row.id).await {
                    error!("completing job {} failed: {}", row.id, e);
                }
                self.metrics.oplog_jobs.with_label_values(&["success"]).inc();
            }
            Err(e) => {
                error!("job {} for {} failed: {}", row.id, row.entity_id, e);
                self.metrics.oplog_jobs.with_label_values(&["failure"]).inc();
                self.metrics.oplog_retries.inc();
                self.metrics
                    .upstream_failures
                    .with_label_values(&[e.category()])
                    .inc();
                if let Err(db_err) = self.oplog.record_failure(row, &e.to_string()).await {
                    error!("recording failure for job {} failed: {}", row.id, db_err);
                }
            }
        }
        timer.observe_duration();
    }

    async fn execute(&self, row: &OplogRow) -> crate::Result<()> {
        let payload = &row.payload;

        // 1. Derive chunks when pass 1 deferred them
        let chunk_texts: Vec<String> = match &payload.chunks {
            Some(chunks) if !chunks.is_empty() => chunks.clone(),
            _ if !payload.text.is_empty() => {
                if payload.chunking_strategy == ChunkingStrategy::Semantic {
                    info!("semantic chunking for {}", row.entity_id);
                    self.chunker
                        .semantic_split(
                            &payload.text,
                            payload.chunk_size,
                            payload.chunk_overlap,
                            self.gateway.as_ref(),
                        )
                        .await?
                } else {
                    self.chunker.split_text(
                        &payload.text,
                        payload.chunk_size,
                        payload.chunk_overlap,
                    )
                }
            }
            _ => Vec::new(),
        };

        // 2. Embed
        let mut nested: Vec<ChunkVector> = Vec::new();
        if !chunk_texts.is_empty() {
            self.metrics
                .intelligence_calls
                .with_label_values(&["embed"])
                .inc();
            let vectors = self.gateway.embed(&chunk_texts).await?;
            info!(
                "generated {} embeddings with dimension {}",
                vectors.len(),
                vectors.first().map(Vec::len).unwrap_or(0)
            );
            nested = chunk_texts
                .into_iter()
                .zip(vectors)
                .map(|(text_chunk, vector)| ChunkVector { text_chunk, vector })
                .collect();
        }

        // 3. Structured summary
        let mut fields = EnrichmentFields::default();
        if payload.enrichments.iter().any(|e| e == "summary") && !payload.text.is_empty() {
            self.metrics
                .intelligence_calls
                .with_label_values(&["summary"])
                .inc();
            fields = self
                .generate_summary(&payload.text, &payload.entity_type)
                .await?;
        }

        // 4. Write vectors + structured fields, flip to ready
        self.index
            .update_enrichment(row.target_index.as_deref(), &row.entity_id, &nested, &fields)
            .await?;

        // 5. Completion event, only when a summary was produced
        if let Some(summary) = &fields.summary {
            let event = ResultEvent {
                entity_id: &row.entity_id,
                entity_type: &payload.entity_type,
                summary,
                index_name: row.target_index.as_deref(),
                status: "completed",
                timestamp: Utc::now(),
            };
            if let Err(e) = self
                .producer
                .publish(&self.result_topic, &row.entity_id, &event)
                .await
            {
                // The document is already ready; a lost event is not worth
                // replaying the whole enrichment.
                error!("result event for {} not published: {}", row.entity_id, e);
                self.metrics
                    .upstream_failures
                    .with_label_values(&["bus"])
                    .inc();
            }
        }

        Ok(())
    }

    async fn generate_summary(
        &self,
        text: &str,
        entity_type: &str,
    ) -> crate::Result<EnrichmentFields> {
        let system = prompts::summary_system_prompt(entity_type);
        let user = prompts::summary_user_prompt(text, entity_type);

        let raw = self
            .gateway
            .chat(Some(system), &user, Some(&self.summary_model))
            .await?;

        match prompts::parse_json_response(&raw) {
            Ok(value) => Ok(structured_fields(&value)),
            Err(e) => {
                error!("summary JSON parse failed, degrading to raw text: {}", e);
                Ok(EnrichmentFields {
                    summary: Some(prompts::strip_markdown_fences(&raw)),
                    ..Default::default()
                })
            }
        }
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Map the model's structured response onto the indexed fields. `summary`
/// mirrors `overview` when the content-type prompt used that name;
/// `key_concepts` likewise absorbs `key_moments` / `main_topics`.
fn structured_fields(value: &Value) -> EnrichmentFields {
    let summary = value
        .get("overview")
        .or_else(|| value.get("summary"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let key_concepts = [
        value.get("key_concepts"),
        value.get("key_moments"),
        value.get("main_topics"),
    ]
    .into_iter()
    .flatten()
    .map(|v| string_list(Some(v)))
    .find(|v| !v.is_empty())
    .unwrap_or_default();

    EnrichmentFields {
        summary,
        key_concepts,
        entities: string_list(value.get("entities")),
        language: value
            .get("language")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_structured_fields_article_shape() {
        let value = json!({
            "title": "T",
            "overview": "An overview paragraph",
            "key_concepts": ["a", "b"],
            "entities": ["Zeus"],
            "language": "en"
        });
        let fields = structured_fields(&value);
        assert_eq!(fields.summary.as_deref(), Some("An overview paragraph"));
        assert_eq!(fields.key_concepts, vec!["a", "b"]);
        assert_eq!(fields.entities, vec!["Zeus"]);
        assert_eq!(fields.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_structured_fields_video_shape() {
        let value = json!({
            "topic": "Game review",
            "summary": "A narrative summary",
            "key_moments": ["m1", "m2", "m3"]
        });
        let fields = structured_fields(&value);
        assert_eq!(fields.summary.as_deref(), Some("A narrative summary"));
        assert_eq!(fields.key_concepts, vec!["m1", "m2", "m3"]);
        assert!(fields.entities.is_empty());
    }

    #[test]
    fn test_structured_fields_overview_wins_over_summary() {
        let value = json!({ "overview": "o", "summary": "s" });
        let fields = structured_fields(&value);
        assert_eq!(fields.summary.as_deref(), Some("o"));
    }

    #[test]
    fn test_structured_fields_default_shape() {
        let value = json!({
            "summary": "Five sentences.",
            "main_topics": ["t1", "t2"]
        });
        let fields = structured_fields(&value);
        assert_eq!(fields.summary.as_deref(), Some("Five sentences."));
        assert_eq!(fields.key_concepts, vec!["t1", "t2"]);
    }
}
