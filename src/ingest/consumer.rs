//! Pass-1 ingestion consumer
//!
//! Single-record loop with manual commits. For each submission: sanitize,
//! upsert the lexical document as `processing_vectors`, pre-split recursive
//! chunks, and enqueue the enrichment oplog row. The offset is committed
//! only after both writes succeed, so a crash in between replays the record
//! (both writes are idempotent).

use super::chunker::TextChunker;
use super::sanitizer;
use super::{ChunkingStrategy, Submission};
use crate::error::PlatformError;
use crate::index::{DocStatus, IndexManager, LexicalDocument};
use crate::oplog::{OplogPayload, OplogStore, TaskType};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub struct IngestConsumer {
    consumer: StreamConsumer,
    index: Arc<IndexManager>,
    oplog: Arc<OplogStore>,
    chunker: TextChunker,
}

impl IngestConsumer {
    pub fn new(
        consumer: StreamConsumer,
        index: Arc<IndexManager>,
        oplog: Arc<OplogStore>,
        chunker: TextChunker,
    ) -> Self {
        Self {
            consumer,
            index,
            oplog,
            chunker,
        }
    }

    pub async fn run(&self) -> crate::Result<()> {
        info!("pass-1 ingestion consumer started");
        loop {
            let message = self.consumer.recv().await?;
            match self.handle(&message).await {
                Ok(()) => {
                    self.consumer.commit_message(&message, CommitMode::Async)?;
                }
                Err(e)
                    if matches!(
                        e,
                        PlatformError::Validation(_) | PlatformError::Serialization(_)
                    ) =>
                {
                    // Bad payloads never become good; drop and move on.
                    warn!("dropping malformed record: {}", e);
                    self.consumer.commit_message(&message, CommitMode::Async)?;
                }
                Err(e) => {
                    // Transient dependency failure: leave the offset alone
                    // so the record replays after a pause.
                    error!("ingestion failed, record will replay: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    async fn handle(&self, message: &BorrowedMessage<'_>) -> crate::Result<()> {
        let payload = message
            .payload()
            .ok_or_else(|| PlatformError::Validation("empty bus message".to_string()))?;
        let submission: Submission = serde_json::from_slice(payload)?;

        if submission.operation != "index" {
            info!(
                "skipping operation '{}' for {}",
                submission.operation, submission.entity_id
            );
            return Ok(());
        }

        let content = sanitizer::clean_html(submission.body_text().unwrap_or(""));

        let doc = LexicalDocument {
            source_app: submission.source_app.clone(),
            entity_id: submission.entity_id.clone(),
            title: submission.title().to_string(),
            content: content.clone(),
            metadata: submission.metadata(),
            status: DocStatus::ProcessingVectors,
            published_at: submission.timestamp,
        };
        self.index
            .upsert_document(submission.index_name.as_deref(), &doc)
            .await?;
        info!(
            "pass 1: indexed text for {} in {}",
            submission.entity_id,
            submission.index_name.as_deref().unwrap_or("default")
        );

        if content.is_empty() {
            // No body text means nothing to enrich; no oplog row.
            return Ok(());
        }

        // Recursive chunks are cheap enough to pre-split here; semantic
        // grouping needs embeddings and is deferred to pass 2.
        let chunks = match submission.chunking_strategy {
            ChunkingStrategy::Recursive => Some(self.chunker.split_text(
                &content,
                submission.chunk_size,
                submission.chunk_overlap,
            )),
            ChunkingStrategy::Semantic => None,
        };

        let task_type = if submission.enrichments.is_empty() {
            TaskType::Embed
        } else {
            TaskType::Enrich
        };

        let oplog_payload = OplogPayload {
            entity_type: submission.entity_type.clone(),
            chunks,
            text: content,
            enrichments: submission.enrichments.clone(),
            chunk_size: submission.chunk_size,
            chunk_overlap: submission.chunk_overlap,
            chunking_strategy: submission.chunking_strategy,
        };

        let inserted = self
            .oplog
            .enqueue(
                &submission.entity_id,
                task_type,
                &oplog_payload,
                submission.index_name.as_deref(),
            )
            .await?;

        if inserted {
            info!(
                "pass 2: queued {} job for {}",
                task_type.as_str(),
                submission.entity_id
            );
        } else {
            info!(
                "pass 2: {} job for {} already queued (replay dedupe)",
                task_type.as_str(),
                submission.entity_id
            );
        }

        Ok(())
    }
}
