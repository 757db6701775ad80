//! Content Intelligence Platform
//!
//! Two tightly coupled cores over a shared ambient stack:
//!
//! - **Ingestion & semantic search**: a durable two-pass pipeline that
//!   persists submissions for lexical search immediately and enriches them
//!   asynchronously (chunk embeddings, structured summaries) through a
//!   transactional oplog, plus a hybrid lexical + nested-kNN search
//!   executor with optional reranking.
//! - **Highlight generation**: a resource-governed, single-tenant-per-video
//!   worker fusing audio, scene, chat, caption and OCR signals into
//!   non-overlapping clips with AI-generated titles.
//!
//! Backing stores (document index, relational DB, blob store, bus, cache)
//! and the AI gateway are external collaborators reached through the thin
//! adapters in this crate.

pub mod api;
pub mod bus;
pub mod config;
pub mod enrich;
pub mod error;
pub mod highlight;
pub mod index;
pub mod ingest;
pub mod intelligence;
pub mod lifecycle;
pub mod limiter;
pub mod lock;
pub mod metrics;
pub mod oplog;
pub mod prompts;
pub mod search;
pub mod storage;

// Re-export main types
pub use bus::{create_consumer, BusProducer, ConsumerProfile};
pub use config::{init_tracing, Settings};
pub use enrich::EnrichmentWorker;
pub use error::{PlatformError, Result};
pub use highlight::config::HighlightConfig;
pub use highlight::consumer::HighlightConsumer;
pub use highlight::job::{JobRunner, JobState};
pub use highlight::{HighlightJobPayload, JobOutcome};
pub use index::{ChunkVector, DocStatus, IndexManager, LexicalDocument};
pub use ingest::consumer::IngestConsumer;
pub use ingest::{ChunkingStrategy, Submission};
pub use intelligence::{AiGateway, HttpAiGateway, QueryAnalysis};
pub use limiter::RateLimiter;
pub use lock::VideoLock;
pub use metrics::Metrics;
pub use oplog::{OplogPayload, OplogStore, TaskType};
pub use search::{SearchExecutor, SearchRequest, SearchResult};
pub use storage::BlobStore;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}
