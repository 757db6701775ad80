//! Pass-1 ingestion worker: bus submissions to lexical documents + oplog rows.

use mediaforge::ingest::chunker::TextChunker;
use mediaforge::lifecycle::{spawn_health_tickler, spawn_metrics_server};
use mediaforge::{
    create_consumer, init_tracing, ConsumerProfile, IndexManager, IngestConsumer, Metrics,
    OplogStore, Settings,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("starting ingestion worker");

    let settings = Settings::from_env();
    let metrics = Arc::new(Metrics::new()?);

    let index = Arc::new(IndexManager::new(&settings.doc_store)?);
    index.ensure_index(None).await?;

    let oplog = Arc::new(OplogStore::connect(&settings.relational).await?);
    let chunker = TextChunker::new()?;

    let topics = [
        settings.bus.ingest_topic.as_str(),
        settings.bus.media_ingest_topic.as_str(),
    ];
    let consumer = create_consumer(
        &settings.bus,
        "ingestion_worker_group",
        &topics,
        ConsumerProfile::Standard,
    )?;

    let _health = spawn_health_tickler();
    let _metrics_srv = spawn_metrics_server(metrics.clone(), 8001);

    let worker = IngestConsumer::new(consumer, index, oplog, chunker);
    tokio::select! {
        result = worker.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
    }

    info!("ingestion worker stopped");
    Ok(())
}
