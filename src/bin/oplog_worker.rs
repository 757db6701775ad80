//! Pass-2 enrichment worker: claims oplog rows, embeds and summarizes.

use mediaforge::ingest::chunker::TextChunker;
use mediaforge::lifecycle::{spawn_health_tickler, spawn_metrics_server};
use mediaforge::{
    init_tracing, AiGateway, BusProducer, EnrichmentWorker, HttpAiGateway, IndexManager, Metrics,
    OplogStore, Settings,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("starting oplog worker");

    let settings = Settings::from_env();
    let metrics = Arc::new(Metrics::new()?);

    let oplog = Arc::new(OplogStore::connect(&settings.relational).await?);
    let index = Arc::new(IndexManager::new(&settings.doc_store)?);
    index.ensure_index(None).await?;

    let gateway: Arc<dyn AiGateway> = Arc::new(HttpAiGateway::new(settings.ai.clone())?);
    let chunker = Arc::new(TextChunker::new()?);
    let producer = BusProducer::new(&settings.bus)?;

    let _health = spawn_health_tickler();
    let _metrics_srv = spawn_metrics_server(metrics.clone(), 8001);

    let worker = EnrichmentWorker::new(
        oplog,
        index,
        gateway,
        chunker,
        producer,
        settings.bus.result_topic.clone(),
        settings.ai.summary_model.clone(),
        metrics,
        settings.relational.claim_batch_size,
        Duration::from_secs(settings.relational.poll_interval_secs),
    );

    tokio::select! {
        result = worker.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
    }

    info!("oplog worker stopped");
    Ok(())
}
