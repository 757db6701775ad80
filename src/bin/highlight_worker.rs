//! Highlight worker: one video at a time, governed and lock-protected.

use mediaforge::lifecycle::{spawn_health_tickler, spawn_metrics_server};
use mediaforge::{
    create_consumer, init_tracing, AiGateway, BlobStore, BusProducer, ConsumerProfile,
    HighlightConsumer, HttpAiGateway, JobRunner, Metrics, Settings, VideoLock,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("starting highlight worker");

    let settings = Arc::new(Settings::from_env());
    let metrics = Arc::new(Metrics::new()?);

    let consumer = create_consumer(
        &settings.bus,
        &settings.bus.group_id,
        &[settings.bus.highlight_request_topic.as_str()],
        ConsumerProfile::LongJob,
    )?;
    let producer = BusProducer::new(&settings.bus)?;

    let lock = VideoLock::connect(
        &settings.cache.redis_url,
        &settings.cache.lock_key,
        settings.cache.lock_ttl_secs,
    )
    .await?;

    let storage = Arc::new(BlobStore::new(&settings.blob));
    let gateway: Arc<dyn AiGateway> = Arc::new(HttpAiGateway::new(settings.ai.clone())?);

    let runner = JobRunner::new(
        storage,
        gateway,
        metrics.clone(),
        settings.blob.volume_path.clone(),
        settings.blob.bucket.clone(),
    );

    let _health = spawn_health_tickler();
    let _metrics_srv = spawn_metrics_server(metrics.clone(), 8002);

    let worker = HighlightConsumer::new(
        consumer,
        producer,
        lock,
        runner,
        settings.clone(),
        metrics,
    );

    tokio::select! {
        result = worker.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
    }

    info!("highlight worker stopped");
    Ok(())
}
