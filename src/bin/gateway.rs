//! HTTP gateway: ingestion intake, hybrid search, health, metrics.

use mediaforge::api::{self, AppState};
use mediaforge::lifecycle::spawn_health_tickler;
use mediaforge::{
    init_tracing, AiGateway, BusProducer, HttpAiGateway, IndexManager, Metrics, RateLimiter,
    SearchExecutor, Settings,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let settings = Arc::new(Settings::from_env());
    let metrics = Arc::new(Metrics::new()?);

    let producer = BusProducer::new(&settings.bus)?;
    let index = Arc::new(IndexManager::new(&settings.doc_store)?);
    let gateway: Arc<dyn AiGateway> = Arc::new(HttpAiGateway::new(settings.ai.clone())?);
    let executor = Arc::new(SearchExecutor::new(index, gateway, metrics.clone()));
    let limiter = RateLimiter::connect(&settings.cache.redis_url).await?;

    let state = AppState {
        settings: settings.clone(),
        producer,
        executor,
        limiter,
        metrics,
    };

    let _health = spawn_health_tickler();

    let listener = tokio::net::TcpListener::bind(&settings.api.bind_addr).await?;
    info!("gateway listening on {}", settings.api.bind_addr);
    axum::serve(
        listener,
        api::router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
