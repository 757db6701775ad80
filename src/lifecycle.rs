//! Shared worker lifecycle pieces

use crate::metrics::Metrics;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Background task touching a marker file for container health checks.
/// Dropped (and thereby aborted) with the returned handle on shutdown.
pub fn spawn_health_tickler() -> JoinHandle<()> {
    tokio::spawn(async {
        let marker = PathBuf::from("/tmp/healthy");
        loop {
            if let Err(e) = tokio::fs::write(&marker, b"").await {
                debug!("health marker write failed: {}", e);
            }
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    })
}

async fn render_metrics(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render(),
    )
}

async fn healthy() -> &'static str {
    "{\"status\":\"ok\"}"
}

/// Minimal scrape endpoint for headless workers (`/metrics` + `/health`).
pub fn spawn_metrics_server(metrics: Arc<Metrics>, port: u16) -> JoinHandle<()> {
    tokio::spawn(async move {
        let app = Router::new()
            .route("/metrics", get(render_metrics))
            .route("/health", get(healthy))
            .with_state(metrics);

        let addr = format!("0.0.0.0:{}", port);
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                info!("metrics server listening on {}", addr);
                if let Err(e) = axum::serve(listener, app).await {
                    error!("metrics server exited: {}", e);
                }
            }
            Err(e) => error!("failed to bind metrics server on {}: {}", addr, e),
        }
    })
}
