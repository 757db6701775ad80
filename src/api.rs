//! HTTP gateway
//!
//! Endpoints:
//! - `POST /ingest` - validate a submission and hand it to the bus
//! - `POST /search` - hybrid search
//! - `GET /health` - liveness
//! - `GET /metrics` - Prometheus text format
//!
//! Every endpoint sits behind the shared API-key guard (a missing secret
//! disables the check) and the ingest/search families behind the Redis
//! token bucket.

use crate::bus::BusProducer;
use crate::config::Settings;
use crate::error::{GatewayError, PlatformError};
use crate::ingest::Submission;
use crate::limiter::RateLimiter;
use crate::metrics::Metrics;
use crate::search::{SearchExecutor, SearchRequest, SearchResult};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::{OpenApi, ToSchema};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub producer: BusProducer,
    pub executor: Arc<SearchExecutor>,
    pub limiter: RateLimiter,
    pub metrics: Arc<Metrics>,
}

/// Response for accepted submissions
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IngestResponse {
    /// Always "queued" - processing is asynchronous
    pub status: String,
    pub trace_id: String,
    pub topic: String,
}

/// Response wrapper for search results
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
}

/// Error response body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(OpenApi)]
#[openapi(components(schemas(
    Submission,
    SearchRequest,
    IngestResponse,
    SearchResponse,
    HealthResponse,
    ErrorResponse
)))]
pub struct ApiDoc;

/// Error type carrying an HTTP mapping
pub struct ApiError(PlatformError);

impl From<PlatformError> for ApiError {
    fn from(err: PlatformError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            PlatformError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            PlatformError::Gateway(GatewayError::RateLimited) => (
                StatusCode::TOO_MANY_REQUESTS,
                "upstream AI provider rate limited".to_string(),
            ),
            PlatformError::Gateway(GatewayError::Unavailable(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "AI provider unavailable".to_string(),
            ),
            other => {
                warn!("internal error: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

fn too_many_requests() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, "60")],
        Json(ErrorResponse {
            error: "too many requests".to_string(),
        }),
    )
        .into_response()
}

/// API-key guard. A missing configured secret disables the check.
async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let expected = &state.settings.api.service_api_key;
    if expected.is_empty() {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get("X-API-KEY")
        .and_then(|v| v.to_str().ok());

    if provided == Some(expected.as_str()) {
        next.run(request).await
    } else {
        (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse {
                error: "could not validate credentials".to_string(),
            }),
        )
            .into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ingest", post(ingest))
        .route("/search", post(search))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Fire-and-forget ingestion: validate, pick the tenant topic, publish.
async fn ingest(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(submission): Json<Submission>,
) -> Result<Response, ApiError> {
    if !state
        .limiter
        .allow("ingest", &addr.ip().to_string(), state.settings.rate_limits.ingest)
        .await
    {
        state.metrics.rate_limited.inc();
        return Ok(too_many_requests());
    }

    submission.validate()?;

    let topic = state.settings.ingest_topic_for(&submission.source_app);
    info!(
        "ingesting {} into topic {}",
        submission.entity_id, topic
    );
    state
        .producer
        .publish(topic, &submission.entity_id, &submission)
        .await?;

    Ok(Json(IngestResponse {
        status: "queued".to_string(),
        trace_id: submission.trace_id.clone(),
        topic: topic.to_string(),
    })
    .into_response())
}

async fn search(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<SearchRequest>,
) -> Result<Response, ApiError> {
    if !state
        .limiter
        .allow("search", &addr.ip().to_string(), state.settings.rate_limits.search)
        .await
    {
        state.metrics.rate_limited.inc();
        return Ok(too_many_requests());
    }

    let results = state.executor.search(&request).await?;
    Ok(Json(SearchResponse { results }).into_response())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "gateway".to_string(),
    })
}

async fn metrics(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}
