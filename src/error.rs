//! Error handling for the platform

use thiserror::Error;

/// Result type alias used throughout the library
pub type Result<T> = std::result::Result<T, PlatformError>;

/// Main error type for the platform
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("AI gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Highlight pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bus error: {0}")]
    Bus(#[from] rdkafka::error::KafkaError),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Search backend error: {0}")]
    Search(#[from] elasticsearch::Error),

    #[error("Blob store error: {0}")]
    Blob(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

/// Errors from the outbound AI gateway client
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Upstream rate limited")]
    RateLimited,

    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout: operation took too long")]
    Timeout,
}

/// Errors from the document/search index
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index not ready: {0}")]
    NotReady(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
}

/// Errors from the highlight pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Lock already held for video {0}")]
    LockHeld(String),

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Signal '{signal}' failed: {reason}")]
    Signal { signal: String, reason: String },

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("No clips could be extracted")]
    NothingExtracted,

    #[error("Job timed out after {0}s")]
    Timeout(u64),
}

impl PlatformError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlatformError::Gateway(GatewayError::RateLimited)
                | PlatformError::Gateway(GatewayError::Timeout)
                | PlatformError::Gateway(GatewayError::Unavailable(_))
                | PlatformError::Bus(_)
                | PlatformError::Cache(_)
                | PlatformError::Database(_)
                | PlatformError::Search(_)
                | PlatformError::Http(_)
        )
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            PlatformError::Gateway(_) => "gateway",
            PlatformError::Index(_) => "index",
            PlatformError::Pipeline(_) => "pipeline",
            PlatformError::Validation(_) => "validation",
            PlatformError::Config(_) => "config",
            PlatformError::Bus(_) => "bus",
            PlatformError::Cache(_) => "cache",
            PlatformError::Database(_) => "database",
            PlatformError::Search(_) => "search",
            PlatformError::Blob(_) => "blob",
            PlatformError::Http(_) => "http",
            PlatformError::Serialization(_) => "serialization",
            PlatformError::Io(_) => "io",
            PlatformError::Generic(_) => "generic",
        }
    }
}
