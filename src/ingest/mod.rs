//! Content ingestion (pass 1)
//!
//! Submissions enter over HTTP, ride the bus, and land as lexical documents
//! plus an oplog row describing the asynchronous enrichment work.

pub mod chunker;
pub mod consumer;
pub mod sanitizer;

use crate::error::PlatformError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// How pass 2 should derive chunks from the sanitized text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingStrategy {
    Recursive,
    Semantic,
}

impl Default for ChunkingStrategy {
    fn default() -> Self {
        ChunkingStrategy::Recursive
    }
}

fn default_entity_type() -> String {
    "article".to_string()
}

fn default_operation() -> String {
    "index".to_string()
}

fn default_chunk_size() -> usize {
    500
}

fn default_chunk_overlap() -> usize {
    50
}

/// A content submission. Identity is `(index_name, entity_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Submission {
    pub trace_id: String,
    pub source_app: String,
    pub entity_id: String,
    #[serde(default = "default_entity_type")]
    pub entity_type: String,
    #[serde(default = "default_operation")]
    pub operation: String,
    pub timestamp: DateTime<Utc>,
    #[schema(value_type = Object)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub enrichments: Vec<String>,
    #[serde(default)]
    pub index_name: Option<String>,
    #[serde(default)]
    pub chunking_strategy: ChunkingStrategy,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Submission {
    /// Raw body text: `payload.text` preferred, `payload.content` second.
    pub fn body_text(&self) -> Option<&str> {
        self.payload
            .get("text")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .or_else(|| {
                self.payload
                    .get("content")
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
            })
    }

    pub fn title(&self) -> &str {
        self.payload
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn metadata(&self) -> Value {
        self.payload
            .get("metadata")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    /// Shape validation: an index operation must carry body text.
    pub fn validate(&self) -> crate::Result<()> {
        if self.operation == "index" && self.body_text().is_none() {
            return Err(PlatformError::Validation(format!(
                "submission {} has neither payload.text nor payload.content",
                self.entity_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn submission(payload: Value) -> Submission {
        serde_json::from_value(json!({
            "trace_id": "t1",
            "source_app": "blog",
            "entity_id": "p1",
            "entity_type": "blog_post",
            "operation": "index",
            "timestamp": "2025-01-01T00:00:00Z",
            "payload": payload,
            "enrichments": []
        }))
        .unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let s = submission(json!({"text": "hi"}));
        assert_eq!(s.chunk_size, 500);
        assert_eq!(s.chunk_overlap, 50);
        assert_eq!(s.chunking_strategy, ChunkingStrategy::Recursive);
    }

    #[test]
    fn test_body_text_prefers_text_over_content() {
        let s = submission(json!({"text": "a", "content": "b"}));
        assert_eq!(s.body_text(), Some("a"));

        let s = submission(json!({"content": "b"}));
        assert_eq!(s.body_text(), Some("b"));
    }

    #[test]
    fn test_index_without_body_rejected() {
        let s = submission(json!({"title": "no body"}));
        assert!(s.validate().is_err());

        let s = submission(json!({"content": "<p>x</p>"}));
        assert!(s.validate().is_ok());
    }
}
