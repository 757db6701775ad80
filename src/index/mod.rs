//! Document store manager (lexical + vector index)
//!
//! Owns the Elasticsearch client: index bootstrap with the canonical
//! mapping, pass-1 lexical upserts, pass-2 enrichment updates and raw
//! search execution. Query composition lives in [`query`], the mapping in
//! [`schema`].

pub mod query;
pub mod schema;

use crate::config::DocStoreSettings;
use crate::error::{IndexError, PlatformError};
use chrono::{DateTime, Utc};
use elasticsearch::auth::Credentials;
use elasticsearch::cert::CertificateValidation;
use elasticsearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use elasticsearch::http::Url;
use elasticsearch::indices::{IndicesCreateParts, IndicesExistsParts};
use elasticsearch::{Elasticsearch, IndexParts, SearchParts, UpdateParts};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

/// Document lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocStatus {
    ProcessingVectors,
    Ready,
}

/// Fields written at pass 1 (lexical availability)
#[derive(Debug, Clone, Serialize)]
pub struct LexicalDocument {
    pub source_app: String,
    pub entity_id: String,
    pub title: String,
    pub content: String,
    pub metadata: Value,
    pub status: DocStatus,
    pub published_at: DateTime<Utc>,
}

/// One embedded chunk as stored in the nested mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkVector {
    pub text_chunk: String,
    pub vector: Vec<f32>,
}

/// Structured fields written at pass 2
#[derive(Debug, Clone, Default)]
pub struct EnrichmentFields {
    pub summary: Option<String>,
    pub key_concepts: Vec<String>,
    pub entities: Vec<String>,
    pub language: Option<String>,
}

pub struct IndexManager {
    client: Elasticsearch,
    default_index: String,
    dims: usize,
}

impl IndexManager {
    pub fn new(settings: &DocStoreSettings) -> crate::Result<Self> {
        let url = Url::parse(&settings.host)
            .map_err(|e| PlatformError::Config(format!("invalid doc store URL: {}", e)))?;
        let pool = SingleNodeConnectionPool::new(url);
        let mut builder = TransportBuilder::new(pool);

        if let (Some(user), Some(password)) = (&settings.user, &settings.password) {
            builder = builder.auth(Credentials::Basic(user.clone(), password.clone()));
        }
        if settings.host.starts_with("https://") {
            builder = builder.cert_validation(CertificateValidation::None);
        }

        let transport = builder
            .build()
            .map_err(|e| PlatformError::Config(format!("doc store transport: {}", e)))?;

        Ok(Self {
            client: Elasticsearch::new(transport),
            default_index: settings.index_name.clone(),
            dims: settings.embedding_dims,
        })
    }

    pub fn default_index(&self) -> &str {
        &self.default_index
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    fn resolve<'a>(&'a self, index_name: Option<&'a str>) -> &'a str {
        index_name.unwrap_or(&self.default_index)
    }

    /// Create the index with the canonical mapping if it does not exist.
    pub async fn ensure_index(&self, index_name: Option<&str>) -> crate::Result<()> {
        let index = self.resolve(index_name);
        let exists = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[index]))
            .send()
            .await?;

        if exists.status_code().is_success() {
            return Ok(());
        }

        self.client
            .indices()
            .create(IndicesCreateParts::Index(index))
            .body(json!({ "mappings": schema::full_mapping(self.dims) }))
            .send()
            .await?
            .error_for_status_code()?;

        info!("initialized index '{}'", index);
        Ok(())
    }

    /// Pass-1 upsert keyed by entity id; idempotent under replay.
    pub async fn upsert_document(
        &self,
        index_name: Option<&str>,
        doc: &LexicalDocument,
    ) -> crate::Result<()> {
        self.ensure_index(index_name).await?;
        let index = self.resolve(index_name);

        self.client
            .index(IndexParts::IndexId(index, &doc.entity_id))
            .body(doc)
            .send()
            .await?
            .error_for_status_code()?;
        Ok(())
    }

    /// Pass-2 update: chunk vectors plus structured fields, and the
    /// transition to `ready`.
    pub async fn update_enrichment(
        &self,
        index_name: Option<&str>,
        entity_id: &str,
        chunks: &[ChunkVector],
        fields: &EnrichmentFields,
    ) -> crate::Result<()> {
        for chunk in chunks {
            if chunk.vector.len() != self.dims {
                return Err(PlatformError::Index(IndexError::InvalidDimension {
                    expected: self.dims,
                    actual: chunk.vector.len(),
                }));
            }
        }

        let mut doc = json!({
            "chunks": chunks,
            "status": DocStatus::Ready,
        });
        if let Some(summary) = &fields.summary {
            doc["summary"] = json!(summary);
        }
        if !fields.key_concepts.is_empty() {
            doc["key_concepts"] = json!(fields.key_concepts);
        }
        if !fields.entities.is_empty() {
            doc["entities"] = json!(fields.entities);
        }
        if let Some(language) = &fields.language {
            doc["language"] = json!(language);
        }

        let index = self.resolve(index_name);
        self.client
            .update(UpdateParts::IndexId(index, entity_id))
            .body(json!({ "doc": doc }))
            .send()
            .await?
            .error_for_status_code()?;

        info!(
            "enriched '{}' in '{}' ({} chunks, summary={})",
            entity_id,
            index,
            chunks.len(),
            fields.summary.is_some()
        );
        Ok(())
    }

    /// Execute a composed search body and return the raw hits.
    pub async fn execute_search(
        &self,
        index_name: Option<&str>,
        body: Value,
    ) -> crate::Result<Vec<Value>> {
        let index = self.resolve(index_name);
        let response = self
            .client
            .search(SearchParts::Index(&[index]))
            .body(body)
            .send()
            .await?
            .error_for_status_code()?;

        let parsed: Value = response.json().await?;
        let hits = parsed["hits"]["hits"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        for (i, hit) in hits.iter().take(3).enumerate() {
            info!(
                "audit hit {} ({}): score={}, signals={}",
                i + 1,
                hit["_source"]["entity_id"].as_str().unwrap_or("?"),
                hit["_score"],
                hit["matched_queries"]
            );
        }
        info!(
            "search on '{}' returned {} hits (max score {})",
            index,
            hits.len(),
            parsed["hits"]["max_score"]
        );

        Ok(hits)
    }
}
