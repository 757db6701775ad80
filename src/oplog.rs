//! Transactional enrichment oplog (outbox)
//!
//! Pass 1 records one row per submission; pass-2 workers claim rows with
//! `FOR UPDATE SKIP LOCKED` so concurrent workers always see disjoint
//! batches. Failures reschedule with exponential backoff until the retry
//! cap, after which a row parks as FAILED with its last error.

use crate::config::RelationalSettings;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::info;

/// What the claimed job must do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Embed,
    Enrich,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Embed => "embed",
            TaskType::Enrich => "enrich",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "enrich" => TaskType::Enrich,
            _ => TaskType::Embed,
        }
    }
}

/// Enrichment work description stored as the row payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OplogPayload {
    pub entity_type: String,
    #[serde(default)]
    pub chunks: Option<Vec<String>>,
    pub text: String,
    #[serde(default)]
    pub enrichments: Vec<String>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub chunking_strategy: crate::ingest::ChunkingStrategy,
}

/// One claimed oplog row
#[derive(Debug, Clone)]
pub struct OplogRow {
    pub id: i64,
    pub entity_id: String,
    pub task_type: TaskType,
    pub payload: OplogPayload,
    pub target_index: Option<String>,
    pub retry_count: i32,
}

pub struct OplogStore {
    pool: PgPool,
    max_retries: i32,
}

impl OplogStore {
    /// Connect and make sure the table and claim index exist.
    pub async fn connect(settings: &RelationalSettings) -> crate::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&settings.postgres_dsn)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ai_oplog (
                id BIGSERIAL PRIMARY KEY,
                entity_id TEXT NOT NULL,
                task_type TEXT NOT NULL,
                payload JSONB NOT NULL,
                target_index TEXT,
                status TEXT NOT NULL DEFAULT 'PENDING',
                retry_count INT NOT NULL DEFAULT 0,
                next_attempt_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                error_message TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_ai_oplog_claim ON ai_oplog (status, next_attempt_at)",
        )
        .execute(&pool)
        .await?;

        info!("oplog store connected");
        Ok(Self {
            pool,
            max_retries: settings.oplog_max_retries,
        })
    }

    /// Insert a PENDING row unless an equivalent non-completed row already
    /// exists for `(entity_id, target_index, task_type)`. Returns whether a
    /// row was inserted - replays of the same submission dedupe to false.
    pub async fn enqueue(
        &self,
        entity_id: &str,
        task_type: TaskType,
        payload: &OplogPayload,
        target_index: Option<&str>,
    ) -> crate::Result<bool> {
        let payload_json = serde_json::to_value(payload)?;

        let result = sqlx::query(
            r#"
            INSERT INTO ai_oplog (entity_id, task_type, payload, target_index)
            SELECT $1, $2, $3, $4
            WHERE NOT EXISTS (
                SELECT 1 FROM ai_oplog
                WHERE entity_id = $1
                  AND task_type = $2
                  AND target_index IS NOT DISTINCT FROM $4
                  AND status <> 'COMPLETED'
            )
            "#,
        )
        .bind(entity_id)
        .bind(task_type.as_str())
        .bind(&payload_json)
        .bind(target_index)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Claim up to `limit` due rows in one transaction. Rows move to
    /// PROCESSING; `SKIP LOCKED` keeps concurrent workers disjoint.
    pub async fn claim_batch(&self, limit: i64) -> crate::Result<Vec<OplogRow>> {
        let rows = sqlx::query(
            r#"
            UPDATE ai_oplog
            SET status = 'PROCESSING', updated_at = NOW()
            WHERE id IN (
                SELECT id FROM ai_oplog
                WHERE status IN ('PENDING', 'RETRY')
                  AND next_attempt_at <= NOW()
                ORDER BY next_attempt_at
                FOR UPDATE SKIP LOCKED
                LIMIT $1
            )
            RETURNING id, entity_id, task_type, payload, target_index, retry_count
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let payload_value: serde_json::Value = row.try_get("payload")?;
            let payload: OplogPayload = serde_json::from_value(payload_value)?;
            let task_type: String = row.try_get("task_type")?;
            claimed.push(OplogRow {
                id: row.try_get("id")?,
                entity_id: row.try_get("entity_id")?,
                task_type: TaskType::from_str(&task_type),
                payload,
                target_index: row.try_get("target_index")?,
                retry_count: row.try_get("retry_count")?,
            });
        }
        Ok(claimed)
    }

    pub async fn complete(&self, id: i64) -> crate::Result<()> {
        sqlx::query("UPDATE ai_oplog SET status = 'COMPLETED', updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Reschedule a failed row with exponential backoff, or park it FAILED
    /// once the retry cap is exhausted.
    pub async fn record_failure(&self, row: &OplogRow, error: &str) -> crate::Result<()> {
        let retry_count = row.retry_count + 1;

        if retry_count > self.max_retries {
            sqlx::query(
                r#"
                UPDATE ai_oplog
                SET status = 'FAILED', retry_count = $1, error_message = $2, updated_at = NOW()
                WHERE id = $3
                "#,
            )
            .bind(retry_count)
            .bind(error)
            .bind(row.id)
            .execute(&self.pool)
            .await?;
            return Ok(());
        }

        let delay_secs = backoff_seconds(retry_count);
        sqlx::query(
            r#"
            UPDATE ai_oplog
            SET status = 'RETRY',
                retry_count = $1,
                next_attempt_at = NOW() + make_interval(secs => $2),
                error_message = $3,
                updated_at = NOW()
            WHERE id = $4
            "#,
        )
        .bind(retry_count)
        .bind(delay_secs as f64)
        .bind(error)
        .bind(row.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

}

/// `2^n * 60` seconds, saturating well past any sane retry cap.
pub fn backoff_seconds(retry_count: i32) -> i64 {
    let exp = retry_count.clamp(0, 20) as u32;
    60_i64.saturating_mul(1_i64 << exp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff_seconds(1), 120);
        assert_eq!(backoff_seconds(2), 240);
        assert_eq!(backoff_seconds(3), 480);
        for n in 1..10 {
            assert_eq!(backoff_seconds(n + 1), backoff_seconds(n) * 2);
        }
    }

    #[test]
    fn test_backoff_saturates() {
        // A huge retry count must not overflow
        assert!(backoff_seconds(1000) > 0);
    }

    #[test]
    fn test_task_type_round_trip() {
        assert_eq!(TaskType::from_str("embed"), TaskType::Embed);
        assert_eq!(TaskType::from_str("enrich"), TaskType::Enrich);
        assert_eq!(TaskType::Enrich.as_str(), "enrich");
    }

    #[test]
    fn test_payload_serialization() {
        let payload = OplogPayload {
            entity_type: "blog_post".to_string(),
            chunks: Some(vec!["Hi there.".to_string()]),
            text: "Hi there.".to_string(),
            enrichments: vec![],
            chunk_size: 500,
            chunk_overlap: 50,
            chunking_strategy: crate::ingest::ChunkingStrategy::Recursive,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["chunking_strategy"], "recursive");
        let back: OplogPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back.chunks.unwrap().len(), 1);
    }
}
