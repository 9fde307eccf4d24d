//! Analysis queue repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use bidwise_core::{
    new_v7, AnalysisResult, AnalysisType, EnqueueRequest, Error, QueueItem, QueueRepository,
    QueueStats, QueueStatus, Result,
};

const QUEUE_COLUMNS: &str = "id, file_id, analysis_type, status, priority, attempts, \
     max_attempts, result_data, error_message, created_at, started_at, processed_at";

/// PostgreSQL implementation of QueueRepository.
pub struct PgQueueRepository {
    pool: Pool<Postgres>,
}

impl PgQueueRepository {
    /// Create a new PgQueueRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Convert string from database to QueueStatus.
    fn str_to_status(s: &str) -> Result<QueueStatus> {
        s.parse().map_err(Error::Internal)
    }

    /// Parse a queue row into a QueueItem.
    fn parse_row(row: sqlx::postgres::PgRow) -> Result<QueueItem> {
        let status: String = row.try_get("status").map_err(Error::Database)?;
        let analysis_type: String = row.try_get("analysis_type").map_err(Error::Database)?;
        let result_data: Option<JsonValue> =
            row.try_get("result_data").map_err(Error::Database)?;
        let result_data = result_data
            .map(serde_json::from_value::<AnalysisResult>)
            .transpose()?;

        Ok(QueueItem {
            id: row.try_get("id").map_err(Error::Database)?,
            file_id: row.try_get("file_id").map_err(Error::Database)?,
            analysis_type: AnalysisType::from_tag(&analysis_type),
            status: Self::str_to_status(&status)?,
            priority: row.try_get("priority").map_err(Error::Database)?,
            attempts: row.try_get("attempts").map_err(Error::Database)?,
            max_attempts: row.try_get("max_attempts").map_err(Error::Database)?,
            result_data,
            error_message: row.try_get("error_message").map_err(Error::Database)?,
            created_at: row.try_get("created_at").map_err(Error::Database)?,
            started_at: row.try_get("started_at").map_err(Error::Database)?,
            processed_at: row.try_get("processed_at").map_err(Error::Database)?,
        })
    }

    fn parse_rows(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<QueueItem>> {
        rows.into_iter().map(Self::parse_row).collect()
    }
}

#[async_trait]
impl QueueRepository for PgQueueRepository {
    async fn enqueue_deduplicated(&self, req: EnqueueRequest) -> Result<Option<QueueItem>> {
        let id = new_v7();
        let now = Utc::now();

        // INSERT ... WHERE NOT EXISTS keeps the common duplicate case off the
        // unique index; the index still settles concurrent inserts.
        let query = format!(
            "INSERT INTO analysis_queue
                 (id, file_id, analysis_type, status, priority, attempts, max_attempts, created_at)
             SELECT $1, $2, $3, 'queued', $4, 0, $5, $6
             WHERE NOT EXISTS (
                 SELECT 1 FROM analysis_queue
                 WHERE file_id = $2 AND status IN ('queued', 'processing')
             )
             RETURNING {QUEUE_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(id)
            .bind(req.file_id)
            .bind(req.analysis_type.as_str())
            .bind(req.effective_priority())
            .bind(req.effective_max_attempts())
            .bind(now)
            .fetch_optional(&self.pool)
            .await;

        match row {
            Ok(row) => row.map(Self::parse_row).transpose(),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(None),
            Err(sqlx::Error::Database(db_err)) if db_err.is_foreign_key_violation() => {
                Err(Error::FileNotFound(req.file_id))
            }
            Err(e) => Err(Error::Database(e)),
        }
    }

    async fn dequeue(&self, limit: usize) -> Result<Vec<QueueItem>> {
        let query = format!(
            "SELECT {QUEUE_COLUMNS} FROM analysis_queue
             WHERE status = 'queued'
             ORDER BY priority DESC, created_at ASC, id ASC
             LIMIT $1"
        );

        let rows = sqlx::query(&query)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Self::parse_rows(rows)
    }

    async fn claim(&self, id: Uuid) -> Result<Option<QueueItem>> {
        let query = format!(
            "UPDATE analysis_queue
             SET status = 'processing', attempts = attempts + 1, started_at = $2
             WHERE id = $1 AND status = 'queued' AND attempts < max_attempts
             RETURNING {QUEUE_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(id)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_row).transpose()
    }

    async fn complete(&self, id: Uuid, result: &AnalysisResult) -> Result<bool> {
        let result_json = serde_json::to_value(result)?;

        let updated = sqlx::query(
            "UPDATE analysis_queue
             SET status = 'completed', result_data = $2, processed_at = $3
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .bind(result_json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(updated.rows_affected() > 0)
    }

    async fn requeue(&self, id: Uuid, error: &str) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE analysis_queue
             SET status = 'queued', error_message = $2, started_at = NULL
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(updated.rows_affected() > 0)
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE analysis_queue
             SET status = 'failed', error_message = $2
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(updated.rows_affected() > 0)
    }

    async fn get(&self, id: Uuid) -> Result<Option<QueueItem>> {
        let query = format!("SELECT {QUEUE_COLUMNS} FROM analysis_queue WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_row).transpose()
    }

    async fn list_for_file(&self, file_id: Uuid) -> Result<Vec<QueueItem>> {
        let query = format!(
            "SELECT {QUEUE_COLUMNS} FROM analysis_queue
             WHERE file_id = $1
             ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query(&query)
            .bind(file_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Self::parse_rows(rows)
    }

    async fn list_stale(&self, started_before: DateTime<Utc>) -> Result<Vec<QueueItem>> {
        let query = format!(
            "SELECT {QUEUE_COLUMNS} FROM analysis_queue
             WHERE status = 'processing' AND started_at < $1
             ORDER BY started_at ASC"
        );
        let rows = sqlx::query(&query)
            .bind(started_before)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Self::parse_rows(rows)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'queued') AS queued,
                COUNT(*) FILTER (WHERE status = 'processing') AS processing,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) AS total
             FROM analysis_queue",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(QueueStats {
            queued: row.get("queued"),
            processing: row.get("processing"),
            completed: row.get("completed"),
            failed: row.get("failed"),
            total: row.get("total"),
        })
    }

    async fn cleanup(&self, keep_count: i64) -> Result<i64> {
        let result = sqlx::query(
            "DELETE FROM analysis_queue
             WHERE status IN ('completed', 'failed')
               AND id NOT IN (
                   SELECT id FROM analysis_queue
                   WHERE status IN ('completed', 'failed')
                   ORDER BY COALESCE(processed_at, created_at) DESC
                   LIMIT $1
               )",
        )
        .bind(keep_count.max(0))
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() as i64)
    }
}
