//! File record repository.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use bidwise_core::{
    new_v7, AiAnalysisStatus, AnalysisResult, Error, FileRecord, FileRecordRepository,
    NewFileRecord, Result,
};

const FILE_COLUMNS: &str = "id, company_id, checklist_item_id, file_path, file_type, file_name, \
     ai_analysis, ai_analysis_status, ai_analysis_updated_at, created_at";

/// PostgreSQL implementation of FileRecordRepository.
pub struct PgFileRecordRepository {
    pool: Pool<Postgres>,
}

impl PgFileRecordRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: sqlx::postgres::PgRow) -> Result<FileRecord> {
        let ai_analysis: Option<JsonValue> =
            row.try_get("ai_analysis").map_err(Error::Database)?;
        let ai_analysis = ai_analysis
            .map(serde_json::from_value::<AnalysisResult>)
            .transpose()?;
        let status: Option<String> = row
            .try_get("ai_analysis_status")
            .map_err(Error::Database)?;
        let ai_analysis_status = status
            .map(|s| s.parse::<AiAnalysisStatus>().map_err(Error::Internal))
            .transpose()?;

        Ok(FileRecord {
            id: row.try_get("id").map_err(Error::Database)?,
            company_id: row.try_get("company_id").map_err(Error::Database)?,
            checklist_item_id: row.try_get("checklist_item_id").map_err(Error::Database)?,
            file_path: row.try_get("file_path").map_err(Error::Database)?,
            file_type: row.try_get("file_type").map_err(Error::Database)?,
            file_name: row.try_get("file_name").map_err(Error::Database)?,
            ai_analysis,
            ai_analysis_status,
            ai_analysis_updated_at: row
                .try_get("ai_analysis_updated_at")
                .map_err(Error::Database)?,
            created_at: row.try_get("created_at").map_err(Error::Database)?,
        })
    }
}

#[async_trait]
impl FileRecordRepository for PgFileRecordRepository {
    async fn insert(&self, req: NewFileRecord) -> Result<FileRecord> {
        if req.file_path.trim().is_empty() {
            return Err(Error::InvalidInput("file_path must not be empty".to_string()));
        }

        let query = format!(
            "INSERT INTO file_records
                 (id, company_id, checklist_item_id, file_path, file_type, file_name, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {FILE_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(new_v7())
            .bind(req.company_id)
            .bind(&req.checklist_item_id)
            .bind(&req.file_path)
            .bind(&req.file_type)
            .bind(&req.file_name)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        Self::parse_row(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<FileRecord>> {
        let query = format!("SELECT {FILE_COLUMNS} FROM file_records WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_row).transpose()
    }

    async fn set_analysis_status(&self, id: Uuid, status: AiAnalysisStatus) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE file_records
             SET ai_analysis_status = $2, ai_analysis_updated_at = $3
             WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if updated.rows_affected() == 0 {
            return Err(Error::FileNotFound(id));
        }
        Ok(())
    }

    async fn store_analysis(&self, id: Uuid, result: &AnalysisResult) -> Result<()> {
        let analysis = serde_json::to_value(result)?;

        let updated = sqlx::query(
            "UPDATE file_records
             SET ai_analysis = $2, ai_analysis_status = 'completed', ai_analysis_updated_at = $3
             WHERE id = $1",
        )
        .bind(id)
        .bind(analysis)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if updated.rows_affected() == 0 {
            return Err(Error::FileNotFound(id));
        }
        Ok(())
    }
}
