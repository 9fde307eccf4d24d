//! Analysis queue endpoints.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use bidwise_core::{
    AiAnalysisStatus, AnalysisResult, AnalysisType, EnqueueRequest, QueueItem, QueueStats,
};
use bidwise_jobs::ProcessSummary;

use crate::error::ApiError;
use crate::AppState;

/// Body for `POST /api/files/:id/analysis`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueBody {
    #[serde(default)]
    pub analysis_type: AnalysisType,
    pub priority: Option<i32>,
    pub max_attempts: Option<i32>,
}

/// A file's analysis state plus its queue history.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAnalysisResponse {
    pub file_id: Uuid,
    pub ai_analysis_status: Option<AiAnalysisStatus>,
    pub ai_analysis: Option<AnalysisResult>,
    pub ai_analysis_updated_at: Option<DateTime<Utc>>,
    pub queue: Vec<QueueItem>,
}

/// Run one batch. Intended as a cron target.
pub async fn process_queue(
    State(state): State<AppState>,
) -> Result<Json<ProcessSummary>, ApiError> {
    let summary = state.processor.process_queue().await?;
    Ok(Json(summary))
}

/// Queue a file for analysis.
pub async fn enqueue_analysis(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    // An empty body queues with defaults.
    let body: EnqueueBody = if body.iter().all(u8::is_ascii_whitespace) {
        EnqueueBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))?
    };
    if body.max_attempts.is_some_and(|n| n < 1) {
        return Err(ApiError::BadRequest("maxAttempts must be at least 1".into()));
    }

    let mut req = EnqueueRequest::new(file_id, body.analysis_type);
    if let Some(priority) = body.priority {
        req = req.with_priority(priority);
    }
    if let Some(max_attempts) = body.max_attempts {
        req = req.with_max_attempts(max_attempts);
    }

    let item = state.processor.enqueue(req).await?;
    info!(
        subsystem = "api",
        queue_item_id = %item.id,
        file_id = %file_id,
        "Analysis requested"
    );
    Ok((StatusCode::CREATED, Json(item)))
}

/// Current analysis state of a file.
pub async fn get_file_analysis(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> Result<Json<FileAnalysisResponse>, ApiError> {
    let file = state
        .files
        .get(file_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("File record not found: {}", file_id)))?;
    let queue = state.queue.list_for_file(file_id).await?;

    Ok(Json(FileAnalysisResponse {
        file_id,
        ai_analysis_status: file.ai_analysis_status,
        ai_analysis: file.ai_analysis,
        ai_analysis_updated_at: file.ai_analysis_updated_at,
        queue,
    }))
}

pub async fn queue_stats(State(state): State<AppState>) -> Result<Json<QueueStats>, ApiError> {
    Ok(Json(state.processor.stats().await?))
}
