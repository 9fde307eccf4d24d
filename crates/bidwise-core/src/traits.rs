//! Core traits for bidwise abstractions.
//!
//! These traits are the seams between the analysis pipeline and its external
//! collaborators: the metadata store, the object store, and the analysis
//! service. Each has a production implementation and an in-memory or mock one
//! for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// METADATA STORE
// =============================================================================

/// Repository for analysis queue operations.
///
/// Every state transition is an atomic single-row update. Transitions out of
/// `processing` are conditional on the row still being `processing` and
/// report whether they applied.
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Queue a new item unless the file already has an active one.
    ///
    /// Returns `None` when an item for the file is still `queued` or
    /// `processing`.
    async fn enqueue_deduplicated(&self, req: EnqueueRequest) -> Result<Option<QueueItem>>;

    /// Select up to `limit` queued items, `priority DESC, created_at ASC`.
    ///
    /// Read-only: nothing is claimed.
    async fn dequeue(&self, limit: usize) -> Result<Vec<QueueItem>>;

    /// Claim a queued item: `queued -> processing`, `attempts += 1`,
    /// `started_at = now`.
    ///
    /// Returns `None` when the item is no longer `queued` (another worker won).
    async fn claim(&self, id: Uuid) -> Result<Option<QueueItem>>;

    /// `processing -> completed` with the result and `processed_at = now`.
    async fn complete(&self, id: Uuid, result: &AnalysisResult) -> Result<bool>;

    /// `processing -> queued`, recording the error and clearing `started_at`.
    async fn requeue(&self, id: Uuid, error: &str) -> Result<bool>;

    /// `processing -> failed` (terminal), recording the error.
    async fn fail(&self, id: Uuid, error: &str) -> Result<bool>;

    /// Get item by ID.
    async fn get(&self, id: Uuid) -> Result<Option<QueueItem>>;

    /// All items for a file, newest first.
    async fn list_for_file(&self, file_id: Uuid) -> Result<Vec<QueueItem>>;

    /// Items in `processing` claimed before `started_before`.
    async fn list_stale(&self, started_before: DateTime<Utc>) -> Result<Vec<QueueItem>>;

    /// Counts by status.
    async fn stats(&self) -> Result<QueueStats>;

    /// Delete the oldest terminal items beyond `keep_count`. Returns rows deleted.
    async fn cleanup(&self, keep_count: i64) -> Result<i64>;
}

/// Repository for uploaded file records.
#[async_trait]
pub trait FileRecordRepository: Send + Sync {
    /// Register an uploaded file.
    async fn insert(&self, req: NewFileRecord) -> Result<FileRecord>;

    /// Get a file record by ID.
    async fn get(&self, id: Uuid) -> Result<Option<FileRecord>>;

    /// Project a queue status onto the file and bump `ai_analysis_updated_at`.
    async fn set_analysis_status(&self, id: Uuid, status: AiAnalysisStatus) -> Result<()>;

    /// Replace the file's analysis with `result` and mark it `completed`.
    async fn store_analysis(&self, id: Uuid, result: &AnalysisResult) -> Result<()>;
}

// =============================================================================
// OBJECT STORE
// =============================================================================

/// Blob storage for uploaded files.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read the object at `path`.
    async fn download(&self, path: &str) -> Result<Vec<u8>>;

    /// Write `data` to `path`, replacing any existing object.
    async fn upload(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Check whether an object exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool>;
}

// =============================================================================
// ANALYSIS SERVICE
// =============================================================================

/// Generative backend that reads a document and answers a prompt about it.
///
/// Implementations are stateless and safe to call concurrently.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Generate text for a system instruction, a user prompt, and a document.
    async fn generate(
        &self,
        system: &str,
        prompt: &str,
        document: &AnalysisDocument,
    ) -> Result<String>;

    /// Check if the backend is available and responding.
    async fn health_check(&self) -> Result<bool>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}
