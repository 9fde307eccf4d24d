//! One analysis attempt for a claimed queue item.
//!
//! [`AnalysisPipeline::run`] resolves the file, downloads it, prompts the
//! analysis service, extracts the result and persists it. Failures before
//! persistence go through the retry controller; persistence failures are
//! retried in place without repeating the analysis.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use bidwise_core::{
    detect_mime_type, AnalysisBackend, AnalysisDocument, AnalysisResult, FileRecord,
    FileRecordRepository, ObjectStore, QueueItem, QueueRepository, QueueStatus,
};

use crate::extraction::{extract, ResultMetadata};
use crate::prompts::select_prompt;
use crate::retry::{apply_failure, with_timeout, RetryDecision};

/// Why an analysis attempt failed.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The item's file record does not exist.
    #[error("file record not found: {0}")]
    NotFound(uuid::Uuid),
    /// Reading the file record failed.
    #[error("metadata lookup failed: {0}")]
    Metadata(String),
    /// The object store could not deliver the file.
    #[error("download failed: {0}")]
    Download(String),
    /// The analysis service errored or timed out.
    #[error("analysis service failed: {0}")]
    Service(String),
    /// The analysis service returned no text.
    #[error("analysis service returned an empty response")]
    EmptyResult,
    /// The result could not be saved after all write retries.
    #[error("failed to persist result: {0}")]
    Persist(String),
}

impl PipelineError {
    /// Short stable label for logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::NotFound(_) => "not_found",
            PipelineError::Metadata(_) => "metadata",
            PipelineError::Download(_) => "download",
            PipelineError::Service(_) => "service",
            PipelineError::EmptyResult => "empty_result",
            PipelineError::Persist(_) => "persist",
        }
    }
}

/// Time limits and persistence retry policy for one attempt.
#[derive(Debug, Clone)]
pub struct PipelineLimits {
    pub download_timeout: Duration,
    pub analysis_timeout: Duration,
    pub store_timeout: Duration,
    pub persist_retries: u32,
    pub persist_backoff: Duration,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        use bidwise_core::defaults;
        Self {
            download_timeout: Duration::from_secs(defaults::DOWNLOAD_TIMEOUT_SECS),
            analysis_timeout: Duration::from_secs(defaults::ANALYSIS_TIMEOUT_SECS),
            store_timeout: Duration::from_secs(defaults::STORE_TIMEOUT_SECS),
            persist_retries: defaults::PERSIST_RETRIES,
            persist_backoff: Duration::from_millis(defaults::PERSIST_BACKOFF_MS),
        }
    }
}

impl PipelineLimits {
    /// Longest one attempt can hold a claim before giving up: lookup,
    /// download, analysis, then every persist try (three store calls each)
    /// with its backoff.
    pub fn worst_case_attempt(&self) -> Duration {
        let tries = self.persist_retries.max(1);
        let persist = self.store_timeout.saturating_mul(tries.saturating_mul(3));
        let backoff = (1..tries).fold(Duration::ZERO, |acc, attempt| {
            let exp = self
                .persist_backoff
                .saturating_mul(1u32 << (attempt - 1).min(10));
            acc.saturating_add(exp.saturating_add(exp / 2))
        });
        self.store_timeout
            .saturating_add(self.download_timeout)
            .saturating_add(self.analysis_timeout)
            .saturating_add(persist)
            .saturating_add(backoff)
    }
}

/// How an attempt ended, from the queue's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Result stored, item `completed`.
    Completed(AnalysisResult),
    /// Attempt failed, item back to `queued`.
    Requeued(String),
    /// Attempt failed with no attempts left, item `failed`.
    Failed(String),
    /// Analysis succeeded but could not be saved; item left `processing`.
    PersistFailed(String),
    /// The item left `processing` under us; nothing was written.
    LeaseLost,
}

/// Everything one attempt needs. Cheap to clone into spawned tasks.
#[derive(Clone)]
pub struct AnalysisPipeline {
    pub(crate) queue: Arc<dyn QueueRepository>,
    pub(crate) files: Arc<dyn FileRecordRepository>,
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) backend: Arc<dyn AnalysisBackend>,
    pub(crate) limits: PipelineLimits,
}

impl AnalysisPipeline {
    pub fn new(
        queue: Arc<dyn QueueRepository>,
        files: Arc<dyn FileRecordRepository>,
        store: Arc<dyn ObjectStore>,
        backend: Arc<dyn AnalysisBackend>,
        limits: PipelineLimits,
    ) -> Self {
        Self {
            queue,
            files,
            store,
            backend,
            limits,
        }
    }

    /// Run one attempt for an item this worker has claimed.
    pub async fn run(&self, item: QueueItem) -> JobOutcome {
        let start = Instant::now();
        debug!(
            subsystem = "jobs",
            component = "pipeline",
            queue_item_id = %item.id,
            file_id = %item.file_id,
            analysis_type = %item.analysis_type,
            attempt = item.attempts,
            max_attempts = item.max_attempts,
            "Starting analysis attempt"
        );

        let (file, result) = match self.analyze(&item).await {
            Ok(analyzed) => analyzed,
            Err(e) => return self.handle_failure(&item, e).await,
        };

        match self.persist(&item, &file, &result).await {
            Ok(true) => {
                info!(
                    subsystem = "jobs",
                    component = "pipeline",
                    queue_item_id = %item.id,
                    file_id = %item.file_id,
                    attempt = item.attempts,
                    confidence = result.confidence_score,
                    fallback = result.raw_analysis.is_some(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Analysis completed"
                );
                JobOutcome::Completed(result)
            }
            Ok(false) => {
                warn!(
                    subsystem = "jobs",
                    component = "pipeline",
                    queue_item_id = %item.id,
                    "Item left processing before completion could be recorded"
                );
                JobOutcome::LeaseLost
            }
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "pipeline",
                    queue_item_id = %item.id,
                    file_id = %item.file_id,
                    error = %e,
                    "Analysis result could not be persisted; item left processing"
                );
                JobOutcome::PersistFailed(e.to_string())
            }
        }
    }

    /// Steps up to and including extraction.
    async fn analyze(
        &self,
        item: &QueueItem,
    ) -> Result<(FileRecord, AnalysisResult), PipelineError> {
        let file = with_timeout(
            self.limits.store_timeout,
            "file lookup",
            self.files.get(item.file_id),
        )
        .await
        .map_err(|e| PipelineError::Metadata(e.to_string()))?
        .ok_or(PipelineError::NotFound(item.file_id))?;

        let bytes = match tokio::time::timeout(
            self.limits.download_timeout,
            self.store.download(&file.file_path),
        )
        .await
        {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => return Err(PipelineError::Download(e.to_string())),
            Err(_) => {
                return Err(PipelineError::Download(format!(
                    "timed out after {}s",
                    self.limits.download_timeout.as_secs()
                )))
            }
        };

        let mime_type = detect_mime_type(&file.file_type, &file.file_path, &bytes);
        let document = AnalysisDocument::new(mime_type, bytes);
        let prompt = select_prompt(
            item.analysis_type,
            file.checklist_item_id.as_deref(),
            &file.file_type,
        );

        let raw = match tokio::time::timeout(
            self.limits.analysis_timeout,
            self.backend.generate(&prompt.system, &prompt.user, &document),
        )
        .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Err(PipelineError::Service(e.to_string())),
            Err(_) => {
                return Err(PipelineError::Service(format!(
                    "timed out after {}s",
                    self.limits.analysis_timeout.as_secs()
                )))
            }
        };

        let meta = ResultMetadata::new(
            file.file_type.clone(),
            file.checklist_item_id.clone(),
            item.analysis_type,
        );
        let result = extract(&raw, &meta).map_err(|_| PipelineError::EmptyResult)?;
        Ok((file, result))
    }

    async fn handle_failure(&self, item: &QueueItem, err: PipelineError) -> JobOutcome {
        let message = err.to_string();
        let applied = apply_failure(
            self.queue.as_ref(),
            self.files.as_ref(),
            item,
            &message,
            self.limits.store_timeout,
        )
        .await;

        match applied {
            Ok(Some(RetryDecision::Requeue)) => {
                warn!(
                    subsystem = "jobs",
                    component = "pipeline",
                    queue_item_id = %item.id,
                    file_id = %item.file_id,
                    kind = err.kind(),
                    attempt = item.attempts,
                    max_attempts = item.max_attempts,
                    error = %message,
                    "Analysis attempt failed, requeued"
                );
                JobOutcome::Requeued(message)
            }
            Ok(Some(RetryDecision::Fail)) => {
                warn!(
                    subsystem = "jobs",
                    component = "pipeline",
                    queue_item_id = %item.id,
                    file_id = %item.file_id,
                    kind = err.kind(),
                    attempts = item.attempts,
                    error = %message,
                    "Analysis failed, attempts exhausted"
                );
                JobOutcome::Failed(message)
            }
            Ok(None) => JobOutcome::LeaseLost,
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "pipeline",
                    queue_item_id = %item.id,
                    error = %e,
                    "Failed to record attempt failure; item left processing"
                );
                JobOutcome::PersistFailed(e.to_string())
            }
        }
    }

    /// Confirm the claim, write the result to the file record, then complete
    /// the queue item.
    ///
    /// Each try is idempotent, so the sequence is retried as a unit. Returns
    /// `Ok(false)` when the item is no longer ours; the file record is left
    /// untouched then.
    async fn persist(
        &self,
        item: &QueueItem,
        file: &FileRecord,
        result: &AnalysisResult,
    ) -> Result<bool, PipelineError> {
        let attempts = self.limits.persist_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.persist_once(item, file, result).await {
                Ok(completed) => return Ok(completed),
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < attempts {
                        let delay = self.backoff(attempt);
                        warn!(
                            subsystem = "jobs",
                            component = "pipeline",
                            queue_item_id = %item.id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Persist failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(PipelineError::Persist(last_error))
    }

    async fn persist_once(
        &self,
        item: &QueueItem,
        file: &FileRecord,
        result: &AnalysisResult,
    ) -> bidwise_core::Result<bool> {
        let limit = self.limits.store_timeout;
        let current = with_timeout(limit, "reload item", self.queue.get(item.id)).await?;
        match current {
            Some(c) if c.status == QueueStatus::Processing && c.attempts == item.attempts => {}
            // An earlier try completed the row before its reply was lost.
            Some(c) if completed_with(&c, result) => return Ok(true),
            _ => return Ok(false),
        }

        with_timeout(limit, "store analysis", self.files.store_analysis(file.id, result)).await?;
        with_timeout(limit, "complete item", self.queue.complete(item.id, result)).await
    }

    /// Exponential backoff with up to 50% jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.limits.persist_backoff.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << (attempt - 1).min(10));
        let jitter = if exp > 1 {
            rand::thread_rng().gen_range(0..=exp / 2)
        } else {
            0
        };
        Duration::from_millis(exp + jitter)
    }
}

fn completed_with(item: &QueueItem, result: &AnalysisResult) -> bool {
    item.status == QueueStatus::Completed
        && item
            .result_data
            .as_ref()
            .is_some_and(|r| r.analysis_timestamp == result.analysis_timestamp)
}
