//! Retry controller: what happens to a claimed item after a failed attempt.

use std::time::Duration;

use tracing::{debug, warn};

use bidwise_core::{
    AiAnalysisStatus, Error, FileRecordRepository, QueueItem, QueueRepository, Result,
};

/// Where a failed item goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Attempts remain: back to `queued`.
    Requeue,
    /// Attempts exhausted: terminal `failed`.
    Fail,
}

impl RetryDecision {
    /// Decide from the item as claimed (`attempts` already incremented).
    pub fn for_item(item: &QueueItem) -> Self {
        if item.attempts < item.max_attempts {
            RetryDecision::Requeue
        } else {
            RetryDecision::Fail
        }
    }

    /// File status that mirrors the decision.
    pub fn file_status(&self) -> AiAnalysisStatus {
        match self {
            RetryDecision::Requeue => AiAnalysisStatus::Pending,
            RetryDecision::Fail => AiAnalysisStatus::Failed,
        }
    }
}

/// Apply the retry decision for a failed attempt.
///
/// Returns `Ok(None)` when the item had already left `processing` (another
/// worker or the stale sweep got there first); nothing is changed then.
/// A failure to project the status onto the file record is logged, not
/// returned: the queue row is the source of truth for retries.
pub async fn apply_failure(
    queue: &dyn QueueRepository,
    files: &dyn FileRecordRepository,
    item: &QueueItem,
    error: &str,
    store_timeout: Duration,
) -> Result<Option<RetryDecision>> {
    let decision = RetryDecision::for_item(item);

    let write = async {
        match decision {
            RetryDecision::Requeue => queue.requeue(item.id, error).await,
            RetryDecision::Fail => queue.fail(item.id, error).await,
        }
    };
    let applied = with_timeout(store_timeout, "queue retry update", write).await?;

    if !applied {
        debug!(
            subsystem = "jobs",
            component = "retry",
            queue_item_id = %item.id,
            "Item no longer processing, retry not applied"
        );
        return Ok(None);
    }

    let projection = files.set_analysis_status(item.file_id, decision.file_status());
    match with_timeout(store_timeout, "file status update", projection).await {
        Ok(()) | Err(Error::FileNotFound(_)) => {}
        Err(e) => warn!(
            subsystem = "jobs",
            component = "retry",
            queue_item_id = %item.id,
            file_id = %item.file_id,
            error = %e,
            "Failed to project retry status onto file"
        ),
    }

    Ok(Some(decision))
}

/// Bound a metadata store call by `limit`.
pub(crate) async fn with_timeout<T>(
    limit: Duration,
    operation: &str,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: operation.to_string(),
            secs: limit.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidwise_core::{AnalysisType, QueueStatus};
    use bidwise_db::{MemoryFileRecordRepository, MemoryQueueRepository};
    use chrono::Utc;
    use uuid::Uuid;

    fn processing(attempts: i32, max_attempts: i32) -> QueueItem {
        QueueItem {
            id: Uuid::new_v4(),
            file_id: Uuid::new_v4(),
            analysis_type: AnalysisType::Other,
            status: QueueStatus::Processing,
            priority: 0,
            attempts,
            max_attempts,
            result_data: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            processed_at: None,
        }
    }

    #[test]
    fn test_decision() {
        assert_eq!(RetryDecision::for_item(&processing(1, 3)), RetryDecision::Requeue);
        assert_eq!(RetryDecision::for_item(&processing(2, 3)), RetryDecision::Requeue);
        assert_eq!(RetryDecision::for_item(&processing(3, 3)), RetryDecision::Fail);
        assert_eq!(RetryDecision::Fail.file_status(), AiAnalysisStatus::Failed);
        assert_eq!(RetryDecision::Requeue.file_status(), AiAnalysisStatus::Pending);
    }

    #[tokio::test]
    async fn test_apply_requeue_tolerates_missing_file() {
        let queue = MemoryQueueRepository::new();
        let files = MemoryFileRecordRepository::new();
        let item = processing(1, 3);
        queue.insert_item(item.clone());

        let decision = apply_failure(&queue, &files, &item, "boom", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(decision, Some(RetryDecision::Requeue));

        let stored = queue.get(item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Queued);
        assert_eq!(stored.error_message.as_deref(), Some("boom"));
        assert!(stored.started_at.is_none());
        assert!(stored.result_data.is_none());
    }

    #[tokio::test]
    async fn test_apply_is_noop_when_not_processing() {
        let queue = MemoryQueueRepository::new();
        let files = MemoryFileRecordRepository::new();
        let mut item = processing(3, 3);
        item.status = QueueStatus::Completed;
        queue.insert_item(item.clone());

        let decision = apply_failure(&queue, &files, &item, "late", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(decision, None);
        let stored = queue.get(item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Completed);
    }
}
