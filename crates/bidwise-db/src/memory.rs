//! In-memory repositories and object store.
//!
//! Same contracts as the PostgreSQL implementations, backed by a mutex-guarded
//! map. Every state transition happens under one lock acquisition, so claim
//! exclusivity holds across tasks. Used by tests and by single-process
//! deployments that run without a database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use bidwise_core::{
    new_v7, AiAnalysisStatus, AnalysisResult, EnqueueRequest, Error, FileRecord,
    FileRecordRepository, NewFileRecord, ObjectStore, QueueItem, QueueRepository, QueueStats,
    QueueStatus, Result,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Takes one unit from an injected-failure counter.
fn take_failure(counter: &Mutex<u32>) -> bool {
    let mut remaining = lock(counter);
    if *remaining > 0 {
        *remaining -= 1;
        true
    } else {
        false
    }
}

// =============================================================================
// QUEUE
// =============================================================================

#[derive(Default)]
struct QueueState {
    items: HashMap<Uuid, (u64, QueueItem)>,
    next_seq: u64,
}

/// In-memory [`QueueRepository`].
#[derive(Clone, Default)]
pub struct MemoryQueueRepository {
    state: Arc<Mutex<QueueState>>,
    failing_completes: Arc<Mutex<u32>>,
}

impl MemoryQueueRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an item as-is, bypassing deduplication. Lets tests seed any state,
    /// including stale `processing` rows.
    pub fn insert_item(&self, item: QueueItem) {
        let mut state = lock(&self.state);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.items.insert(item.id, (seq, item));
    }

    /// Make the next `n` calls to `complete` fail with a database-style error.
    pub fn fail_next_completes(&self, n: u32) {
        *lock(&self.failing_completes) = n;
    }

    /// Snapshot of every item, in insertion order.
    pub fn items(&self) -> Vec<QueueItem> {
        let state = lock(&self.state);
        let mut items: Vec<_> = state.items.values().cloned().collect();
        items.sort_by_key(|(seq, _)| *seq);
        items.into_iter().map(|(_, item)| item).collect()
    }

    /// Apply `f` to a `processing` item, returning whether it applied.
    fn transition(&self, id: Uuid, f: impl FnOnce(&mut QueueItem)) -> bool {
        let mut state = lock(&self.state);
        match state.items.get_mut(&id) {
            Some((_, item)) if item.status == QueueStatus::Processing => {
                f(item);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl QueueRepository for MemoryQueueRepository {
    async fn enqueue_deduplicated(&self, req: EnqueueRequest) -> Result<Option<QueueItem>> {
        let mut state = lock(&self.state);
        let active = state
            .items
            .values()
            .any(|(_, item)| item.file_id == req.file_id && item.is_active());
        if active {
            return Ok(None);
        }

        let item = QueueItem {
            id: new_v7(),
            file_id: req.file_id,
            analysis_type: req.analysis_type,
            status: QueueStatus::Queued,
            priority: req.effective_priority(),
            attempts: 0,
            max_attempts: req.effective_max_attempts(),
            result_data: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            processed_at: None,
        };
        let seq = state.next_seq;
        state.next_seq += 1;
        state.items.insert(item.id, (seq, item.clone()));
        Ok(Some(item))
    }

    async fn dequeue(&self, limit: usize) -> Result<Vec<QueueItem>> {
        let state = lock(&self.state);
        let mut queued: Vec<_> = state
            .items
            .values()
            .filter(|(_, item)| item.status == QueueStatus::Queued)
            .collect();
        queued.sort_by(|(seq_a, a), (seq_b, b)| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(seq_a.cmp(seq_b))
        });
        Ok(queued
            .into_iter()
            .take(limit)
            .map(|(_, item)| item.clone())
            .collect())
    }

    async fn claim(&self, id: Uuid) -> Result<Option<QueueItem>> {
        let mut state = lock(&self.state);
        match state.items.get_mut(&id) {
            Some((_, item))
                if item.status == QueueStatus::Queued && item.attempts < item.max_attempts =>
            {
                item.status = QueueStatus::Processing;
                item.attempts += 1;
                item.started_at = Some(Utc::now());
                Ok(Some(item.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn complete(&self, id: Uuid, result: &AnalysisResult) -> Result<bool> {
        if take_failure(&self.failing_completes) {
            return Err(Error::Internal("injected write failure".to_string()));
        }
        Ok(self.transition(id, |item| {
            item.status = QueueStatus::Completed;
            item.result_data = Some(result.clone());
            item.processed_at = Some(Utc::now());
        }))
    }

    async fn requeue(&self, id: Uuid, error: &str) -> Result<bool> {
        Ok(self.transition(id, |item| {
            item.status = QueueStatus::Queued;
            item.error_message = Some(error.to_string());
            item.started_at = None;
        }))
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<bool> {
        Ok(self.transition(id, |item| {
            item.status = QueueStatus::Failed;
            item.error_message = Some(error.to_string());
        }))
    }

    async fn get(&self, id: Uuid) -> Result<Option<QueueItem>> {
        Ok(lock(&self.state)
            .items
            .get(&id)
            .map(|(_, item)| item.clone()))
    }

    async fn list_for_file(&self, file_id: Uuid) -> Result<Vec<QueueItem>> {
        let state = lock(&self.state);
        let mut items: Vec<_> = state
            .items
            .values()
            .filter(|(_, item)| item.file_id == file_id)
            .cloned()
            .collect();
        items.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a))
        });
        Ok(items.into_iter().map(|(_, item)| item).collect())
    }

    async fn list_stale(&self, started_before: DateTime<Utc>) -> Result<Vec<QueueItem>> {
        let state = lock(&self.state);
        let mut items: Vec<_> = state
            .items
            .values()
            .map(|(_, item)| item)
            .filter(|item| {
                item.status == QueueStatus::Processing
                    && item.started_at.is_some_and(|t| t < started_before)
            })
            .cloned()
            .collect();
        items.sort_by_key(|item| item.started_at);
        Ok(items)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let state = lock(&self.state);
        let mut stats = QueueStats::default();
        for (_, item) in state.items.values() {
            match item.status {
                QueueStatus::Queued => stats.queued += 1,
                QueueStatus::Processing => stats.processing += 1,
                QueueStatus::Completed => stats.completed += 1,
                QueueStatus::Failed => stats.failed += 1,
            }
            stats.total += 1;
        }
        Ok(stats)
    }

    async fn cleanup(&self, keep_count: i64) -> Result<i64> {
        let mut state = lock(&self.state);
        let mut terminal: Vec<_> = state
            .items
            .values()
            .map(|(_, item)| item)
            .filter(|item| item.status.is_terminal())
            .map(|item| (item.processed_at.unwrap_or(item.created_at), item.id))
            .collect();
        terminal.sort_by(|a, b| b.0.cmp(&a.0));

        let doomed: Vec<Uuid> = terminal
            .into_iter()
            .skip(keep_count.max(0) as usize)
            .map(|(_, id)| id)
            .collect();
        for id in &doomed {
            state.items.remove(id);
        }
        Ok(doomed.len() as i64)
    }
}

// =============================================================================
// FILE RECORDS
// =============================================================================

/// In-memory [`FileRecordRepository`].
#[derive(Clone, Default)]
pub struct MemoryFileRecordRepository {
    records: Arc<Mutex<HashMap<Uuid, FileRecord>>>,
    failing_stores: Arc<Mutex<u32>>,
}

impl MemoryFileRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record as-is.
    pub fn insert_record(&self, record: FileRecord) {
        lock(&self.records).insert(record.id, record);
    }

    /// Remove a record, as an out-of-band delete would.
    pub fn remove(&self, id: Uuid) -> Option<FileRecord> {
        lock(&self.records).remove(&id)
    }

    /// Make the next `n` calls to `store_analysis` fail.
    pub fn fail_next_stores(&self, n: u32) {
        *lock(&self.failing_stores) = n;
    }
}

#[async_trait]
impl FileRecordRepository for MemoryFileRecordRepository {
    async fn insert(&self, req: NewFileRecord) -> Result<FileRecord> {
        if req.file_path.trim().is_empty() {
            return Err(Error::InvalidInput("file_path must not be empty".to_string()));
        }
        let record = FileRecord {
            id: new_v7(),
            company_id: req.company_id,
            checklist_item_id: req.checklist_item_id,
            file_path: req.file_path,
            file_type: req.file_type,
            file_name: req.file_name,
            ai_analysis: None,
            ai_analysis_status: None,
            ai_analysis_updated_at: None,
            created_at: Utc::now(),
        };
        lock(&self.records).insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<FileRecord>> {
        Ok(lock(&self.records).get(&id).cloned())
    }

    async fn set_analysis_status(&self, id: Uuid, status: AiAnalysisStatus) -> Result<()> {
        let mut records = lock(&self.records);
        let record = records.get_mut(&id).ok_or(Error::FileNotFound(id))?;
        record.ai_analysis_status = Some(status);
        record.ai_analysis_updated_at = Some(Utc::now());
        Ok(())
    }

    async fn store_analysis(&self, id: Uuid, result: &AnalysisResult) -> Result<()> {
        if take_failure(&self.failing_stores) {
            return Err(Error::Internal("injected write failure".to_string()));
        }
        let mut records = lock(&self.records);
        let record = records.get_mut(&id).ok_or(Error::FileNotFound(id))?;
        record.ai_analysis = Some(result.clone());
        record.ai_analysis_status = Some(AiAnalysisStatus::Completed);
        record.ai_analysis_updated_at = Some(Utc::now());
        Ok(())
    }
}

// =============================================================================
// OBJECT STORE
// =============================================================================

/// In-memory [`ObjectStore`].
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    failing_downloads: Arc<Mutex<u32>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` downloads fail even when the object exists.
    pub fn fail_next_downloads(&self, n: u32) {
        *lock(&self.failing_downloads) = n;
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        if take_failure(&self.failing_downloads) {
            return Err(Error::Storage(format!("injected download failure: {}", path)));
        }
        lock(&self.objects)
            .get(path)
            .cloned()
            .ok_or_else(|| Error::Storage(format!("object not found: {}", path)))
    }

    async fn upload(&self, path: &str, data: &[u8]) -> Result<()> {
        lock(&self.objects).insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(lock(&self.objects).contains_key(path))
    }
}
