//! End-to-end queue processing against in-memory stores and a scripted backend.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use bidwise_db::{MemoryFileRecordRepository, MemoryObjectStore, MemoryQueueRepository};
use bidwise_inference::MockAnalysisBackend;
use bidwise_jobs::{
    AiAnalysisStatus, AnalysisType, ComplianceStatus, EnqueueRequest, Error, FileRecord,
    FileRecordRepository, NewFileRecord, ObjectStore, PipelineLimits, ProcessSummary,
    QueueItem, QueueProcessor, QueueRepository, QueueStatus, WorkerConfig, WorkerEvent,
    LEASE_EXPIRED,
};

const WELL_FORMED: &str = r#"{
  "summary": "Certificate of insurance for Acme Builders.",
  "keyFindings": ["General liability $2M aggregate", "Expires 2027-06-30"],
  "complianceStatus": "compliant",
  "missingRequirements": [],
  "recommendations": ["Add the agency as additional insured"],
  "confidenceScore": 0.88,
  "extractedData": {"insurance": ["GL $1M/$2M, Hartford"]}
}"#;

struct Harness {
    queue: MemoryQueueRepository,
    files: MemoryFileRecordRepository,
    store: MemoryObjectStore,
    backend: MockAnalysisBackend,
    processor: QueueProcessor,
}

fn test_config() -> WorkerConfig {
    WorkerConfig::default()
        .with_poll_interval(10)
        .with_limits(PipelineLimits {
            persist_backoff: Duration::from_millis(1),
            ..PipelineLimits::default()
        })
}

fn harness(backend: MockAnalysisBackend) -> Harness {
    harness_with(backend, test_config())
}

fn harness_with(backend: MockAnalysisBackend, config: WorkerConfig) -> Harness {
    let queue = MemoryQueueRepository::new();
    let files = MemoryFileRecordRepository::new();
    let store = MemoryObjectStore::new();
    let processor = QueueProcessor::new(
        Arc::new(queue.clone()),
        Arc::new(files.clone()),
        Arc::new(store.clone()),
        Arc::new(backend.clone()),
        config,
    );
    Harness {
        queue,
        files,
        store,
        backend,
        processor,
    }
}

impl Harness {
    async fn add_file(&self, checklist_item: &str, upload: bool) -> FileRecord {
        let path = format!("company/{}.pdf", Uuid::new_v4());
        if upload {
            self.store
                .upload(&path, b"%PDF-1.7 certificate of insurance")
                .await
                .unwrap();
        }
        self.files
            .insert(NewFileRecord {
                company_id: Uuid::new_v4(),
                checklist_item_id: Some(checklist_item.to_string()),
                file_path: path,
                file_type: "pdf".to_string(),
                file_name: Some("coi.pdf".to_string()),
            })
            .await
            .unwrap()
    }

    async fn enqueue(&self, file: &FileRecord, analysis_type: AnalysisType) -> QueueItem {
        self.processor
            .enqueue(EnqueueRequest::new(file.id, analysis_type))
            .await
            .unwrap()
    }

    async fn item(&self, id: Uuid) -> QueueItem {
        self.queue.get(id).await.unwrap().unwrap()
    }

    async fn file(&self, id: Uuid) -> FileRecord {
        FileRecordRepository::get(&self.files, id)
            .await
            .unwrap()
            .unwrap()
    }
}

#[tokio::test]
async fn test_enqueue_then_process_well_formed_result() {
    let h = harness(MockAnalysisBackend::new().then_respond(WELL_FORMED));
    let file = h.add_file("insurance-coi", true).await;

    let item = h.enqueue(&file, AnalysisType::ChecklistDocument).await;
    assert_eq!(item.status, QueueStatus::Queued);
    assert_eq!(item.attempts, 0);
    assert_eq!(item.priority, 0);
    assert_eq!(item.max_attempts, 3);
    assert_eq!(
        h.file(file.id).await.ai_analysis_status,
        Some(AiAnalysisStatus::Pending)
    );

    let summary = h.processor.process_queue().await.unwrap();
    assert_eq!(
        summary,
        ProcessSummary {
            dequeued: 1,
            claimed: 1,
            completed: 1,
            ..Default::default()
        }
    );

    let stored = h.item(item.id).await;
    assert_eq!(stored.status, QueueStatus::Completed);
    assert_eq!(stored.attempts, 1);
    assert!(stored.processed_at.is_some());
    let result = stored.result_data.expect("result stored on item");
    assert_eq!(result.summary, "Certificate of insurance for Acme Builders.");
    assert_eq!(result.compliance_status, ComplianceStatus::Compliant);
    assert_eq!(result.confidence_score, 0.88);
    assert_eq!(result.checklist_item.as_deref(), Some("insurance-coi"));
    assert_eq!(result.file_type, "pdf");

    let record = h.file(file.id).await;
    assert_eq!(record.ai_analysis_status, Some(AiAnalysisStatus::Completed));
    assert_eq!(record.ai_analysis, Some(result));
    assert!(record.ai_analysis_updated_at.is_some());

    let calls = h.backend.get_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].mime_type, "application/pdf");
    assert!(calls[0].prompt.contains("\"insurance-coi\""));
}

#[tokio::test]
async fn test_rerun_after_completion_changes_nothing() {
    let h = harness(MockAnalysisBackend::new().then_respond(WELL_FORMED));
    let file = h.add_file("w9", true).await;
    let item = h.enqueue(&file, AnalysisType::Other).await;

    h.processor.process_queue().await.unwrap();
    let before = h.item(item.id).await;
    let file_before = h.file(file.id).await;

    let summary = h.processor.process_queue().await.unwrap();
    assert_eq!(summary, ProcessSummary::default());
    assert_eq!(h.item(item.id).await, before);
    assert_eq!(h.file(file.id).await, file_before);
    assert_eq!(h.backend.call_count(), 1);
}

#[tokio::test]
async fn test_dequeue_order_priority_then_age() {
    let h = harness_with(
        MockAnalysisBackend::new().with_default_response(WELL_FORMED),
        test_config().with_max_concurrent(1),
    );
    let mut ids = Vec::new();
    for (name, priority) in [("A", 1), ("B", 5), ("C", 3)] {
        let file = h.add_file(name, true).await;
        let item = h
            .processor
            .enqueue(EnqueueRequest::new(file.id, AnalysisType::ChecklistDocument).with_priority(priority))
            .await
            .unwrap();
        ids.push(item.id);
    }

    let order: Vec<Uuid> = h.queue.dequeue(10).await.unwrap().iter().map(|i| i.id).collect();
    assert_eq!(order, vec![ids[1], ids[2], ids[0]]);

    h.processor.process_queue().await.unwrap();
    let analysed: Vec<String> = h
        .backend
        .get_calls()
        .into_iter()
        .map(|c| {
            ["A", "B", "C"]
                .into_iter()
                .find(|n| c.prompt.contains(&format!("\"{}\"", n)))
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(analysed, vec!["B", "C", "A"]);
}

#[tokio::test]
async fn test_batch_size_limits_a_run() {
    let h = harness_with(
        MockAnalysisBackend::new().with_default_response(WELL_FORMED),
        test_config().with_batch_size(2),
    );
    for i in 0..3 {
        let file = h.add_file(&format!("item-{i}"), true).await;
        h.enqueue(&file, AnalysisType::Other).await;
    }

    let first = h.processor.process_queue().await.unwrap();
    assert_eq!(first.dequeued, 2);
    assert_eq!(first.completed, 2);

    let second = h.processor.process_queue().await.unwrap();
    assert_eq!(second.dequeued, 1);
    assert_eq!(h.processor.stats().await.unwrap().completed, 3);
}

#[tokio::test]
async fn test_always_failing_converges_after_max_attempts() {
    let h = harness(
        MockAnalysisBackend::new()
            .then_fail("503 from upstream")
            .then_fail("503 from upstream")
            .then_fail("503 from upstream"),
    );
    let file = h.add_file("bond", true).await;
    let item = h.enqueue(&file, AnalysisType::FinancialDocument).await;

    let mut attempts_seen = Vec::new();
    for _ in 0..3 {
        h.processor.process_queue().await.unwrap();
        attempts_seen.push(h.item(item.id).await.attempts);
    }
    assert_eq!(attempts_seen, vec![1, 2, 3]);

    let stored = h.item(item.id).await;
    assert_eq!(stored.status, QueueStatus::Failed);
    assert!(stored.result_data.is_none());
    assert!(stored
        .error_message
        .as_deref()
        .unwrap()
        .contains("503 from upstream"));
    assert_eq!(
        h.file(file.id).await.ai_analysis_status,
        Some(AiAnalysisStatus::Failed)
    );

    // Terminal: never dequeued again.
    let summary = h.processor.process_queue().await.unwrap();
    assert_eq!(summary.dequeued, 0);
    assert_eq!(h.backend.call_count(), 3);
}

#[tokio::test]
async fn test_requeue_projects_pending_and_keeps_error() {
    let h = harness(MockAnalysisBackend::new().then_fail("quota exceeded"));
    let file = h.add_file("sam", true).await;
    let item = h.enqueue(&file, AnalysisType::Other).await;

    let summary = h.processor.process_queue().await.unwrap();
    assert_eq!(summary.requeued, 1);

    let stored = h.item(item.id).await;
    assert_eq!(stored.status, QueueStatus::Queued);
    assert_eq!(stored.attempts, 1);
    assert!(stored.started_at.is_none());
    assert!(stored.error_message.unwrap().contains("quota exceeded"));
    assert_eq!(
        h.file(file.id).await.ai_analysis_status,
        Some(AiAnalysisStatus::Pending)
    );
}

#[tokio::test(start_paused = true)]
async fn test_service_times_out_twice_then_succeeds() {
    let h = harness(
        MockAnalysisBackend::new()
            .then_hang()
            .then_hang()
            .then_respond(WELL_FORMED),
    );
    let file = h.add_file("license", true).await;
    let item = h.enqueue(&file, AnalysisType::CertificationDocument).await;

    let first = h.processor.process_queue().await.unwrap();
    assert_eq!(first.requeued, 1);
    let stored = h.item(item.id).await;
    assert_eq!(stored.status, QueueStatus::Queued);
    assert!(stored.error_message.unwrap().contains("timed out after 120s"));

    let second = h.processor.process_queue().await.unwrap();
    assert_eq!(second.requeued, 1);

    let third = h.processor.process_queue().await.unwrap();
    assert_eq!(third.completed, 1);

    let stored = h.item(item.id).await;
    assert_eq!(stored.status, QueueStatus::Completed);
    assert_eq!(stored.attempts, 3);
    assert_eq!(
        h.file(file.id).await.ai_analysis_status,
        Some(AiAnalysisStatus::Completed)
    );
}

#[tokio::test]
async fn test_download_failure_exhausts_attempts() {
    let h = harness(MockAnalysisBackend::new().with_default_response(WELL_FORMED));
    let file = h.add_file("financials", false).await;
    let item = h
        .processor
        .enqueue(EnqueueRequest::new(file.id, AnalysisType::FinancialDocument).with_max_attempts(2))
        .await
        .unwrap();

    h.processor.process_queue().await.unwrap();
    assert_eq!(h.item(item.id).await.status, QueueStatus::Queued);
    let summary = h.processor.process_queue().await.unwrap();
    assert_eq!(summary.failed, 1);

    let stored = h.item(item.id).await;
    assert_eq!(stored.status, QueueStatus::Failed);
    assert_eq!(stored.attempts, 2);
    assert!(stored.error_message.unwrap().starts_with("download failed"));
    assert_eq!(
        h.file(file.id).await.ai_analysis_status,
        Some(AiAnalysisStatus::Failed)
    );
    assert_eq!(h.backend.call_count(), 0);
}

#[tokio::test]
async fn test_prose_response_uses_fallback() {
    let prose = "The uploaded document is a state contractor license for Acme Builders. \
                 The license number and classification are legible.";
    let h = harness(MockAnalysisBackend::new().then_respond(prose));
    let file = h.add_file("license", true).await;
    let item = h.enqueue(&file, AnalysisType::CertificationDocument).await;

    h.processor.process_queue().await.unwrap();

    let result = h.item(item.id).await.result_data.unwrap();
    assert_eq!(result.confidence_score, 0.7);
    assert_eq!(result.summary, prose);
    assert_eq!(result.raw_analysis.as_deref(), Some(prose));
    assert_eq!(result.compliance_status, ComplianceStatus::Unknown);
    assert_eq!(result.key_findings.len(), 2);
    assert!(result.extracted_data.is_empty());
}

#[tokio::test]
async fn test_missing_confidence_uses_heuristic_max() {
    let h = harness(MockAnalysisBackend::new().then_respond(
        r#"{"summary": "The license is definitely active, though the expiration date is unclear."}"#,
    ));
    let file = h.add_file("license", true).await;
    let item = h.enqueue(&file, AnalysisType::CertificationDocument).await;

    h.processor.process_queue().await.unwrap();
    let result = h.item(item.id).await.result_data.unwrap();
    assert_eq!(result.confidence_score, 0.9);
    assert!(result.raw_analysis.is_none());
}

#[tokio::test]
async fn test_empty_response_is_retried() {
    let h = harness(
        MockAnalysisBackend::new()
            .then_respond("   \n")
            .then_respond(WELL_FORMED),
    );
    let file = h.add_file("w9", true).await;
    let item = h.enqueue(&file, AnalysisType::Other).await;

    let first = h.processor.process_queue().await.unwrap();
    assert_eq!(first.requeued, 1);
    assert!(h
        .item(item.id)
        .await
        .error_message
        .unwrap()
        .contains("empty response"));

    h.processor.process_queue().await.unwrap();
    assert_eq!(h.item(item.id).await.status, QueueStatus::Completed);
}

#[tokio::test]
async fn test_missing_file_record_is_retryable() {
    let h = harness(MockAnalysisBackend::new().with_default_response(WELL_FORMED));
    let file = h.add_file("w9", true).await;
    let item = h.enqueue(&file, AnalysisType::Other).await;
    h.files.remove(file.id);

    let summary = h.processor.process_queue().await.unwrap();
    assert_eq!(summary.requeued, 1);
    let stored = h.item(item.id).await;
    assert_eq!(stored.status, QueueStatus::Queued);
    assert!(stored.error_message.unwrap().contains("file record not found"));
    assert_eq!(h.backend.call_count(), 0);
}

#[tokio::test]
async fn test_enqueue_rejects_unknown_and_duplicate() {
    let h = harness(MockAnalysisBackend::new());
    let err = h
        .processor
        .enqueue(EnqueueRequest::new(Uuid::new_v4(), AnalysisType::Other))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FileNotFound(_)));

    let file = h.add_file("w9", true).await;
    h.enqueue(&file, AnalysisType::Other).await;
    let err = h
        .processor
        .enqueue(EnqueueRequest::new(file.id, AnalysisType::Other))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyQueued(id) if id == file.id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_are_exclusive() {
    let queue = Arc::new(MemoryQueueRepository::new());
    let item = QueueItem {
        id: Uuid::new_v4(),
        file_id: Uuid::new_v4(),
        analysis_type: AnalysisType::Other,
        status: QueueStatus::Queued,
        priority: 0,
        attempts: 0,
        max_attempts: 3,
        result_data: None,
        error_message: None,
        created_at: Utc::now(),
        started_at: None,
        processed_at: None,
    };
    queue.insert_item(item.clone());

    let mut handles = Vec::new();
    for _ in 0..16 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move { queue.claim(item.id).await.unwrap() }));
    }
    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(queue.get(item.id).await.unwrap().unwrap().attempts, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_processors_never_share_an_item() {
    let h = harness(MockAnalysisBackend::new().with_default_response(WELL_FORMED));
    let other = QueueProcessor::new(
        Arc::new(h.queue.clone()),
        Arc::new(h.files.clone()),
        Arc::new(h.store.clone()),
        Arc::new(h.backend.clone()),
        test_config(),
    );
    for i in 0..4 {
        let file = h.add_file(&format!("doc-{i}"), true).await;
        h.enqueue(&file, AnalysisType::Other).await;
    }

    let (a, b) = tokio::join!(h.processor.process_queue(), other.process_queue());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.claimed + b.claimed, 4);
    assert_eq!(a.completed + b.completed, 4);
    assert_eq!(a.skipped + b.skipped, a.dequeued + b.dequeued - 4);
    assert_eq!(h.backend.call_count(), 4);
}

fn stale_item(file_id: Uuid, attempts: i32, max_attempts: i32) -> QueueItem {
    QueueItem {
        id: Uuid::new_v4(),
        file_id,
        analysis_type: AnalysisType::Other,
        status: QueueStatus::Processing,
        priority: 0,
        attempts,
        max_attempts,
        result_data: None,
        error_message: None,
        created_at: Utc::now() - chrono::Duration::hours(1),
        started_at: Some(Utc::now() - chrono::Duration::minutes(20)),
        processed_at: None,
    }
}

#[tokio::test]
async fn test_stale_sweep_requeues_then_processes() {
    let h = harness(MockAnalysisBackend::new().with_default_response(WELL_FORMED));
    let file = h.add_file("w9", true).await;
    let item = stale_item(file.id, 1, 3);
    h.queue.insert_item(item.clone());

    let summary = h.processor.process_queue().await.unwrap();
    assert_eq!(summary.reaped, 1);
    assert_eq!(summary.completed, 1);

    let stored = h.item(item.id).await;
    assert_eq!(stored.status, QueueStatus::Completed);
    assert_eq!(stored.attempts, 2);
    assert_eq!(stored.error_message.as_deref(), Some(LEASE_EXPIRED));
}

#[tokio::test]
async fn test_stale_sweep_fails_exhausted_item() {
    let h = harness(MockAnalysisBackend::new().with_default_response(WELL_FORMED));
    let file = h.add_file("w9", true).await;
    let item = stale_item(file.id, 3, 3);
    h.queue.insert_item(item.clone());

    let summary = h.processor.process_queue().await.unwrap();
    assert_eq!(summary.reaped, 1);
    assert_eq!(summary.dequeued, 0);

    let stored = h.item(item.id).await;
    assert_eq!(stored.status, QueueStatus::Failed);
    assert_eq!(stored.error_message.as_deref(), Some(LEASE_EXPIRED));
    assert_eq!(
        h.file(file.id).await.ai_analysis_status,
        Some(AiAnalysisStatus::Failed)
    );
}

#[tokio::test]
async fn test_fresh_processing_item_is_not_swept() {
    let h = harness(MockAnalysisBackend::new());
    let file = h.add_file("w9", true).await;
    let mut item = stale_item(file.id, 1, 3);
    item.started_at = Some(Utc::now());
    h.queue.insert_item(item.clone());

    let summary = h.processor.process_queue().await.unwrap();
    assert_eq!(summary.reaped, 0);
    assert_eq!(h.item(item.id).await.status, QueueStatus::Processing);
}

#[tokio::test]
async fn test_persist_retries_write_without_reanalysing() {
    let h = harness(MockAnalysisBackend::new().with_default_response(WELL_FORMED));
    let file = h.add_file("w9", true).await;
    let item = h.enqueue(&file, AnalysisType::Other).await;
    h.queue.fail_next_completes(2);

    let summary = h.processor.process_queue().await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.persist_errors, 0);
    assert_eq!(h.item(item.id).await.status, QueueStatus::Completed);
    assert_eq!(h.backend.call_count(), 1);
}

#[tokio::test]
async fn test_persist_exhaustion_leaves_item_for_sweep() {
    let h = harness(MockAnalysisBackend::new().with_default_response(WELL_FORMED));
    let file = h.add_file("w9", true).await;
    let item = h.enqueue(&file, AnalysisType::Other).await;
    h.files.fail_next_stores(3);

    let summary = h.processor.process_queue().await.unwrap();
    assert_eq!(summary.persist_errors, 1);
    assert_eq!(summary.completed, 0);
    let mut stuck = h.item(item.id).await;
    assert_eq!(stuck.status, QueueStatus::Processing);
    assert_eq!(h.backend.call_count(), 1);

    // Once the lease has run out, the next run's sweep recovers it and the
    // same run completes it.
    stuck.started_at = Some(Utc::now() - chrono::Duration::minutes(20));
    h.queue.insert_item(stuck);
    let summary = h.processor.process_queue().await.unwrap();
    assert_eq!(summary.reaped, 1);
    assert_eq!(summary.completed, 1);
    let stored = h.item(item.id).await;
    assert_eq!(stored.status, QueueStatus::Completed);
    assert_eq!(stored.attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_swept_item_is_not_written_by_its_old_worker() {
    let h = harness(
        MockAnalysisBackend::new().then_respond_after(Duration::from_millis(400), WELL_FORMED),
    );
    let file = h.add_file("bid-bond", true).await;
    let item = h
        .processor
        .enqueue(EnqueueRequest::new(file.id, AnalysisType::Other).with_max_attempts(1))
        .await
        .unwrap();

    let first = h.processor.clone();
    let running = tokio::spawn(async move { first.process_queue().await });
    while h.item(item.id).await.status != QueueStatus::Processing {
        tokio::task::yield_now().await;
    }

    // The first worker is mid-analysis when its lease is treated as expired.
    let mut claimed = h.item(item.id).await;
    claimed.started_at = Some(Utc::now() - chrono::Duration::minutes(20));
    h.queue.insert_item(claimed);

    let sweeper = QueueProcessor::new(
        Arc::new(h.queue.clone()),
        Arc::new(h.files.clone()),
        Arc::new(h.store.clone()),
        Arc::new(MockAnalysisBackend::new()),
        test_config(),
    );
    let swept = sweeper.process_queue().await.unwrap();
    assert_eq!(swept.reaped, 1);

    let late = running.await.unwrap().unwrap();
    assert_eq!(late.claimed, 1);
    assert_eq!(late.completed, 0);
    assert_eq!(late.persist_errors, 0);
    assert_eq!(h.backend.call_count(), 1);

    let stored = h.item(item.id).await;
    assert_eq!(stored.status, QueueStatus::Failed);
    assert_eq!(stored.error_message.as_deref(), Some(LEASE_EXPIRED));
    assert!(stored.result_data.is_none());

    let record = h.file(file.id).await;
    assert_eq!(record.ai_analysis_status, Some(AiAnalysisStatus::Failed));
    assert!(record.ai_analysis.is_none());
}

#[tokio::test]
async fn test_image_documents_are_sent_as_images() {
    let h = harness(MockAnalysisBackend::new().with_default_response(WELL_FORMED));
    let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    h.store.upload("scans/license.png", &png).await.unwrap();
    let file = h
        .files
        .insert(NewFileRecord {
            company_id: Uuid::new_v4(),
            checklist_item_id: None,
            file_path: "scans/license.png".to_string(),
            file_type: "png".to_string(),
            file_name: None,
        })
        .await
        .unwrap();
    h.enqueue(&file, AnalysisType::FinancialDocument).await;

    h.processor.process_queue().await.unwrap();
    let calls = h.backend.get_calls();
    assert_eq!(calls[0].mime_type, "image/png");
    assert!(calls[0].system.contains("financial analyst"));
    assert!(calls[0].prompt.contains("checklist item: unspecified"));
}

#[tokio::test]
async fn test_poll_loop_processes_and_shuts_down() {
    let h = harness(MockAnalysisBackend::new().with_default_response(WELL_FORMED));
    let file = h.add_file("w9", true).await;
    let item = h.enqueue(&file, AnalysisType::Other).await;

    let Harness {
        processor, queue, ..
    } = h;
    let handle = processor.start();
    let mut events = handle.events();

    let completed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(WorkerEvent::JobCompleted { queue_item_id, .. }) => break queue_item_id,
                Ok(_) => continue,
                Err(e) => panic!("event channel closed: {e}"),
            }
        }
    })
    .await
    .expect("job completed");
    assert_eq!(completed, item.id);

    handle.shutdown().await.unwrap();
    let stopped = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(WorkerEvent::WorkerStopped) = events.recv().await {
                break;
            }
        }
    })
    .await;
    assert!(stopped.is_ok());
    assert_eq!(
        queue.get(item.id).await.unwrap().unwrap().status,
        QueueStatus::Completed
    );
}

#[tokio::test]
async fn test_disabled_worker_does_not_process() {
    let h = harness_with(
        MockAnalysisBackend::new().with_default_response(WELL_FORMED),
        test_config().with_enabled(false),
    );
    let file = h.add_file("w9", true).await;
    let item = h.enqueue(&file, AnalysisType::Other).await;

    let Harness {
        processor, queue, ..
    } = h;
    let _handle = processor.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        queue.get(item.id).await.unwrap().unwrap().status,
        QueueStatus::Queued
    );
}

#[tokio::test]
async fn test_cleanup_keeps_recent_terminal_items() {
    let h = harness(MockAnalysisBackend::new().with_default_response(WELL_FORMED));
    for i in 0..3 {
        let file = h.add_file(&format!("doc-{i}"), true).await;
        h.enqueue(&file, AnalysisType::Other).await;
    }
    h.processor.process_queue().await.unwrap();

    assert_eq!(h.processor.cleanup(1).await.unwrap(), 2);
    let stats = h.processor.stats().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.total, 1);
}
