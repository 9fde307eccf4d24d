//! Router tests over in-memory stores and a scripted analysis backend.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use bidwise_api::{router, AppState};
use bidwise_core::{FileRecordRepository, NewFileRecord, ObjectStore};
use bidwise_db::{MemoryFileRecordRepository, MemoryObjectStore, MemoryQueueRepository};
use bidwise_inference::MockAnalysisBackend;
use bidwise_jobs::{QueueProcessor, WorkerConfig};

const WELL_FORMED: &str = r#"{"summary": "Bonding letter from Surety Co.", "complianceStatus": "compliant", "confidenceScore": 0.8}"#;

struct TestApp {
    app: Router,
    files: MemoryFileRecordRepository,
    store: MemoryObjectStore,
}

fn test_app(backend: MockAnalysisBackend) -> TestApp {
    let queue = MemoryQueueRepository::new();
    let files = MemoryFileRecordRepository::new();
    let store = MemoryObjectStore::new();
    let processor = QueueProcessor::new(
        Arc::new(queue.clone()),
        Arc::new(files.clone()),
        Arc::new(store.clone()),
        Arc::new(backend.clone()),
        WorkerConfig::default(),
    );
    let state = AppState::new(
        processor,
        Arc::new(files.clone()),
        Arc::new(queue),
        "mock-analysis",
    );
    TestApp {
        app: router(state),
        files,
        store,
    }
}

impl TestApp {
    async fn add_file(&self) -> Uuid {
        let path = format!("company/{}.pdf", Uuid::new_v4());
        self.store.upload(&path, b"%PDF-1.4 bond").await.unwrap();
        self.files
            .insert(NewFileRecord {
                company_id: Uuid::new_v4(),
                checklist_item_id: Some("bonding".to_string()),
                file_path: path,
                file_type: "pdf".to_string(),
                file_name: None,
            })
            .await
            .unwrap()
            .id
    }

    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }
}

#[tokio::test]
async fn test_health() {
    let app = test_app(MockAnalysisBackend::new());
    let (status, body) = app.send("GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["analysisModel"], "mock-analysis");
}

#[tokio::test]
async fn test_enqueue_process_and_read_back() {
    let app = test_app(MockAnalysisBackend::new().with_default_response(WELL_FORMED));
    let file_id = app.add_file().await;

    let (status, item) = app
        .send(
            "POST",
            &format!("/api/files/{}/analysis", file_id),
            Some(serde_json::json!({"analysisType": "financial_document", "priority": 2})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(item["status"], "queued");
    assert_eq!(item["attempts"], 0);
    assert_eq!(item["priority"], 2);
    assert_eq!(item["analysisType"], "financial_document");

    let (status, before) = app
        .send("GET", &format!("/api/files/{}/analysis", file_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(before["aiAnalysisStatus"], "pending");
    assert!(before["aiAnalysis"].is_null());

    let (status, summary) = app.send("POST", "/api/analysis/process", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["completed"], 1);
    assert_eq!(summary["persistErrors"], 0);

    let (_, after) = app
        .send("GET", &format!("/api/files/{}/analysis", file_id), None)
        .await;
    assert_eq!(after["aiAnalysisStatus"], "completed");
    assert_eq!(after["aiAnalysis"]["summary"], "Bonding letter from Surety Co.");
    assert_eq!(after["aiAnalysis"]["confidenceScore"], 0.8);
    assert_eq!(after["queue"].as_array().unwrap().len(), 1);
    assert_eq!(after["queue"][0]["status"], "completed");

    let (status, stats) = app.send("GET", "/api/analysis/queue", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["completed"], 1);
    assert_eq!(stats["total"], 1);
}

#[tokio::test]
async fn test_enqueue_without_body_uses_defaults() {
    let app = test_app(MockAnalysisBackend::new());
    let file_id = app.add_file().await;

    let (status, item) = app
        .send("POST", &format!("/api/files/{}/analysis", file_id), None)
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(item["analysisType"], "other");
    assert_eq!(item["priority"], 0);
    assert_eq!(item["maxAttempts"], 3);
}

#[tokio::test]
async fn test_enqueue_twice_conflicts() {
    let app = test_app(MockAnalysisBackend::new());
    let file_id = app.add_file().await;
    let uri = format!("/api/files/{}/analysis", file_id);

    let (status, _) = app.send("POST", &uri, None).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app.send("POST", &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("already queued"));
}

#[tokio::test]
async fn test_unknown_file_is_not_found() {
    let app = test_app(MockAnalysisBackend::new());
    let uri = format!("/api/files/{}/analysis", Uuid::new_v4());

    let (status, body) = app.send("POST", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = app.send("GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_body_is_bad_request() {
    let app = test_app(MockAnalysisBackend::new());
    let file_id = app.add_file().await;
    let uri = format!("/api/files/{}/analysis", file_id);

    let (status, body) = app
        .send("POST", &uri, Some(serde_json::json!({"analysisType": "resume"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("Invalid request body"));

    let (status, _) = app
        .send("POST", &uri, Some(serde_json::json!({"maxAttempts": 0})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_process_with_empty_queue() {
    let app = test_app(MockAnalysisBackend::new());
    let (status, summary) = app.send("POST", "/api/analysis/process", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["dequeued"], 0);
    assert_eq!(summary["claimed"], 0);
}
