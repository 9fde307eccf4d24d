//! # bidwise-api
//!
//! HTTP surface for compliance-document analysis: enqueue a file, inspect its
//! analysis, trigger a batch, read queue statistics.

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use bidwise_core::{FileRecordRepository, QueueRepository};
use bidwise_jobs::QueueProcessor;

pub use error::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<QueueProcessor>,
    pub files: Arc<dyn FileRecordRepository>,
    pub queue: Arc<dyn QueueRepository>,
    /// Analysis model reported by `/health`.
    pub model: Arc<str>,
}

impl AppState {
    pub fn new(
        processor: QueueProcessor,
        files: Arc<dyn FileRecordRepository>,
        queue: Arc<dyn QueueRepository>,
        model: &str,
    ) -> Self {
        Self {
            processor: Arc::new(processor),
            files,
            queue,
            model: Arc::from(model),
        }
    }
}

/// Build the router. Middleware layers are added by the binary.
pub fn router(state: AppState) -> Router {
    use handlers::analysis;

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/analysis/process", post(analysis::process_queue))
        .route("/api/analysis/queue", get(analysis::queue_stats))
        .route(
            "/api/files/:id/analysis",
            post(analysis::enqueue_analysis).get(analysis::get_file_analysis),
        )
        .with_state(state)
}
