//! # bidwise-jobs
//!
//! Asynchronous compliance-document analysis for bidwise.
//!
//! This crate provides:
//! - Priority-ordered batch processing of the analysis queue
//! - Atomic claims so concurrent workers never share an item
//! - Prompt selection per analysis type
//! - Structured result extraction with a prose fallback
//! - Bounded retries, plus a sweep for items stuck in `processing`
//! - A background poll loop with events and graceful shutdown
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use bidwise_db::{Database, FilesystemStore};
//! use bidwise_inference::{build_backend, AnalysisConfig};
//! use bidwise_jobs::{QueueProcessor, WorkerConfig};
//!
//! let db = Database::connect("postgres://...").await?;
//! let backend = build_backend(&AnalysisConfig::from_env())?;
//! let processor = QueueProcessor::from_database(
//!     &db,
//!     Arc::new(FilesystemStore::new("./data/uploads")),
//!     backend,
//!     WorkerConfig::from_env(),
//! );
//!
//! // One batch, e.g. from a cron endpoint
//! let summary = processor.process_queue().await?;
//! println!("completed {}", summary.completed);
//!
//! // Or keep polling in the background
//! let handle = processor.start();
//! handle.shutdown().await?;
//! ```

pub mod extraction;
pub mod pipeline;
pub mod prompts;
pub mod retry;
pub mod worker;

// Re-export core types
pub use bidwise_core::*;

pub use extraction::{
    confidence_heuristic, extract, fallback, parse_structured, EmptyResult, ParseError,
    ResultMetadata,
};
pub use pipeline::{AnalysisPipeline, JobOutcome, PipelineError, PipelineLimits};
pub use prompts::{select_prompt, PromptPair};
pub use retry::{apply_failure, RetryDecision};
pub use worker::{
    ProcessSummary, QueueProcessor, WorkerConfig, WorkerEvent, WorkerHandle, LEASE_EXPIRED,
    LEASE_MARGIN,
};
