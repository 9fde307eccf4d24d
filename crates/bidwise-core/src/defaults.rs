//! Centralized default constants for the bidwise analysis pipeline.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers; environment variables override most of them at startup.

// =============================================================================
// QUEUE
// =============================================================================

/// Number of queue items selected per `process_queue` run.
pub const DEQUEUE_BATCH_SIZE: usize = 5;

/// Attempts allowed before a queue item becomes terminally `failed`.
pub const QUEUE_MAX_ATTEMPTS: i32 = 3;

/// Priority assigned when the caller does not supply one.
pub const QUEUE_DEFAULT_PRIORITY: i32 = 0;

/// Maximum concurrently running jobs within one batch.
pub const QUEUE_MAX_CONCURRENT: usize = 5;

/// Poll interval of the background loop when the queue is empty.
pub const QUEUE_POLL_INTERVAL_MS: u64 = 30_000;

/// Seconds an item may sit in `processing` before the stale sweep reclaims it.
///
/// Must comfortably exceed the sum of the per-step timeouts below.
pub const STALE_PROCESSING_SECS: u64 = 900;

/// Terminal queue items retained by `cleanup`.
pub const QUEUE_CLEANUP_KEEP: i64 = 10_000;

/// Broadcast channel capacity for worker events.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// TIMEOUTS
// =============================================================================

/// Object store download timeout in seconds.
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 30;

/// Analysis service call timeout in seconds.
pub const ANALYSIS_TIMEOUT_SECS: u64 = 120;

/// Metadata store write timeout in seconds.
pub const STORE_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// PERSISTENCE RETRY
// =============================================================================

/// Write attempts for a successful analysis before giving up to the stale sweep.
pub const PERSIST_RETRIES: u32 = 3;

/// Base backoff between persistence attempts in milliseconds.
pub const PERSIST_BACKOFF_MS: u64 = 200;

// =============================================================================
// RESULT EXTRACTION
// =============================================================================

/// Confidence assigned to results built by the text fallback.
pub const FALLBACK_CONFIDENCE: f64 = 0.7;

/// Confidence when no certainty phrase matches.
pub const DEFAULT_CONFIDENCE: f64 = 0.6;

/// Key findings kept by the text fallback.
pub const FALLBACK_MAX_FINDINGS: usize = 5;

/// Minimum sentence length (characters, exclusive) for a fallback finding.
pub const FALLBACK_MIN_SENTENCE_CHARS: usize = 20;

// =============================================================================
// INFERENCE
// =============================================================================

/// Default Gemini REST endpoint.
pub const GEMINI_URL: &str = "https://generativelanguage.googleapis.com";

/// Default Gemini model.
pub const GEMINI_MODEL: &str = "gemini-1.5-flash";

/// Default Ollama base URL.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Default Ollama model for document analysis.
pub const OLLAMA_ANALYSIS_MODEL: &str = "qwen2.5vl:7b";

/// Sampling temperature for analysis requests.
pub const ANALYSIS_TEMPERATURE: f32 = 0.2;

// =============================================================================
// SERVER / STORAGE
// =============================================================================

/// Default object store root directory.
pub const STORAGE_PATH: &str = "./data/uploads";

/// Default HTTP port.
pub const SERVER_PORT: u16 = 3000;
