//! # bidwise-inference
//!
//! Analysis service backends for bidwise.
//!
//! This crate provides:
//! - Gemini `generateContent` backend with inline document data (default provider)
//! - Ollama `/api/generate` backend for self-hosted vision models
//! - Provider selection from environment variables
//! - Scripted mock backend (feature `mock`)
//!
//! # Example
//!
//! ```rust,no_run
//! use bidwise_inference::{build_backend, AnalysisConfig};
//!
//! let backend = build_backend(&AnalysisConfig::from_env()).expect("backend");
//! println!("analysing with {}", backend.model_name());
//! ```

pub mod config;
pub mod gemini;
pub mod ollama;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

use std::sync::Arc;

// Re-export core types
pub use bidwise_core::*;

pub use config::{AnalysisConfig, AnalysisProvider, ConfigError, GeminiConfig, OllamaConfig};
pub use gemini::GeminiBackend;
pub use ollama::OllamaAnalysisBackend;

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockAnalysisBackend, MockCall};

/// Build the configured analysis backend.
pub fn build_backend(
    config: &AnalysisConfig,
) -> std::result::Result<Arc<dyn AnalysisBackend>, ConfigError> {
    config.validate()?;
    let backend: Arc<dyn AnalysisBackend> = match config.provider {
        AnalysisProvider::Gemini => Arc::new(GeminiBackend::new(config.gemini.clone())?),
        AnalysisProvider::Ollama => Arc::new(OllamaAnalysisBackend::new(config.ollama.clone())),
    };
    tracing::info!(
        subsystem = "inference",
        provider = %config.provider,
        model = backend.model_name(),
        "Analysis backend configured"
    );
    Ok(backend)
}
