//! Scripted analysis backend for deterministic testing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bidwise_inference::mock::MockAnalysisBackend;
//!
//! let backend = MockAnalysisBackend::new()
//!     .then_hang()
//!     .then_respond(r#"{"summary":"ok","confidenceScore":0.8}"#);
//! ```
//!
//! Scripted outcomes are consumed in order; once the script is exhausted every
//! call returns the default response.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use bidwise_core::{AnalysisBackend, AnalysisDocument, Error, Result};

/// One scripted reaction to a `generate` call.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Return the text, optionally after a delay.
    Respond { text: String, delay: Duration },
    /// Return an inference error with this message.
    Fail(String),
    /// Never return; lets callers exercise their own timeouts.
    Hang,
}

/// A recorded `generate` call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub system: String,
    pub prompt: String,
    pub mime_type: String,
    pub bytes_len: usize,
}

/// Mock analysis backend for testing.
#[derive(Clone)]
pub struct MockAnalysisBackend {
    script: Arc<Mutex<VecDeque<MockOutcome>>>,
    default_response: Arc<str>,
    model: Arc<str>,
    healthy: bool,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockAnalysisBackend {
    /// Create a mock with an empty script and a plain-prose default response.
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            default_response: Arc::from("Mock analysis response."),
            model: Arc::from("mock-analysis"),
            healthy: true,
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Set the response returned once the script is exhausted.
    pub fn with_default_response(mut self, response: impl Into<String>) -> Self {
        self.default_response = Arc::from(response.into());
        self
    }

    /// Set what `health_check` reports.
    pub fn with_health(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }

    /// Append a successful response to the script.
    pub fn then_respond(self, text: impl Into<String>) -> Self {
        self.then(MockOutcome::Respond {
            text: text.into(),
            delay: Duration::ZERO,
        })
    }

    /// Append a successful response that arrives after `delay`.
    pub fn then_respond_after(self, delay: Duration, text: impl Into<String>) -> Self {
        self.then(MockOutcome::Respond {
            text: text.into(),
            delay,
        })
    }

    /// Append a failure to the script.
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.then(MockOutcome::Fail(message.into()))
    }

    /// Append a call that never completes.
    pub fn then_hang(self) -> Self {
        self.then(MockOutcome::Hang)
    }

    /// Append an arbitrary outcome.
    pub fn then(self, outcome: MockOutcome) -> Self {
        lock(&self.script).push_back(outcome);
        self
    }

    /// Get all logged calls for assertion.
    pub fn get_calls(&self) -> Vec<MockCall> {
        lock(&self.call_log).clone()
    }

    /// Get number of generation calls.
    pub fn call_count(&self) -> usize {
        lock(&self.call_log).len()
    }

    /// Scripted outcomes not yet consumed.
    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }
}

impl Default for MockAnalysisBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnalysisBackend for MockAnalysisBackend {
    async fn generate(
        &self,
        system: &str,
        prompt: &str,
        document: &AnalysisDocument,
    ) -> Result<String> {
        lock(&self.call_log).push(MockCall {
            system: system.to_string(),
            prompt: prompt.to_string(),
            mime_type: document.mime_type.clone(),
            bytes_len: document.bytes.len(),
        });

        let next = lock(&self.script).pop_front();
        match next {
            None => Ok(self.default_response.to_string()),
            Some(MockOutcome::Respond { text, delay }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(text)
            }
            Some(MockOutcome::Fail(message)) => Err(Error::Inference(message)),
            Some(MockOutcome::Hang) => std::future::pending().await,
        }
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.healthy)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
