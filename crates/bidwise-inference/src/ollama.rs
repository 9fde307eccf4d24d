//! Ollama analysis backend for self-hosted vision models (e.g. qwen2.5vl, llava).
//!
//! Images go in the `images` array; UTF-8 text documents are inlined into the
//! prompt. Other binary formats (PDF, Office) are rejected since Ollama cannot
//! read them directly.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use bidwise_core::{AnalysisBackend, AnalysisDocument, Error, Result};

use crate::config::OllamaConfig;

/// Ollama-based analysis backend.
pub struct OllamaAnalysisBackend {
    config: OllamaConfig,
    client: reqwest::Client,
}

impl OllamaAnalysisBackend {
    pub fn new(config: OllamaConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn build_request(
        &self,
        system: &str,
        prompt: &str,
        document: &AnalysisDocument,
    ) -> Result<OllamaGenerateRequest> {
        let (prompt, images) = if document.is_image() {
            let image_b64 = base64::engine::general_purpose::STANDARD.encode(&document.bytes);
            (prompt.to_string(), vec![image_b64])
        } else if document.mime_type.starts_with("text/")
            || document.mime_type == "application/json"
        {
            let text = std::str::from_utf8(&document.bytes).map_err(|_| {
                Error::InvalidInput(format!(
                    "{} document is not valid UTF-8",
                    document.mime_type
                ))
            })?;
            (format!("{}\n\nDocument content:\n{}", prompt, text), Vec::new())
        } else {
            return Err(Error::InvalidInput(format!(
                "Ollama backend cannot read {} documents",
                document.mime_type
            )));
        };

        Ok(OllamaGenerateRequest {
            model: self.config.model.clone(),
            system: system.to_string(),
            prompt,
            images,
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
            },
        })
    }
}

#[derive(Serialize)]
struct OllamaGenerateRequest {
    model: String,
    system: String,
    prompt: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>, // base64 encoded
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[async_trait]
impl AnalysisBackend for OllamaAnalysisBackend {
    async fn generate(
        &self,
        system: &str,
        prompt: &str,
        document: &AnalysisDocument,
    ) -> Result<String> {
        let start = Instant::now();
        let request = self.build_request(system, prompt, document)?;

        let url = format!("{}/api/generate", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout {
                        operation: "ollama generate".to_string(),
                        secs: self.config.timeout_secs,
                    }
                } else {
                    Error::Inference(format!("Ollama request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Inference(format!(
                "Ollama API returned {}: {}",
                status, body
            )));
        }

        let result: OllamaGenerateResponse = response.json().await.map_err(|e| {
            Error::Inference(format!("Failed to parse Ollama response: {}", e))
        })?;

        debug!(
            subsystem = "inference",
            component = "ollama",
            model = %self.config.model,
            mime_type = %document.mime_type,
            response_len = result.response.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Ollama generation complete"
        );
        Ok(result.response)
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.config.base_url.trim_end_matches('/'));
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
