//! Gemini analysis backend.
//!
//! Calls `POST {base}/v1beta/models/{model}:generateContent` with the document
//! passed inline as base64 alongside the user prompt.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use bidwise_core::{AnalysisBackend, AnalysisDocument, Error, Result};

use crate::config::{ConfigError, ConfigResult, GeminiConfig};

/// Google Gemini backend.
pub struct GeminiBackend {
    config: GeminiConfig,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(config: GeminiConfig) -> ConfigResult<Self> {
        config.validate()?;
        let api_key = config.api_key.clone().unwrap_or_default();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;
        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    fn build_request(
        &self,
        system: &str,
        prompt: &str,
        document: &AnalysisDocument,
    ) -> GenerateContentRequest {
        let data = base64::engine::general_purpose::STANDARD.encode(&document.bytes);
        GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part::Text {
                    text: system.to_string(),
                }],
            },
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: document.mime_type.clone(),
                            data,
                        },
                    },
                    Part::Text {
                        text: prompt.to_string(),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate's parts.
    fn into_text(self) -> Result<String> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(Error::Inference(format!("prompt blocked: {}", reason)));
        }
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| Error::Inference("response had no candidates".to_string()))?;

        let text: String = candidate
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|part| match part {
                Part::Text { text } => Some(text),
                Part::InlineData { .. } => None,
            })
            .collect();

        if text.is_empty() {
            if let Some(reason) = candidate.finish_reason {
                debug!(finish_reason = %reason, "Gemini candidate carried no text");
            }
        }
        Ok(text)
    }
}

#[async_trait]
impl AnalysisBackend for GeminiBackend {
    async fn generate(
        &self,
        system: &str,
        prompt: &str,
        document: &AnalysisDocument,
    ) -> Result<String> {
        let start = Instant::now();
        let request = self.build_request(system, prompt, document);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout {
                        operation: "gemini generateContent".to_string(),
                        secs: self.config.timeout_secs,
                    }
                } else {
                    Error::Inference(format!("Gemini request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(
                subsystem = "inference",
                component = "gemini",
                status = status.as_u16(),
                "Gemini returned an error status"
            );
            return Err(Error::Inference(format!(
                "Gemini API returned {}: {}",
                status, body
            )));
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            Error::Inference(format!("Failed to parse Gemini response: {}", e))
        })?;
        let text = parsed.into_text()?;

        debug!(
            subsystem = "inference",
            component = "gemini",
            model = %self.config.model,
            mime_type = %document.mime_type,
            input_bytes = document.bytes.len(),
            response_len = text.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Gemini generation complete"
        );
        Ok(text)
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!(
            "{}/v1beta/models/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );
        match self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
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
