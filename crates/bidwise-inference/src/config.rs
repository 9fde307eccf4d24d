//! Analysis backend configuration.
//!
//! Configuration comes from environment variables:
//! - `ANALYSIS_PROVIDER`: `gemini` (default) or `ollama`
//! - `GEMINI_API_KEY`, `GEMINI_MODEL`, `GEMINI_BASE_URL`
//! - `OLLAMA_BASE` (or `OLLAMA_URL`), `OLLAMA_ANALYSIS_MODEL`
//! - `ANALYSIS_REQUEST_TIMEOUT_SECS`: HTTP client timeout for either provider

use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use bidwise_core::defaults;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid provider: {0}")]
    InvalidProvider(String),

    #[error("Missing API key for provider: {0}")]
    MissingApiKey(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Which analysis service to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisProvider {
    #[default]
    Gemini,
    Ollama,
}

impl FromStr for AnalysisProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            _ => Err(ConfigError::InvalidProvider(s.to_string())),
        }
    }
}

impl fmt::Display for AnalysisProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
            Self::Ollama => write!(f, "ollama"),
        }
    }
}

/// Gemini backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Base URL of the Generative Language API.
    pub base_url: String,
    /// API key; required.
    pub api_key: Option<String>,
    /// Model id, e.g. `gemini-1.5-flash`.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// HTTP request timeout.
    pub timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::GEMINI_URL.to_string(),
            api_key: None,
            model: defaults::GEMINI_MODEL.to_string(),
            temperature: defaults::ANALYSIS_TEMPERATURE,
            timeout_secs: defaults::ANALYSIS_TIMEOUT_SECS,
        }
    }
}

impl GeminiConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        validate_url("Gemini", &self.base_url)?;
        if self.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            return Err(ConfigError::MissingApiKey("gemini".to_string()));
        }
        if self.model.is_empty() {
            return Err(ConfigError::Validation(
                "Gemini model cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Ollama backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API.
    pub base_url: String,
    /// Vision-capable model used for analysis.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// HTTP request timeout.
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::OLLAMA_URL.to_string(),
            model: defaults::OLLAMA_ANALYSIS_MODEL.to_string(),
            temperature: defaults::ANALYSIS_TEMPERATURE,
            timeout_secs: defaults::ANALYSIS_TIMEOUT_SECS,
        }
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        validate_url("Ollama", &self.base_url)?;
        if self.model.is_empty() {
            return Err(ConfigError::Validation(
                "Ollama model cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_url(name: &str, url: &str) -> ConfigResult<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "{} base_url must start with http:// or https://, got: {}",
            name, url
        )));
    }
    Ok(())
}

/// Top-level analysis backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub provider: AnalysisProvider,
    pub gemini: GeminiConfig,
    pub ollama: OllamaConfig,
}

impl AnalysisConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// An unrecognised `ANALYSIS_PROVIDER` falls back to the default provider
    /// with a debug log; `validate` reports the remaining problems.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(provider) = env::var("ANALYSIS_PROVIDER") {
            match provider.parse() {
                Ok(p) => config.provider = p,
                Err(e) => debug!(error = %e, "Ignoring ANALYSIS_PROVIDER"),
            }
        }

        if let Ok(key) = env::var("GEMINI_API_KEY") {
            config.gemini.api_key = Some(key);
        }
        if let Ok(model) = env::var("GEMINI_MODEL") {
            config.gemini.model = model;
        }
        if let Ok(url) = env::var("GEMINI_BASE_URL") {
            config.gemini.base_url = url;
        }

        if let Ok(url) = env::var("OLLAMA_BASE").or_else(|_| env::var("OLLAMA_URL")) {
            config.ollama.base_url = url;
        }
        if let Ok(model) = env::var("OLLAMA_ANALYSIS_MODEL") {
            config.ollama.model = model;
        }

        if let Some(secs) = env::var("ANALYSIS_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.gemini.timeout_secs = secs;
            config.ollama.timeout_secs = secs;
        }

        config
    }

    /// Use the given provider.
    pub fn with_provider(mut self, provider: AnalysisProvider) -> Self {
        self.provider = provider;
        self
    }

    /// Set the Gemini API key.
    pub fn with_gemini_api_key(mut self, key: impl Into<String>) -> Self {
        self.gemini.api_key = Some(key.into());
        self
    }

    /// Validate the selected provider's configuration only.
    pub fn validate(&self) -> ConfigResult<()> {
        match self.provider {
            AnalysisProvider::Gemini => self.gemini.validate(),
            AnalysisProvider::Ollama => self.ollama.validate(),
        }
    }
}
