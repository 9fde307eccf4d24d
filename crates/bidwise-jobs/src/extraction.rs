//! Turning raw analysis service output into an [`AnalysisResult`].
//!
//! Two paths, both pure:
//! - [`parse_structured`] reads the JSON object the prompts ask for, tolerating
//!   code fences and surrounding prose.
//! - [`fallback`] wraps unparseable prose so the analysis is never lost.
//!
//! [`extract`] tries the first and falls back to the second. Only empty output
//! is an error.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use bidwise_core::defaults::{
    DEFAULT_CONFIDENCE, FALLBACK_CONFIDENCE, FALLBACK_MAX_FINDINGS, FALLBACK_MIN_SENTENCE_CHARS,
};
use bidwise_core::{AnalysisResult, AnalysisType, ComplianceStatus, ExtractedData};

/// Why structured parsing failed. Always recoverable through [`fallback`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("no JSON object found in response")]
    NoJsonObject,
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("JSON object has no summary")]
    MissingSummary,
}

/// The service returned nothing usable.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("analysis service returned an empty response")]
pub struct EmptyResult;

/// Details about the analysed file stamped onto every result.
#[derive(Debug, Clone)]
pub struct ResultMetadata {
    pub file_type: String,
    pub checklist_item: Option<String>,
    pub analysis_type: AnalysisType,
    pub analyzed_at: DateTime<Utc>,
}

impl ResultMetadata {
    pub fn new(
        file_type: impl Into<String>,
        checklist_item: Option<String>,
        analysis_type: AnalysisType,
    ) -> Self {
        Self {
            file_type: file_type.into(),
            checklist_item,
            analysis_type,
            analyzed_at: Utc::now(),
        }
    }
}

/// Model output before normalisation. Accepts camelCase or snake_case keys.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawAnalysis {
    summary: Option<String>,
    #[serde(alias = "key_findings")]
    key_findings: JsonValue,
    #[serde(alias = "compliance_status")]
    compliance_status: Option<String>,
    #[serde(alias = "missing_requirements")]
    missing_requirements: JsonValue,
    recommendations: JsonValue,
    #[serde(alias = "confidence_score", alias = "confidence")]
    confidence_score: Option<f64>,
    #[serde(alias = "extracted_data")]
    extracted_data: RawExtractedData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawExtractedData {
    licenses: JsonValue,
    certifications: JsonValue,
    insurance: JsonValue,
    #[serde(alias = "financial_info")]
    financial_info: JsonValue,
}

/// Flatten a JSON value into a list of non-empty strings.
///
/// Strings pass through, arrays are flattened one level, objects and numbers
/// are rendered as compact JSON.
fn string_list(value: JsonValue) -> Vec<String> {
    fn render(v: JsonValue) -> Option<String> {
        match v {
            JsonValue::Null => None,
            JsonValue::String(s) => {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            }
            other => Some(other.to_string()),
        }
    }
    match value {
        JsonValue::Array(items) => items.into_iter().filter_map(render).collect(),
        other => render(other).into_iter().collect(),
    }
}

/// Locate the JSON object in `raw`: the whole text, a fenced block, or the
/// outermost `{...}` span.
fn json_candidate(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let unfenced = trimmed
        .trim_start_matches("```json")
        .trim_start_matches("```JSON")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if unfenced.starts_with('{') && unfenced.ends_with('}') {
        return Some(unfenced);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// Parse the structured JSON response.
///
/// When the object carries no confidence score the heuristic over the raw
/// text is used. Scores are clamped to `[0, 1]`.
pub fn parse_structured(raw: &str, meta: &ResultMetadata) -> Result<AnalysisResult, ParseError> {
    let candidate = json_candidate(raw).ok_or(ParseError::NoJsonObject)?;
    let parsed: RawAnalysis =
        serde_json::from_str(candidate).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    let summary = parsed
        .summary
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(ParseError::MissingSummary)?;

    let confidence_score = parsed
        .confidence_score
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or_else(|| confidence_heuristic(raw));

    Ok(AnalysisResult {
        summary,
        key_findings: string_list(parsed.key_findings),
        compliance_status: parsed
            .compliance_status
            .as_deref()
            .map(ComplianceStatus::from_label)
            .unwrap_or_default(),
        missing_requirements: string_list(parsed.missing_requirements),
        recommendations: string_list(parsed.recommendations),
        confidence_score,
        extracted_data: ExtractedData {
            licenses: string_list(parsed.extracted_data.licenses),
            certifications: string_list(parsed.extracted_data.certifications),
            insurance: string_list(parsed.extracted_data.insurance),
            financial_info: string_list(parsed.extracted_data.financial_info),
        },
        analysis_timestamp: meta.analyzed_at,
        file_type: meta.file_type.clone(),
        checklist_item: meta.checklist_item.clone(),
        analysis_type: meta.analysis_type,
        raw_analysis: None,
    })
}

// Terminal punctuation ends a sentence even without a following space.
// Line breaks alone do not.
static SENTENCE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]+\s*").unwrap());

/// Wrap free-form output as a result.
///
/// The raw text becomes the summary verbatim and is kept in `raw_analysis`.
/// Key findings are the first sentences longer than the minimum length.
pub fn fallback(raw: &str, meta: &ResultMetadata) -> AnalysisResult {
    let key_findings = SENTENCE_BREAK
        .split(raw)
        .map(str::trim)
        .filter(|s| s.chars().count() > FALLBACK_MIN_SENTENCE_CHARS)
        .take(FALLBACK_MAX_FINDINGS)
        .map(String::from)
        .collect();

    AnalysisResult {
        summary: raw.to_string(),
        key_findings,
        compliance_status: ComplianceStatus::Unknown,
        missing_requirements: Vec::new(),
        recommendations: Vec::new(),
        confidence_score: FALLBACK_CONFIDENCE,
        extracted_data: ExtractedData::default(),
        analysis_timestamp: meta.analyzed_at,
        file_type: meta.file_type.clone(),
        checklist_item: meta.checklist_item.clone(),
        analysis_type: meta.analysis_type,
        raw_analysis: Some(raw.to_string()),
    }
}

/// Structured parse with fallback. Fails only on empty output.
pub fn extract(raw: &str, meta: &ResultMetadata) -> Result<AnalysisResult, EmptyResult> {
    if raw.trim().is_empty() {
        return Err(EmptyResult);
    }
    match parse_structured(raw, meta) {
        Ok(result) => Ok(result),
        Err(e) => {
            tracing::debug!(
                subsystem = "jobs",
                component = "extraction",
                reason = %e,
                raw_len = raw.len(),
                "Structured parse failed, using fallback"
            );
            Ok(fallback(raw, meta))
        }
    }
}

static CONFIDENCE_CLASSES: Lazy<Vec<(Regex, f64)>> = Lazy::new(|| {
    [
        (r"(?i)\b(definitely|certainly|clearly|obviously)\b", 0.9),
        (r"(?i)\b(likely|probably|appears|seems)\b", 0.7),
        (r"(?i)\b(possibly|might|unclear)\b", 0.5),
        (r"(?i)\b(unable to|cannot|not visible)\b", 0.2),
    ]
    .into_iter()
    .map(|(pattern, score)| (Regex::new(pattern).unwrap(), score))
    .collect()
});

/// Estimate confidence from hedging language.
///
/// The highest score among the matched word classes wins; with no match the
/// default applies.
pub fn confidence_heuristic(text: &str) -> f64 {
    CONFIDENCE_CLASSES
        .iter()
        .filter(|(re, _)| re.is_match(text))
        .map(|(_, score)| *score)
        .fold(None, |best: Option<f64>, s| Some(best.map_or(s, |b| b.max(s))))
        .unwrap_or(DEFAULT_CONFIDENCE)
}
