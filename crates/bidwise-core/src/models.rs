//! Data model for the analysis queue and the files it analyzes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// ANALYSIS TYPES
// =============================================================================

/// Kind of compliance document being analyzed. Selects the prompt pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    /// Document answering a solicitation checklist item
    ChecklistDocument,
    /// Financial statements, bonding letters, bank references
    FinancialDocument,
    /// Licenses, certifications, set-aside eligibility letters
    CertificationDocument,
    /// Anything else
    #[default]
    Other,
}

impl AnalysisType {
    /// All analysis types, in declaration order.
    pub const ALL: [AnalysisType; 4] = [
        AnalysisType::ChecklistDocument,
        AnalysisType::FinancialDocument,
        AnalysisType::CertificationDocument,
        AnalysisType::Other,
    ];

    /// Stable string tag used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::ChecklistDocument => "checklist_document",
            AnalysisType::FinancialDocument => "financial_document",
            AnalysisType::CertificationDocument => "certification_document",
            AnalysisType::Other => "other",
        }
    }

    /// Parse a stored tag, mapping anything unrecognised to `Other`.
    pub fn from_tag(tag: &str) -> Self {
        tag.parse().unwrap_or(AnalysisType::Other)
    }
}

impl std::fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AnalysisType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "checklist_document" => Ok(Self::ChecklistDocument),
            "financial_document" => Ok(Self::FinancialDocument),
            "certification_document" => Ok(Self::CertificationDocument),
            "other" => Ok(Self::Other),
            _ => Err(format!("Invalid analysis type: {}", s)),
        }
    }
}

// =============================================================================
// QUEUE
// =============================================================================

/// Lifecycle state of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    /// `completed` and `failed` allow no further automatic transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid queue status: {}", s)),
        }
    }
}

/// A persisted unit of deferred analysis work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: Uuid,
    pub file_id: Uuid,
    pub analysis_type: AnalysisType,
    pub status: QueueStatus,
    pub priority: i32,
    pub attempts: i32,
    pub max_attempts: i32,
    pub result_data: Option<AnalysisResult>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set when claimed, cleared on requeue.
    pub started_at: Option<DateTime<Utc>>,
    /// Set only on terminal success.
    pub processed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// True once no attempts remain.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Queued or processing.
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Request to queue a file for analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    pub file_id: Uuid,
    #[serde(default)]
    pub analysis_type: AnalysisType,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub max_attempts: Option<i32>,
}

impl EnqueueRequest {
    pub fn new(file_id: Uuid, analysis_type: AnalysisType) -> Self {
        Self {
            file_id,
            analysis_type,
            priority: None,
            max_attempts: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn effective_priority(&self) -> i32 {
        self.priority
            .unwrap_or(crate::defaults::QUEUE_DEFAULT_PRIORITY)
    }

    pub fn effective_max_attempts(&self) -> i32 {
        self.max_attempts
            .unwrap_or(crate::defaults::QUEUE_MAX_ATTEMPTS)
            .max(1)
    }
}

/// Queue statistics summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
}

// =============================================================================
// FILES
// =============================================================================

/// Analysis status projected from the owning queue item onto the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiAnalysisStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AiAnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiAnalysisStatus::Pending => "pending",
            AiAnalysisStatus::Processing => "processing",
            AiAnalysisStatus::Completed => "completed",
            AiAnalysisStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for AiAnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AiAnalysisStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid analysis status: {}", s)),
        }
    }
}

/// An uploaded compliance document and its latest analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: Uuid,
    pub company_id: Uuid,
    pub checklist_item_id: Option<String>,
    pub file_path: String,
    pub file_type: String,
    pub file_name: Option<String>,
    pub ai_analysis: Option<AnalysisResult>,
    /// `None` until the file is first queued.
    pub ai_analysis_status: Option<AiAnalysisStatus>,
    pub ai_analysis_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Request for registering an uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFileRecord {
    pub company_id: Uuid,
    pub checklist_item_id: Option<String>,
    pub file_path: String,
    pub file_type: String,
    pub file_name: Option<String>,
}

/// A document as handed to the analysis service.
#[derive(Debug, Clone)]
pub struct AnalysisDocument {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl AnalysisDocument {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

// =============================================================================
// ANALYSIS RESULT
// =============================================================================

/// Overall compliance verdict for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Compliant,
    PartiallyCompliant,
    NonCompliant,
    #[default]
    Unknown,
}

impl ComplianceStatus {
    /// Lenient label parsing: case, spaces and hyphens are ignored.
    pub fn from_label(label: &str) -> Self {
        let normalized: String = label
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        match normalized.as_str() {
            "compliant" => Self::Compliant,
            "partially_compliant" | "partial" => Self::PartiallyCompliant,
            "non_compliant" | "noncompliant" | "not_compliant" => Self::NonCompliant,
            _ => Self::Unknown,
        }
    }
}

/// Facts pulled out of the document, grouped by category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedData {
    #[serde(default)]
    pub licenses: Vec<String>,
    #[serde(default)]
    pub certifications: Vec<String>,
    #[serde(default)]
    pub insurance: Vec<String>,
    #[serde(default)]
    pub financial_info: Vec<String>,
}

impl ExtractedData {
    pub fn is_empty(&self) -> bool {
        self.licenses.is_empty()
            && self.certifications.is_empty()
            && self.insurance.is_empty()
            && self.financial_info.is_empty()
    }
}

/// Structured compliance findings for one document.
///
/// Produced fresh by each successful analysis and never mutated afterwards;
/// a newer result replaces the older one on the file record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub summary: String,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub compliance_status: ComplianceStatus,
    #[serde(default)]
    pub missing_requirements: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub confidence_score: f64,
    #[serde(default)]
    pub extracted_data: ExtractedData,
    pub analysis_timestamp: DateTime<Utc>,
    pub file_type: String,
    pub checklist_item: Option<String>,
    pub analysis_type: AnalysisType,
    /// Raw service output, kept when the structured parse failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_analysis: Option<String>,
}
