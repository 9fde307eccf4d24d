//! Prompt selection for document analysis.
//!
//! Each [`AnalysisType`] maps to a system instruction and a user prompt
//! template. The templates share one JSON response shape so the extractor
//! does not depend on the analysis type.

use bidwise_core::AnalysisType;

/// JSON shape every prompt asks the model to return.
const RESPONSE_FORMAT: &str = r#"Respond with a single JSON object and nothing else:
{
  "summary": "2-3 sentence overview of the document",
  "keyFindings": ["finding", "..."],
  "complianceStatus": "compliant | partially_compliant | non_compliant | unknown",
  "missingRequirements": ["requirement the document does not satisfy", "..."],
  "recommendations": ["action the contractor should take", "..."],
  "confidenceScore": 0.0,
  "extractedData": {
    "licenses": ["license type and number", "..."],
    "certifications": ["certification and issuing body", "..."],
    "insurance": ["policy type, carrier and limits", "..."],
    "financialInfo": ["figure and period", "..."]
  }
}
confidenceScore is between 0 and 1. Use empty arrays when nothing applies."#;

const CHECKLIST_SYSTEM: &str = "You are a government contracting compliance analyst. \
You review documents that contractors upload to satisfy a solicitation checklist and judge \
whether each document meets the requirement it was uploaded for. Be precise and cite what \
the document actually shows.";

const CHECKLIST_USER: &str = "Analyze this {file_type} document submitted for checklist \
item \"{checklist_item}\". Determine whether it satisfies that requirement, note expiration \
dates, signatures and issuing authorities, and list anything missing.";

const FINANCIAL_SYSTEM: &str = "You are a financial analyst reviewing contractor financial \
documents for government bid eligibility: financial statements, bonding capacity letters, \
bank references and tax records.";

const FINANCIAL_USER: &str = "Analyze this {file_type} financial document (checklist item: \
{checklist_item}). Extract revenue, net worth, working capital, bonding limits and the \
periods they cover. Flag unaudited statements, stale figures and missing signatures.";

const CERTIFICATION_SYSTEM: &str = "You are a compliance specialist verifying licenses, \
certifications and set-aside eligibility (8(a), HUBZone, SDVOSB, WOSB) for government \
contractors.";

const CERTIFICATION_USER: &str = "Analyze this {file_type} certification document \
(checklist item: {checklist_item}). Identify the certifying body, certificate or license \
number, holder name, issue and expiration dates, and whether it is currently valid.";

const OTHER_SYSTEM: &str = "You are a document analyst supporting government contractors \
preparing bid packages. Summarize documents and point out anything relevant to compliance.";

const OTHER_USER: &str = "Analyze this {file_type} document (checklist item: \
{checklist_item}). Summarize its contents and note any compliance-relevant details.";

/// A system instruction plus the filled-in user prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

/// Pick the prompt pair for `analysis_type` and fill in the file's details.
///
/// A missing checklist item renders as `unspecified`.
pub fn select_prompt(
    analysis_type: AnalysisType,
    checklist_item: Option<&str>,
    file_type: &str,
) -> PromptPair {
    let (system, template) = match analysis_type {
        AnalysisType::ChecklistDocument => (CHECKLIST_SYSTEM, CHECKLIST_USER),
        AnalysisType::FinancialDocument => (FINANCIAL_SYSTEM, FINANCIAL_USER),
        AnalysisType::CertificationDocument => (CERTIFICATION_SYSTEM, CERTIFICATION_USER),
        AnalysisType::Other => (OTHER_SYSTEM, OTHER_USER),
    };

    let checklist_item = checklist_item
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("unspecified");
    let file_type = match file_type.trim() {
        "" => "uploaded",
        t => t,
    };

    let user = template
        .replace("{file_type}", file_type)
        .replace("{checklist_item}", checklist_item);

    PromptPair {
        system: system.to_string(),
        user: format!("{}\n\n{}", user, RESPONSE_FORMAT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_type_has_distinct_system_prompt() {
        let systems: std::collections::HashSet<String> = AnalysisType::ALL
            .iter()
            .map(|t| select_prompt(*t, None, "pdf").system)
            .collect();
        assert_eq!(systems.len(), AnalysisType::ALL.len());
    }

    #[test]
    fn test_placeholders_are_filled() {
        let pair = select_prompt(
            AnalysisType::ChecklistDocument,
            Some("sam-registration"),
            "pdf",
        );
        assert!(pair.user.contains("pdf document"));
        assert!(pair.user.contains("\"sam-registration\""));
        assert!(!pair.user.contains("{file_type}"));
        assert!(!pair.user.contains("{checklist_item}"));
        assert!(pair.user.contains("\"confidenceScore\""));
    }

    #[test]
    fn test_missing_checklist_item() {
        let pair = select_prompt(AnalysisType::FinancialDocument, Some("  "), "xlsx");
        assert!(pair.user.contains("checklist item: unspecified"));

        let pair = select_prompt(AnalysisType::Other, None, "");
        assert!(pair.user.contains("this uploaded document"));
    }

    #[test]
    fn test_certification_prompt_mentions_set_asides() {
        let pair = select_prompt(AnalysisType::CertificationDocument, None, "png");
        assert!(pair.system.contains("HUBZone"));
    }
}
