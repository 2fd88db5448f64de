//! Core data types shared by the registry, the correction workflow, and the
//! ingestion pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GatewayError;

/// Which corpus a document lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorpusType {
    Primary,
    Correction,
}

impl CorpusType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorpusType::Primary => "primary",
            CorpusType::Correction => "correction",
        }
    }
}

impl fmt::Display for CorpusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorpusType {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(CorpusType::Primary),
            "correction" => Ok(CorpusType::Correction),
            other => Err(GatewayError::Validation(format!(
                "unknown corpus type '{}', expected primary or correction",
                other
            ))),
        }
    }
}

/// Coarse document category assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    HR,
    Finance,
    Compliance,
    Planning,
    Security,
    System,
    Other,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::HR,
        Category::Finance,
        Category::Compliance,
        Category::Planning,
        Category::Security,
        Category::System,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::HR => "HR",
            Category::Finance => "Finance",
            Category::Compliance => "Compliance",
            Category::Planning => "Planning",
            Category::Security => "Security",
            Category::System => "System",
            Category::Other => "Other",
        }
    }

    pub fn parse(label: &str) -> Option<Category> {
        Category::ALL.into_iter().find(|c| c.as_str() == label)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance resolved for a file about to be registered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedMetadata {
    pub version_group: String,
    /// `YYYYMMDD`, or empty when no date could be resolved.
    pub version_date: String,
    pub size: Option<i64>,
    /// Unix seconds.
    pub created_at: Option<i64>,
    /// Unix seconds.
    pub modified_at: Option<i64>,
}

/// A registry row.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub file_name: String,
    pub display_name: String,
    pub version_group: String,
    pub version_date: String,
    pub is_latest: bool,
    pub corpus_type: CorpusType,
    pub category: Option<Category>,
    pub size: Option<i64>,
    pub created_at: Option<i64>,
    pub modified_at: Option<i64>,
    pub store_ref: Option<String>,
    pub uploaded_by: Option<String>,
}

/// Input to [`VersionRegistry::commit`](crate::registry::VersionRegistry::commit).
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub file_name: String,
    pub display_name: String,
    pub metadata: ResolvedMetadata,
    pub category: Option<Category>,
    pub store_ref: Option<String>,
    pub uploaded_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrectionStatus {
    Pending,
    Approved,
    Rejected,
    /// Reachable only from `Approved`; nothing transitions into it yet.
    Superseded,
}

impl CorrectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionStatus::Pending => "pending",
            CorrectionStatus::Approved => "approved",
            CorrectionStatus::Rejected => "rejected",
            CorrectionStatus::Superseded => "superseded",
        }
    }
}

impl fmt::Display for CorrectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorrectionStatus {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CorrectionStatus::Pending),
            "approved" => Ok(CorrectionStatus::Approved),
            "rejected" => Ok(CorrectionStatus::Rejected),
            "superseded" => Ok(CorrectionStatus::Superseded),
            other => Err(GatewayError::Validation(format!(
                "unknown correction status '{}'",
                other
            ))),
        }
    }
}

/// Structured fields pulled out of a user's feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractedFields {
    pub original_question: String,
    pub ai_wrong_answer: String,
    pub user_correction: String,
    pub extracted_fact: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize)]
pub struct Correction {
    pub id: String,
    pub session_id: Option<String>,
    pub submitted_by: String,
    pub status: CorrectionStatus,
    pub original_question: String,
    pub ai_wrong_answer: String,
    pub user_correction: String,
    pub extracted_fact: String,
    pub confidence: f64,
    pub correction_text: String,
    pub store_document_ref: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<i64>,
    pub reject_reason: Option<String>,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corpus_type_round_trip_strings() {
        assert_eq!("primary".parse::<CorpusType>().unwrap(), CorpusType::Primary);
        assert_eq!(CorpusType::Correction.to_string(), "correction");
        assert!("archive".parse::<CorpusType>().is_err());
    }

    #[test]
    fn test_category_parse_is_exact() {
        assert_eq!(Category::parse("HR"), Some(Category::HR));
        assert_eq!(Category::parse("hr"), None);
    }

    #[test]
    fn test_extracted_fields_reject_unknown_keys() {
        let json = r#"{"original_question":"q","ai_wrong_answer":"a","user_correction":"c","extracted_fact":"f","mood":"x"}"#;
        assert!(serde_json::from_str::<ExtractedFields>(json).is_err());
    }
}
