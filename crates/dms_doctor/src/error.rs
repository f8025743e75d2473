//! Error types for the diagnostic engine.
//!
//! Only caller-side misuse and a completely empty collection are errors.
//! Malformed telemetry and missing signals are recorded as meta evidence
//! instead, and an inconclusive diagnosis is a normal report.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DoctorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid rule '{rule_id}': {reason}")]
    InvalidRule { rule_id: String, reason: String },

    #[error("Duplicate rule id: {0}")]
    DuplicateRule(String),

    #[error("Rule '{rule_id}' references unknown cause '{cause_id}'")]
    UnknownCause { rule_id: String, cause_id: String },

    #[error("No evidence collected for task '{task_id}': every telemetry fetch failed or returned nothing")]
    NoEvidenceCollected { task_id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl DoctorError {
    pub fn code(&self) -> i32 {
        match self {
            DoctorError::Configuration(_) => -32010,
            DoctorError::InvalidRule { .. } => -32011,
            DoctorError::DuplicateRule(_) => -32012,
            DoctorError::UnknownCause { .. } => -32013,
            DoctorError::NoEvidenceCollected { .. } => -32020,
            DoctorError::Io(_) => -32006,
            DoctorError::Json(_) => -32700,
            DoctorError::TomlParse(_) => -32701,
        }
    }

    /// True for errors caused by the caller's configuration or rule library
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DoctorError::Configuration(_)
                | DoctorError::InvalidRule { .. }
                | DoctorError::DuplicateRule(_)
                | DoctorError::UnknownCause { .. }
                | DoctorError::TomlParse(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DoctorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            DoctorError::Configuration("x".into()),
            DoctorError::InvalidRule { rule_id: "r".into(), reason: "bad".into() },
            DoctorError::DuplicateRule("r".into()),
            DoctorError::UnknownCause { rule_id: "r".into(), cause_id: "c".into() },
            DoctorError::NoEvidenceCollected { task_id: "t".into() },
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_no_evidence_is_not_configuration() {
        let err = DoctorError::NoEvidenceCollected { task_id: "task-1".into() };
        assert!(!err.is_configuration());
        assert!(err.to_string().contains("task-1"));
        assert!(DoctorError::Configuration("min_confidence".into()).is_configuration());
    }
}
