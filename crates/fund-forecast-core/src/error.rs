use thiserror::Error;

use crate::validation::ValidationIssue;

#[derive(Debug, Error)]
pub enum CalculationError {
    #[error("Configuration has {} blocking validation error(s): {}", count_errors(.issues), first_error(.issues))]
    Validation { issues: Vec<ValidationIssue> },

    #[error("Stage '{stage}' is missing from the {matrix}")]
    MissingStage { stage: String, matrix: String },

    #[error("Invalid input: {field} — {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CalculationError {
    fn from(e: serde_json::Error) -> Self {
        CalculationError::Serialization(e.to_string())
    }
}

fn count_errors(issues: &[ValidationIssue]) -> usize {
    issues.iter().filter(|i| i.is_error()).count()
}

fn first_error(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .find(|i| i.is_error())
        .map(|i| format!("{} ({})", i.message, i.field))
        .unwrap_or_default()
}
