//! Error type for rule store operations.

use crate::validation::ValidationIssue;

/// Errors that can occur during rule CRUD and persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The rule failed validation and was not persisted.
    #[error("Validation failed: {}", join_issues(.0))]
    Validation(Vec<ValidationIssue>),

    #[error("Rule not found: {0}")]
    NotFound(String),

    #[error("Rule with name '{0}' already exists")]
    DuplicateName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
