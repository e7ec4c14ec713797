//! Rule validation with structured issues.
//!
//! Checks a [`Rule`] (after any patch has been merged) for a name, at least one
//! condition, at least one tag action and a parseable cron schedule. Returns a
//! [`ValidationResult`] with errors (block save) and warnings (advisory).

mod rule_checks;
mod schedule_checks;

use serde::{Deserialize, Serialize};

use crate::schema::Rule;

// ── Result types ────────────────────────────────────────────────────

/// Overall validation outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

/// A single finding, located by a JSON-path-like field, e.g. `"schedule.cron"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

impl ValidationResult {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub(crate) fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            path: path.into(),
            message: message.into(),
        });
    }

    pub(crate) fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationIssue {
            path: path.into(),
            message: message.into(),
        });
    }
}

// ── Public API ──────────────────────────────────────────────────────

/// Validate a rule as it would be stored.
pub fn validate_rule(rule: &Rule) -> ValidationResult {
    let mut result = ValidationResult::new();
    rule_checks::validate_name(rule, &mut result);
    rule_checks::validate_conditions(rule, &mut result);
    rule_checks::validate_actions(rule, &mut result);
    schedule_checks::validate_schedule(rule, &mut result);
    result
}

/// Validate a standalone 5-field cron expression.
pub fn validate_cron(expr: &str) -> ValidationResult {
    let mut result = ValidationResult::new();
    schedule_checks::validate_cron(expr, &mut result);
    result
}
