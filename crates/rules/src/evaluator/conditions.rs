//! Condition matching against resource records.
//!
//! A [`ConditionGroup`] is compiled once per evaluation so regex patterns are
//! built a single time, then matched against each resource independently.

use proxtag_core::Resource;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::schema::{Condition, ConditionGroup, LogicalOperator, Operator};

// ── Compiled form ───────────────────────────────────────────────────

pub(crate) struct CompiledGroup<'a> {
    operator: LogicalOperator,
    conditions: Vec<CompiledCondition<'a>>,
}

struct CompiledCondition<'a> {
    field: &'a str,
    test: Test,
}

enum Test {
    Equals(String),
    NotEquals(String),
    Contains(String),
    NotContains(String),
    /// Comparison value failed numeric coercion; never matches.
    Numeric(Operator, Option<f64>),
    /// `None` when the pattern did not compile; never matches.
    Regex(Option<Regex>),
    In(Vec<String>),
    NotIn(Vec<String>),
}

impl<'a> CompiledGroup<'a> {
    pub(crate) fn compile(group: &'a ConditionGroup) -> Self {
        Self {
            operator: group.operator,
            conditions: group.conditions.iter().map(CompiledCondition::compile).collect(),
        }
    }

    /// An empty group never matches.
    pub(crate) fn matches(&self, resource: &Resource) -> bool {
        if self.conditions.is_empty() {
            return false;
        }
        match self.operator {
            LogicalOperator::And => self.conditions.iter().all(|c| c.matches(resource)),
            LogicalOperator::Or => self.conditions.iter().any(|c| c.matches(resource)),
        }
    }
}

impl<'a> CompiledCondition<'a> {
    fn compile(condition: &'a Condition) -> Self {
        let value = &condition.value;
        let lowered = || string_form(value).to_lowercase();
        let test = match condition.operator {
            Operator::Equals => Test::Equals(lowered()),
            Operator::NotEquals => Test::NotEquals(lowered()),
            Operator::Contains => Test::Contains(lowered()),
            Operator::NotContains => Test::NotContains(lowered()),
            Operator::GreaterThan
            | Operator::LessThan
            | Operator::GreaterEquals
            | Operator::LessEquals => Test::Numeric(condition.operator, to_number(value)),
            Operator::Regex => {
                let pattern = string_form(value);
                match Regex::new(&pattern) {
                    Ok(re) => Test::Regex(Some(re)),
                    Err(e) => {
                        warn!(field = %condition.field, pattern = %pattern, error = %e, "invalid regex pattern");
                        Test::Regex(None)
                    }
                }
            }
            Operator::In => Test::In(list_form(value)),
            Operator::NotIn => Test::NotIn(list_form(value)),
        };
        Self {
            field: &condition.field,
            test,
        }
    }

    fn matches(&self, resource: &Resource) -> bool {
        let field = resource.lookup(self.field);
        match &self.test {
            Test::Equals(v) => string_form(&field).to_lowercase() == *v,
            Test::NotEquals(v) => string_form(&field).to_lowercase() != *v,
            Test::Contains(v) => string_form(&field).to_lowercase().contains(v.as_str()),
            Test::NotContains(v) => !string_form(&field).to_lowercase().contains(v.as_str()),
            Test::Numeric(op, rhs) => match (to_number(&field), rhs) {
                (Some(lhs), Some(rhs)) => compare(*op, lhs, *rhs),
                _ => false,
            },
            Test::Regex(Some(re)) => re.is_match(&string_form(&field)),
            Test::Regex(None) => false,
            Test::In(list) => list.contains(&string_form(&field).to_lowercase()),
            Test::NotIn(list) => !list.contains(&string_form(&field).to_lowercase()),
        }
    }
}

fn compare(op: Operator, lhs: f64, rhs: f64) -> bool {
    match op {
        Operator::GreaterThan => lhs > rhs,
        Operator::LessThan => lhs < rhs,
        Operator::GreaterEquals => lhs >= rhs,
        Operator::LessEquals => lhs <= rhs,
        _ => false,
    }
}

// ── Value coercion ──────────────────────────────────────────────────

/// String form used by every non-numeric operator. `Null` is the empty string.
pub(crate) fn string_form(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numbers, trimmed numeric strings and booleans (as 1/0) coerce.
pub(crate) fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// A non-list comparison value is a one-element list.
fn list_form(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(|v| string_form(v).to_lowercase()).collect(),
        other => vec![string_form(other).to_lowercase()],
    }
}

/// Evaluate a single condition. Convenience for callers outside the engine loop.
pub fn condition_matches(condition: &Condition, resource: &Resource) -> bool {
    CompiledCondition::compile(condition).matches(resource)
}

/// Evaluate a whole group against one resource.
pub fn group_matches(group: &ConditionGroup, resource: &Resource) -> bool {
    CompiledGroup::compile(group).matches(resource)
}
