//! Outcome of one rule evaluation.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Rule;

/// Tags per resource, keyed by vmid.
pub type TagMap = BTreeMap<u64, Vec<String>>;

/// Created fresh per evaluation and not mutated after it is returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub rule_id: String,
    pub rule_name: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    /// Matched vmids in inventory order.
    #[serde(default, alias = "matched_vms")]
    pub matched_ids: Vec<u64>,
    #[serde(default)]
    pub tags_added: TagMap,
    #[serde(default)]
    pub tags_removed: TagMap,
    #[serde(default)]
    pub tags_already_present: TagMap,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, with = "super::duration")]
    pub execution_time: Duration,
    #[serde(default)]
    pub dry_run: bool,
}

impl ExecutionResult {
    pub fn new(rule: &Rule, dry_run: bool) -> Self {
        Self {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            success: true,
            timestamp: Utc::now(),
            matched_ids: Vec::new(),
            tags_added: TagMap::new(),
            tags_removed: TagMap::new(),
            tags_already_present: TagMap::new(),
            errors: Vec::new(),
            execution_time: Duration::ZERO,
            dry_run,
        }
    }

    /// A whole-rule failure: no matches, one error.
    pub fn failed(rule: &Rule, dry_run: bool, error: impl Into<String>) -> Self {
        let mut result = Self::new(rule, dry_run);
        result.success = false;
        result.errors.push(error.into());
        result
    }

    pub fn total_added(&self) -> usize {
        self.tags_added.values().map(Vec::len).sum()
    }

    pub fn total_removed(&self) -> usize {
        self.tags_removed.values().map(Vec::len).sum()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
