//! Rule definitions, creation/patch payloads and cumulative statistics.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use proxtag_core::ExtendedField;
use serde::{Deserialize, Serialize};

use super::{ActionSet, ConditionGroup, ExecutionResult};

/// Cron trigger for a rule. `cron` is kept as the raw 5-field string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub cron: String,
}

impl ScheduleConfig {
    pub fn cron(expr: impl Into<String>) -> Self {
        Self {
            enabled: true,
            cron: expr.into(),
        }
    }

    /// Enabled with a non-blank expression. Says nothing about validity.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.cron.trim().is_empty()
    }
}

/// Cumulative per-rule counters, updated only by recorded executions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleStats {
    #[serde(default)]
    pub total_matches: u64,
    #[serde(default)]
    pub tags_added: u64,
    #[serde(default)]
    pub tags_removed: u64,
    #[serde(default, with = "super::duration")]
    pub last_execution_time: Duration,
}

impl RuleStats {
    pub fn record(&mut self, result: &ExecutionResult) {
        self.total_matches += result.matched_ids.len() as u64;
        self.tags_added += result.total_added() as u64;
        self.tags_removed += result.total_removed() as u64;
        self.last_execution_time = result.execution_time;
    }
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub conditions: ConditionGroup,
    #[serde(default)]
    pub actions: ActionSet,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stats: RuleStats,
}

impl Rule {
    /// Whether the scheduler should hold a job for this rule.
    pub fn is_schedulable(&self) -> bool {
        self.enabled && self.schedule.is_active()
    }

    /// Extended groups that must be fetched before the conditions can be
    /// evaluated against a base inventory record.
    pub fn required_extended_fields(&self) -> BTreeSet<ExtendedField> {
        self.conditions
            .conditions
            .iter()
            .filter_map(|c| ExtendedField::for_path(&c.field))
            .collect()
    }

    /// Merge a partial update. Timestamps and identity are left to the caller.
    pub fn apply(&mut self, patch: RulePatch) {
        if let Some(name) = patch.name {
            self.name = name.trim().to_string();
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(conditions) = patch.conditions {
            self.conditions = conditions;
        }
        if let Some(actions) = patch.actions {
            self.actions = actions.normalized();
        }
        if let Some(schedule) = patch.schedule {
            self.schedule = schedule;
        }
    }

    pub fn record(&mut self, result: &ExecutionResult) {
        self.stats.record(result);
        self.last_run = Some(result.timestamp);
    }
}

/// Payload for creating a rule. Identity, timestamps and stats are assigned
/// by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewRule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub conditions: ConditionGroup,
    #[serde(default)]
    pub actions: ActionSet,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl NewRule {
    pub fn new(name: impl Into<String>, conditions: ConditionGroup, actions: ActionSet) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            enabled: true,
            conditions,
            actions,
            schedule: ScheduleConfig::default(),
        }
    }

    pub fn with_schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn into_rule(self, id: String, now: DateTime<Utc>) -> Rule {
        Rule {
            id,
            name: self.name.trim().to_string(),
            description: self.description,
            enabled: self.enabled,
            conditions: self.conditions,
            actions: self.actions.normalized(),
            schedule: self.schedule,
            created_at: now,
            updated_at: now,
            last_run: None,
            stats: RuleStats::default(),
        }
    }
}

/// Partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RulePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<ConditionGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<ActionSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleConfig>,
}

impl RulePatch {
    pub fn is_empty(&self) -> bool {
        self == &RulePatch::default()
    }
}
