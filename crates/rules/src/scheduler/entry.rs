//! Per-rule job and reporting types.

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::Serialize;

/// A registered cron job for one rule.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub rule_id: String,
    pub rule_name: String,
    /// The rule's 5-field crontab expression as stored.
    pub cron_expression: String,
    /// Parsed once at registration; never re-parsed on tick.
    pub schedule: Schedule,
    /// `None` once the schedule has no future fire times.
    pub next_run: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run.is_some_and(|next| next <= now)
    }
}

/// Snapshot of one job for status output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleInfo {
    pub rule_name: String,
    pub cron: String,
    pub next_run: Option<DateTime<Utc>>,
}

/// Registered jobs compared against what the store says should be scheduled.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScheduleVerification {
    pub scheduler_running: bool,
    pub registered_jobs: usize,
    pub expected_jobs: usize,
    /// Schedulable rules with no job.
    pub missing: Vec<String>,
    /// Jobs whose rule is gone or no longer schedulable.
    pub stale: Vec<String>,
}

impl ScheduleVerification {
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.stale.is_empty()
    }
}
