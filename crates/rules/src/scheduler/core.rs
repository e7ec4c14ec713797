//! [`RuleScheduler`]: cron jobs for scheduled rules and the tick loop that
//! fires them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::runner::{RuleRunner, RunMode, RunTrigger};
use crate::schema::{ExecutionResult, Rule};

use super::cron::{next_after, parse_cron, CronError};
use super::entry::{ScheduleInfo, ScheduleVerification, ScheduledJob};

/// Keeps one job per schedulable rule and fires them from a background task.
///
/// Constructed once at process start and shared via `Arc`. After any rule
/// mutation call [`add`](RuleScheduler::add), [`update`](RuleScheduler::update)
/// or [`remove`](RuleScheduler::remove) so the job set matches the store.
pub struct RuleScheduler {
    runner: Arc<RuleRunner>,
    pub(super) jobs: RwLock<HashMap<String, ScheduledJob>>,
    tick: Duration,
    shutdown: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RuleScheduler {
    pub fn new(runner: Arc<RuleRunner>, tick: Duration) -> Self {
        Self {
            runner,
            jobs: RwLock::new(HashMap::new()),
            tick,
            shutdown: Arc::new(Notify::new()),
            task: Mutex::new(None),
        }
    }

    // ── Job registry ────────────────────────────────────────────────

    /// Register a job for `rule` if it is schedulable. Returns whether a job
    /// is now registered. Any previous job for the rule is dropped first, so an
    /// invalid cron leaves the rule unscheduled.
    pub fn add(&self, rule: &Rule) -> Result<bool, CronError> {
        self.remove(&rule.id);
        if !rule.is_schedulable() {
            return Ok(false);
        }
        let cron_expression = rule.schedule.cron.trim().to_string();
        let schedule = parse_cron(&cron_expression).inspect_err(|e| {
            warn!(rule_id = %rule.id, cron = %cron_expression, error = %e, "not scheduling rule");
        })?;
        let next_run = next_after(&schedule, Utc::now());

        info!(rule_id = %rule.id, rule = %rule.name, cron = %cron_expression, next_run = ?next_run, "scheduled rule");
        self.jobs.write().expect("jobs lock poisoned").insert(
            rule.id.clone(),
            ScheduledJob {
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                cron_expression,
                schedule,
                next_run,
            },
        );
        Ok(true)
    }

    /// Unregister a rule's job. Returns whether one existed.
    pub fn remove(&self, rule_id: &str) -> bool {
        let removed = self
            .jobs
            .write()
            .expect("jobs lock poisoned")
            .remove(rule_id)
            .is_some();
        if removed {
            info!(rule_id, "unscheduled rule");
        }
        removed
    }

    /// Replace a rule's job after its definition changed.
    pub fn update(&self, rule: &Rule) -> Result<bool, CronError> {
        self.remove(&rule.id);
        self.add(rule)
    }

    /// Drop every job and re-register from the store. Rules with an invalid
    /// cron are skipped. Returns the number of registered jobs.
    pub fn reload(&self) -> usize {
        self.jobs.write().expect("jobs lock poisoned").clear();
        let mut skipped = 0;
        for rule in self.runner.store().list() {
            if self.add(&rule).is_err() {
                skipped += 1;
            }
        }
        let count = self.len();
        info!(scheduled = count, skipped, "reloaded rule schedules");
        count
    }

    pub fn len(&self) -> usize {
        self.jobs.read().expect("jobs lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, rule_id: &str) -> bool {
        self.jobs
            .read()
            .expect("jobs lock poisoned")
            .contains_key(rule_id)
    }

    // ── Status ──────────────────────────────────────────────────────

    pub fn next_run(&self, rule_id: &str) -> Option<DateTime<Utc>> {
        self.jobs
            .read()
            .expect("jobs lock poisoned")
            .get(rule_id)
            .and_then(|job| job.next_run)
    }

    /// Registered jobs keyed by rule id.
    pub fn schedule_info(&self) -> BTreeMap<String, ScheduleInfo> {
        self.jobs
            .read()
            .expect("jobs lock poisoned")
            .values()
            .map(|job| {
                (
                    job.rule_id.clone(),
                    ScheduleInfo {
                        rule_name: job.rule_name.clone(),
                        cron: job.cron_expression.clone(),
                        next_run: job.next_run,
                    },
                )
            })
            .collect()
    }

    /// Compare registered jobs with the store's schedulable rules.
    pub fn verify(&self) -> ScheduleVerification {
        let expected: BTreeSet<String> = self
            .runner
            .store()
            .list()
            .into_iter()
            .filter(|rule| rule.is_schedulable() && parse_cron(&rule.schedule.cron).is_ok())
            .map(|rule| rule.id)
            .collect();
        let registered: BTreeSet<String> = self
            .jobs
            .read()
            .expect("jobs lock poisoned")
            .keys()
            .cloned()
            .collect();

        let verification = ScheduleVerification {
            scheduler_running: self.is_running(),
            registered_jobs: registered.len(),
            expected_jobs: expected.len(),
            missing: expected.difference(&registered).cloned().collect(),
            stale: registered.difference(&expected).cloned().collect(),
        };
        info!(
            registered = verification.registered_jobs,
            expected = verification.expected_jobs,
            "schedule verification"
        );
        if !verification.is_consistent() {
            warn!(
                missing = ?verification.missing,
                stale = ?verification.stale,
                "scheduled jobs out of sync with rules"
            );
        }
        verification
    }

    // ── Firing ──────────────────────────────────────────────────────

    /// Ids of jobs due at `now`, advancing each to its next fire time after
    /// `now`. Missed fire times collapse into one firing.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut jobs = self.jobs.write().expect("jobs lock poisoned");
        let mut due = Vec::new();
        for job in jobs.values_mut().filter(|job| job.is_due(now)) {
            job.next_run = next_after(&job.schedule, now);
            due.push(job.rule_id.clone());
        }
        due.sort();
        due
    }

    /// Fire a scheduled rule. Missing or disabled rules are skipped.
    pub async fn execute(&self, rule_id: &str) -> Option<ExecutionResult> {
        match self
            .runner
            .run(rule_id, RunMode::Live, RunTrigger::Scheduled)
            .await
        {
            Ok(result) => Some(result),
            Err(e) => {
                debug!(rule_id, error = %e, "scheduled firing skipped");
                None
            }
        }
    }

    /// Fire everything due at `now` on the calling task.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Vec<ExecutionResult> {
        let mut results = Vec::new();
        for rule_id in self.take_due(now) {
            if let Some(result) = self.execute(&rule_id).await {
                results.push(result);
            }
        }
        results
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Spawn the tick loop. Returns `false` if it is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut task = self.task.lock().expect("scheduler task lock poisoned");
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }
        let this = Arc::clone(self);
        *task = Some(tokio::spawn(async move { this.run_loop().await }));
        info!(tick_secs = self.tick.as_secs_f64(), jobs = self.len(), "rule scheduler started");
        true
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .expect("scheduler task lock poisoned")
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Drop all jobs, stop the tick loop and wait for in-flight firings.
    pub async fn shutdown(&self) {
        self.jobs.write().expect("jobs lock poisoned").clear();
        let handle = self
            .task
            .lock()
            .expect("scheduler task lock poisoned")
            .take();
        let Some(handle) = handle else {
            return;
        };
        self.shutdown.notify_one();
        if let Err(e) = handle.await {
            error!(error = %e, "scheduler task failed");
        }
        info!("rule scheduler stopped");
    }

    async fn run_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut firings = JoinSet::new();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let due = self.take_due(Utc::now());
                    if !due.is_empty() {
                        debug!(count = due.len(), "rules due");
                    }
                    for rule_id in due {
                        let this = Arc::clone(&self);
                        firings.spawn(async move {
                            this.execute(&rule_id).await;
                        });
                    }
                    while let Some(joined) = firings.try_join_next() {
                        if let Err(e) = joined {
                            error!(error = %e, "scheduled firing panicked");
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    debug!(in_flight = firings.len(), "scheduler loop shutting down");
                    break;
                }
            }
        }

        while let Some(joined) = firings.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "scheduled firing panicked");
            }
        }
    }
}
