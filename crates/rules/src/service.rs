//! [`RuleService`]: the entry point callers use to manage and run rules.
//!
//! Every rule mutation goes through the store first and is then mirrored into
//! the scheduler (and, on delete, the history), so the live job set always
//! reflects what is persisted.

use std::sync::Arc;
use std::time::Duration;

use proxtag_core::Config;
use tracing::{info, warn};

use crate::history::ExecutionHistory;
use crate::inventory::{Enricher, Inventory};
use crate::runner::{RuleRunner, RunError, RunMode, RunTrigger};
use crate::scheduler::RuleScheduler;
use crate::schema::{ExecutionResult, NewRule, Rule, RulePatch};
use crate::store::{RuleStore, StoreError};

/// Default page size for per-rule history.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;
/// Default page size for cross-rule history.
pub const DEFAULT_RECENT_LIMIT: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Run(#[from] RunError),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

pub struct RuleService {
    store: Arc<RuleStore>,
    history: Arc<ExecutionHistory>,
    runner: Arc<RuleRunner>,
    scheduler: Arc<RuleScheduler>,
}

impl RuleService {
    pub fn new(
        store: Arc<RuleStore>,
        history: Arc<ExecutionHistory>,
        inventory: Arc<dyn Inventory>,
        enricher: Arc<dyn Enricher>,
        tick: Duration,
    ) -> Self {
        let runner = Arc::new(RuleRunner::new(
            store.clone(),
            history.clone(),
            inventory,
            enricher,
        ));
        let scheduler = Arc::new(RuleScheduler::new(runner.clone(), tick));
        scheduler.reload();
        Self {
            store,
            history,
            runner,
            scheduler,
        }
    }

    /// Open the store and history files named by `config` and register
    /// schedules for every stored rule.
    pub fn open(config: &Config, inventory: Arc<dyn Inventory>, enricher: Arc<dyn Enricher>) -> Self {
        let store = Arc::new(RuleStore::open(&config.storage.rules_file));
        let history = Arc::new(ExecutionHistory::open(
            &config.storage.history_file,
            config.storage.history_retention,
        ));
        Self::new(store, history, inventory, enricher, config.scheduler.tick())
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    pub fn history(&self) -> &Arc<ExecutionHistory> {
        &self.history
    }

    pub fn scheduler(&self) -> &Arc<RuleScheduler> {
        &self.scheduler
    }

    // ── Rules ───────────────────────────────────────────────────────

    pub fn list(&self) -> Vec<Rule> {
        self.store.list()
    }

    pub fn get(&self, id: &str) -> Option<Rule> {
        self.store.get(id)
    }

    pub fn create(&self, new_rule: NewRule) -> Result<Rule> {
        let rule = self.store.create(new_rule)?;
        self.sync_schedule(&rule);
        Ok(rule)
    }

    pub fn update(&self, id: &str, patch: RulePatch) -> Result<Rule> {
        let rule = self.store.update(id, patch)?;
        self.sync_schedule(&rule);
        Ok(rule)
    }

    /// Delete a rule, its job and its history. Returns `false` if it did not
    /// exist.
    pub fn delete(&self, id: &str) -> Result<bool> {
        if !self.store.delete(id)? {
            return Ok(false);
        }
        self.scheduler.remove(id);
        self.runner.forget(id);
        if let Err(e) = self.history.clear(id) {
            warn!(rule_id = %id, error = %e, "failed to clear history of deleted rule");
        }
        info!(rule_id = %id, "rule removed");
        Ok(true)
    }

    fn sync_schedule(&self, rule: &Rule) {
        // An invalid cron is logged by the scheduler; the rule stays unscheduled.
        let _ = self.scheduler.update(rule);
    }

    // ── Execution ───────────────────────────────────────────────────

    /// Run a rule now and record the outcome. Works on disabled rules too.
    pub async fn execute(&self, id: &str) -> Result<ExecutionResult> {
        Ok(self.runner.run(id, RunMode::Live, RunTrigger::Manual).await?)
    }

    /// Preview a rule: nothing is written or recorded.
    pub async fn dry_run(&self, id: &str) -> Result<ExecutionResult> {
        Ok(self.runner.run(id, RunMode::DryRun, RunTrigger::Manual).await?)
    }

    // ── History ─────────────────────────────────────────────────────

    pub fn history_for(&self, id: &str, limit: Option<usize>) -> Vec<ExecutionResult> {
        self.history
            .history_for(id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
    }

    pub fn recent(&self, limit: Option<usize>) -> Vec<ExecutionResult> {
        self.history.recent(limit.unwrap_or(DEFAULT_RECENT_LIMIT))
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    pub fn start(&self) -> bool {
        self.scheduler.start()
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::InMemoryInventory;
    use crate::schema::*;
    use proxtag_core::{Resource, ResourceKind};
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> (RuleService, Arc<InMemoryInventory>) {
        let inventory = Arc::new(InMemoryInventory::new(vec![
            Resource::new(300, "pve2", ResourceKind::Qemu)
                .with_status("running")
                .with_tags("web"),
        ]));
        let service = RuleService::new(
            Arc::new(RuleStore::open(dir.path().join("rules.json"))),
            Arc::new(ExecutionHistory::open(dir.path().join("history.json"), 100)),
            inventory.clone(),
            inventory.clone(),
            Duration::from_secs(1),
        );
        (service, inventory)
    }

    fn nightly() -> NewRule {
        NewRule::new(
            "nightly",
            ConditionGroup::all(vec![Condition::new("tags", Operator::Contains, "web")]),
            ActionSet::then(&["nightly"], &["web"]),
        )
        .with_schedule(ScheduleConfig::cron("0 3 * * *"))
    }

    #[test]
    fn crud_keeps_scheduler_in_sync() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir);

        let rule = service.create(nightly()).unwrap();
        assert!(service.scheduler().contains(&rule.id));

        service
            .update(
                &rule.id,
                RulePatch {
                    schedule: Some(ScheduleConfig::default()),
                    ..RulePatch::default()
                },
            )
            .unwrap();
        assert!(!service.scheduler().contains(&rule.id));

        service
            .update(
                &rule.id,
                RulePatch {
                    schedule: Some(ScheduleConfig::cron("15 4 * * 0")),
                    ..RulePatch::default()
                },
            )
            .unwrap();
        assert!(service.scheduler().contains(&rule.id));
        assert!(service.scheduler().verify().is_consistent());

        assert!(service.delete(&rule.id).unwrap());
        assert!(!service.delete(&rule.id).unwrap());
        assert!(service.scheduler().is_empty());
        assert!(service.get(&rule.id).is_none());
    }

    #[test]
    fn invalid_rule_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir);
        let bad = NewRule::new("no actions", nightly().conditions, ActionSet::default());
        assert!(matches!(
            service.create(bad),
            Err(ServiceError::Store(StoreError::Validation(_)))
        ));
        assert!(service.list().is_empty());
    }

    #[tokio::test]
    async fn execute_records_and_delete_clears_history() {
        let dir = TempDir::new().unwrap();
        let (service, inventory) = service(&dir);
        let rule = service.create(nightly()).unwrap();

        let preview = service.dry_run(&rule.id).await.unwrap();
        assert!(preview.dry_run);
        assert!(service.history_for(&rule.id, None).is_empty());

        let result = service.execute(&rule.id).await.unwrap();
        assert_eq!(result.tags_added[&300], vec!["nightly"]);
        assert_eq!(result.tags_removed[&300], vec!["web"]);
        assert_eq!(inventory.get(300).unwrap().tags.as_deref(), Some("nightly"));
        assert_eq!(service.recent(None), vec![result]);

        service.delete(&rule.id).unwrap();
        assert!(service.recent(None).is_empty());
        assert!(matches!(
            service.execute(&rule.id).await,
            Err(ServiceError::Run(RunError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn manual_execute_ignores_enabled_flag() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir);
        let rule = service.create(nightly().disabled()).unwrap();
        assert!(!service.scheduler().contains(&rule.id));

        let result = service.execute(&rule.id).await.unwrap();
        assert_eq!(result.matched_ids, vec![300]);
    }

    #[test]
    fn reopening_restores_schedules() {
        let dir = TempDir::new().unwrap();
        let id = {
            let (service, _) = service(&dir);
            service.create(nightly()).unwrap().id
        };
        let (reopened, _) = service(&dir);
        assert!(reopened.scheduler().contains(&id));
    }
}
