//! The single execution path shared by scheduled and on-demand runs.
//!
//! A run re-reads the rule from the store, fetches the current inventory,
//! enriches records only with the extended groups the rule's conditions
//! reference, evaluates, and (for live runs) records stats and history.
//! Runs of the same rule are serialized by a per-rule async lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};
use proxtag_core::Resource;
use tracing::{debug, error, info, warn};

use crate::evaluator::RuleEngine;
use crate::history::ExecutionHistory;
use crate::inventory::{Enricher, Inventory};
use crate::schema::{ExecutionResult, Rule};
use crate::store::RuleStore;

/// Concurrent enrichment requests per run.
const ENRICH_CONCURRENCY: usize = 8;

/// Whether a run writes tags and records its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Live,
    DryRun,
}

impl RunMode {
    pub fn is_dry_run(self) -> bool {
        matches!(self, RunMode::DryRun)
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTrigger {
    Manual,
    Scheduled,
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Rule not found: {0}")]
    NotFound(String),

    #[error("Rule is disabled: {0}")]
    Disabled(String),
}

/// Executes stored rules against the live inventory.
pub struct RuleRunner {
    store: Arc<RuleStore>,
    history: Arc<ExecutionHistory>,
    inventory: Arc<dyn Inventory>,
    enricher: Arc<dyn Enricher>,
    engine: RuleEngine,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RuleRunner {
    pub fn new(
        store: Arc<RuleStore>,
        history: Arc<ExecutionHistory>,
        inventory: Arc<dyn Inventory>,
        enricher: Arc<dyn Enricher>,
    ) -> Self {
        Self {
            store,
            history,
            engine: RuleEngine::new(inventory.clone()),
            inventory,
            enricher,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    pub fn history(&self) -> &Arc<ExecutionHistory> {
        &self.history
    }

    /// Run a stored rule.
    ///
    /// Manual runs execute regardless of `enabled`; scheduled runs refuse a
    /// disabled rule. Evaluation faults are reported inside the result, so the
    /// only errors are a missing or (scheduled) disabled rule.
    pub async fn run(
        &self,
        rule_id: &str,
        mode: RunMode,
        trigger: RunTrigger,
    ) -> Result<ExecutionResult, RunError> {
        if self.store.get(rule_id).is_none() {
            return Err(RunError::NotFound(rule_id.to_string()));
        }
        let lock = self.lock_for(rule_id);
        let _guard = lock.lock().await;

        // Re-read under the lock so a run never uses a stale definition.
        let Some(rule) = self.store.get(rule_id) else {
            self.forget(rule_id);
            return Err(RunError::NotFound(rule_id.to_string()));
        };
        if trigger == RunTrigger::Scheduled && !rule.enabled {
            debug!(rule_id, "skipping disabled rule");
            return Err(RunError::Disabled(rule_id.to_string()));
        }

        let result = self.execute(&rule, mode).await;
        if mode == RunMode::Live {
            self.record(&result);
        }

        info!(
            rule_id,
            rule = %rule.name,
            ?trigger,
            dry_run = mode.is_dry_run(),
            success = result.success,
            matched = result.matched_ids.len(),
            "rule run finished"
        );
        Ok(result)
    }

    async fn execute(&self, rule: &Rule, mode: RunMode) -> ExecutionResult {
        let dry_run = mode.is_dry_run();
        let resources = match self.inventory.list_resources().await {
            Ok(resources) => resources,
            Err(e) => {
                error!(rule_id = %rule.id, error = %e, "failed to list resources");
                return ExecutionResult::failed(
                    rule,
                    dry_run,
                    format!("Failed to list resources: {e}"),
                );
            }
        };
        let resources = self.enrich(rule, resources).await;
        self.engine.evaluate(rule, &resources, dry_run).await
    }

    async fn enrich(&self, rule: &Rule, resources: Vec<Resource>) -> Vec<Resource> {
        let fields = rule.required_extended_fields();
        if fields.is_empty() {
            return resources;
        }
        debug!(
            rule_id = %rule.id,
            fields = ?fields,
            count = resources.len(),
            "enriching resources"
        );
        let fields = &fields;
        stream::iter(resources)
            .map(|resource| self.enricher.enrich(resource, fields))
            .buffered(ENRICH_CONCURRENCY)
            .collect()
            .await
    }

    fn record(&self, result: &ExecutionResult) {
        if let Err(e) = self.store.record_stats(&result.rule_id, result) {
            warn!(rule_id = %result.rule_id, error = %e, "failed to record rule stats");
        }
        if let Err(e) = self.history.append(result.clone()) {
            warn!(rule_id = %result.rule_id, error = %e, "failed to record execution history");
        }
    }

    fn lock_for(&self, rule_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .expect("run locks poisoned")
            .entry(rule_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the execution lock of a deleted rule.
    pub(crate) fn forget(&self, rule_id: &str) {
        self.locks.lock().expect("run locks poisoned").remove(rule_id);
    }
}
