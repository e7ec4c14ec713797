//! Rule evaluation: condition matching and THEN/ELSE tag mutation.
//!
//! [`RuleEngine::evaluate`] partitions a resource batch into matched and
//! unmatched records, applies THEN actions to the former and ELSE actions (if
//! any are defined) to the latter, and reports every add/remove/no-op in an
//! [`ExecutionResult`]. Live runs write changed tag sets through the
//! [`Inventory`]; a failed write is recorded and the batch continues.

mod actions;
mod conditions;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use proxtag_core::Resource;
use tracing::{debug, error, info, warn};

use crate::inventory::Inventory;
use crate::schema::{ExecutionResult, Rule, TagMutation};

use actions::plan_tags;
use conditions::CompiledGroup;

pub use conditions::{condition_matches, group_matches};

// ── Rule engine ─────────────────────────────────────────────────────

/// Evaluates rules against resource batches and applies tag changes.
#[derive(Clone)]
pub struct RuleEngine {
    inventory: Arc<dyn Inventory>,
}

impl RuleEngine {
    pub fn new(inventory: Arc<dyn Inventory>) -> Self {
        Self { inventory }
    }

    /// Evaluate `rule` against `resources`.
    ///
    /// Never fails: an unexpected fault during evaluation yields a result with
    /// `success = false` and the fault as its only error.
    pub async fn evaluate(
        &self,
        rule: &Rule,
        resources: &[Resource],
        dry_run: bool,
    ) -> ExecutionResult {
        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.evaluate_inner(rule, resources, dry_run))
            .catch_unwind()
            .await;

        let mut result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(rule_id = %rule.id, rule = %rule.name, error = %message, "rule evaluation failed");
                ExecutionResult::failed(rule, dry_run, message)
            }
        };
        result.execution_time = started.elapsed();
        result
    }

    async fn evaluate_inner(
        &self,
        rule: &Rule,
        resources: &[Resource],
        dry_run: bool,
    ) -> ExecutionResult {
        let mut result = ExecutionResult::new(rule, dry_run);
        let group = CompiledGroup::compile(&rule.conditions);

        let (matched, unmatched): (Vec<&Resource>, Vec<&Resource>) =
            resources.iter().partition(|r| group.matches(r));
        result.matched_ids = matched.iter().map(|r| r.vmid).collect();

        for resource in &matched {
            self.apply(resource, rule.actions.then_branch(), dry_run, &mut result)
                .await;
        }
        if rule.actions.has_else() {
            for resource in &unmatched {
                self.apply(resource, rule.actions.else_branch(), dry_run, &mut result)
                    .await;
            }
        }

        info!(
            rule_id = %rule.id,
            rule = %rule.name,
            matched = matched.len(),
            unmatched = unmatched.len(),
            added = result.total_added(),
            removed = result.total_removed(),
            errors = result.errors.len(),
            dry_run,
            "rule evaluated"
        );
        result
    }

    async fn apply(
        &self,
        resource: &Resource,
        mutation: TagMutation<'_>,
        dry_run: bool,
        result: &mut ExecutionResult,
    ) {
        if mutation.is_empty() {
            return;
        }
        let vmid = resource.vmid;
        let plan = plan_tags(&resource.tag_list(), mutation);

        if !plan.added.is_empty() {
            result.tags_added.entry(vmid).or_default().extend(plan.added.iter().cloned());
        }
        if !plan.removed.is_empty() {
            result.tags_removed.entry(vmid).or_default().extend(plan.removed.iter().cloned());
        }
        if !plan.already_present.is_empty() {
            result
                .tags_already_present
                .entry(vmid)
                .or_default()
                .extend(plan.already_present.iter().cloned());
        }

        debug!(vmid, changed = plan.changed, dry_run, tags = %plan.formatted(), "planned tags");
        if dry_run || !plan.changed {
            return;
        }

        let tags = plan.formatted();
        if let Err(e) = self
            .inventory
            .update_tags(&resource.node, vmid, &tags, resource.kind)
            .await
        {
            warn!(vmid, node = %resource.node, error = %e, "tag update failed");
            result.errors.push(format!("Failed to update VM {vmid}: {e}"));
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "rule evaluation panicked".to_string()
    }
}
