//! Integration tests that load the sample rules and inventory snapshot in
//! `data/examples/` and run them end to end.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use proxtag_rules::history::ExecutionHistory;
use proxtag_rules::inventory::{InMemoryInventory, Inventory};
use proxtag_rules::schema::{LogicalOperator, Operator};
use proxtag_rules::service::RuleService;
use proxtag_rules::store::RuleStore;
use proxtag_rules::validation::validate_rule;

const RUNNING: &str = "6f1c2a8e-0d4b-4f5e-9a51-3b7c1e2d9f01";
const LARGE: &str = "0b9d7e34-5c21-4a8f-8e6d-2f4a9c1b7e02";
const CRITICAL: &str = "c4e8f1a2-7b36-4d9c-b0e5-8a2d6f3c1e03";

/// Integration tests run from the crate directory, so go up two levels.
fn examples_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../data/examples")
}

/// Copy the sample rules into a scratch directory so runs can rewrite them.
fn scratch_store(dir: &TempDir) -> RuleStore {
    let path = dir.path().join("conditional_rules.json");
    std::fs::copy(examples_dir().join("conditional_rules.json"), &path)
        .unwrap_or_else(|e| panic!("Failed to copy sample rules: {e}"));
    RuleStore::open(path)
}

fn snapshot() -> Arc<InMemoryInventory> {
    Arc::new(InMemoryInventory::from_file(&examples_dir().join("cluster_resources.json")).unwrap())
}

fn service(dir: &TempDir, inventory: Arc<InMemoryInventory>) -> RuleService {
    RuleService::new(
        Arc::new(scratch_store(dir)),
        Arc::new(ExecutionHistory::in_memory(100)),
        inventory.clone(),
        inventory,
        Duration::from_secs(1),
    )
}

#[test]
fn sample_rules_load_and_validate() {
    let dir = TempDir::new().unwrap();
    let store = scratch_store(&dir);
    assert_eq!(store.len(), 3);

    for rule in store.list() {
        let validation = validate_rule(&rule);
        assert!(validation.is_valid(), "{}: {:?}", rule.name, validation.errors);
    }

    let large = store.get(LARGE).unwrap();
    assert_eq!(large.conditions.operator, LogicalOperator::Or);
    assert_eq!(large.conditions.conditions[0].operator, Operator::GreaterThan);
    assert!(large.actions.else_add_tags.is_empty());
    assert_eq!(large.stats.total_matches, 0);

    let critical = store.get(CRITICAL).unwrap();
    assert!(!critical.enabled);
    assert_eq!(critical.required_extended_fields().len(), 1);
}

#[tokio::test]
async fn snapshot_skips_non_guests() {
    let inventory = snapshot();
    let resources = inventory.list_resources().await.unwrap();
    let vmids: Vec<u64> = resources.iter().map(|r| r.vmid).collect();
    assert_eq!(vmids, vec![100, 101, 200, 300]);
    assert_eq!(resources[0].lookup("maxmem"), serde_json::json!(4294967296u64));
}

#[test]
fn only_enabled_schedules_are_registered() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir, snapshot());
    let info = service.scheduler().schedule_info();
    assert_eq!(info.keys().collect::<Vec<_>>(), vec![RUNNING]);
    assert_eq!(info[RUNNING].cron, "*/15 * * * *");
}

#[tokio::test]
async fn running_rule_applies_then_and_else() {
    let dir = TempDir::new().unwrap();
    let inventory = snapshot();
    let service = service(&dir, inventory.clone());

    let result = service.execute(RUNNING).await.unwrap();
    assert_eq!(result.matched_ids, vec![100, 200, 300]);
    assert!(result.errors.is_empty());
    assert_eq!(inventory.get(100).unwrap().tags.as_deref(), Some("web;prod;up"));
    assert_eq!(inventory.get(101).unwrap().tags.as_deref(), Some("web;down"));
    assert_eq!(inventory.get(200).unwrap().tags.as_deref(), Some("infra;critical;up"));
    assert_eq!(inventory.get(300).unwrap().tags.as_deref(), Some("up"));

    let reopened = RuleStore::open(dir.path().join("conditional_rules.json"));
    assert_eq!(reopened.get(RUNNING).unwrap().stats.tags_added, 4);
}

#[tokio::test]
async fn numeric_rule_coerces_strings() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir, snapshot());
    let result = service.dry_run(LARGE).await.unwrap();
    assert_eq!(result.matched_ids, vec![300]);
}

#[tokio::test]
async fn enrichment_fills_missing_ha_state() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir, snapshot());
    let result = service.dry_run(CRITICAL).await.unwrap();
    assert_eq!(result.matched_ids, vec![200]);
    assert_eq!(result.tags_added[&200], vec!["needs-ha"]);
}
