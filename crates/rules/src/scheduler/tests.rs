//! Tests for the scheduler module.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use proxtag_core::{Resource, ResourceKind};
use tempfile::TempDir;

use crate::history::ExecutionHistory;
use crate::inventory::InMemoryInventory;
use crate::runner::RuleRunner;
use crate::schema::*;
use crate::store::RuleStore;

use super::cron::normalize_cron;
use super::*;

// -- normalize_cron ----------------------------------------------------

#[test]
fn normalize_cron_5_to_6_fields() {
    assert_eq!(normalize_cron("*/15 * * * *"), "0 */15 * * * *");
    assert_eq!(normalize_cron("30 2 1 * *"), "0 30 2 1 * *");
}

#[test]
fn normalize_cron_trims_whitespace() {
    assert_eq!(normalize_cron("  */5 * * * *  "), "0 */5 * * * *");
}

#[test]
fn normalize_cron_shifts_weekdays() {
    assert_eq!(normalize_cron("0 6 * * 1-5"), "0 0 6 * * 2-6");
    assert_eq!(normalize_cron("0 0 * * 0"), "0 0 0 * * 1");
    assert_eq!(normalize_cron("0 0 * * 7"), "0 0 0 * * 1");
    assert_eq!(normalize_cron("0 0 * * 0-6"), "0 0 0 * * 1-7");
    assert_eq!(normalize_cron("0 0 * * 5-7"), "0 0 0 * * 6-7,1");
    assert_eq!(normalize_cron("0 0 * * 1,3"), "0 0 0 * * 2,4");
    assert_eq!(normalize_cron("0 0 * * MON-FRI"), "0 0 0 * * MON-FRI");
}

// -- parse_cron --------------------------------------------------------

#[test]
fn parse_cron_rejects_bad_input() {
    assert_eq!(parse_cron("  ").unwrap_err(), CronError::Empty);
    assert_eq!(parse_cron("* * *").unwrap_err(), CronError::FieldCount(3));
    assert_eq!(parse_cron("0 * * * * *").unwrap_err(), CronError::FieldCount(6));
    assert!(matches!(parse_cron("61 * * * *"), Err(CronError::Parse(_))));
}

#[test]
fn next_after_follows_crontab_weekdays() {
    // 2024-05-01 is a Wednesday.
    let from = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();

    let monday = parse_cron("0 9 * * 1").unwrap();
    assert_eq!(
        next_after(&monday, from),
        Some(Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap())
    );

    let sunday = parse_cron("0 9 * * 0").unwrap();
    assert_eq!(
        next_after(&sunday, from),
        Some(Utc.with_ymd_and_hms(2024, 5, 5, 9, 0, 0).unwrap())
    );
}

#[test]
fn next_after_is_strictly_later() {
    let schedule = parse_cron("*/15 * * * *").unwrap();
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 0).unwrap();
    assert_eq!(
        next_after(&schedule, at),
        Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap())
    );
}

// -- RuleScheduler -----------------------------------------------------

struct Fixture {
    _dir: TempDir,
    store: Arc<RuleStore>,
    history: Arc<ExecutionHistory>,
    inventory: Arc<InMemoryInventory>,
    scheduler: Arc<RuleScheduler>,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RuleStore::open(dir.path().join("rules.json")));
    let history = Arc::new(ExecutionHistory::in_memory(10));
    let inventory = Arc::new(InMemoryInventory::new(vec![
        Resource::new(200, "pve1", ResourceKind::Qemu).with_status("running"),
    ]));
    let runner = Arc::new(RuleRunner::new(
        store.clone(),
        history.clone(),
        inventory.clone(),
        inventory.clone(),
    ));
    let scheduler = Arc::new(RuleScheduler::new(runner, Duration::from_millis(10)));
    Fixture {
        _dir: dir,
        store,
        history,
        inventory,
        scheduler,
    }
}

fn scheduled(name: &str, cron: &str) -> NewRule {
    NewRule::new(
        name,
        ConditionGroup::all(vec![Condition::new("status", Operator::Equals, "running")]),
        ActionSet::then(&["scheduled"], &[]),
    )
    .with_schedule(ScheduleConfig::cron(cron))
}

#[test]
fn add_registers_only_schedulable_rules() {
    let f = fixture();
    let every_minute = f.store.create(scheduled("a", "* * * * *")).unwrap();
    let manual = f
        .store
        .create(NewRule::new(
            "b",
            ConditionGroup::all(vec![Condition::new("status", Operator::Equals, "running")]),
            ActionSet::then(&["x"], &[]),
        ))
        .unwrap();

    assert!(f.scheduler.add(&every_minute).unwrap());
    assert!(!f.scheduler.add(&manual).unwrap());
    assert_eq!(f.scheduler.len(), 1);
    assert!(f.scheduler.next_run(&every_minute.id).unwrap() > Utc::now());
    assert!(f.scheduler.next_run(&manual.id).is_none());
}

#[test]
fn invalid_cron_is_not_scheduled() {
    let f = fixture();
    let rule = scheduled("bad", "every day").into_rule("bad-id".into(), Utc::now());
    assert!(matches!(f.scheduler.add(&rule), Err(CronError::FieldCount(2))));
    assert!(!f.scheduler.contains("bad-id"));
}

#[test]
fn invalid_cron_replaces_existing_job() {
    let f = fixture();
    let mut rule = scheduled("hourly", "0 * * * *").into_rule("hourly-id".into(), Utc::now());
    assert!(f.scheduler.add(&rule).unwrap());

    rule.schedule.cron = "61 * * * *".into();
    assert!(f.scheduler.add(&rule).is_err());
    assert!(!f.scheduler.contains("hourly-id"));
    assert!(f.scheduler.next_run("hourly-id").is_none());
}

#[test]
fn update_to_disabled_unschedules() {
    let f = fixture();
    let rule = f.store.create(scheduled("a", "0 * * * *")).unwrap();
    f.scheduler.add(&rule).unwrap();

    let disabled = f
        .store
        .update(
            &rule.id,
            RulePatch {
                enabled: Some(false),
                ..RulePatch::default()
            },
        )
        .unwrap();
    assert!(!f.scheduler.update(&disabled).unwrap());
    assert!(f.scheduler.is_empty());
}

#[test]
fn reload_rebuilds_from_store() {
    let f = fixture();
    f.store.create(scheduled("a", "0 * * * *")).unwrap();
    f.store.create(scheduled("b", "30 2 * * 1-5")).unwrap();
    f.store.create(scheduled("c", "0 * * * *").disabled()).unwrap();

    let stray = scheduled("gone", "* * * * *").into_rule("gone".into(), Utc::now());
    f.scheduler.add(&stray).unwrap();

    assert_eq!(f.scheduler.reload(), 2);
    assert!(!f.scheduler.contains("gone"));
}

#[test]
fn take_due_advances_next_run() {
    let f = fixture();
    let rule = f.store.create(scheduled("a", "* * * * *")).unwrap();
    f.scheduler.add(&rule).unwrap();
    let next = f.scheduler.next_run(&rule.id).unwrap();

    assert!(f.scheduler.take_due(next - chrono::Duration::seconds(1)).is_empty());
    assert_eq!(f.scheduler.take_due(next), vec![rule.id.clone()]);
    assert!(f.scheduler.take_due(next).is_empty());
    assert_eq!(
        f.scheduler.next_run(&rule.id),
        Some(next + chrono::Duration::minutes(1))
    );
}

#[tokio::test]
async fn run_due_fires_live_and_records() {
    let f = fixture();
    let rule = f.store.create(scheduled("a", "* * * * *")).unwrap();
    f.scheduler.add(&rule).unwrap();

    let results = f
        .scheduler
        .run_due(Utc::now() + chrono::Duration::minutes(2))
        .await;
    assert_eq!(results.len(), 1);
    assert!(!results[0].dry_run);
    assert_eq!(f.inventory.get(200).unwrap().tag_list(), vec!["scheduled"]);
    assert_eq!(f.history.history_for(&rule.id, 10).len(), 1);
    assert!(f.store.get(&rule.id).unwrap().last_run.is_some());
}

#[tokio::test]
async fn firing_skips_missing_and_disabled_rules() {
    let f = fixture();
    let deleted = f.store.create(scheduled("deleted", "* * * * *")).unwrap();
    let paused = f.store.create(scheduled("paused", "* * * * *")).unwrap();
    f.scheduler.add(&deleted).unwrap();
    f.scheduler.add(&paused).unwrap();

    // Store changes that were never propagated to the scheduler.
    f.store.delete(&deleted.id).unwrap();
    f.store
        .update(
            &paused.id,
            RulePatch {
                enabled: Some(false),
                ..RulePatch::default()
            },
        )
        .unwrap();

    let results = f
        .scheduler
        .run_due(Utc::now() + chrono::Duration::minutes(2))
        .await;
    assert!(results.is_empty());
    assert!(f.history.is_empty());
    assert!(f.inventory.writes().is_empty());
}

#[test]
fn schedule_info_and_verify() {
    let f = fixture();
    let a = f.store.create(scheduled("a", "0 * * * *")).unwrap();
    let b = f.store.create(scheduled("b", "0 * * * *")).unwrap();
    f.scheduler.add(&a).unwrap();

    let info = f.scheduler.schedule_info();
    assert_eq!(info.len(), 1);
    assert_eq!(info[&a.id].rule_name, "a");
    assert_eq!(info[&a.id].cron, "0 * * * *");
    assert!(info[&a.id].next_run.is_some());

    let verification = f.scheduler.verify();
    assert!(!verification.scheduler_running);
    assert_eq!(verification.registered_jobs, 1);
    assert_eq!(verification.expected_jobs, 2);
    assert_eq!(verification.missing, vec![b.id.clone()]);
    assert!(verification.stale.is_empty());

    f.scheduler.reload();
    assert!(f.scheduler.verify().is_consistent());
}

#[tokio::test]
async fn background_loop_fires_and_shuts_down() {
    let f = fixture();
    let rule = f.store.create(scheduled("a", "* * * * *")).unwrap();
    f.scheduler.add(&rule).unwrap();

    assert!(f.scheduler.start());
    assert!(!f.scheduler.start());
    assert!(f.scheduler.is_running());

    f.scheduler
        .jobs
        .write()
        .unwrap()
        .get_mut(&rule.id)
        .unwrap()
        .next_run = Some(Utc::now() - chrono::Duration::seconds(1));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while f.history.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(f.history.history_for(&rule.id, 10).len(), 1);

    f.scheduler.shutdown().await;
    assert!(!f.scheduler.is_running());
    assert!(f.scheduler.is_empty());
}
