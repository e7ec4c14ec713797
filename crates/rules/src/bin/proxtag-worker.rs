//! proxtag-worker: scheduler daemon and operator CLI for conditional tag rules.
//!
//! `serve` loads every stored rule, registers cron jobs for the scheduled ones
//! and fires them against the Proxmox API until Ctrl-C. The other subcommands
//! inspect or run rules once and exit.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;

use proxtag_core::config::{load_dotenv, Config};
use proxtag_rules::history::ExecutionHistory;
use proxtag_rules::inventory::{Enricher, InMemoryInventory, Inventory, ProxmoxClient};
use proxtag_rules::scheduler::{next_after, parse_cron};
use proxtag_rules::service::{RuleService, DEFAULT_HISTORY_LIMIT, DEFAULT_RECENT_LIMIT};
use proxtag_rules::store::RuleStore;
use proxtag_rules::validation::validate_cron;

// ── CLI ─────────────────────────────────────────────────────────────

/// Conditional tag rules for Proxmox VE guests.
#[derive(Parser, Debug)]
#[command(name = "proxtag-worker", version, about)]
struct Cli {
    /// Rules file (overrides RULES_FILE / DATA_DIR).
    #[arg(long, env = "PROXTAG_RULES_FILE", global = true)]
    rules_file: Option<PathBuf>,

    /// Execution history file (overrides HISTORY_FILE / DATA_DIR).
    #[arg(long, env = "PROXTAG_HISTORY_FILE", global = true)]
    history_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler until interrupted.
    Serve,
    /// List stored rules.
    List,
    /// Execute one rule now.
    Run {
        rule_id: String,
        /// Evaluate without writing tags or recording history.
        #[arg(long)]
        dry_run: bool,
        /// Use a JSON inventory snapshot instead of the Proxmox API.
        #[arg(long)]
        resources: Option<PathBuf>,
    },
    /// Show execution history, newest first.
    History {
        /// Only this rule.
        #[arg(long)]
        rule: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Validate a 5-field cron expression and show its next fire times.
    CheckCron {
        expr: String,
        #[arg(long, default_value_t = 5)]
        count: usize,
    },
    /// Print the effective configuration (secrets redacted).
    Config,
}

// ── Commands ────────────────────────────────────────────────────────

fn proxmox(config: &Config) -> anyhow::Result<Arc<ProxmoxClient>> {
    let client = ProxmoxClient::new(&config.proxmox)
        .context("Proxmox API is not configured (set PROXMOX_HOST, PROXMOX_USER and PROXMOX_TOKEN_VALUE)")?;
    Ok(Arc::new(client))
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    let client = proxmox(config)?;
    let service = RuleService::open(config, client.clone(), client);
    service.scheduler().verify();
    service.start();
    info!(scheduled = service.scheduler().len(), "proxtag-worker running");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");
    service.shutdown().await;
    info!("proxtag-worker exited cleanly");
    Ok(())
}

fn list(config: &Config) {
    let store = RuleStore::open(&config.storage.rules_file);
    let rules = store.list();
    if rules.is_empty() {
        println!("No rules in {}", store.path().display());
        return;
    }
    for rule in rules {
        let schedule = if rule.schedule.is_active() {
            rule.schedule.cron.as_str()
        } else {
            "-"
        };
        let last_run = rule
            .last_run
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{}  {:<8} {:<16} last_run={} matches={}  {}",
            rule.id,
            if rule.enabled { "enabled" } else { "disabled" },
            schedule,
            last_run,
            rule.stats.total_matches,
            rule.name,
        );
    }
}

async fn run(
    config: &Config,
    rule_id: &str,
    dry_run: bool,
    resources: Option<PathBuf>,
) -> anyhow::Result<()> {
    let (inventory, enricher): (Arc<dyn Inventory>, Arc<dyn Enricher>) = match resources {
        Some(path) => {
            let snapshot = Arc::new(
                InMemoryInventory::from_file(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?,
            );
            (snapshot.clone(), snapshot)
        }
        None => {
            let client = proxmox(config)?;
            (client.clone(), client)
        }
    };
    let service = RuleService::open(config, inventory, enricher);
    let result = if dry_run {
        service.dry_run(rule_id).await?
    } else {
        service.execute(rule_id).await?
    };
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        bail!("rule '{}' failed: {}", result.rule_name, result.errors.join("; "));
    }
    Ok(())
}

fn history(config: &Config, rule: Option<String>, limit: Option<usize>) -> anyhow::Result<()> {
    let history = ExecutionHistory::open(
        &config.storage.history_file,
        config.storage.history_retention,
    );
    let results = match rule {
        Some(id) => history.history_for(&id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT)),
        None => history.recent(limit.unwrap_or(DEFAULT_RECENT_LIMIT)),
    };
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn check_cron(expr: &str, count: usize) -> anyhow::Result<()> {
    let validation = validate_cron(expr);
    for warning in &validation.warnings {
        println!("warning: {warning}");
    }
    if !validation.is_valid() {
        for error in &validation.errors {
            println!("error: {error}");
        }
        bail!("invalid cron expression '{expr}'");
    }

    let schedule = parse_cron(expr)?;
    let mut at = Utc::now();
    for _ in 0..count {
        let Some(next) = next_after(&schedule, at) else {
            break;
        };
        println!("{}", next.to_rfc3339());
        at = next;
    }
    Ok(())
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(path) = cli.rules_file {
        config.storage.rules_file = path;
    }
    if let Some(path) = cli.history_file {
        config.storage.history_file = path;
    }
    config.log_summary();

    match cli.command {
        Command::Serve => serve(&config).await,
        Command::List => {
            list(&config);
            Ok(())
        }
        Command::Run {
            rule_id,
            dry_run,
            resources,
        } => run(&config, &rule_id, dry_run, resources).await,
        Command::History { rule, limit } => history(&config, rule, limit),
        Command::CheckCron { expr, count } => check_cron(&expr, count),
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config.redacted_summary())?);
            Ok(())
        }
    }
}
