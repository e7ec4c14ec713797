use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub proxmox: ProxmoxConfig,
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `PROXTAG_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("PROXTAG_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            proxmox: ProxmoxConfig::from_env_profiled(p),
            storage: StorageConfig::from_env_profiled(p),
            scheduler: SchedulerConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  proxmox:    host={}, port={}, verify_ssl={}, configured={}",
            self.proxmox.host,
            self.proxmox.port,
            self.proxmox.verify_ssl,
            self.proxmox.is_configured()
        );
        tracing::info!(
            "  storage:    rules={}, history={}, retention={}",
            self.storage.rules_file.display(),
            self.storage.history_file.display(),
            self.storage.history_retention
        );
        tracing::info!("  scheduler:  tick={}s", self.scheduler.tick_secs);
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "proxmox": {
                "host": self.proxmox.host,
                "port": self.proxmox.port,
                "user": self.proxmox.user,
                "verify_ssl": self.proxmox.verify_ssl,
                "configured": self.proxmox.is_configured(),
            },
            "storage": {
                "rules_file": self.storage.rules_file,
                "history_file": self.storage.history_file,
                "history_retention": self.storage.history_retention,
            },
            "scheduler": { "tick_secs": self.scheduler.tick_secs },
        })
    }
}

// ── Proxmox VE API ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxmoxConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub token_name: String,
    pub token_value: Option<String>,
    pub verify_ssl: bool,
    pub timeout_secs: u64,
    /// Total attempts per call, including the first one.
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub backoff_factor: f64,
}

impl ProxmoxConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PROXMOX_HOST", ""),
            port: profiled_env_parse(p, "PROXMOX_PORT", 8006),
            user: profiled_env_or(p, "PROXMOX_USER", ""),
            token_name: profiled_env_or(p, "PROXMOX_TOKEN_NAME", ""),
            token_value: profiled_env_opt(p, "PROXMOX_TOKEN_VALUE"),
            verify_ssl: profiled_env_bool(p, "VERIFY_SSL", true),
            timeout_secs: profiled_env_parse(p, "PROXMOX_TIMEOUT_SECS", 10),
            retry_attempts: profiled_env_parse(p, "PROXMOX_RETRY_ATTEMPTS", 3),
            retry_delay_ms: profiled_env_parse(p, "PROXMOX_RETRY_DELAY_MS", 1000),
            backoff_factor: profiled_env_parse(p, "PROXMOX_BACKOFF_FACTOR", 2.0),
        }
    }

    pub fn base_url(&self) -> String {
        format!("https://{}:{}/api2/json", self.host, self.port)
    }

    /// Value for the `Authorization` header (`PVEAPIToken=user!name=secret`).
    pub fn auth_header(&self) -> String {
        format!(
            "PVEAPIToken={}!{}={}",
            self.user,
            self.token_name,
            self.token_value.as_deref().unwrap_or("")
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn is_configured(&self) -> bool {
        !self.host.is_empty() && !self.user.is_empty() && self.token_value.is_some()
    }
}

impl Default for ProxmoxConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8006,
            user: String::new(),
            token_name: String::new(),
            token_value: None,
            verify_ssl: true,
            timeout_secs: 10,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            backoff_factor: 2.0,
        }
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub rules_file: PathBuf,
    pub history_file: PathBuf,
    pub history_retention: usize,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        let data_dir = PathBuf::from(profiled_env_or(p, "DATA_DIR", "data"));
        let rules_file = profiled_env_opt(p, "RULES_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("conditional_rules.json"));
        let history_file = profiled_env_opt(p, "HISTORY_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("rule_execution_history.json"));
        Self {
            data_dir,
            rules_file,
            history_file,
            history_retention: profiled_env_parse(p, "HISTORY_RETENTION", 100),
        }
    }
}

// ── Scheduler ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between due-job checks of the background runner.
    pub tick_secs: u64,
}

impl SchedulerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            tick_secs: profiled_env_parse::<u64>(p, "SCHEDULER_TICK_SECS", 1).max(1),
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_secs: 1 }
    }
}
