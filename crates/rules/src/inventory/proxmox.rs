//! Proxmox VE HTTP client with retry and selective enrichment.

use std::collections::BTreeSet;
use std::time::Duration;

use proxtag_core::config::ProxmoxConfig;
use proxtag_core::{
    BackupInfo, ExtendedField, HaInfo, ReplicationInfo, Resource, ResourceKind, SnapshotInfo,
};
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::{Enricher, Inventory, InventoryError, API_ERRORS_KEY};

// ── Retry policy ────────────────────────────────────────────────────

/// Exponential backoff for retryable failures (connection errors, timeouts, 5xx).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ProxmoxConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            initial_delay: Duration::from_millis(config.retry_delay_ms),
            backoff_factor: config.backoff_factor,
        }
    }

    /// Delay before the retry following failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt as i32);
        Duration::try_from_secs_f64(self.initial_delay.as_secs_f64() * factor)
            .unwrap_or(self.initial_delay)
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
}

fn is_retryable_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout()
}

// ── Client ──────────────────────────────────────────────────────────

/// Client for the Proxmox VE JSON API using token authentication.
pub struct ProxmoxClient {
    http: reqwest::Client,
    base_url: String,
    auth_header: String,
    retry: RetryPolicy,
}

impl ProxmoxClient {
    pub fn new(config: &ProxmoxConfig) -> Result<Self, InventoryError> {
        if !config.is_configured() {
            return Err(InventoryError::Config(
                "PROXMOX_HOST, PROXMOX_USER and PROXMOX_TOKEN_VALUE must be set".into(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url(),
            auth_header: config.auth_header(),
            retry: RetryPolicy::from_config(config),
        })
    }

    /// Point the client at a different API root (e.g. a proxy or test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue a request and return the `data` member of the response envelope
    /// (`Null` when absent). Retries per the configured policy.
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, InventoryError> {
        let url = format!("{}{}", self.base_url, path);
        let max_attempts = self.retry.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay = self.retry.delay_for(attempt - 1);
                warn!(
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    path,
                    error = %last_error,
                    "retrying Proxmox API call"
                );
                tokio::time::sleep(delay).await;
            }

            let mut req = self
                .http
                .request(method.clone(), &url)
                .header(AUTHORIZATION, &self.auth_header);
            if let Some(body) = body {
                req = req.json(body);
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let mut envelope: Value = resp.json().await?;
                        return Ok(envelope
                            .get_mut("data")
                            .map(Value::take)
                            .unwrap_or(Value::Null));
                    }
                    let text = resp.text().await.unwrap_or_default();
                    if !is_retryable_status(status) {
                        return Err(InventoryError::Status {
                            status: status.as_u16(),
                            body: text,
                        });
                    }
                    last_error = format!("status {}: {}", status.as_u16(), text);
                }
                Err(e) if is_retryable_error(&e) => last_error = e.to_string(),
                Err(e) => return Err(e.into()),
            }
        }

        Err(InventoryError::RetriesExhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    async fn get<T: DeserializeOwned + Default>(&self, path: &str) -> Result<T, InventoryError> {
        match self.call(Method::GET, path, None).await? {
            Value::Null => Ok(T::default()),
            data => Ok(serde_json::from_value(data)?),
        }
    }

    // ── Extended groups ─────────────────────────────────────────────

    async fn fetch_config(&self, r: &Resource) -> Result<Map<String, Value>, InventoryError> {
        self.get(&format!("/nodes/{}/{}/{}/config", r.node, r.kind, r.vmid))
            .await
    }

    async fn fetch_ha(&self, vmid: u64) -> Result<HaInfo, InventoryError> {
        let resources: Vec<Value> = self.get("/cluster/ha/resources").await?;
        // HA resources are named like "vm:100" or "ct:101".
        let suffix = format!(":{vmid}");
        let entry = resources.iter().find(|r| {
            r.get("sid")
                .and_then(Value::as_str)
                .is_some_and(|sid| sid.ends_with(&suffix))
        });
        Ok(match entry {
            Some(e) => HaInfo {
                enabled: true,
                state: e.get("state").and_then(Value::as_str).map(str::to_string),
                group: e.get("group").and_then(Value::as_str).map(str::to_string),
            },
            None => HaInfo::default(),
        })
    }

    async fn fetch_replication(&self, r: &Resource) -> Result<ReplicationInfo, InventoryError> {
        let jobs: Vec<Value> = self.get(&format!("/nodes/{}/replication", r.node)).await?;
        let targets: Vec<String> = jobs
            .iter()
            .filter(|j| as_vmid(j.get("guest")) == Some(r.vmid))
            .filter_map(|j| j.get("target").and_then(Value::as_str).map(str::to_string))
            .collect();
        let enabled = jobs.iter().any(|j| as_vmid(j.get("guest")) == Some(r.vmid));
        Ok(ReplicationInfo { enabled, targets })
    }

    async fn fetch_snapshots(&self, r: &Resource) -> Result<SnapshotInfo, InventoryError> {
        let snapshots: Vec<Value> = self
            .get(&format!("/nodes/{}/{}/{}/snapshot", r.node, r.kind, r.vmid))
            .await?;
        // `count` includes the synthetic "current" entry; `names` does not.
        let names = snapshots
            .iter()
            .filter_map(|s| s.get("name").and_then(Value::as_str))
            .filter(|name| *name != "current")
            .map(str::to_string)
            .collect();
        Ok(SnapshotInfo {
            count: snapshots.len() as u64,
            names,
        })
    }

    async fn fetch_backup(&self, vmid: u64) -> Result<BackupInfo, InventoryError> {
        let backups: Vec<Value> = self.get("/cluster/backup").await?;
        let latest = backups
            .iter()
            .filter(|b| as_vmid(b.get("vmid")) == Some(vmid))
            .max_by(|a, b| {
                start_time(a)
                    .partial_cmp(&start_time(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        Ok(match latest {
            Some(b) => BackupInfo {
                has_backup: true,
                last_backup: b.get("starttime").cloned(),
            },
            None => BackupInfo::default(),
        })
    }
}

/// vmids arrive as numbers, occasionally as strings.
fn as_vmid(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn start_time(entry: &Value) -> f64 {
    match entry.get("starttime") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// One fetched extended group, applied to the resource after the request.
enum Group {
    Config(Map<String, Value>),
    Ha(HaInfo),
    Replication(ReplicationInfo),
    Snapshots(SnapshotInfo),
    Backup(BackupInfo),
}

impl Group {
    fn apply(self, resource: &mut Resource) {
        match self {
            Group::Config(c) => resource.config = Some(c),
            Group::Ha(h) => resource.ha = Some(h),
            Group::Replication(r) => resource.replication = Some(r),
            Group::Snapshots(s) => resource.snapshots = Some(s),
            Group::Backup(b) => resource.backup = Some(b),
        }
    }
}

fn error_label(field: ExtendedField) -> &'static str {
    match field {
        ExtendedField::Ha => "HA",
        other => other.name(),
    }
}

// ── Trait impls ─────────────────────────────────────────────────────

#[async_trait::async_trait]
impl Inventory for ProxmoxClient {
    async fn list_resources(&self) -> Result<Vec<Resource>, InventoryError> {
        let all: Vec<Value> = self.get("/cluster/resources").await?;
        let mut resources = Vec::new();
        for raw in all {
            let kind = raw.get("type").and_then(Value::as_str).unwrap_or_default();
            if kind.parse::<ResourceKind>().is_err() {
                continue;
            }
            match serde_json::from_value::<Resource>(raw) {
                Ok(r) => resources.push(r),
                Err(e) => warn!(error = %e, "skipping malformed cluster resource"),
            }
        }
        debug!(count = resources.len(), "listed cluster resources");
        Ok(resources)
    }

    async fn update_tags(
        &self,
        node: &str,
        vmid: u64,
        tags: &str,
        kind: ResourceKind,
    ) -> Result<(), InventoryError> {
        let body = json!({ "tags": tags.trim() });
        self.call(
            Method::PUT,
            &format!("/nodes/{node}/{kind}/{vmid}/config"),
            Some(&body),
        )
        .await?;
        info!(vmid, node, tags = %tags.trim(), "updated tags");
        Ok(())
    }
}

#[async_trait::async_trait]
impl Enricher for ProxmoxClient {
    async fn enrich(&self, mut resource: Resource, fields: &BTreeSet<ExtendedField>) -> Resource {
        let mut api_errors: Vec<Value> = Vec::new();

        for &field in fields {
            let outcome = match field {
                ExtendedField::Config => self.fetch_config(&resource).await.map(Group::Config),
                ExtendedField::Ha => self.fetch_ha(resource.vmid).await.map(Group::Ha),
                ExtendedField::Replication => {
                    self.fetch_replication(&resource).await.map(Group::Replication)
                }
                ExtendedField::Snapshots => {
                    self.fetch_snapshots(&resource).await.map(Group::Snapshots)
                }
                ExtendedField::Backup => self.fetch_backup(resource.vmid).await.map(Group::Backup),
            };

            match outcome {
                Ok(group) => group.apply(&mut resource),
                Err(e) => {
                    warn!(vmid = resource.vmid, field = %field, error = %e, "enrichment failed, using defaults");
                    resource.set_extended_default(field);
                    api_errors.push(Value::from(format!("{}: {e}", error_label(field))));
                }
            }
        }

        if !api_errors.is_empty() {
            info!(
                vmid = resource.vmid,
                errors = api_errors.len(),
                "selective enrichment completed with API errors"
            );
            resource
                .extra
                .insert(API_ERRORS_KEY.to_string(), Value::Array(api_errors));
        }
        resource
    }
}
