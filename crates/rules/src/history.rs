//! Per-rule execution history with bounded retention.
//!
//! Each rule keeps its most recent results newest-first, capped at a
//! configurable retention (default 100) with oldest-first eviction. The whole
//! map is mirrored to a JSON file (`{rule_id: [result, ...]}`) on every change.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, error};

use crate::schema::ExecutionResult;
use crate::store::{write_atomic, Result};

/// Default number of results kept per rule.
pub const DEFAULT_RETENTION: usize = 100;

type HistoryMap = BTreeMap<String, VecDeque<ExecutionResult>>;

/// Execution log shared by scheduled and manual runs.
pub struct ExecutionHistory {
    path: Option<PathBuf>,
    entries: RwLock<HistoryMap>,
    retention: usize,
}

impl ExecutionHistory {
    /// Open the history file at `path`. Missing or corrupt files start empty.
    pub fn open(path: impl Into<PathBuf>, retention: usize) -> Self {
        let path = path.into();
        let retention = retention.max(1);
        let mut entries = load_history(&path);
        for results in entries.values_mut() {
            results.truncate(retention);
        }
        Self {
            path: Some(path),
            entries: RwLock::new(entries),
            retention,
        }
    }

    /// A history that is never written to disk.
    pub fn in_memory(retention: usize) -> Self {
        Self {
            path: None,
            entries: RwLock::new(HistoryMap::new()),
            retention: retention.max(1),
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Record a result as the newest entry for its rule.
    pub fn append(&self, result: ExecutionResult) -> Result<()> {
        let mut guard = self.entries.write().expect("history lock poisoned");
        let results = guard.entry(result.rule_id.clone()).or_default();
        results.push_front(result);
        results.truncate(self.retention);
        self.persist(&guard)
    }

    /// Up to `limit` results for one rule, newest first.
    pub fn history_for(&self, rule_id: &str, limit: usize) -> Vec<ExecutionResult> {
        self.entries
            .read()
            .expect("history lock poisoned")
            .get(rule_id)
            .map(|results| results.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Up to `limit` results across all rules, newest first.
    pub fn recent(&self, limit: usize) -> Vec<ExecutionResult> {
        let guard = self.entries.read().expect("history lock poisoned");
        let mut all: Vec<ExecutionResult> = guard.values().flatten().cloned().collect();
        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        all.truncate(limit);
        all
    }

    /// Drop every result for a rule. Returns whether anything was removed.
    pub fn clear(&self, rule_id: &str) -> Result<bool> {
        let mut guard = self.entries.write().expect("history lock poisoned");
        if guard.remove(rule_id).is_none() {
            return Ok(false);
        }
        self.persist(&guard)?;
        Ok(true)
    }

    /// Total number of stored results.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .expect("history lock poisoned")
            .values()
            .map(VecDeque::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, entries: &HistoryMap) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_atomic(path, &serde_json::to_vec_pretty(entries)?)?;
        debug!(path = %path.display(), rules = entries.len(), "saved execution history");
        Ok(())
    }
}

fn load_history(path: &Path) -> HistoryMap {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HistoryMap::new(),
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to read history file, starting empty");
            return HistoryMap::new();
        }
    };
    serde_json::from_str(&text).unwrap_or_else(|e| {
        error!(path = %path.display(), error = %e, "corrupt history file, starting empty");
        HistoryMap::new()
    })
}
