//! [`RuleStore`]: JSON-backed rule collection.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::schema::{ExecutionResult, NewRule, Rule, RulePatch};
use crate::validation::validate_rule;

use super::error::{Result, StoreError};

pub const DOCUMENT_VERSION: &str = "1.0";

/// On-disk layout of the rules file.
#[derive(Debug, Serialize, Deserialize)]
struct RulesDocument {
    #[serde(default)]
    rules: Vec<Rule>,
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

fn default_version() -> String {
    DOCUMENT_VERSION.to_string()
}

/// Authoritative rule collection, persisted as a single JSON document.
///
/// Every mutation rewrites the whole file while holding the write lock, so
/// concurrent writers never interleave.
pub struct RuleStore {
    path: PathBuf,
    rules: RwLock<IndexMap<String, Rule>>,
}

impl RuleStore {
    /// Open the store at `path`. A missing file is an empty store; a corrupt
    /// one is logged and treated as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let rules = load_rules(&path);
        info!(path = %path.display(), count = rules.len(), "loaded rules");
        Self {
            path,
            rules: RwLock::new(rules),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Option<Rule> {
        self.rules
            .read()
            .expect("rules lock poisoned")
            .get(id)
            .cloned()
    }

    /// All rules in creation order.
    pub fn list(&self) -> Vec<Rule> {
        self.rules
            .read()
            .expect("rules lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Rule> {
        self.rules
            .read()
            .expect("rules lock poisoned")
            .values()
            .find(|r| r.name == name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.rules.read().expect("rules lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Mutations ───────────────────────────────────────────────────

    /// Validate and insert a new rule with a fresh id and timestamps.
    pub fn create(&self, new_rule: NewRule) -> Result<Rule> {
        let rule = new_rule.into_rule(Uuid::new_v4().to_string(), Utc::now());
        check_valid(&rule)?;

        let mut rules = self.rules.write().expect("rules lock poisoned");
        check_unique_name(&rules, &rule)?;
        let mut next = rules.clone();
        next.insert(rule.id.clone(), rule.clone());
        self.commit(&mut rules, next)?;

        info!(rule_id = %rule.id, rule = %rule.name, "created rule");
        Ok(rule)
    }

    /// Merge `patch` into an existing rule, re-validate and bump `updated_at`.
    pub fn update(&self, id: &str, patch: RulePatch) -> Result<Rule> {
        let mut rules = self.rules.write().expect("rules lock poisoned");
        let mut rule = rules
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        rule.apply(patch);
        rule.updated_at = Utc::now();
        check_valid(&rule)?;
        check_unique_name(&rules, &rule)?;

        let mut next = rules.clone();
        next.insert(rule.id.clone(), rule.clone());
        self.commit(&mut rules, next)?;

        info!(rule_id = %rule.id, rule = %rule.name, "updated rule");
        Ok(rule)
    }

    /// Remove a rule. Returns `false` if it did not exist.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut rules = self.rules.write().expect("rules lock poisoned");
        let mut next = rules.clone();
        let Some(removed) = next.shift_remove(id) else {
            return Ok(false);
        };
        self.commit(&mut rules, next)?;

        info!(rule_id = %id, rule = %removed.name, "deleted rule");
        Ok(true)
    }

    /// Fold an execution result into the rule's statistics and `last_run`.
    /// No-op if the rule has been deleted since.
    pub fn record_stats(&self, id: &str, result: &ExecutionResult) -> Result<()> {
        let mut rules = self.rules.write().expect("rules lock poisoned");
        let mut next = rules.clone();
        let Some(rule) = next.get_mut(id) else {
            debug!(rule_id = %id, "stats for unknown rule dropped");
            return Ok(());
        };
        rule.record(result);
        self.commit(&mut rules, next)
    }

    // ── Persistence ─────────────────────────────────────────────────

    /// Persist `next` and only then make it the live collection. On a failed
    /// write the in-memory state is left as it was.
    fn commit(
        &self,
        live: &mut IndexMap<String, Rule>,
        next: IndexMap<String, Rule>,
    ) -> Result<()> {
        self.persist(&next)?;
        *live = next;
        Ok(())
    }

    /// Write the whole collection via a `.tmp` file and rename.
    fn persist(&self, rules: &IndexMap<String, Rule>) -> Result<()> {
        let doc = RulesDocument {
            rules: rules.values().cloned().collect(),
            version: DOCUMENT_VERSION.to_string(),
            updated_at: Some(Utc::now()),
        };
        write_atomic(&self.path, &serde_json::to_vec_pretty(&doc)?)?;
        debug!(path = %self.path.display(), count = rules.len(), "saved rules");
        Ok(())
    }
}

fn check_valid(rule: &Rule) -> Result<()> {
    let validation = validate_rule(rule);
    if validation.is_valid() {
        Ok(())
    } else {
        Err(StoreError::Validation(validation.errors))
    }
}

fn check_unique_name(rules: &IndexMap<String, Rule>, rule: &Rule) -> Result<()> {
    let taken = rules
        .values()
        .any(|other| other.id != rule.id && other.name == rule.name);
    if taken {
        Err(StoreError::DuplicateName(rule.name.clone()))
    } else {
        Ok(())
    }
}

fn load_rules(path: &Path) -> IndexMap<String, Rule> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return IndexMap::new(),
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to read rules file, starting empty");
            return IndexMap::new();
        }
    };

    match serde_json::from_str::<RulesDocument>(&text) {
        Ok(doc) => {
            if doc.version != DOCUMENT_VERSION {
                warn!(path = %path.display(), version = %doc.version, "unexpected rules file version");
            }
            for rule in &doc.rules {
                let validation = validate_rule(rule);
                if !validation.is_valid() {
                    warn!(
                        rule_id = %rule.id,
                        rule = %rule.name,
                        errors = ?validation.errors,
                        "stored rule is invalid"
                    );
                }
            }
            doc.rules.into_iter().map(|r| (r.id.clone(), r)).collect()
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "corrupt rules file, starting empty");
            IndexMap::new()
        }
    }
}

/// Write `bytes` to `path` through a sibling `.tmp` file, creating parent
/// directories as needed.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "data".to_string());
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)
}
