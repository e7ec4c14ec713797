//! Snapshot-backed inventory for offline runs and tests.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::RwLock;

use proxtag_core::{ExtendedField, Resource, ResourceKind};
use serde_json::Value;
use tracing::debug;

use super::{Enricher, Inventory, InventoryError};

/// Inventory served from a fixed list of records. Tag writes update the
/// records in place so later listings observe them.
pub struct InMemoryInventory {
    resources: RwLock<Vec<Resource>>,
    failing: RwLock<HashSet<u64>>,
    writes: RwLock<Vec<(u64, String)>>,
}

impl InMemoryInventory {
    pub fn new(resources: Vec<Resource>) -> Self {
        Self {
            resources: RwLock::new(resources),
            failing: RwLock::new(HashSet::new()),
            writes: RwLock::new(Vec::new()),
        }
    }

    /// Load a JSON snapshot: either a bare array of resources or a
    /// `/cluster/resources` style `{"data": [...]}` envelope. Non-guest
    /// entries are skipped.
    pub fn from_file(path: &Path) -> Result<Self, InventoryError> {
        let text = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&text)?;
        let items = match value {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("data") {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(InventoryError::InvalidResponse(
                        "expected an array or an object with a `data` array".into(),
                    ))
                }
            },
            _ => {
                return Err(InventoryError::InvalidResponse(
                    "expected an array of resources".into(),
                ))
            }
        };

        let mut resources = Vec::with_capacity(items.len());
        for item in items {
            let kind = item.get("type").and_then(Value::as_str).unwrap_or_default();
            if kind.parse::<ResourceKind>().is_ok() {
                resources.push(serde_json::from_value(item)?);
            }
        }
        debug!(path = %path.display(), count = resources.len(), "loaded inventory snapshot");
        Ok(Self::new(resources))
    }

    /// Current records, including any tag writes applied so far.
    pub fn snapshot(&self) -> Vec<Resource> {
        self.resources.read().expect("inventory lock poisoned").clone()
    }

    pub fn get(&self, vmid: u64) -> Option<Resource> {
        self.resources
            .read()
            .expect("inventory lock poisoned")
            .iter()
            .find(|r| r.vmid == vmid)
            .cloned()
    }

    /// Make every later tag write for `vmid` fail.
    pub fn fail_updates_for(&self, vmid: u64) {
        self.failing
            .write()
            .expect("inventory lock poisoned")
            .insert(vmid);
    }

    /// Tag writes received so far, in order, as `(vmid, tags)`.
    pub fn writes(&self) -> Vec<(u64, String)> {
        self.writes.read().expect("inventory lock poisoned").clone()
    }
}

#[async_trait::async_trait]
impl Inventory for InMemoryInventory {
    async fn list_resources(&self) -> Result<Vec<Resource>, InventoryError> {
        Ok(self.snapshot())
    }

    async fn update_tags(
        &self,
        node: &str,
        vmid: u64,
        tags: &str,
        kind: ResourceKind,
    ) -> Result<(), InventoryError> {
        if self
            .failing
            .read()
            .expect("inventory lock poisoned")
            .contains(&vmid)
        {
            return Err(InventoryError::Status {
                status: 500,
                body: format!("update of {vmid} rejected"),
            });
        }

        let mut resources = self.resources.write().expect("inventory lock poisoned");
        let resource = resources
            .iter_mut()
            .find(|r| r.vmid == vmid && r.node == node && r.kind == kind)
            .ok_or(InventoryError::NotFound(vmid))?;
        let trimmed = tags.trim();
        resource.tags = Some(trimmed.to_string());
        self.writes
            .write()
            .expect("inventory lock poisoned")
            .push((vmid, trimmed.to_string()));
        Ok(())
    }
}

/// Snapshots carry whatever extended groups they were captured with; missing
/// groups are filled with their defaults.
#[async_trait::async_trait]
impl Enricher for InMemoryInventory {
    async fn enrich(&self, mut resource: Resource, fields: &BTreeSet<ExtendedField>) -> Resource {
        for &field in fields {
            if !resource.has_extended(field) {
                resource.set_extended_default(field);
            }
        }
        resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn update_tags_rewrites_record() {
        let inv = InMemoryInventory::new(vec![
            Resource::new(100, "pve1", ResourceKind::Qemu).with_tags("a"),
        ]);
        inv.update_tags("pve1", 100, " a;b ", ResourceKind::Qemu)
            .await
            .unwrap();
        assert_eq!(inv.get(100).unwrap().tags.as_deref(), Some("a;b"));
        assert_eq!(inv.writes(), vec![(100, "a;b".to_string())]);
    }

    #[tokio::test]
    async fn unknown_or_mismatched_resource_is_not_found() {
        let inv = InMemoryInventory::new(vec![Resource::new(100, "pve1", ResourceKind::Qemu)]);
        let err = inv
            .update_tags("pve1", 100, "a", ResourceKind::Lxc)
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::NotFound(100)));
        assert!(inv.writes().is_empty());
    }

    #[tokio::test]
    async fn injected_failure() {
        let inv = InMemoryInventory::new(vec![Resource::new(100, "pve1", ResourceKind::Qemu)]);
        inv.fail_updates_for(100);
        assert!(inv
            .update_tags("pve1", 100, "a", ResourceKind::Qemu)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn enrich_fills_missing_groups_only() {
        let inv = InMemoryInventory::new(vec![]);
        let mut r = Resource::new(100, "pve1", ResourceKind::Qemu);
        r.ha = Some(proxtag_core::HaInfo {
            enabled: true,
            state: Some("started".into()),
            group: None,
        });
        let fields = BTreeSet::from([ExtendedField::Ha, ExtendedField::Backup]);
        let r = inv.enrich(r, &fields).await;
        assert_eq!(r.lookup("ha.enabled"), json!(true));
        assert_eq!(r.lookup("backup.has_backup"), json!(false));
        assert!(r.snapshots.is_none());
    }

    #[test]
    fn from_file_accepts_envelope_and_skips_non_guests() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("resources.json");
        std::fs::write(
            &path,
            json!({"data": [
                {"type": "node", "node": "pve1"},
                {"type": "qemu", "vmid": 100, "node": "pve1", "tags": "prod"},
                {"type": "lxc", "vmid": 200, "node": "pve1"}
            ]})
            .to_string(),
        )
        .unwrap();

        let inv = InMemoryInventory::from_file(&path).unwrap();
        let ids: Vec<u64> = inv.snapshot().iter().map(|r| r.vmid).collect();
        assert_eq!(ids, vec![100, 200]);
    }

    #[test]
    fn from_file_rejects_scalars() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("resources.json");
        std::fs::write(&path, "42").unwrap();
        assert!(InMemoryInventory::from_file(&path).is_err());
    }
}
