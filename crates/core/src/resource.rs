//! Inventory resource records (VMs and containers) and dotted-path field lookup.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProxtagError;
use crate::tags::parse_tags;

/// Guest type. Only these two kinds can be tagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Qemu,
    Lxc,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Qemu => "qemu",
            ResourceKind::Lxc => "lxc",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = ProxtagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qemu" => Ok(ResourceKind::Qemu),
            "lxc" => Ok(ResourceKind::Lxc),
            other => Err(ProxtagError::InvalidResourceKind(other.to_string())),
        }
    }
}

/// Extended attribute groups that are only present after enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtendedField {
    Config,
    Ha,
    Replication,
    Snapshots,
    Backup,
}

impl ExtendedField {
    pub const ALL: [ExtendedField; 5] = [
        ExtendedField::Config,
        ExtendedField::Ha,
        ExtendedField::Replication,
        ExtendedField::Snapshots,
        ExtendedField::Backup,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ExtendedField::Config => "config",
            ExtendedField::Ha => "ha",
            ExtendedField::Replication => "replication",
            ExtendedField::Snapshots => "snapshots",
            ExtendedField::Backup => "backup",
        }
    }

    /// Field path prefix, including the trailing dot (e.g. `"ha."`).
    pub fn prefix(&self) -> &'static str {
        match self {
            ExtendedField::Config => "config.",
            ExtendedField::Ha => "ha.",
            ExtendedField::Replication => "replication.",
            ExtendedField::Snapshots => "snapshots.",
            ExtendedField::Backup => "backup.",
        }
    }

    /// The extended group a condition field path reads from, if any.
    pub fn for_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| path.starts_with(f.prefix()))
    }
}

impl fmt::Display for ExtendedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Extended sub-objects ────────────────────────────────────────────
//
// `Default` of each is the value used when enrichment of that group fails.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HaInfo {
    pub enabled: bool,
    pub state: Option<String>,
    pub group: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicationInfo {
    pub enabled: bool,
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub count: u64,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub has_backup: bool,
    /// Start time of the most recent backup as reported upstream.
    pub last_backup: Option<Value>,
}

impl HaInfo {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "enabled" => Some(Value::Bool(self.enabled)),
            "state" => Some(opt_string(&self.state)),
            "group" => Some(opt_string(&self.group)),
            _ => None,
        }
    }
}

impl ReplicationInfo {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "enabled" => Some(Value::Bool(self.enabled)),
            "targets" => Some(Value::from(self.targets.clone())),
            _ => None,
        }
    }
}

impl SnapshotInfo {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "count" => Some(Value::from(self.count)),
            "names" => Some(Value::from(self.names.clone())),
            _ => None,
        }
    }
}

impl BackupInfo {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "has_backup" => Some(Value::Bool(self.has_backup)),
            "last_backup" => Some(self.last_backup.clone().unwrap_or(Value::Null)),
            _ => None,
        }
    }
}

// ── Resource ────────────────────────────────────────────────────────

/// A VM or container as listed by the inventory, optionally enriched with
/// extended attribute groups.
///
/// Unknown upstream attributes (`maxmem`, `cpu`, `uptime`, ...) land in
/// `extra` and stay addressable by field path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub vmid: u64,
    pub node: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ha: Option<HaInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication: Option<ReplicationInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshots: Option<SnapshotInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupInfo>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Resource {
    pub fn new(vmid: u64, node: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            vmid,
            node: node.into(),
            kind,
            name: None,
            status: None,
            tags: None,
            config: None,
            ha: None,
            replication: None,
            snapshots: None,
            backup: None,
            extra: Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = Some(tags.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Current tags, parsed from the delimited tag string.
    pub fn tag_list(&self) -> Vec<String> {
        parse_tags(self.tags.as_deref().unwrap_or(""))
    }

    /// Whether the given extended group has been populated.
    pub fn has_extended(&self, field: ExtendedField) -> bool {
        match field {
            ExtendedField::Config => self.config.is_some(),
            ExtendedField::Ha => self.ha.is_some(),
            ExtendedField::Replication => self.replication.is_some(),
            ExtendedField::Snapshots => self.snapshots.is_some(),
            ExtendedField::Backup => self.backup.is_some(),
        }
    }

    /// Populate an extended group with its empty default.
    pub fn set_extended_default(&mut self, field: ExtendedField) {
        match field {
            ExtendedField::Config => self.config = Some(Map::new()),
            ExtendedField::Ha => self.ha = Some(HaInfo::default()),
            ExtendedField::Replication => self.replication = Some(ReplicationInfo::default()),
            ExtendedField::Snapshots => self.snapshots = Some(SnapshotInfo::default()),
            ExtendedField::Backup => self.backup = Some(BackupInfo::default()),
        }
    }

    /// Resolve a dot-separated field path (e.g. `config.cores`, `ha.enabled`).
    ///
    /// Dots only traverse nested objects; there is no array indexing. A missing
    /// segment, or a non-object value before the last segment, yields `Null`.
    pub fn lookup(&self, path: &str) -> Value {
        let mut segments = path.split('.');
        let head = segments.next().unwrap_or_default();

        match head {
            "vmid" => leaf(Value::from(self.vmid), segments),
            "node" => leaf(Value::from(self.node.as_str()), segments),
            "type" => leaf(Value::from(self.kind.as_str()), segments),
            "name" => leaf(opt_string(&self.name), segments),
            "status" => leaf(opt_string(&self.status), segments),
            "tags" => leaf(opt_string(&self.tags), segments),
            "config" => match &self.config {
                Some(map) => descend_map(map, segments),
                None => Value::Null,
            },
            "ha" => typed_lookup(self.ha.as_ref(), segments, HaInfo::field),
            "replication" => {
                typed_lookup(self.replication.as_ref(), segments, ReplicationInfo::field)
            }
            "snapshots" => typed_lookup(self.snapshots.as_ref(), segments, SnapshotInfo::field),
            "backup" => typed_lookup(self.backup.as_ref(), segments, BackupInfo::field),
            other => match self.extra.get(other) {
                Some(value) => descend(value, segments),
                None => Value::Null,
            },
        }
    }
}

fn opt_string(value: &Option<String>) -> Value {
    value.as_deref().map_or(Value::Null, Value::from)
}

/// A scalar root field: any further segment makes the path unresolvable.
fn leaf<'a>(value: Value, mut rest: impl Iterator<Item = &'a str>) -> Value {
    if rest.next().is_some() {
        Value::Null
    } else {
        value
    }
}

fn descend<'a>(root: &Value, segments: impl Iterator<Item = &'a str>) -> Value {
    let mut current = root;
    for segment in segments {
        match current {
            Value::Object(map) => match map.get(segment) {
                Some(next) => current = next,
                None => return Value::Null,
            },
            _ => return Value::Null,
        }
    }
    current.clone()
}

fn descend_map<'a>(map: &Map<String, Value>, mut segments: impl Iterator<Item = &'a str>) -> Value {
    match segments.next() {
        None => Value::Object(map.clone()),
        Some(segment) => match map.get(segment) {
            Some(value) => descend(value, segments),
            None => Value::Null,
        },
    }
}

fn typed_lookup<'a, T: Serialize>(
    value: Option<&T>,
    mut segments: impl Iterator<Item = &'a str>,
    field: impl Fn(&T, &str) -> Option<Value>,
) -> Value {
    let Some(value) = value else {
        return Value::Null;
    };
    match segments.next() {
        None => serde_json::to_value(value).unwrap_or(Value::Null),
        Some(name) => match field(value, name) {
            Some(v) => descend(&v, segments),
            None => Value::Null,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Resource {
        let mut config = Map::new();
        config.insert("cores".into(), json!(4));
        config.insert("ostype".into(), json!("l26"));
        config.insert("net".into(), json!({"bridge": "vmbr0"}));

        let mut r = Resource::new(101, "pve1", ResourceKind::Qemu)
            .with_name("web-01")
            .with_status("running")
            .with_tags("prod;web")
            .with_field("maxmem", 4_294_967_296u64);
        r.config = Some(config);
        r.ha = Some(HaInfo {
            enabled: true,
            state: Some("started".into()),
            group: None,
        });
        r
    }

    #[test]
    fn lookup_root_fields() {
        let r = sample();
        assert_eq!(r.lookup("vmid"), json!(101));
        assert_eq!(r.lookup("node"), json!("pve1"));
        assert_eq!(r.lookup("type"), json!("qemu"));
        assert_eq!(r.lookup("status"), json!("running"));
        assert_eq!(r.lookup("tags"), json!("prod;web"));
        assert_eq!(r.lookup("maxmem"), json!(4_294_967_296u64));
    }

    #[test]
    fn lookup_nested_config() {
        let r = sample();
        assert_eq!(r.lookup("config.cores"), json!(4));
        assert_eq!(r.lookup("config.net.bridge"), json!("vmbr0"));
        assert_eq!(r.lookup("config.missing"), Value::Null);
    }

    #[test]
    fn lookup_typed_groups() {
        let r = sample();
        assert_eq!(r.lookup("ha.enabled"), json!(true));
        assert_eq!(r.lookup("ha.state"), json!("started"));
        assert_eq!(r.lookup("ha.group"), Value::Null);
        assert_eq!(r.lookup("replication.enabled"), Value::Null);
    }

    #[test]
    fn lookup_through_scalar_is_null() {
        let r = sample();
        assert_eq!(r.lookup("status.length"), Value::Null);
        assert_eq!(r.lookup("config.cores.value"), Value::Null);
        assert_eq!(r.lookup("nope"), Value::Null);
        assert_eq!(r.lookup(""), Value::Null);
    }

    #[test]
    fn deserializes_cluster_resource_with_extras() {
        let raw = json!({
            "id": "lxc/205",
            "vmid": 205,
            "node": "pve2",
            "type": "lxc",
            "status": "stopped",
            "maxdisk": 8589934592u64,
        });
        let r: Resource = serde_json::from_value(raw).unwrap();
        assert_eq!(r.kind, ResourceKind::Lxc);
        assert_eq!(r.extra.get("id"), Some(&json!("lxc/205")));
        assert_eq!(r.lookup("maxdisk"), json!(8589934592u64));
        assert!(r.tags.is_none());
    }

    #[test]
    fn resource_kind_rejects_unknown() {
        assert_eq!("lxc".parse::<ResourceKind>().unwrap(), ResourceKind::Lxc);
        let err = "storage".parse::<ResourceKind>().unwrap_err();
        assert!(matches!(err, ProxtagError::InvalidResourceKind(ref k) if k == "storage"));
    }

    #[test]
    fn extended_field_from_path() {
        assert_eq!(ExtendedField::for_path("config.cores"), Some(ExtendedField::Config));
        assert_eq!(ExtendedField::for_path("backup.has_backup"), Some(ExtendedField::Backup));
        assert_eq!(ExtendedField::for_path("configuration"), None);
        assert_eq!(ExtendedField::for_path("status"), None);
    }
}
