//! Per-resource tag bookkeeping for one THEN or ELSE branch.

use indexmap::IndexSet;
use proxtag_core::format_tags;

use crate::schema::TagMutation;

/// Planned tag change for one resource.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct TagPlan {
    /// Resulting tag set; existing order kept, additions appended.
    pub tags: IndexSet<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub already_present: Vec<String>,
    /// Whether the result differs from the tags as originally parsed.
    pub changed: bool,
}

impl TagPlan {
    pub(crate) fn formatted(&self) -> String {
        format_tags(&self.tags)
    }
}

/// Apply a branch to the parsed current tags. Every tag is lowercased.
pub(crate) fn plan_tags(current: &[String], mutation: TagMutation<'_>) -> TagPlan {
    let mut tags: IndexSet<String> = current.iter().map(|t| t.to_lowercase()).collect();
    let mut plan = TagPlan::default();

    for tag in mutation.add {
        let tag = tag.to_lowercase();
        if tags.contains(&tag) {
            plan.already_present.push(tag);
        } else {
            tags.insert(tag.clone());
            plan.added.push(tag);
        }
    }

    for tag in mutation.remove {
        let tag = tag.to_lowercase();
        if tags.shift_remove(&tag) {
            plan.removed.push(tag);
        }
    }

    let original: IndexSet<&str> = current.iter().map(String::as_str).collect();
    plan.changed = tags.len() != original.len() || tags.iter().any(|t| !original.contains(t.as_str()));
    plan.tags = tags;
    plan
}
