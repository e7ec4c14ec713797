//! THEN/ELSE tag mutations.

use serde::{Deserialize, Serialize};

/// Tag mutations applied to matched (THEN) and unmatched (ELSE) resources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionSet {
    #[serde(default)]
    pub add_tags: Vec<String>,
    #[serde(default)]
    pub remove_tags: Vec<String>,
    #[serde(default)]
    pub else_add_tags: Vec<String>,
    #[serde(default)]
    pub else_remove_tags: Vec<String>,
}

/// One branch of an [`ActionSet`].
#[derive(Debug, Clone, Copy)]
pub struct TagMutation<'a> {
    pub add: &'a [String],
    pub remove: &'a [String],
}

impl TagMutation<'_> {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

impl ActionSet {
    pub fn then(add: &[&str], remove: &[&str]) -> Self {
        Self {
            add_tags: add.iter().map(|t| t.to_string()).collect(),
            remove_tags: remove.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_else(mut self, add: &[&str], remove: &[&str]) -> Self {
        self.else_add_tags = add.iter().map(|t| t.to_string()).collect();
        self.else_remove_tags = remove.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn then_branch(&self) -> TagMutation<'_> {
        TagMutation {
            add: &self.add_tags,
            remove: &self.remove_tags,
        }
    }

    pub fn else_branch(&self) -> TagMutation<'_> {
        TagMutation {
            add: &self.else_add_tags,
            remove: &self.else_remove_tags,
        }
    }

    /// ELSE actions only run when at least one is defined.
    pub fn has_else(&self) -> bool {
        !self.else_branch().is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.then_branch().is_empty() && !self.has_else()
    }

    /// Trim every tag, drop blank ones and exact duplicates within each list.
    pub fn normalized(&self) -> Self {
        Self {
            add_tags: clean(&self.add_tags),
            remove_tags: clean(&self.remove_tags),
            else_add_tags: clean(&self.else_add_tags),
            else_remove_tags: clean(&self.else_remove_tags),
        }
    }
}

fn clean(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if !out.iter().any(|existing| existing == tag) {
            out.push(tag.to_string());
        }
    }
    out
}
