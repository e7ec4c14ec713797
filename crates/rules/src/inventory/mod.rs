//! Inventory collaborators: listing resources, writing tags and enrichment.
//!
//! The engine and runner only see the [`Inventory`] and [`Enricher`] traits.
//! [`ProxmoxClient`] talks to a live cluster; [`InMemoryInventory`] serves a
//! fixed snapshot for offline dry runs and tests.

mod memory;
mod proxmox;

use std::collections::BTreeSet;

use proxtag_core::{ExtendedField, Resource, ResourceKind};

pub use memory::InMemoryInventory;
pub use proxmox::{ProxmoxClient, RetryPolicy};

/// Errors from an inventory backend.
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("API call failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("resource {0} not found")]
    NotFound(u64),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Source of resource records and sink for tag writes.
#[async_trait::async_trait]
pub trait Inventory: Send + Sync {
    /// All taggable resources (VMs and containers).
    async fn list_resources(&self) -> Result<Vec<Resource>, InventoryError>;

    /// Replace a resource's tag string. `tags` is already delimited.
    async fn update_tags(
        &self,
        node: &str,
        vmid: u64,
        tags: &str,
        kind: ResourceKind,
    ) -> Result<(), InventoryError>;
}

/// Decorates base records with extended attribute groups.
#[async_trait::async_trait]
pub trait Enricher: Send + Sync {
    /// Return `resource` with the requested groups populated. A group that
    /// cannot be fetched falls back to its default; this never fails.
    async fn enrich(&self, resource: Resource, fields: &BTreeSet<ExtendedField>) -> Resource;
}

/// Key under which per-group enrichment failures are recorded.
pub const API_ERRORS_KEY: &str = "_api_errors";
