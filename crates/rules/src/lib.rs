//! Conditional tag rules for Proxmox VE guests.
//!
//! This crate provides:
//! - JSON rule definitions (conditions, THEN/ELSE tag actions, cron schedule)
//! - Validation with errors and warnings
//! - The rule engine that matches resources and plans tag mutations
//! - A JSON-file rule store and bounded execution history
//! - Inventory collaborators (Proxmox API client, in-memory snapshot)
//! - A cron scheduler driving live runs in the background

pub mod evaluator;
pub mod history;
pub mod inventory;
pub mod runner;
pub mod scheduler;
pub mod schema;
pub mod service;
pub mod store;
pub mod validation;
