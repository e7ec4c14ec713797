//! Rule persistence with validation and name uniqueness.
//!
//! The store is the single source of truth for rule definitions. It keeps the
//! collection in memory and rewrites one JSON document (`{rules, version,
//! updated_at}`) on every mutation.

mod core;
mod error;


pub use self::core::{RuleStore, DOCUMENT_VERSION};
pub(crate) use self::core::write_atomic;
pub use self::error::{Result, StoreError};
