//! Rule data model and its JSON contracts.
//!
//! - `Condition` / `ConditionGroup`: flat AND/OR tests over resource fields
//! - `ActionSet`: THEN and ELSE tag mutations
//! - `Rule`, `NewRule`, `RulePatch`: stored definition and its CRUD payloads
//! - `ExecutionResult`: outcome of one evaluation, consumed by stats and history

mod actions;
mod condition;
pub(crate) mod duration;
mod result;
mod rule;

pub use actions::*;
pub use condition::*;
pub use result::*;
pub use rule::*;
