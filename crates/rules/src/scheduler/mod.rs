//! Cron scheduling for rules.
//!
//! Each schedulable rule (`enabled`, `schedule.enabled`, non-empty cron) gets a
//! [`ScheduledJob`] holding its parsed trigger and next fire time. A single
//! background task ticks at a fixed interval and fires due jobs through the
//! [`RuleRunner`](crate::runner::RuleRunner).

mod core;
pub(crate) mod cron;
mod entry;

#[cfg(test)]
mod tests;

pub use self::core::RuleScheduler;
pub use self::cron::{next_after, parse_cron, CronError};
pub use self::entry::{ScheduleInfo, ScheduleVerification, ScheduledJob};
