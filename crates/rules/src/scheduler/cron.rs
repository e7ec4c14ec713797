//! Crontab parsing: 5-field normalization and next-fire computation.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CronError {
    #[error("Cron expression is required")]
    Empty,

    #[error("Cron must have exactly 5 fields (min hour dom month dow), got {0}")]
    FieldCount(usize),

    #[error("Invalid cron expression: {0}")]
    Parse(String),
}

/// Parse a 5-field crontab expression into a trigger.
pub fn parse_cron(expr: &str) -> Result<Schedule, CronError> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Err(CronError::Empty);
    }
    let count = trimmed.split_whitespace().count();
    if count != 5 {
        return Err(CronError::FieldCount(count));
    }
    Schedule::from_str(&normalize_cron(trimmed)).map_err(|e| CronError::Parse(e.to_string()))
}

/// First fire time strictly after `from`.
pub fn next_after(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&from).next()
}

/// Normalize a 5-field cron expression to 6-field by prepending "0 " for seconds.
///
/// The `cron` crate also numbers weekdays 1-7 starting on Sunday, while crontab
/// uses 0-7 with both 0 and 7 meaning Sunday, so numeric day-of-week values are
/// shifted. Anything that is not 5 fields passes through as-is.
pub(crate) fn normalize_cron(cron_5field: &str) -> String {
    let trimmed = cron_5field.trim();
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() != 5 {
        return trimmed.to_string();
    }
    format!(
        "0 {} {} {} {} {}",
        fields[0],
        fields[1],
        fields[2],
        fields[3],
        translate_dow(fields[4])
    )
}

fn translate_dow(field: &str) -> String {
    field
        .split(',')
        .map(translate_dow_part)
        .collect::<Vec<_>>()
        .join(",")
}

fn translate_dow_part(part: &str) -> String {
    let (range, step) = match part.split_once('/') {
        Some((r, s)) => (r, Some(s)),
        None => (part, None),
    };
    let suffix = step.map(|s| format!("/{s}")).unwrap_or_default();

    if let Some((start, end)) = range.split_once('-') {
        return match (start.parse::<u32>(), end.parse::<u32>()) {
            (Ok(a), Ok(7)) => {
                // Range ending on Sunday wraps to the start of the week.
                let hits_sunday = match step.and_then(|s| s.parse::<u32>().ok()) {
                    Some(s) if s > 0 => (7 - a) % s == 0,
                    Some(_) => false,
                    None => true,
                };
                if a == 0 {
                    format!("1-7{suffix}")
                } else if hits_sunday {
                    format!("{}-7{suffix},1", a + 1)
                } else {
                    format!("{}-7{suffix}", a + 1)
                }
            }
            (Ok(a), Ok(b)) => format!("{}-{}{suffix}", a + 1, b + 1),
            _ => part.to_string(),
        };
    }

    match range.parse::<u32>() {
        Ok(0) | Ok(7) => format!("1{suffix}"),
        Ok(n) => format!("{}{suffix}", n + 1),
        Err(_) => part.to_string(),
    }
}
