//! Schedule validation: 5-field cron expressions.

use super::ValidationResult;
use crate::scheduler::parse_cron;
use crate::schema::Rule;

const MONTH_NAMES: &[&str] = &[
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const DAY_NAMES: &[&str] = &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

pub(super) fn validate_schedule(rule: &Rule, result: &mut ValidationResult) {
    if !rule.schedule.enabled {
        return;
    }
    if rule.schedule.cron.trim().is_empty() {
        result.error(
            "schedule.cron",
            "Cron expression is required when schedule is enabled",
        );
        return;
    }
    validate_cron(&rule.schedule.cron, result);
}

pub(super) fn validate_cron(expr: &str, result: &mut ValidationResult) {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        result.error(
            "schedule.cron",
            format!(
                "Cron must have exactly 5 fields (min hour dom month dow), got {}",
                fields.len()
            ),
        );
        return;
    }

    let ranges: &[(&str, u32, u32, &[&str])] = &[
        ("minute", 0, 59, &[]),
        ("hour", 0, 23, &[]),
        ("day-of-month", 1, 31, &[]),
        ("month", 1, 12, MONTH_NAMES),
        ("day-of-week", 0, 7, DAY_NAMES),
    ];

    let mut fields_ok = true;
    for (field, (name, min, max, names)) in fields.iter().zip(ranges.iter()) {
        if !validate_cron_field(field, *min, *max, names) {
            fields_ok = false;
            result.error(
                "schedule.cron",
                format!("Invalid cron {name} field: '{field}'"),
            );
        }
    }

    if fields_ok {
        if let Err(e) = parse_cron(expr) {
            result.error("schedule.cron", e.to_string());
        }
    }
}

/// Basic cron field validation: supports *, N, N-M, */N, N-M/N, names and comma lists.
fn validate_cron_field(field: &str, min: u32, max: u32, names: &[&str]) -> bool {
    for part in field.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return false;
        }

        let (range_part, step) = if let Some((r, s)) = part.split_once('/') {
            match s.parse::<u32>() {
                Ok(v) if v > 0 => (r, Some(v)),
                _ => return false,
            }
        } else {
            (part, None)
        };

        if range_part == "*" {
            if let Some(s) = step {
                if s > max {
                    return false;
                }
            }
            continue;
        }

        if let Some((start_s, end_s)) = range_part.split_once('-') {
            match (
                field_value(start_s, min, max, names),
                field_value(end_s, min, max, names),
            ) {
                (Some(s), Some(e)) if s <= e => {}
                _ => return false,
            }
        } else if field_value(range_part, min, max, names).is_none() {
            return false;
        }
    }
    true
}

fn field_value(token: &str, min: u32, max: u32, names: &[&str]) -> Option<u32> {
    if let Ok(v) = token.parse::<u32>() {
        return (min..=max).contains(&v).then_some(v);
    }
    let upper = token.to_ascii_uppercase();
    // Month names start at 1, weekday names at 0 (Sunday).
    names
        .iter()
        .position(|n| *n == upper)
        .map(|i| i as u32 + min)
}
