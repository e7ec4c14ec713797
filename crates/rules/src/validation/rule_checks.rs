//! Name, condition and action checks.

use regex::Regex;

use super::ValidationResult;
use crate::schema::{Operator, Rule};

pub(super) fn validate_name(rule: &Rule, result: &mut ValidationResult) {
    if rule.name.trim().is_empty() {
        result.error("name", "Rule name is required");
    }
}

pub(super) fn validate_conditions(rule: &Rule, result: &mut ValidationResult) {
    if rule.conditions.is_empty() {
        result.error("conditions", "At least one condition is required");
        return;
    }

    for (i, cond) in rule.conditions.conditions.iter().enumerate() {
        let path = format!("conditions.conditions[{i}]");
        if cond.field.trim().is_empty() {
            result.warn(format!("{path}.field"), "Empty field path never resolves");
        }
        if cond.operator == Operator::Regex {
            let pattern = match cond.value.as_str() {
                Some(s) => s.to_string(),
                None => cond.value.to_string(),
            };
            if let Err(e) = Regex::new(&pattern) {
                result.warn(
                    format!("{path}.value"),
                    format!("Invalid regex '{pattern}' never matches: {e}"),
                );
            }
        }
        if cond.operator.is_numeric() && !(cond.value.is_number() || cond.value.is_string()) {
            result.warn(
                format!("{path}.value"),
                format!("'{}' expects a numeric value", cond.operator),
            );
        }
    }
}

pub(super) fn validate_actions(rule: &Rule, result: &mut ValidationResult) {
    let actions = rule.actions.normalized();
    if actions.is_empty() {
        result.error(
            "actions",
            "At least one action (THEN or ELSE add/remove tags) is required",
        );
        return;
    }

    for tag in actions.add_tags.iter().chain(&actions.else_add_tags) {
        if tag.contains(';') || tag.contains(char::is_whitespace) {
            result.warn("actions", format!("Tag '{tag}' contains a delimiter or whitespace"));
        }
    }
    for tag in &actions.add_tags {
        if actions.remove_tags.contains(tag) {
            result.warn(
                "actions",
                format!("Tag '{tag}' is both added and removed on match"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use crate::schema::*;
    use crate::validation::validate_rule;

    fn valid_rule() -> Rule {
        NewRule::new(
            "Tag running",
            ConditionGroup::all(vec![Condition::new("status", Operator::Equals, "running")]),
            ActionSet::then(&["up"], &[]),
        )
        .into_rule("r1".into(), Utc::now())
    }

    #[test]
    fn valid_rule_passes() {
        let result = validate_rule(&valid_rule());
        assert!(result.is_valid(), "{:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn collects_every_error() {
        let mut rule = valid_rule();
        rule.name = "   ".into();
        rule.conditions.conditions.clear();
        rule.actions = ActionSet::default();
        rule.schedule = ScheduleConfig {
            enabled: true,
            cron: String::new(),
        };

        let result = validate_rule(&rule);
        let messages: Vec<_> = result.errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "Rule name is required",
                "At least one condition is required",
                "At least one action (THEN or ELSE add/remove tags) is required",
                "Cron expression is required when schedule is enabled",
            ]
        );
    }

    #[test]
    fn else_only_actions_are_enough() {
        let mut rule = valid_rule();
        rule.actions = ActionSet::default().with_else(&[], &["up"]);
        assert!(validate_rule(&rule).is_valid());
    }

    #[test]
    fn blank_tags_do_not_count_as_actions() {
        let mut rule = valid_rule();
        rule.actions = ActionSet {
            add_tags: vec!["  ".into()],
            ..ActionSet::default()
        };
        assert!(!validate_rule(&rule).is_valid());
    }

    #[test]
    fn disabled_schedule_skips_cron_check() {
        let mut rule = valid_rule();
        rule.schedule = ScheduleConfig {
            enabled: false,
            cron: "not a cron".into(),
        };
        assert!(validate_rule(&rule).is_valid());

        rule.schedule.enabled = true;
        let result = validate_rule(&rule);
        assert!(result.errors.iter().any(|e| e.path == "schedule.cron"));
    }

    #[test]
    fn bad_regex_is_only_a_warning() {
        let mut rule = valid_rule();
        rule.conditions
            .push(Condition::new("name", Operator::Regex, json!("web-(")));
        let result = validate_rule(&rule);
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].path, "conditions.conditions[1].value");
    }
}
