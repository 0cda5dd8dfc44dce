//! Per-row data quality checks.

use std::collections::HashMap;

use cadence_core::model::{QualityRule, QualityRuleType, RuleSeverity};
use cadence_core::number::{coerce_f64, stringify};
use cadence_core::Row;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// One failed check on one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    pub column: String,
    pub rule_type: QualityRuleType,
    pub severity: RuleSeverity,
    pub row_index: usize,
    pub value: String,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
struct RangeBounds {
    min: Option<f64>,
    max: Option<f64>,
}

/// Check every rule against every row.
pub fn validate(rows: &[Row], rules: &[QualityRule]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for rule in rules {
        let check = RuleCheck::prepare(rule, rows);
        for (idx, row) in rows.iter().enumerate() {
            let value = row.get(&rule.column).unwrap_or(&Value::Null);
            if check.violated(value) {
                violations.push(Violation {
                    rule_id: rule.id.clone(),
                    column: rule.column.clone(),
                    rule_type: rule.rule_type,
                    severity: rule.severity,
                    row_index: idx,
                    value: stringify(value),
                    message: format!(
                        "Row {idx}, column '{}': {} rule violated",
                        rule.column, rule.rule_type
                    ),
                });
            }
        }
    }
    violations
}

/// First violation whose rule has FAIL severity.
pub fn first_failure(violations: &[Violation]) -> Option<&Violation> {
    violations
        .iter()
        .find(|v| v.severity == RuleSeverity::Fail)
}

enum RuleCheck {
    NotNull,
    Unique(HashMap<String, usize>),
    Range(RangeBounds),
    Pattern(Pattern),
    Skip,
}

enum Pattern {
    Regex(Regex),
    Literal(String),
}

impl RuleCheck {
    fn prepare(rule: &QualityRule, rows: &[Row]) -> Self {
        match rule.rule_type {
            QualityRuleType::NotNull => RuleCheck::NotNull,
            QualityRuleType::Unique => {
                let mut counts = HashMap::with_capacity(rows.len());
                for row in rows {
                    let key = stringify(row.get(&rule.column).unwrap_or(&Value::Null));
                    *counts.entry(key).or_insert(0) += 1;
                }
                RuleCheck::Unique(counts)
            }
            QualityRuleType::Range => match rule.value.as_ref().and_then(range_bounds) {
                Some(bounds) => RuleCheck::Range(bounds),
                None => {
                    debug!(rule_id = %rule.id, "RANGE rule without usable bounds, skipping");
                    RuleCheck::Skip
                }
            },
            QualityRuleType::Regex => match rule.value.as_ref() {
                Some(Value::String(p)) => RuleCheck::Pattern(match Regex::new(p) {
                    Ok(re) => Pattern::Regex(re),
                    Err(_) => Pattern::Literal(p.clone()),
                }),
                _ => RuleCheck::Skip,
            },
        }
    }

    fn violated(&self, value: &Value) -> bool {
        match self {
            RuleCheck::NotNull => value.is_null() || stringify(value).is_empty(),
            RuleCheck::Unique(counts) => counts.get(&stringify(value)).copied().unwrap_or(0) > 1,
            RuleCheck::Range(bounds) => {
                let n = coerce_f64(value);
                bounds.min.is_some_and(|min| n < min) || bounds.max.is_some_and(|max| n > max)
            }
            RuleCheck::Pattern(pattern) => {
                if value.is_null() {
                    return false;
                }
                let s = stringify(value);
                match pattern {
                    Pattern::Regex(re) => !re.is_match(&s),
                    Pattern::Literal(lit) => !s.contains(lit.as_str()),
                }
            }
            RuleCheck::Skip => false,
        }
    }
}

/// Bounds come either as a JSON object or as a string holding one.
fn range_bounds(value: &Value) -> Option<RangeBounds> {
    match value {
        Value::Object(_) => serde_json::from_value(value.clone()).ok(),
        Value::String(s) => serde_json::from_str(s).ok(),
        _ => None,
    }
}
