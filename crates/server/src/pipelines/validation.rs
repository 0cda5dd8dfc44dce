//! Create/update validation for pipelines.

use cadence_core::model::{
    DestinationConfig, DestinationType, QualityRuleType, RuleSeverity, SourceConfig, SourceType,
    TransformStep,
};
use cadence_core::schedule::Schedule;
use cadence_core::ValidationResult;
use cadence_pipeline::transform::{check_step, TransformKind};
use chrono_tz::Tz;
use uuid::Uuid;

use super::types::{CreatePipelineRequest, QualityRuleRequest, UpdatePipelineRequest};

/// Step types that are accepted but not applied; rows pass through.
const PASS_THROUGH_STEPS: &[&str] = &["JOIN", "UNION", "PIVOT"];

pub fn validate_create(req: &CreatePipelineRequest) -> ValidationResult {
    let mut result = ValidationResult::new();
    if req.name.trim().is_empty() {
        result.error("name", "name is required");
    }
    check_source_type(&req.source_type, &mut result);
    check_source(&req.source_config, req.connection_ref, &mut result);
    check_query(req.source_query.as_deref(), &req.source_config, &mut result);
    check_destination(&req.destination_type, &req.destination_config, &mut result);
    check_steps(&req.transformation_steps, &mut result);
    check_rules(&req.quality_rules, &mut result);
    if let Some(schedule) = req.schedule.as_deref() {
        check_schedule(schedule, &mut result);
    }
    if let Some(tz) = req.timezone.as_deref() {
        check_timezone(tz, &mut result);
    }
    if req.row_limit.is_some_and(|l| l <= 0) {
        result.warn("row_limit", "non-positive row limit, 100000 will be used");
    }
    result
}

pub fn validate_update(req: &UpdatePipelineRequest) -> ValidationResult {
    let mut result = ValidationResult::new();
    if req.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        result.error("name", "name is required");
    }
    if let Some(t) = &req.source_type {
        check_source_type(t, &mut result);
    }
    if let Some(cfg) = &req.source_config {
        check_source(cfg, req.connection_ref, &mut result);
    }
    if let Some(t) = &req.destination_type {
        let cfg = req.destination_config.clone().unwrap_or_default();
        check_destination(t, &cfg, &mut result);
    }
    if let Some(steps) = &req.transformation_steps {
        check_steps(steps, &mut result);
    }
    if let Some(rules) = &req.quality_rules {
        check_rules(rules, &mut result);
    }
    if let Some(schedule) = req.schedule.as_deref().filter(|s| !s.trim().is_empty()) {
        check_schedule(schedule, &mut result);
    }
    if let Some(tz) = req.timezone.as_deref() {
        check_timezone(tz, &mut result);
    }
    result
}

fn check_source_type(t: &str, result: &mut ValidationResult) {
    if t.parse::<SourceType>().is_err() {
        result.error(
            "source_type",
            format!("unsupported source type '{t}', expected POSTGRES or MYSQL"),
        );
    }
}

fn check_source(cfg: &SourceConfig, connection_ref: Option<Uuid>, result: &mut ValidationResult) {
    if connection_ref.is_none() && !cfg.has_host() {
        result.error("source_config.host", "source config needs a host or a connection_ref");
    }
}

fn check_query(source_query: Option<&str>, cfg: &SourceConfig, result: &mut ValidationResult) {
    let has_query = [source_query, cfg.query.as_deref()]
        .into_iter()
        .flatten()
        .any(|q| !q.trim().is_empty());
    if !has_query {
        result.error("source_query", "no source query configured");
    }
}

fn check_destination(t: &str, cfg: &DestinationConfig, result: &mut ValidationResult) {
    match t.parse::<DestinationType>() {
        Ok(DestinationType::InternalRaw) => {}
        Ok(_) => {
            if cfg.connection_id.is_none() {
                result.error(
                    "destination_config.connection_id",
                    "external destinations need a connection_id",
                );
            }
            if cfg.table_name.as_deref().map_or(true, |n| n.trim().is_empty()) {
                result.error(
                    "destination_config.table_name",
                    "external destinations need a table_name",
                );
            }
        }
        Err(_) => result.error(
            "destination_type",
            format!("unsupported destination type '{t}', expected INTERNAL_RAW, POSTGRES or MYSQL"),
        ),
    }
}

fn check_steps(steps: &[TransformStep], result: &mut ValidationResult) {
    for (i, step) in steps.iter().enumerate() {
        let path = format!("transformation_steps[{i}]");
        if TransformKind::parse(&step.step_type).is_none() {
            let upper = step.step_type.trim().to_ascii_uppercase();
            if PASS_THROUGH_STEPS.contains(&upper.as_str()) {
                result.warn(
                    format!("{path}.type"),
                    format!("{upper} steps are not applied; rows pass through"),
                );
            } else {
                result.error(
                    format!("{path}.type"),
                    format!("unsupported transform step type '{}'", step.step_type),
                );
            }
            continue;
        }
        if let Err(e) = check_step(step) {
            result.error(format!("{path}.config"), e.to_string());
        }
    }
}

fn check_rules(rules: &[QualityRuleRequest], result: &mut ValidationResult) {
    for (i, rule) in rules.iter().enumerate() {
        let path = format!("quality_rules[{i}]");
        if rule.column.trim().is_empty() {
            result.error(format!("{path}.column"), "column is required");
        }
        match rule.rule_type.parse::<QualityRuleType>() {
            Ok(QualityRuleType::Regex) => match rule.value.as_ref().and_then(|v| v.as_str()) {
                Some(pattern) => {
                    if let Err(e) = regex::Regex::new(pattern) {
                        result.error(format!("{path}.value"), format!("invalid regex: {e}"));
                    }
                }
                None => result.error(format!("{path}.value"), "REGEX rules need a pattern"),
            },
            Ok(QualityRuleType::Range) => {
                let bounded = rule
                    .value
                    .as_ref()
                    .is_some_and(|v| v.get("min").is_some() || v.get("max").is_some());
                if !bounded {
                    result.error(format!("{path}.value"), "RANGE rules need a min or max");
                }
            }
            Ok(_) => {}
            Err(_) => result.error(
                format!("{path}.rule_type"),
                format!(
                    "unsupported rule type '{}', expected NOT_NULL, UNIQUE, RANGE or REGEX",
                    rule.rule_type
                ),
            ),
        }
        if let Some(severity) = &rule.severity {
            if severity.parse::<RuleSeverity>().is_err() {
                result.error(
                    format!("{path}.severity"),
                    format!("unsupported severity '{severity}', expected WARN or FAIL"),
                );
            }
        }
    }
}

fn check_schedule(schedule: &str, result: &mut ValidationResult) {
    if let Err(e) = Schedule::parse(schedule) {
        result.error("schedule", e.to_string());
    }
}

fn check_timezone(tz: &str, result: &mut ValidationResult) {
    if !tz.trim().is_empty() && tz.trim().parse::<Tz>().is_err() {
        result.warn("timezone", format!("unknown timezone '{tz}', UTC will be used"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> CreatePipelineRequest {
        serde_json::from_value(json!({
            "name": "orders nightly",
            "source_type": "POSTGRES",
            "source_config": {"host": "db.internal", "database": "shop"},
            "source_query": "SELECT * FROM orders",
            "destination_type": "INTERNAL_RAW",
            "transformation_steps": [
                {"order": 1, "type": "CAST", "config": {"casts": {"total": "FLOAT"}}},
                {"order": 2, "type": "FILTER", "config": {"column": "total", "operator": ">", "value": 0}}
            ],
            "quality_rules": [
                {"column": "email", "rule_type": "NOT_NULL", "severity": "FAIL"}
            ],
            "schedule": "0 2 * * *"
        }))
        .unwrap()
    }

    #[test]
    fn valid_request_passes() {
        let r = validate_create(&request());
        assert!(r.valid, "{r}");
    }

    #[test]
    fn source_needs_host_or_connection() {
        let mut req = request();
        req.source_config.host = None;
        assert!(validate_create(&req).has_error_at("source_config.host"));
        req.connection_ref = Some(Uuid::new_v4());
        assert!(validate_create(&req).valid);
    }

    #[test]
    fn external_destination_needs_connection_and_table() {
        let mut req = request();
        req.destination_type = "MYSQL".into();
        let r = validate_create(&req);
        assert!(r.has_error_at("destination_config.connection_id"));
        assert!(r.has_error_at("destination_config.table_name"));
    }

    #[test]
    fn collects_step_rule_and_schedule_errors() {
        let mut req = request();
        req.schedule = Some("every tuesday".into());
        req.transformation_steps.push(TransformStep {
            order: 3,
            step_type: "EXPLODE".into(),
            config: json!({}),
        });
        req.transformation_steps.push(TransformStep {
            order: 4,
            step_type: "RENAME".into(),
            config: json!({"mappings": [1]}),
        });
        req.quality_rules.push(QualityRuleRequest {
            id: None,
            column: "code".into(),
            rule_type: "REGEX".into(),
            value: Some(json!("([a-z")),
            severity: Some("PANIC".into()),
        });
        req.quality_rules.push(QualityRuleRequest {
            id: None,
            column: "qty".into(),
            rule_type: "BETWEEN".into(),
            value: None,
            severity: None,
        });

        let r = validate_create(&req);
        for path in [
            "schedule",
            "transformation_steps[2].type",
            "transformation_steps[3].config",
            "quality_rules[1].value",
            "quality_rules[1].severity",
            "quality_rules[2].rule_type",
        ] {
            assert!(r.has_error_at(path), "missing error at {path}: {r}");
        }
    }

    #[test]
    fn pass_through_steps_only_warn() {
        let mut req = request();
        req.transformation_steps.push(TransformStep {
            order: 9,
            step_type: "join".into(),
            config: json!(null),
        });
        let r = validate_create(&req);
        assert!(r.valid);
        assert_eq!(r.warnings[0].path, "transformation_steps[2].type");
    }

    #[test]
    fn rule_conversion_fills_defaults() {
        let rule = QualityRuleRequest {
            id: None,
            column: " email ".into(),
            rule_type: "not_null".into(),
            value: None,
            severity: None,
        }
        .to_rule(0)
        .unwrap();
        assert_eq!(rule.id, "rule_1");
        assert_eq!(rule.column, "email");
        assert_eq!(rule.rule_type, QualityRuleType::NotNull);
        assert_eq!(rule.severity, RuleSeverity::Warn);
    }
}
