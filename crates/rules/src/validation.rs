//! Create/update validation for alerts.
//!
//! Everything a run would trip over is rejected here, so a saved alert
//! never fails at run time for configuration reasons.

use cadence_core::model::{ChannelType, Severity};
use cadence_core::schedule::Schedule;
use cadence_core::ValidationResult;
use chrono_tz::Tz;

use crate::operator::Operator;
use crate::request::{ChannelRequest, CreateAlertRequest, UpdateAlertRequest};

pub fn validate_create(req: &CreateAlertRequest) -> ValidationResult {
    let mut result = ValidationResult::new();
    check_name(&req.name, &mut result);
    if req.target_column.trim().is_empty() {
        result.error("target_column", "target column is required");
    }
    check_operator(&req.operator, &mut result);
    check_threshold(req.threshold, &mut result);
    check_schedule(&req.schedule, &mut result);
    if let Some(tz) = &req.timezone {
        check_timezone(tz, &mut result);
    }
    if let Some(severity) = &req.severity {
        check_severity(severity, &mut result);
    }
    if req.cooldown_minutes.is_some_and(|m| m <= 0) {
        result.warn("cooldown_minutes", "non-positive cooldown, 5 minutes will be used");
    }
    check_channels(&req.channels, &mut result);
    result
}

pub fn validate_update(req: &UpdateAlertRequest) -> ValidationResult {
    let mut result = ValidationResult::new();
    if let Some(name) = &req.name {
        check_name(name, &mut result);
    }
    if req.target_column.as_deref().is_some_and(|c| c.trim().is_empty()) {
        result.error("target_column", "target column is required");
    }
    if let Some(op) = &req.operator {
        check_operator(op, &mut result);
    }
    if let Some(threshold) = req.threshold {
        check_threshold(threshold, &mut result);
    }
    if let Some(schedule) = &req.schedule {
        check_schedule(schedule, &mut result);
    }
    if let Some(tz) = &req.timezone {
        check_timezone(tz, &mut result);
    }
    if let Some(severity) = &req.severity {
        check_severity(severity, &mut result);
    }
    if let Some(channels) = &req.channels {
        check_channels(channels, &mut result);
    }
    result
}

fn check_name(name: &str, result: &mut ValidationResult) {
    if name.trim().is_empty() {
        result.error("name", "name is required");
    }
}

fn check_operator(op: &str, result: &mut ValidationResult) {
    if op.parse::<Operator>().is_err() {
        result.error(
            "operator",
            format!(
                "unsupported operator '{op}', expected one of {}",
                Operator::ALL.join(" ")
            ),
        );
    }
}

fn check_threshold(threshold: f64, result: &mut ValidationResult) {
    if !threshold.is_finite() {
        result.error("threshold", "threshold must be a finite number");
    }
}

fn check_schedule(schedule: &str, result: &mut ValidationResult) {
    if let Err(e) = Schedule::parse(schedule) {
        result.error("schedule", e.to_string());
    }
}

/// Unknown zones are accepted; runs fall back to UTC.
fn check_timezone(tz: &str, result: &mut ValidationResult) {
    if !tz.trim().is_empty() && tz.trim().parse::<Tz>().is_err() {
        result.warn("timezone", format!("unknown timezone '{tz}', UTC will be used"));
    }
}

fn check_severity(severity: &str, result: &mut ValidationResult) {
    if severity.parse::<Severity>().is_err() {
        result.error(
            "severity",
            format!("unsupported severity '{severity}', expected critical, warning or info"),
        );
    }
}

fn check_channels(channels: &[ChannelRequest], result: &mut ValidationResult) {
    for (i, channel) in channels.iter().enumerate() {
        if channel.channel_type.parse::<ChannelType>().is_err() {
            result.error(
                format!("channels[{i}].channel_type"),
                format!("unsupported channel type '{}'", channel.channel_type),
            );
        }
        if !(channel.config.is_object() || channel.config.is_null()) {
            result.error(format!("channels[{i}].config"), "channel config must be an object");
        }
    }
}
