//! Create/update validation for scheduled reports.

use cadence_core::model::{Recipient, RecipientRole, ReportFormat, ResourceType};
use cadence_core::schedule::{ReportCadence, ScheduleKind};
use cadence_core::ValidationResult;
use chrono_tz::Tz;
use uuid::Uuid;

use super::types::{CreateReportRequest, UpdateReportRequest};

pub fn validate_create(req: &CreateReportRequest) -> ValidationResult {
    let mut result = ValidationResult::new();
    if req.name.trim().is_empty() {
        result.error("name", "name is required");
    }
    check_resource(&req.resource_type, &req.resource_id, &mut result);
    check_format(&req.format, &mut result);
    check_cadence(
        &req.schedule_kind,
        req.time_of_day.as_deref(),
        req.day_of_week,
        req.day_of_month,
        req.cron.as_deref(),
        &mut result,
    );
    if let Some(tz) = req.timezone.as_deref() {
        check_timezone(tz, &mut result);
    }
    check_recipients(&req.recipients, &mut result);
    result
}

/// Field-level checks only; the merged schedule is re-validated when the
/// update is applied.
pub fn validate_update(req: &UpdateReportRequest) -> ValidationResult {
    let mut result = ValidationResult::new();
    if req.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        result.error("name", "name is required");
    }
    if let Some(t) = &req.resource_type {
        if t.parse::<ResourceType>().is_err() {
            result.error("resource_type", format!("unsupported resource type '{t}'"));
        }
    }
    if let Some(kind) = &req.schedule_kind {
        if kind.parse::<ScheduleKind>().is_err() {
            result.error("schedule_kind", format!("unsupported schedule kind '{kind}'"));
        }
    }
    if let Some(format) = &req.format {
        check_format(format, &mut result);
    }
    if let Some(tz) = req.timezone.as_deref() {
        check_timezone(tz, &mut result);
    }
    if let Some(recipients) = &req.recipients {
        check_recipients(recipients, &mut result);
    }
    result
}

fn check_resource(resource_type: &str, resource_id: &str, result: &mut ValidationResult) {
    match resource_type.parse::<ResourceType>() {
        Ok(ResourceType::Query) => {
            if resource_id.trim().parse::<Uuid>().is_err() {
                result.error("resource_id", "query reports need a saved query id");
            }
        }
        Ok(ResourceType::Dashboard) => {
            if resource_id.trim().is_empty() {
                result.error("resource_id", "resource_id is required");
            }
        }
        Err(_) => result.error(
            "resource_type",
            format!("unsupported resource type '{resource_type}', expected dashboard or query"),
        ),
    }
}

fn check_format(format: &str, result: &mut ValidationResult) {
    if format.parse::<ReportFormat>().is_err() {
        result.error(
            "format",
            format!("unsupported format '{format}', expected pdf, csv, xlsx or png"),
        );
    }
}

fn check_cadence(
    kind: &str,
    time_of_day: Option<&str>,
    day_of_week: Option<i32>,
    day_of_month: Option<i32>,
    cron: Option<&str>,
    result: &mut ValidationResult,
) {
    let kind = match kind.parse::<ScheduleKind>() {
        Ok(k) => k,
        Err(_) => {
            result.error(
                "schedule_kind",
                format!("unsupported schedule kind '{kind}', expected daily, weekly, monthly or cron"),
            );
            return;
        }
    };
    if let Err(e) = ReportCadence::from_parts(kind, time_of_day, day_of_week, day_of_month, cron) {
        result.error(cadence_field(kind, &e.to_string()), e.to_string());
    }
}

/// Best-guess field for a cadence error message.
fn cadence_field(kind: ScheduleKind, message: &str) -> &'static str {
    if message.contains("time_of_day") {
        "time_of_day"
    } else {
        match kind {
            ScheduleKind::Weekly => "day_of_week",
            ScheduleKind::Monthly => "day_of_month",
            ScheduleKind::Cron => "cron",
            ScheduleKind::Daily => "time_of_day",
        }
    }
}

fn check_timezone(tz: &str, result: &mut ValidationResult) {
    if !tz.trim().is_empty() && tz.trim().parse::<Tz>().is_err() {
        result.warn("timezone", format!("unknown timezone '{tz}', UTC will be used"));
    }
}

fn check_recipients(recipients: &[Recipient], result: &mut ValidationResult) {
    for (i, r) in recipients.iter().enumerate() {
        let email = r.email.trim();
        if email.is_empty() || !email.contains('@') {
            result.error(format!("recipients[{i}].email"), format!("invalid email '{}'", r.email));
        }
    }
    if !recipients.iter().any(|r| r.role == RecipientRole::To) {
        result.warn("recipients", "no 'to' recipient, runs will fail delivery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> CreateReportRequest {
        serde_json::from_value(json!({
            "name": "Weekly revenue",
            "resource_type": "query",
            "resource_id": Uuid::new_v4().to_string(),
            "schedule_kind": "weekly",
            "day_of_week": 1,
            "time_of_day": "08:30",
            "format": "csv",
            "recipients": [{"email": "finance@example.com"}, {"email": "cfo@example.com", "role": "cc"}]
        }))
        .unwrap()
    }

    #[test]
    fn valid_request_passes() {
        let r = validate_create(&request());
        assert!(r.valid, "{r}");
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn weekly_needs_day_of_week_in_range() {
        let mut req = request();
        req.day_of_week = Some(7);
        assert!(validate_create(&req).has_error_at("day_of_week"));
        req.day_of_week = None;
        assert!(validate_create(&req).has_error_at("day_of_week"));
    }

    #[test]
    fn monthly_and_time_of_day_checks() {
        let mut req = request();
        req.schedule_kind = "monthly".into();
        req.day_of_month = Some(32);
        assert!(validate_create(&req).has_error_at("day_of_month"));

        req.day_of_month = Some(31);
        req.time_of_day = Some("25:00".into());
        assert!(validate_create(&req).has_error_at("time_of_day"));
    }

    #[test]
    fn cron_kind_needs_expression() {
        let mut req = request();
        req.schedule_kind = "cron".into();
        assert!(validate_create(&req).has_error_at("cron"));
        req.cron = Some("0 7 * * 1-5".into());
        assert!(validate_create(&req).valid);
    }

    #[test]
    fn resource_and_format_vocabulary() {
        let mut req = request();
        req.resource_type = "notebook".into();
        req.format = "docx".into();
        let r = validate_create(&req);
        assert!(r.has_error_at("resource_type"));
        assert!(r.has_error_at("format"));

        let mut req = request();
        req.resource_id = "not-a-uuid".into();
        assert!(validate_create(&req).has_error_at("resource_id"));
    }

    #[test]
    fn missing_to_recipient_only_warns() {
        let mut req = request();
        req.recipients.retain(|r| r.role != RecipientRole::To);
        let r = validate_create(&req);
        assert!(r.valid);
        assert_eq!(r.warnings[0].path, "recipients");
    }
}
